// manual.rs — Print the rules for setting them up by hand.
//
// Works offline: no service URL or token is needed.

use rulesync_workflow::ManualSetup;

use super::{print_manual, Context};

pub fn execute(ctx: &Context) -> anyhow::Result<()> {
    let settings = ctx.settings()?;
    let setup = ManualSetup {
        rules: ctx.config.library().compose(settings.selection),
        console_url: settings.console_url,
    };
    print_manual(&setup);
    Ok(())
}
