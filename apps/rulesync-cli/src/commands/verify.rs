// verify.rs — Check the live rules without publishing.

use super::{report, Context};

pub async fn execute(ctx: &Context) -> anyhow::Result<()> {
    let workflow = ctx.workflow()?;
    let state = workflow.verify().await?;
    report(&workflow, &state)
}
