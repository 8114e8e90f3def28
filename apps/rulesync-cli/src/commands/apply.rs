// apply.rs — Publish the reviewed rules and verify them.

use rulesync_workflow::{ReconcileError, ReconciliationState};

use super::{report, Context};

pub async fn execute(ctx: &Context) -> anyhow::Result<()> {
    let workflow = ctx.workflow()?;

    let result = if workflow.state() == ReconciliationState::Verifying {
        println!("A previous publish was interrupted; verifying it instead of publishing again.");
        workflow.resume().await
    } else {
        workflow.approve().await
    };

    match result {
        Ok(state) => report(&workflow, &state),
        Err(ReconcileError::NothingToPublish { .. }) => {
            anyhow::bail!("nothing has been reviewed yet; run `rulesync plan` first")
        }
        Err(e) => Err(e.into()),
    }
}
