// status.rs — Show stored reconciliation state.

use super::Context;

pub fn execute(ctx: &Context) -> anyhow::Result<()> {
    let settings = ctx.settings()?;
    let store = ctx.store()?;

    let Some(snapshot) = store.load(&settings.target)? else {
        println!("No reconciliation recorded for {}.", settings.target);
        println!("Run `rulesync plan` to start.");
        return Ok(());
    };

    println!("Project:  {}", snapshot.target);
    println!("Attempt:  {}", snapshot.attempt_id);
    println!("State:    {}", snapshot.state);
    println!(
        "Updated:  {}",
        snapshot.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "Admin grant: {}",
        if snapshot.selection.include_admin_grant {
            "included"
        } else {
            "left out"
        }
    );
    if let Some(reason) = snapshot.state.failure() {
        println!("Failure:  {reason}");
    }
    if let Some(merged) = &snapshot.merged {
        if merged.removed_insecure_rule() {
            println!("The merged rules remove an open read/write catch-all.");
        }
    }

    let others: Vec<_> = store
        .list()?
        .into_iter()
        .filter(|s| s.target != snapshot.target)
        .collect();
    if !others.is_empty() {
        println!();
        println!("Other projects:");
        for other in others {
            println!("  {:<30} {}", other.target.as_str(), other.state);
        }
    }
    Ok(())
}
