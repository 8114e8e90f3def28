// plan.rs — Fetch, merge and present the rules for review.

use std::path::Path;

use rulesync_policy::MergeWarning;
use rulesync_workflow::ReconciliationState;

use super::{report, Context};

pub async fn execute(ctx: &Context, no_admin: bool, diff_dir: Option<&Path>) -> anyhow::Result<()> {
    let workflow = ctx.workflow()?;

    if workflow.state() == ReconciliationState::Verifying {
        println!("A previous publish was interrupted; verifying it first.");
        let state = workflow.resume().await?;
        report(&workflow, &state)?;
    }

    let mut selection = ctx.config.selection();
    if no_admin {
        selection.include_admin_grant = false;
    }
    workflow.set_selection(selection)?;

    let state = workflow.start().await?;
    if state != ReconciliationState::ReadyForReview {
        return report(&workflow, &state);
    }
    let (Some(diff), Some(merged)) = (workflow.review(), workflow.merged()) else {
        anyhow::bail!("no merged rules to review");
    };

    for warning in &merged.warnings {
        match warning {
            MergeWarning::InsecureRuleRemoved { span } => println!(
                "WARNING: the current rules let anyone read and write every document \
                 (bytes {}..{}). That rule is removed in the merged rules.",
                span.start, span.end
            ),
        }
    }
    if !merged.skipped_helpers.is_empty() {
        println!(
            "Keeping existing helper functions: {}",
            merged.skipped_helpers.join(", ")
        );
    }

    if diff.is_unchanged() {
        println!("The current rules already contain the required grants.");
        println!("Run `rulesync verify` to confirm and finish.");
        return Ok(());
    }

    if merged.bootstrap {
        println!("The project has an empty rules document; a complete one will be created.");
    }
    let inserted: Vec<String> = merged.inserted.iter().map(ToString::to_string).collect();
    println!("Fragments to insert: {}", inserted.join(", "));

    match diff_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let original = dir.join("original.rules");
            let modified = dir.join("merged.rules");
            std::fs::write(&original, &diff.original)?;
            std::fs::write(&modified, &diff.modified)?;
            println!(
                "Wrote the review files. Compare with:\n  diff -u {} {}",
                original.display(),
                modified.display()
            );
        }
        None => {
            println!();
            println!("{}", diff.modified);
        }
    }

    println!();
    println!("Review the changes, then run `rulesync apply`.");
    Ok(())
}
