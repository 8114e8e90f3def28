//! # rulesync-cli
//!
//! Command-line driver for the rules reconciliation workflow:
//! - `rulesync plan` — fetch and merge, write the review diff
//! - `rulesync apply` — publish the reviewed rules and verify them
//! - `rulesync verify` — check the live rules without publishing
//! - `rulesync manual` — print the rules to paste into the console
//! - `rulesync status` — show the stored reconciliation state
//!
//! Configuration lives in `.rulesync/config.toml` under the project root.

mod commands;
mod http;
mod token;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Reconcile Firestore security rules with what the application needs.
#[derive(Parser)]
#[command(name = "rulesync", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the current rules and prepare the merged document for review.
    Plan {
        /// Leave out the admin read/write grant.
        #[arg(long)]
        no_admin: bool,
        /// Write the original and merged rules into this directory.
        #[arg(long)]
        diff_dir: Option<PathBuf>,
    },
    /// Publish the reviewed rules, then verify them.
    Apply,
    /// Verify the live rules, e.g. after pasting them by hand.
    Verify,
    /// Print the rules and console link for manual setup.
    Manual,
    /// Show the stored state for the configured project.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays usable for the rules text.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rulesync_workflow=info".parse()?)
                .add_directive("rulesync=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let ctx = commands::Context::load(project_root)?;

    match cli.command {
        Commands::Plan { no_admin, diff_dir } => {
            commands::plan::execute(&ctx, no_admin, diff_dir.as_deref()).await
        }
        Commands::Apply => commands::apply::execute(&ctx).await,
        Commands::Verify => commands::verify::execute(&ctx).await,
        Commands::Manual => commands::manual::execute(&ctx),
        Commands::Status => commands::status::execute(&ctx),
    }
}
