// mod.rs — Shared command context and output helpers.

pub mod apply;
pub mod manual;
pub mod plan;
pub mod status;
pub mod verify;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rulesync_workflow::{
    EventDispatcher, LogSink, ManualSetup, ReconcileSettings, ReconciliationState,
    ReconciliationStore, ReconciliationWorkflow, RulesyncConfig, TokenProvider,
};

use crate::http::RunServiceClient;
use crate::token::{CommandTokenProvider, EnvTokenProvider};

/// Project root plus its loaded config.
pub struct Context {
    pub project_root: PathBuf,
    pub config: RulesyncConfig,
}

impl Context {
    pub fn load(project_root: PathBuf) -> anyhow::Result<Self> {
        let path = RulesyncConfig::path_for_project(&project_root);
        let config = RulesyncConfig::load_or_default(&path)?;
        Ok(Self {
            project_root,
            config,
        })
    }

    pub fn settings(&self) -> anyhow::Result<ReconcileSettings> {
        if self.config.target.project_id.is_empty() {
            anyhow::bail!(
                "no project configured; set [target] project_id in {}",
                RulesyncConfig::path_for_project(&self.project_root).display()
            );
        }
        Ok(ReconcileSettings::from_config(&self.config))
    }

    pub fn store(&self) -> anyhow::Result<ReconciliationStore> {
        Ok(ReconciliationStore::new(
            self.config.state_dir(&self.project_root),
        )?)
    }

    /// Workflow wired to the run service, the configured token source, the
    /// snapshot store and the event log.
    pub fn workflow(&self) -> anyhow::Result<ReconciliationWorkflow> {
        let settings = self.settings()?;
        let service = &self.config.service;
        if service.url.is_empty() {
            anyhow::bail!(
                "no service URL configured; set [service] url in {}",
                RulesyncConfig::path_for_project(&self.project_root).display()
            );
        }
        let client = Arc::new(RunServiceClient::new(
            &service.url,
            Duration::from_secs(service.timeout_secs),
        )?);
        let tokens: Arc<dyn TokenProvider> = match &self.config.auth.token_command {
            Some(command) => Arc::new(CommandTokenProvider::new(command)),
            None => Arc::new(EnvTokenProvider::new(&self.config.auth.token_env)),
        };

        let mut events = EventDispatcher::new();
        events.add_sink(Box::new(LogSink::new(
            self.config.events_log(&self.project_root),
        )));

        let workflow = ReconciliationWorkflow::open(
            settings,
            self.config.library(),
            client,
            tokens,
            self.store()?,
        )?;
        Ok(workflow.with_events(events))
    }
}

pub fn print_manual(setup: &ManualSetup) {
    println!("Add these rules inside `match /databases/{{database}}/documents {{`:");
    println!("{}", setup.rules);
    println!();
    println!("Edit the rules at: {}", setup.console_url);
    println!("Then run `rulesync verify`.");
}

/// Print where the workflow ended up. Failures become a non-zero exit.
pub fn report(workflow: &ReconciliationWorkflow, state: &ReconciliationState) -> anyhow::Result<()> {
    match state {
        ReconciliationState::Complete => {
            println!("Rules verified: the live rules grant the required access.");
        }
        ReconciliationState::NeedsSetup => {
            println!(
                "No rules are deployed for {}. Set them up by hand:",
                workflow.settings().target
            );
            println!();
            print_manual(&workflow.manual_setup());
        }
        ReconciliationState::Failed { reason } => {
            println!("Failed ({}): {}", reason.kind, reason.message);
            if reason.requires_human() {
                println!("This needs a manual fix; `rulesync manual` prints the rules to add.");
            } else {
                println!("Retry the last command, or set the rules up with `rulesync manual`.");
            }
            anyhow::bail!("reconciliation failed: {}", reason.kind);
        }
        other => println!("State: {other}"),
    }
    Ok(())
}
