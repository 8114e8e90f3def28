//! Configuration structures
//!
//! Loaded from `.rulesync/config.toml`. Everything the workflow needs is
//! passed into its constructor from here; nothing is read from globals.

use std::path::{Path, PathBuf};

use rulesync_policy::{FragmentLibrary, FragmentSelection, DEFAULT_CONFIG_COLLECTION};
use serde::{Deserialize, Serialize};

use crate::client::TargetId;
use crate::error::ReconcileError;

/// Directory holding config, snapshots and the event log.
pub const CONFIG_DIR: &str = ".rulesync";

/// Top-level configuration from `.rulesync/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesyncConfig {
    /// Which project's rules are reconciled.
    #[serde(default)]
    pub target: TargetConfig,

    /// The backend service that reads and writes rules.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Fragment options.
    #[serde(default)]
    pub rules: RulesConfig,

    /// How authorization tokens are obtained.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Snapshot directory. Defaults to `.rulesync/state`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Event log. Defaults to `.rulesync/events.jsonl`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Project identifier; also used in the console URL.
    #[serde(default)]
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the backend service.
    #[serde(default)]
    pub url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Collection holding the application's configuration documents.
    #[serde(default = "default_config_collection")]
    pub config_collection: String,

    /// Insert the admin read/write grant.
    #[serde(default = "default_include_admin_grant")]
    pub include_admin_grant: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            config_collection: default_config_collection(),
            include_admin_grant: default_include_admin_grant(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shell command printing a token on stdout, run before every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_command: Option<String>,

    /// Environment variable read when no command is configured.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_command: None,
            token_env: default_token_env(),
        }
    }
}

// Serde default functions
fn default_timeout_secs() -> u64 {
    30
}

fn default_config_collection() -> String {
    DEFAULT_CONFIG_COLLECTION.to_string()
}

fn default_include_admin_grant() -> bool {
    true
}

fn default_token_env() -> String {
    "RULESYNC_AUTH_TOKEN".to_string()
}

impl RulesyncConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ReconcileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ReconcileError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ReconcileError::ConfigError {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Try to load config, returning default if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ReconcileError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Standard config location for a project root.
    pub fn path_for_project(project_root: &Path) -> PathBuf {
        project_root.join(CONFIG_DIR).join("config.toml")
    }

    pub fn state_dir(&self, project_root: &Path) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| project_root.join(CONFIG_DIR).join("state"))
    }

    pub fn events_log(&self, project_root: &Path) -> PathBuf {
        self.events_log
            .clone()
            .unwrap_or_else(|| project_root.join(CONFIG_DIR).join("events.jsonl"))
    }

    pub fn selection(&self) -> FragmentSelection {
        FragmentSelection {
            include_admin_grant: self.rules.include_admin_grant,
        }
    }

    /// Fragment library for the configured collection.
    pub fn library(&self) -> FragmentLibrary {
        FragmentLibrary::for_config_collection(&self.rules.config_collection)
    }
}

/// Settings for one workflow instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub target: TargetId,
    pub selection: FragmentSelection,
    /// Where a person can paste the rules by hand.
    pub console_url: String,
}

impl ReconcileSettings {
    pub fn new(target: TargetId) -> Self {
        let console_url = console_url_for(&target);
        Self {
            target,
            selection: FragmentSelection::default(),
            console_url,
        }
    }

    pub fn with_selection(mut self, selection: FragmentSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn from_config(config: &RulesyncConfig) -> Self {
        Self::new(TargetId::new(config.target.project_id.clone())).with_selection(config.selection())
    }
}

/// Firebase console page for a project's Firestore rules.
pub fn console_url_for(target: &TargetId) -> String {
    let id = target.as_str();
    let id = if id.is_empty() { "_" } else { id };
    format!("https://console.firebase.google.com/project/{id}/firestore/rules")
}
