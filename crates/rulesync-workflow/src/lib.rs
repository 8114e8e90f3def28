//! # rulesync-workflow
//!
//! Reconciles a project's security rules with what the application needs:
//! fetch the current rules, merge the required fragments in, hand the diff to
//! a person for approval, publish, and verify that the live rules contain the
//! required grants.
//!
//! - [`ReconciliationWorkflow`] — the state machine driving one target
//! - [`PolicyClient`] / [`TokenProvider`] — the remote collaborators
//! - [`ReconciliationStore`] — snapshots that survive restarts
//! - [`EventDispatcher`] — lifecycle events for sinks such as [`LogSink`]
//!
//! ## Key invariants
//!
//! - **Human in the loop**: nothing is published without an explicit
//!   [`ReconciliationWorkflow::approve`] call.
//! - **Verify before done**: `Complete` is only reached by re-reading the
//!   live rules after a publish or a manual setup.
//! - **One remote call at a time**: a second fetch, publish or verification
//!   for the same target is refused with [`ReconcileError::Busy`].
//! - **Fresh credentials**: a new token is requested before every remote call.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod state;
pub mod store;
pub mod workflow;

pub use client::{AuthToken, PolicyClient, PublishOutcome, TargetId, TokenProvider};
pub use config::{console_url_for, ReconcileSettings, RulesyncConfig, CONFIG_DIR};
pub use error::{ClientError, ReconcileError};
pub use events::{EventDispatcher, LogSink, NotificationSink, ReconcileEvent};
pub use memory::{MemoryPolicyClient, StaticTokenProvider};
pub use state::{FailureKind, FailureReason, ReconciliationState};
pub use store::{ReconciliationSnapshot, ReconciliationStore};
pub use workflow::{ManualSetup, ReconciliationWorkflow};

// Re-export the policy types callers need alongside the workflow.
pub use rulesync_policy::{
    FragmentLibrary, FragmentName, FragmentSelection, MergedPolicyDocument, RawPolicyDocument,
    ReviewDiff,
};
