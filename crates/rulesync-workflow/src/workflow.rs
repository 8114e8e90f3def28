// workflow.rs — Fetch → merge → review → publish → verify.
//
// One workflow instance reconciles one target. It owns the state machine:
// every operation moves it through `ReconciliationState` and remote failures
// end up in `Failed` rather than in an `Err`. `Err` is reserved for calls the
// workflow refuses (busy, invalid for the current state) and for local
// persistence problems.
//
// Human approval is not a blocking call. After `start` the workflow rests in
// `ReadyForReview` until `approve` is called, possibly by another process
// after the snapshot was restored from the store.
//
// Cancellation: dropping a `start` future while fetching resets to `Unknown`
// and discards the attempt. Dropping an `approve` future while publishing
// cannot take the write back, so the workflow moves to `Verifying` and
// `resume` or `verify` confirms what actually landed. Dropping a manual
// `verify` goes back to the state it was called from.
//
// `Busy` comes from the `remote_write` gate, never from the stored state: a
// snapshot resting in `Verifying` has no call running.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rulesync_policy::{
    FragmentLibrary, FragmentSelection, MergedPolicyDocument, PolicyMerger, RawPolicyDocument,
    ReviewDiff,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{PolicyClient, TokenProvider};
use crate::config::ReconcileSettings;
use crate::error::{ClientError, ReconcileError};
use crate::events::{EventDispatcher, ReconcileEvent};
use crate::state::{FailureKind, ReconciliationState};
use crate::store::{ReconciliationSnapshot, ReconciliationStore};

/// What a person needs to set the rules up by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualSetup {
    /// Fragments to paste inside the documents scope.
    pub rules: String,
    /// Console page where the rules are edited.
    pub console_url: String,
}

/// Reconciles one target's rules.
pub struct ReconciliationWorkflow {
    settings: ReconcileSettings,
    merger: PolicyMerger,
    client: Arc<dyn PolicyClient>,
    tokens: Arc<dyn TokenProvider>,
    snapshot: Mutex<ReconciliationSnapshot>,
    /// Held for the whole of every remote operation.
    remote_write: tokio::sync::Mutex<()>,
    events: EventDispatcher,
    store: Option<ReconciliationStore>,
}

impl ReconciliationWorkflow {
    /// A fresh workflow in `Unknown`.
    pub fn new(
        settings: ReconcileSettings,
        library: FragmentLibrary,
        client: Arc<dyn PolicyClient>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let snapshot = ReconciliationSnapshot::new(settings.target.clone(), settings.selection);
        Self::from_parts(settings, library, client, tokens, snapshot)
    }

    /// Pick up a stored attempt. In-flight states are settled first: an
    /// interrupted fetch restarts from `Unknown`, an interrupted publish
    /// resumes in `Verifying`.
    pub fn restore(
        settings: ReconcileSettings,
        library: FragmentLibrary,
        client: Arc<dyn PolicyClient>,
        tokens: Arc<dyn TokenProvider>,
        snapshot: ReconciliationSnapshot,
    ) -> Self {
        if snapshot.target != settings.target {
            tracing::warn!(
                stored = %snapshot.target,
                project = %settings.target,
                "stored snapshot belongs to another target, starting over"
            );
            return Self::new(settings, library, client, tokens);
        }
        let before = snapshot.state.clone();
        let snapshot = snapshot.settle();
        if snapshot.state != before {
            tracing::warn!(
                project = %settings.target,
                from = %before,
                to = %snapshot.state,
                "restored an interrupted attempt"
            );
        }
        Self::from_parts(settings, library, client, tokens, snapshot)
    }

    /// Restore the target's snapshot from `store` if there is one, and keep
    /// saving to it.
    pub fn open(
        settings: ReconcileSettings,
        library: FragmentLibrary,
        client: Arc<dyn PolicyClient>,
        tokens: Arc<dyn TokenProvider>,
        store: ReconciliationStore,
    ) -> Result<Self, ReconcileError> {
        let workflow = match store.load(&settings.target)? {
            Some(snapshot) => Self::restore(settings, library, client, tokens, snapshot),
            None => Self::new(settings, library, client, tokens),
        };
        Ok(workflow.with_store(store))
    }

    fn from_parts(
        settings: ReconcileSettings,
        library: FragmentLibrary,
        client: Arc<dyn PolicyClient>,
        tokens: Arc<dyn TokenProvider>,
        snapshot: ReconciliationSnapshot,
    ) -> Self {
        Self {
            settings,
            merger: PolicyMerger::new(library),
            client,
            tokens,
            snapshot: Mutex::new(snapshot),
            remote_write: tokio::sync::Mutex::new(()),
            events: EventDispatcher::new(),
            store: None,
        }
    }

    /// Save a snapshot after every transition.
    pub fn with_store(mut self, store: ReconciliationStore) -> Self {
        self.persist_to(&store);
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    // ── Queries ──

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    pub fn state(&self) -> ReconciliationState {
        self.lock().state.clone()
    }

    pub fn snapshot(&self) -> ReconciliationSnapshot {
        self.lock().clone()
    }

    pub fn selection(&self) -> FragmentSelection {
        self.lock().selection
    }

    pub fn raw(&self) -> Option<RawPolicyDocument> {
        self.lock().raw.clone()
    }

    pub fn merged(&self) -> Option<MergedPolicyDocument> {
        self.lock().merged.clone()
    }

    /// Raw and merged text for the diff renderer, once a merge exists.
    pub fn review(&self) -> Option<ReviewDiff> {
        let snap = self.lock();
        match (&snap.raw, &snap.merged) {
            (Some(raw), Some(merged)) => Some(merged.diff(raw)),
            _ => None,
        }
    }

    /// The manual fallback: always available, whatever the state.
    pub fn manual_setup(&self) -> ManualSetup {
        ManualSetup {
            rules: self.merger.library().compose(self.selection()),
            console_url: self.settings.console_url.clone(),
        }
    }

    // ── Operations ──

    /// Fetch the current rules with a fresh token and merge them.
    ///
    /// Ends in `ReadyForReview`, `NeedsSetup` or `Failed`.
    pub async fn start(&self) -> Result<ReconciliationState, ReconcileError> {
        let _write = self.remote_write.try_lock().map_err(|_| self.busy())?;
        self.transition_with(ReconciliationState::Fetching, |snap| {
            snap.attempt_id = Uuid::new_v4();
            snap.raw = None;
            snap.merged = None;
        })?;
        let _guard = InFlightGuard::fetching(self);
        let target = &self.settings.target;

        let token = match self.tokens.auth_token(true).await {
            Ok(token) => token,
            Err(e) => return self.fail_client("token request before fetch failed", &e),
        };

        tracing::info!(project = %target, client = self.client.name(), "fetching current rules");
        let raw = match self.client.fetch_policy(target, &token).await {
            Ok(raw) => raw,
            Err(ClientError::NotFound { .. }) => {
                tracing::info!(project = %target, "no rules deployed, manual setup required");
                self.transition(ReconciliationState::NeedsSetup)?;
                return Ok(self.state());
            }
            Err(e) => return self.fail_client("fetching rules failed", &e),
        };

        let selection = self.selection();
        match self.merger.merge(&raw, selection) {
            Ok(merged) => {
                if merged.removed_insecure_rule() {
                    self.dispatch_insecure_removed();
                }
                self.transition_with(ReconciliationState::ReadyForReview, |snap| {
                    snap.raw = Some(raw);
                    snap.merged = Some(merged);
                })?;
            }
            Err(e) => {
                tracing::error!(project = %target, error = ?e, "cannot merge into fetched rules");
                self.transition_with(
                    ReconciliationState::failed(FailureKind::MalformedPolicyDocument, e.to_string()),
                    |snap| snap.raw = Some(raw),
                )?;
            }
        }
        Ok(self.state())
    }

    /// Change the optional fragments. A document under review is merged
    /// again from the retained raw rules.
    pub fn set_selection(
        &self,
        selection: FragmentSelection,
    ) -> Result<ReconciliationState, ReconcileError> {
        let _write = self.remote_write.try_lock().map_err(|_| self.busy())?;
        let saved = {
            let mut guard = self.lock();
            let snap = &mut *guard;
            snap.selection = selection;
            if snap.merged.is_some() {
                if let Some(raw) = &snap.raw {
                    match self.merger.merge(raw, selection) {
                        Ok(merged) => snap.merged = Some(merged),
                        Err(e) => {
                            tracing::error!(error = ?e, "re-merge failed, dropping review");
                            snap.merged = None;
                        }
                    }
                }
            }
            snap.updated_at = Utc::now();
            snap.clone()
        };
        self.persist(&saved);
        Ok(saved.state)
    }

    /// Human approval: publish the reviewed document, then verify it.
    ///
    /// Valid from `ReadyForReview`, or from `Failed` when the reviewed
    /// document was kept. Returns [`ReconcileError::Busy`] while any other
    /// remote operation for this target is running; no second write is sent
    /// in that case.
    pub async fn approve(&self) -> Result<ReconciliationState, ReconcileError> {
        let _write = self.remote_write.try_lock().map_err(|_| self.busy())?;

        let merged = self.lock().merged.clone();
        let content = match merged {
            Some(merged) => merged.into_content(),
            None => {
                return Err(ReconcileError::NothingToPublish {
                    target: self.settings.target.to_string(),
                })
            }
        };
        self.transition(ReconciliationState::Publishing)?;
        let _guard = InFlightGuard::publishing(self);
        let target = &self.settings.target;

        let token = match self.tokens.auth_token(true).await {
            Ok(token) => token,
            Err(e) => return self.fail_client("token request before publish failed", &e),
        };

        tracing::info!(project = %target, bytes = content.len(), "publishing merged rules");
        match self.client.publish_policy(target, &token, &content).await {
            Ok(outcome) if outcome.success => {}
            Ok(outcome) => {
                let message = outcome
                    .message
                    .unwrap_or_else(|| "publish was rejected".to_string());
                tracing::error!(project = %target, message = %message, "publish rejected");
                return self.fail(FailureKind::PublishRejected, message);
            }
            Err(e) => return self.fail_client("publishing rules failed", &e),
        }

        let attempt_id = self.lock().attempt_id;
        self.events.dispatch(&ReconcileEvent::PolicyPublished {
            attempt_id,
            target: target.clone(),
            bytes: content.len(),
            timestamp: Utc::now(),
        });
        self.transition(ReconciliationState::Verifying)?;
        self.run_verification().await
    }

    /// Check the live rules without publishing, e.g. after they were
    /// pasted into the console by hand. Also finishes a verification left
    /// pending by an interrupted publish.
    pub async fn verify(&self) -> Result<ReconciliationState, ReconcileError> {
        let _write = self.remote_write.try_lock().map_err(|_| self.busy())?;
        let previous = self.state();
        if previous != ReconciliationState::Verifying {
            self.transition(ReconciliationState::Verifying)?;
        }
        let _guard = InFlightGuard::verifying(self, previous);
        self.run_verification().await
    }

    /// Finish a verification left pending by an interrupted publish. Other
    /// states are returned unchanged.
    pub async fn resume(&self) -> Result<ReconciliationState, ReconcileError> {
        let _write = self.remote_write.try_lock().map_err(|_| self.busy())?;
        if self.state() != ReconciliationState::Verifying {
            return Ok(self.state());
        }
        self.run_verification().await
    }

    async fn run_verification(&self) -> Result<ReconciliationState, ReconcileError> {
        let target = &self.settings.target;

        let token = match self.tokens.auth_token(true).await {
            Ok(token) => token,
            Err(e) => return self.fail_client("token request before verification failed", &e),
        };

        let live = match self.client.fetch_policy(target, &token).await {
            Ok(doc) => doc.content,
            // No live rules cannot contain the required grants.
            Err(ClientError::NotFound { .. }) => String::new(),
            Err(e) => return self.fail_client("verification fetch failed", &e),
        };

        let missing = self.merger.library().missing_required(&live);
        if missing.is_empty() {
            tracing::info!(project = %target, "live rules contain the required grants");
            self.transition(ReconciliationState::Complete)?;
            return Ok(self.state());
        }

        let missing: Vec<String> = missing.iter().map(ToString::to_string).collect();
        tracing::error!(project = %target, missing = ?missing, "live rules lack required fragments");
        let attempt_id = self.lock().attempt_id;
        self.events.dispatch(&ReconcileEvent::VerificationFailed {
            attempt_id,
            target: target.clone(),
            missing: missing.clone(),
            timestamp: Utc::now(),
        });
        self.fail(
            FailureKind::VerificationMismatch,
            format!("live rules are missing {}", missing.join(", ")),
        )
    }

    // ── Internals ──

    fn lock(&self) -> MutexGuard<'_, ReconciliationSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn busy(&self) -> ReconcileError {
        ReconcileError::Busy {
            target: self.settings.target.to_string(),
        }
    }

    fn transition(&self, next: ReconciliationState) -> Result<(), ReconcileError> {
        self.transition_with(next, |_| {})
    }

    /// Apply `update` and move to `next` atomically, then log, emit and save.
    fn transition_with(
        &self,
        next: ReconciliationState,
        update: impl FnOnce(&mut ReconciliationSnapshot),
    ) -> Result<(), ReconcileError> {
        let (from, saved) = {
            let mut snap = self.lock();
            if !snap.state.can_transition_to(&next) {
                return Err(ReconcileError::InvalidTransition {
                    target: self.settings.target.to_string(),
                    from: snap.state.to_string(),
                    to: next.to_string(),
                });
            }
            update(&mut *snap);
            let from = std::mem::replace(&mut snap.state, next);
            snap.updated_at = Utc::now();
            (from, snap.clone())
        };
        self.record(&from, &saved);
        Ok(())
    }

    fn record(&self, from: &ReconciliationState, saved: &ReconciliationSnapshot) {
        tracing::info!(
            project = %saved.target,
            attempt = %saved.attempt_id,
            from = %from,
            to = %saved.state,
            "reconciliation state changed"
        );
        self.events.dispatch(&ReconcileEvent::state_changed(
            saved.attempt_id,
            &saved.target,
            from,
            &saved.state,
        ));
        self.persist(saved);
    }

    fn fail(
        &self,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Result<ReconciliationState, ReconcileError> {
        self.transition(ReconciliationState::failed(kind, message))?;
        Ok(self.state())
    }

    /// Log the full client error, keep the short message for display.
    fn fail_client(
        &self,
        context: &str,
        error: &ClientError,
    ) -> Result<ReconciliationState, ReconcileError> {
        tracing::error!(project = %self.settings.target, error = ?error, "{context}");
        let kind = match error {
            ClientError::Auth { .. } => FailureKind::Auth,
            ClientError::Transport { .. } | ClientError::NotFound { .. } => FailureKind::Transport,
        };
        self.fail(kind, error.to_string())
    }

    fn dispatch_insecure_removed(&self) {
        tracing::warn!(
            project = %self.settings.target,
            "fetched rules allow anyone to read and write; the catch-all rule is removed in the merge"
        );
        let attempt_id = self.lock().attempt_id;
        self.events.dispatch(&ReconcileEvent::InsecureRuleRemoved {
            attempt_id,
            target: self.settings.target.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Called when a future is dropped while still in `interrupted`.
    fn settle_cancelled(&self, interrupted: &ReconciliationState, next: &ReconciliationState) {
        if interrupted == next {
            return;
        }
        let (from, saved) = {
            let mut snap = self.lock();
            if snap.state != *interrupted {
                return;
            }
            if *interrupted == ReconciliationState::Fetching {
                snap.raw = None;
                snap.merged = None;
            }
            let from = std::mem::replace(&mut snap.state, next.clone());
            snap.updated_at = Utc::now();
            (from, snap.clone())
        };
        tracing::warn!(
            project = %saved.target,
            interrupted = %from,
            "operation cancelled"
        );
        self.record(&from, &saved);
    }

    fn persist(&self, snapshot: &ReconciliationSnapshot) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(snapshot) {
                tracing::warn!(project = %snapshot.target, error = %e, "failed to save snapshot");
            }
        }
    }

    fn persist_to(&self, store: &ReconciliationStore) {
        if let Err(e) = store.save(&self.snapshot()) {
            tracing::warn!(project = %self.settings.target, error = %e, "failed to save snapshot");
        }
    }
}

/// Settles the state if the future holding it is dropped mid-call.
struct InFlightGuard<'a> {
    workflow: &'a ReconciliationWorkflow,
    state: ReconciliationState,
    on_cancel: ReconciliationState,
}

impl<'a> InFlightGuard<'a> {
    /// A dropped fetch discards the attempt.
    fn fetching(workflow: &'a ReconciliationWorkflow) -> Self {
        Self {
            workflow,
            state: ReconciliationState::Fetching,
            on_cancel: ReconciliationState::Unknown,
        }
    }

    /// A dropped publish may still have landed.
    fn publishing(workflow: &'a ReconciliationWorkflow) -> Self {
        Self {
            workflow,
            state: ReconciliationState::Publishing,
            on_cancel: ReconciliationState::Verifying,
        }
    }

    /// A dropped manual verification changed nothing remotely.
    fn verifying(workflow: &'a ReconciliationWorkflow, previous: ReconciliationState) -> Self {
        Self {
            workflow,
            state: ReconciliationState::Verifying,
            on_cancel: previous,
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.workflow.settle_cancelled(&self.state, &self.on_cancel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TargetId;
    use crate::memory::{MemoryPolicyClient, StaticTokenProvider};

    const EXISTING: &str = "rules_version = '2';\nservice cloud.firestore {\n  match /databases/{database}/documents {\n    match /public/{doc} {\n      allow read;\n    }\n  }\n}\n";

    fn target() -> TargetId {
        TargetId::new("demo-project")
    }

    fn workflow(client: Arc<MemoryPolicyClient>) -> ReconciliationWorkflow {
        ReconciliationWorkflow::new(
            ReconcileSettings::new(target()),
            FragmentLibrary::default(),
            client,
            Arc::new(StaticTokenProvider::new("tok")),
        )
    }

    #[tokio::test]
    async fn start_reaches_review() {
        let client = Arc::new(MemoryPolicyClient::new().with_document(&target(), EXISTING));
        let wf = workflow(client.clone());
        assert_eq!(wf.start().await.unwrap(), ReconciliationState::ReadyForReview);

        let diff = wf.review().unwrap();
        assert_eq!(diff.original, EXISTING);
        assert!(diff.modified.contains("function hasAnyRole"));
        assert_eq!(client.publish_count(), 0);
    }

    #[tokio::test]
    async fn approve_publishes_and_completes() {
        let client = Arc::new(MemoryPolicyClient::new().with_document(&target(), EXISTING));
        let wf = workflow(client.clone());
        wf.start().await.unwrap();
        assert_eq!(wf.approve().await.unwrap(), ReconciliationState::Complete);
        assert_eq!(client.publish_count(), 1);
        assert_eq!(
            client.document(&target()).as_deref(),
            Some(wf.merged().unwrap().content())
        );
    }

    #[tokio::test]
    async fn approve_without_review_is_refused() {
        let client = Arc::new(MemoryPolicyClient::new());
        let wf = workflow(client.clone());
        assert!(matches!(
            wf.approve().await,
            Err(ReconcileError::NothingToPublish { .. })
        ));
        assert_eq!(wf.state(), ReconciliationState::Unknown);
        assert_eq!(client.publish_count(), 0);
    }

    #[tokio::test]
    async fn malformed_rules_fail_without_review() {
        let client = Arc::new(
            MemoryPolicyClient::new().with_document(&target(), "service cloud.firestore {}"),
        );
        let wf = workflow(client);
        let state = wf.start().await.unwrap();
        let reason = state.failure().unwrap();
        assert_eq!(reason.kind, FailureKind::MalformedPolicyDocument);
        assert!(reason.requires_human());
        assert!(wf.merged().is_none());
        assert!(wf.raw().is_some());
    }

    #[tokio::test]
    async fn selection_change_re_merges_review() {
        let client = Arc::new(MemoryPolicyClient::new().with_document(&target(), EXISTING));
        let wf = workflow(client);
        wf.start().await.unwrap();
        assert!(wf.merged().unwrap().content().contains("Allow admins"));

        let state = wf
            .set_selection(FragmentSelection {
                include_admin_grant: false,
            })
            .unwrap();
        assert_eq!(state, ReconciliationState::ReadyForReview);
        assert!(!wf.merged().unwrap().content().contains("Allow admins"));
        assert!(!wf.manual_setup().rules.contains("Allow admins"));
    }

    #[tokio::test]
    async fn complete_cannot_be_approved_again() {
        let client = Arc::new(MemoryPolicyClient::new().with_document(&target(), EXISTING));
        let wf = workflow(client.clone());
        wf.start().await.unwrap();
        wf.approve().await.unwrap();
        assert!(matches!(
            wf.approve().await,
            Err(ReconcileError::InvalidTransition { .. })
        ));
        assert_eq!(client.publish_count(), 1);
    }

    #[test]
    fn manual_setup_points_at_console() {
        let wf = workflow(Arc::new(MemoryPolicyClient::new()));
        let manual = wf.manual_setup();
        assert_eq!(
            manual.console_url,
            "https://console.firebase.google.com/project/demo-project/firestore/rules"
        );
        assert_eq!(
            manual.rules,
            FragmentLibrary::default().compose(FragmentSelection::default())
        );
    }
}
