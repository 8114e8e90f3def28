// state.rs — The reconciliation state machine.
//
//   Unknown → Fetching → ReadyForReview → Publishing → Verifying → Complete
//                      ↘ NeedsSetup
//   Fetching, Publishing and Verifying may fail; Failed is always retryable.
//
// Verifying can also be entered directly (manual "verify" after the rules
// were pasted into a console), and a cancelled fetch goes back to Unknown.
// Verifying may also be a resting state: a publish whose outcome is unknown
// leaves the workflow there until a verification runs or a new fetch starts.
// Only the workflow moves between states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a failure, used to pick the recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or permission failure talking to the remote store.
    Transport,
    /// No authorization token could be obtained.
    Auth,
    /// The fetched rules have no unique documents scope.
    MalformedPolicyDocument,
    /// The remote side refused the publish.
    PublishRejected,
    /// Publish succeeded but the live rules lack the required fragments.
    VerificationMismatch,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::Auth => write!(f, "auth"),
            FailureKind::MalformedPolicyDocument => write!(f, "malformed_policy_document"),
            FailureKind::PublishRejected => write!(f, "publish_rejected"),
            FailureKind::VerificationMismatch => write!(f, "verification_mismatch"),
        }
    }
}

/// Why the workflow failed. `message` is short and meant for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Failures that must not be retried automatically: a person has to
    /// decide, usually by falling back to the manual console instructions.
    pub fn requires_human(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::MalformedPolicyDocument | FailureKind::VerificationMismatch
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Where a reconciliation attempt stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconciliationState {
    /// Nothing fetched for this attempt.
    Unknown,

    /// Reading the current rules.
    Fetching,

    /// The project has no rules document; only manual setup can proceed.
    NeedsSetup,

    /// A merged document is waiting for human approval.
    ReadyForReview,

    /// The merged document is being written.
    Publishing,

    /// Re-reading the live rules to confirm the required grants.
    Verifying,

    /// Live rules contain the required grants.
    Complete,

    Failed { reason: FailureReason },
}

impl fmt::Display for ReconciliationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationState::Unknown => write!(f, "unknown"),
            ReconciliationState::Fetching => write!(f, "fetching"),
            ReconciliationState::NeedsSetup => write!(f, "needs_setup"),
            ReconciliationState::ReadyForReview => write!(f, "ready_for_review"),
            ReconciliationState::Publishing => write!(f, "publishing"),
            ReconciliationState::Verifying => write!(f, "verifying"),
            ReconciliationState::Complete => write!(f, "complete"),
            ReconciliationState::Failed { .. } => write!(f, "failed"),
        }
    }
}

impl ReconciliationState {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        ReconciliationState::Failed {
            reason: FailureReason::new(kind, message),
        }
    }

    /// States that only exist while a call is running. A stored snapshot
    /// in one of these is settled on restore.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ReconciliationState::Fetching | ReconciliationState::Publishing
        )
    }

    /// Acceptable stopping points.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconciliationState::Complete | ReconciliationState::NeedsSetup
        )
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            ReconciliationState::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    /// Check whether transitioning from this state to `next` is valid.
    pub fn can_transition_to(&self, next: &ReconciliationState) -> bool {
        use ReconciliationState::*;

        matches!(
            (self, next),
            (Unknown, Fetching)
                | (Fetching, NeedsSetup)
                | (Fetching, ReadyForReview)
                | (Fetching, Failed { .. })
                // Fetch cancelled: nothing from the attempt is kept.
                | (Fetching, Unknown)
                | (ReadyForReview, Publishing)
                | (Publishing, Verifying)
                | (Publishing, Failed { .. })
                | (Verifying, Complete)
                | (Verifying, Failed { .. })
                // Re-fetch from any settled state.
                | (NeedsSetup, Fetching)
                | (ReadyForReview, Fetching)
                | (Complete, Fetching)
                | (Failed { .. }, Fetching)
                // Abandon a pending verification for a fresh fetch.
                | (Verifying, Fetching)
                // Retry a failed publish; the reviewed document is kept.
                | (Failed { .. }, Publishing)
                // Manual verify is available whenever nothing is in flight.
                | (Unknown, Verifying)
                | (NeedsSetup, Verifying)
                | (ReadyForReview, Verifying)
                | (Complete, Verifying)
                | (Failed { .. }, Verifying)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> ReconciliationState {
        ReconciliationState::failed(FailureKind::Transport, "offline")
    }

    #[test]
    fn happy_path_transitions() {
        use ReconciliationState::*;
        let path = [
            Unknown,
            Fetching,
            ReadyForReview,
            Publishing,
            Verifying,
            Complete,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} → {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn cannot_skip_review() {
        assert!(!ReconciliationState::Fetching.can_transition_to(&ReconciliationState::Publishing));
        assert!(!ReconciliationState::Unknown.can_transition_to(&ReconciliationState::Publishing));
    }

    #[test]
    fn complete_only_after_verifying() {
        use ReconciliationState::*;
        for from in [Unknown, Fetching, NeedsSetup, ReadyForReview, Publishing, failed()] {
            assert!(!from.can_transition_to(&Complete), "{from} → complete");
        }
    }

    #[test]
    fn failed_is_retryable() {
        assert!(failed().can_transition_to(&ReconciliationState::Fetching));
        assert!(failed().can_transition_to(&ReconciliationState::Publishing));
        assert!(failed().can_transition_to(&ReconciliationState::Verifying));
    }

    #[test]
    fn in_flight_states_cannot_restart() {
        use ReconciliationState::*;
        for from in [Fetching, Publishing] {
            assert!(from.is_in_flight());
            assert!(!from.can_transition_to(&Fetching));
        }
        assert!(!Fetching.can_transition_to(&Verifying));
        assert!(!Publishing.can_transition_to(&Unknown));
        assert!(!Publishing.can_transition_to(&Fetching));
    }

    #[test]
    fn pending_verification_can_be_abandoned() {
        use ReconciliationState::*;
        assert!(!Verifying.is_in_flight());
        assert!(Verifying.can_transition_to(&Fetching));
        assert!(!Verifying.can_transition_to(&Publishing));
    }

    #[test]
    fn requires_human_for_malformed_and_mismatch() {
        assert!(FailureReason::new(FailureKind::MalformedPolicyDocument, "x").requires_human());
        assert!(FailureReason::new(FailureKind::VerificationMismatch, "x").requires_human());
        assert!(!FailureReason::new(FailureKind::Transport, "x").requires_human());
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_string(&failed()).unwrap();
        assert!(json.contains("\"state\":\"failed\""));
        assert!(json.contains("\"kind\":\"transport\""));
        let restored: ReconciliationState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, failed());
    }

    #[test]
    fn display_format() {
        assert_eq!(ReconciliationState::ReadyForReview.to_string(), "ready_for_review");
        assert_eq!(failed().to_string(), "failed");
        assert_eq!(
            FailureReason::new(FailureKind::Auth, "expired").to_string(),
            "auth: expired"
        );
    }
}
