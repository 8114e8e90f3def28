//! Collaborator contracts for the two remote operations.
//!
//! The workflow never talks to the network itself. Callers supply a
//! [`PolicyClient`] that reads and writes the rules document and a
//! [`TokenProvider`] that issues authorization tokens. A fresh token is
//! requested immediately before every privileged call.

use std::fmt;

use async_trait::async_trait;
use rulesync_policy::RawPolicyDocument;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Identifies the project whose rules are reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bearer token for one privileged call. Never cached by the workflow.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Response of a publish call.
///
/// A call can succeed at the transport level and still report
/// `success: false` with a message from the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PublishOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Reads and writes a project's rules document.
#[async_trait]
pub trait PolicyClient: Send + Sync {
    /// Fetch the current rules.
    ///
    /// Returns [`ClientError::NotFound`] when the project has no rules at all.
    async fn fetch_policy(
        &self,
        target: &TargetId,
        token: &AuthToken,
    ) -> Result<RawPolicyDocument, ClientError>;

    /// Replace the rules with `content`.
    async fn publish_policy(
        &self,
        target: &TargetId,
        token: &AuthToken,
        content: &str,
    ) -> Result<PublishOutcome, ClientError>;

    /// Client display name (for logs).
    fn name(&self) -> &str;
}

/// Issues authorization tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A token for the next privileged call. `force_refresh` asks the
    /// provider to bypass any cache of its own.
    async fn auth_token(&self, force_refresh: bool) -> Result<AuthToken, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_token_debug_is_redacted() {
        let token = AuthToken::new("very-secret");
        assert!(!format!("{token:?}").contains("very-secret"));
        assert_eq!(token.secret(), "very-secret");
    }

    #[test]
    fn target_id_serializes_as_string() {
        let json = serde_json::to_string(&TargetId::new("demo-project")).unwrap();
        assert_eq!(json, "\"demo-project\"");
    }

    #[test]
    fn publish_outcome_omits_empty_message() {
        let json = serde_json::to_string(&PublishOutcome::ok()).unwrap();
        assert_eq!(json, r#"{"success":true}"#);
        let rejected: PublishOutcome =
            serde_json::from_str(r#"{"success":false,"message":"compile error"}"#).unwrap();
        assert_eq!(rejected, PublishOutcome::rejected("compile error"));
    }
}
