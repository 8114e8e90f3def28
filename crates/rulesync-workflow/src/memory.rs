//! In-memory collaborators for development and tests.
//!
//! [`MemoryPolicyClient`] keeps one rules document per target and counts the
//! remote calls made against it. [`StaticTokenProvider`] hands out numbered
//! tokens so callers can check that each privileged call got its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rulesync_policy::RawPolicyDocument;

use crate::client::{AuthToken, PolicyClient, PublishOutcome, TargetId, TokenProvider};
use crate::error::ClientError;

/// Rules store held in memory.
#[derive(Default)]
pub struct MemoryPolicyClient {
    documents: Mutex<HashMap<TargetId, String>>,
    fetches: AtomicUsize,
    publishes: AtomicUsize,
}

impl MemoryPolicyClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `target` with an existing rules document.
    pub fn with_document(self, target: &TargetId, content: impl Into<String>) -> Self {
        self.set_document(target, content);
        self
    }

    pub fn set_document(&self, target: &TargetId, content: impl Into<String>) {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.clone(), content.into());
    }

    pub fn document(&self, target: &TargetId) -> Option<String> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyClient for MemoryPolicyClient {
    async fn fetch_policy(
        &self,
        target: &TargetId,
        _token: &AuthToken,
    ) -> Result<RawPolicyDocument, ClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%target, "MemoryPolicyClient: fetch");
        self.document(target)
            .map(RawPolicyDocument::new)
            .ok_or_else(|| ClientError::NotFound {
                target: target.to_string(),
            })
    }

    async fn publish_policy(
        &self,
        target: &TargetId,
        _token: &AuthToken,
        content: &str,
    ) -> Result<PublishOutcome, ClientError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%target, bytes = content.len(), "MemoryPolicyClient: publish");
        self.set_document(target, content);
        Ok(PublishOutcome::ok())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Token provider that never fails and numbers its tokens.
#[derive(Default)]
pub struct StaticTokenProvider {
    prefix: String,
    issued: AtomicUsize,
}

impl StaticTokenProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn auth_token(&self, _force_refresh: bool) -> Result<AuthToken, ClientError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AuthToken::new(format!("{}-{n}", self.prefix)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_missing_target_is_not_found() {
        let client = MemoryPolicyClient::new();
        let err = client
            .fetch_policy(&TargetId::new("p"), &AuthToken::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound { .. }));
        assert_eq!(client.fetch_count(), 1);
    }

    #[tokio::test]
    async fn publish_replaces_document() {
        let target = TargetId::new("p");
        let client = MemoryPolicyClient::new().with_document(&target, "old");
        let outcome = client
            .publish_policy(&target, &AuthToken::new("t"), "new")
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(client.document(&target).as_deref(), Some("new"));
        assert_eq!(client.publish_count(), 1);
    }

    #[tokio::test]
    async fn tokens_are_numbered() {
        let tokens = StaticTokenProvider::new("tok");
        assert_eq!(tokens.auth_token(true).await.unwrap().secret(), "tok-1");
        assert_eq!(tokens.auth_token(true).await.unwrap().secret(), "tok-2");
        assert_eq!(tokens.issued(), 2);
    }
}
