// document.rs — Rules documents before and after a merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fragments::FragmentName;
use crate::matcher::{InsecureMatch, Span};
use crate::normalize::normalize_whitespace;

/// The rules document as fetched from the remote store.
///
/// Untrusted input: it may be empty (no rules deployed yet) or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPolicyDocument {
    pub content: String,

    /// Ruleset name or other version marker, when the store reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// When the store says this ruleset was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl RawPolicyDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            version: None,
            update_time: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_update_time(mut self, update_time: DateTime<Utc>) -> Self {
        self.update_time = Some(update_time);
        self
    }

    /// No content at all: the project has no rules to merge into.
    /// Whitespace is content and goes through the normal merge.
    pub fn is_blank(&self) -> bool {
        self.content.is_empty()
    }
}

/// Something the reviewer must be told about a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum MergeWarning {
    /// The insecure catch-all rule was removed. `span` locates it in the
    /// raw document.
    InsecureRuleRemoved { span: Span },
}

/// The merged rules document. Never mutated after creation: changing the
/// raw document or the selection produces a new merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedPolicyDocument {
    content: String,

    /// Built from the START/END template because no rules existed.
    pub bootstrap: bool,

    /// Fragments inserted, in insertion order.
    pub inserted: Vec<FragmentName>,

    /// Helper functions left out because the raw document defines them.
    #[serde(default)]
    pub skipped_helpers: Vec<String>,

    /// Insecure rule detection on the raw document.
    #[serde(default)]
    pub insecure: InsecureMatch,

    #[serde(default)]
    pub warnings: Vec<MergeWarning>,
}

impl MergedPolicyDocument {
    pub(crate) fn new(
        content: String,
        bootstrap: bool,
        inserted: Vec<FragmentName>,
        skipped_helpers: Vec<String>,
        insecure: InsecureMatch,
    ) -> Self {
        let warnings = insecure
            .span
            .map(|span| vec![MergeWarning::InsecureRuleRemoved { span }])
            .unwrap_or_default();
        Self {
            content,
            bootstrap,
            inserted,
            skipped_helpers,
            insecure,
            warnings,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_content(self) -> String {
        self.content
    }

    pub fn removed_insecure_rule(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, MergeWarning::InsecureRuleRemoved { .. }))
    }

    /// The merge changes nothing beyond formatting.
    pub fn is_noop(&self, raw: &RawPolicyDocument) -> bool {
        normalize_whitespace(&self.content) == normalize_whitespace(&raw.content)
    }

    /// The two texts handed to a diff renderer.
    pub fn diff(&self, raw: &RawPolicyDocument) -> ReviewDiff {
        ReviewDiff {
            original: raw.content.clone(),
            modified: self.content.clone(),
        }
    }
}

/// Raw vs merged text, for human review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDiff {
    pub original: String,
    pub modified: String,
}

impl ReviewDiff {
    pub fn is_unchanged(&self) -> bool {
        self.original == self.modified
    }
}
