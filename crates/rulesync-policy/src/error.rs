// error.rs — Error types for rule merging.

use thiserror::Error;

/// Errors that can occur while merging rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The document has no unique scope to insert fragments into. Merging
    /// stops here instead of guessing an insertion point.
    #[error("malformed policy document: {reason}")]
    MalformedPolicyDocument { reason: String },
}

impl PolicyError {
    pub(crate) fn missing_anchor(anchor: &str) -> Self {
        PolicyError::MalformedPolicyDocument {
            reason: format!("no `{anchor}` scope found"),
        }
    }

    pub(crate) fn ambiguous_anchor(anchor: &str, count: usize) -> Self {
        PolicyError::MalformedPolicyDocument {
            reason: format!("`{anchor}` scope appears {count} times"),
        }
    }
}
