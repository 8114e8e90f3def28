//! # rulesync-policy
//!
//! Security rule fragments and the merge that grants the application the
//! access it needs without weakening the rules a project already has.
//!
//! - [`FragmentLibrary`] — the named rule fragments and the START/END template
//! - [`InsecurePatternMatcher`] — formatting-tolerant detection and removal of
//!   the open-to-everyone catch-all rule
//! - [`PolicyMerger`] — inserts the selected fragments into the documents scope
//!
//! ## Key invariants
//!
//! - **Never guess**: a document without exactly one documents scope is
//!   rejected as malformed.
//! - **No duplicates**: fragments and helper functions already present are
//!   not inserted again, so merging the output again is a no-op.
//! - **Pure**: the same raw document and selection always produce the same
//!   bytes.

pub mod document;
pub mod error;
pub mod fragments;
pub mod matcher;
pub mod merger;
pub mod normalize;

pub use document::{MergeWarning, MergedPolicyDocument, RawPolicyDocument, ReviewDiff};
pub use error::PolicyError;
pub use fragments::{FragmentLibrary, FragmentName, FragmentSelection, DEFAULT_CONFIG_COLLECTION};
pub use matcher::{InsecureMatch, InsecurePatternMatcher, Span, TolerantPattern};
pub use merger::{PolicyMerger, DOCUMENTS_ANCHOR};
pub use normalize::{contains_normalized, normalize_whitespace};
