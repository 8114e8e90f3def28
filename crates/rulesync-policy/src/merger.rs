// merger.rs — Merge required rule fragments into an existing rules document.
//
// merge(raw, selection):
//
// 1. Blank raw document → bootstrap: START + fragments + END.
// 2. Locate the documents scope anchor. Missing or repeated → error; the
//    merger never guesses an insertion point.
// 3. Drop fragments already present (whitespace-normalized containment) and
//    helper functions already defined (signature substring).
// 4. Insert the remaining fragments right after the anchor.
// 5. If the raw document contains the insecure catch-all, cut its first
//    occurrence out of the result and record a warning.
//
// The merge is a pure function of its inputs; re-merging the output is a
// no-op.

use crate::document::{MergedPolicyDocument, RawPolicyDocument};
use crate::error::PolicyError;
use crate::fragments::{FragmentLibrary, FragmentName, FragmentSelection};
use crate::matcher::{InsecurePatternMatcher, Span, TolerantPattern};
use crate::normalize::{haystack_contains, normalize_whitespace};

/// Scope every Firestore rules document opens exactly once.
pub const DOCUMENTS_ANCHOR: &str = "match /databases/{database}/documents {";

/// Merges a fragment library into rules documents.
#[derive(Debug, Clone)]
pub struct PolicyMerger {
    library: FragmentLibrary,
    matcher: InsecurePatternMatcher,
    anchor: TolerantPattern,
}

impl PolicyMerger {
    pub fn new(library: FragmentLibrary) -> Self {
        let matcher = InsecurePatternMatcher::from_library(&library);
        Self {
            library,
            matcher,
            anchor: TolerantPattern::new(DOCUMENTS_ANCHOR),
        }
    }

    pub fn library(&self) -> &FragmentLibrary {
        &self.library
    }

    pub fn matcher(&self) -> &InsecurePatternMatcher {
        &self.matcher
    }

    /// Produce the merged document for `raw` with the selected fragments.
    pub fn merge(
        &self,
        raw: &RawPolicyDocument,
        selection: FragmentSelection,
    ) -> Result<MergedPolicyDocument, PolicyError> {
        if raw.is_blank() {
            tracing::debug!("no existing rules, bootstrapping a new document");
            return Ok(MergedPolicyDocument::new(
                self.library.bootstrap_document(selection),
                true,
                self.library.selected(selection),
                Vec::new(),
                Default::default(),
            ));
        }

        let anchor = self.locate_anchor(&raw.content)?;
        let insecure = self.matcher.detect(&raw.content);
        let normalized_raw = normalize_whitespace(&raw.content);

        let mut to_insert = String::new();
        let mut inserted = Vec::new();
        let mut skipped_helpers = Vec::new();

        for name in self.library.selected(selection) {
            let fragment = self.library.get(name);
            if haystack_contains(&normalized_raw, fragment) {
                tracing::debug!(fragment = %name, "fragment already present");
                continue;
            }
            let text = if name == FragmentName::HelperFunctions {
                self.dedupe_helpers(fragment, &raw.content, &mut skipped_helpers)
            } else {
                Some(fragment.to_string())
            };
            if let Some(text) = text {
                to_insert.push_str(&text);
                inserted.push(name);
            }
        }

        let mut content = String::with_capacity(raw.content.len() + to_insert.len());
        content.push_str(&raw.content[..anchor.end]);
        content.push_str(&to_insert);
        content.push_str(&raw.content[anchor.end..]);

        if insecure.found() {
            // The fragments never contain the catch-all, so the first hit in
            // the merged text is the one found in the raw document.
            content = self.matcher.strip(&content);
            tracing::warn!("removed insecure catch-all rule from merged document");
        }

        Ok(MergedPolicyDocument::new(
            content,
            false,
            inserted,
            skipped_helpers,
            insecure,
        ))
    }

    fn locate_anchor(&self, content: &str) -> Result<Span, PolicyError> {
        let hits = self.anchor.find_all(content);
        match hits.as_slice() {
            [span] => Ok(*span),
            [] => Err(PolicyError::missing_anchor(DOCUMENTS_ANCHOR)),
            many => Err(PolicyError::ambiguous_anchor(DOCUMENTS_ANCHOR, many.len())),
        }
    }

    /// Remove helper definitions the existing document already has.
    ///
    /// Matching is by signature substring; a definition runs from
    /// `function <name>` to the first `}`. Returns `None` when no helper is
    /// left to insert.
    fn dedupe_helpers(
        &self,
        fragment: &str,
        existing: &str,
        skipped: &mut Vec<String>,
    ) -> Option<String> {
        let mut text = fragment.to_string();
        for (name, signature) in self.library.helper_signatures() {
            if !existing.contains(&signature) {
                continue;
            }
            if let Some(start) = text.find(&signature) {
                let end = text[start..]
                    .find('}')
                    .map_or(text.len(), |offset| start + offset + 1);
                text.replace_range(start..end, "");
                skipped.push(name.to_string());
            }
        }

        let any_left = self
            .library
            .helper_signatures()
            .any(|(_, signature)| text.contains(&signature));
        any_left.then_some(text)
    }
}

impl Default for PolicyMerger {
    fn default() -> Self {
        Self::new(FragmentLibrary::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragments::{ADMIN_GRANT, HELPER_FUNCTIONS, INSECURE_CATCH_ALL, RULES_END, RULES_START};

    const EXISTING: &str = "rules_version = '2';\nservice cloud.firestore {\n  match /databases/{database}/documents {\n    match /public/{doc} {\n      allow read;\n    }\n  }\n}\n";

    fn merger() -> PolicyMerger {
        PolicyMerger::default()
    }

    #[test]
    fn empty_document_bootstraps() {
        let lib = FragmentLibrary::default();
        let merged = merger()
            .merge(&RawPolicyDocument::new(""), FragmentSelection::default())
            .unwrap();
        assert!(merged.bootstrap);
        assert_eq!(
            merged.content(),
            format!(
                "{RULES_START}{ADMIN_GRANT}{}{HELPER_FUNCTIONS}{RULES_END}",
                lib.required_grant
            )
        );
        assert!(merged.warnings.is_empty());
    }

    #[test]
    fn whitespace_only_document_is_not_bootstrapped() {
        let err = merger()
            .merge(&RawPolicyDocument::new(" \n\t"), FragmentSelection::default())
            .unwrap_err();
        assert!(matches!(err, PolicyError::MalformedPolicyDocument { .. }));
    }

    #[test]
    fn inserts_after_anchor() {
        let lib = FragmentLibrary::default();
        let merged = merger()
            .merge(&RawPolicyDocument::new(EXISTING), FragmentSelection::default())
            .unwrap();
        let anchor_end = EXISTING.find("documents {").unwrap() + "documents {".len();
        let expected = format!(
            "{}{}{}",
            &EXISTING[..anchor_end],
            lib.compose(FragmentSelection::default()),
            &EXISTING[anchor_end..]
        );
        assert_eq!(merged.content(), expected);
        assert_eq!(
            merged.inserted,
            vec![
                FragmentName::AdminGrant,
                FragmentName::RequiredGrant,
                FragmentName::HelperFunctions
            ]
        );
    }

    #[test]
    fn merge_is_deterministic() {
        let raw = RawPolicyDocument::new(EXISTING);
        let a = merger().merge(&raw, FragmentSelection::default()).unwrap();
        let b = merger().merge(&raw, FragmentSelection::default()).unwrap();
        assert_eq!(a.content(), b.content());
    }

    #[test]
    fn remerging_output_is_noop() {
        let m = merger();
        let first = m
            .merge(&RawPolicyDocument::new(EXISTING), FragmentSelection::default())
            .unwrap();
        let second_raw = RawPolicyDocument::new(first.content());
        let second = m.merge(&second_raw, FragmentSelection::default()).unwrap();
        assert_eq!(second.content(), first.content());
        assert!(second.inserted.is_empty());
        assert!(second.is_noop(&second_raw));
        assert_eq!(second.content().matches("function isDocOwner").count(), 1);
        assert_eq!(second.content().matches("function hasAnyRole").count(), 1);
    }

    #[test]
    fn existing_helper_definitions_are_not_duplicated() {
        let raw = EXISTING.replace(
            "    match /public",
            "    function isDocOwner(docId) {\n      return request.auth.uid == docId;\n    }\n    match /public",
        );
        let merged = merger()
            .merge(&RawPolicyDocument::new(raw), FragmentSelection::default())
            .unwrap();
        assert_eq!(merged.skipped_helpers, vec!["isDocOwner".to_string()]);
        assert_eq!(merged.content().matches("function isDocOwner").count(), 1);
        assert_eq!(merged.content().matches("function hasAnyRole").count(), 1);
        assert!(merged.inserted.contains(&FragmentName::HelperFunctions));
    }

    #[test]
    fn all_helpers_present_drops_helper_fragment() {
        let raw = EXISTING.replace(
            "    match /public",
            "    function isDocOwner(id) { return true; }\n    function hasAnyRole(r) { return false; }\n    match /public",
        );
        let merged = merger()
            .merge(&RawPolicyDocument::new(raw), FragmentSelection::default())
            .unwrap();
        assert!(!merged.inserted.contains(&FragmentName::HelperFunctions));
        assert!(!merged.content().contains("// Utility functions"));
        assert_eq!(merged.skipped_helpers.len(), 2);
    }

    #[test]
    fn insecure_rule_is_stripped_with_warning() {
        let raw = EXISTING.replace(
            "\n    match /public",
            &format!("{INSECURE_CATCH_ALL}\n    match /public"),
        );
        let merged = merger()
            .merge(&RawPolicyDocument::new(&raw), FragmentSelection::default())
            .unwrap();
        assert!(merged.insecure.found());
        assert!(merged.removed_insecure_rule());
        assert!(!merger().matcher().matches(merged.content()));
        assert!(merged.content().contains("allow read, write: if hasAnyRole"));
    }

    #[test]
    fn admin_grant_can_be_left_out() {
        let merged = merger()
            .merge(
                &RawPolicyDocument::new(EXISTING),
                FragmentSelection {
                    include_admin_grant: false,
                },
            )
            .unwrap();
        assert!(!merged.content().contains("Allow admins"));
        assert_eq!(merged.inserted.first(), Some(&FragmentName::RequiredGrant));
    }

    #[test]
    fn missing_anchor_is_malformed() {
        let raw = RawPolicyDocument::new("service cloud.firestore {\n  match /other {\n  }\n}");
        let err = merger().merge(&raw, FragmentSelection::default()).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedPolicyDocument { .. }));
    }

    #[test]
    fn repeated_anchor_is_malformed() {
        let raw = RawPolicyDocument::new(format!("{EXISTING}{EXISTING}"));
        let err = merger().merge(&raw, FragmentSelection::default()).unwrap_err();
        match err {
            PolicyError::MalformedPolicyDocument { reason } => assert!(reason.contains("2 times")),
        }
    }

    #[test]
    fn reformatted_anchor_is_kept_verbatim() {
        let raw = EXISTING.replace(
            "match /databases/{database}/documents {",
            "match /databases/{database}/documents\n  {",
        );
        let merged = merger()
            .merge(&RawPolicyDocument::new(&raw), FragmentSelection::default())
            .unwrap();
        assert!(merged
            .content()
            .contains("match /databases/{database}/documents\n  {\n    // Allow admins"));
    }
}
