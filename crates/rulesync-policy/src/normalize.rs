// normalize.rs — Whitespace normalization for comparing rules text.
//
// Rules consoles and deploy tools reformat documents on save, so presence
// checks never compare raw bytes: both sides are flattened to one line with
// every whitespace run collapsed to a single space.

/// Collapse whitespace runs to one space, flatten to a single line, and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether `needle` occurs in `haystack` once both are normalized.
pub fn contains_normalized(haystack: &str, needle: &str) -> bool {
    haystack_contains(&normalize_whitespace(haystack), needle)
}

/// Like [`contains_normalized`] with an already-normalized haystack.
pub(crate) fn haystack_contains(normalized_haystack: &str, needle: &str) -> bool {
    let needle = normalize_whitespace(needle);
    !needle.is_empty() && normalized_haystack.contains(&needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_and_flattens() {
        assert_eq!(
            normalize_whitespace("  match /a {\n\t  allow read;\n}  "),
            "match /a { allow read; }"
        );
    }

    #[test]
    fn empty_needle_is_never_contained() {
        assert!(!contains_normalized("anything", " \n "));
    }

    #[test]
    fn containment_ignores_layout() {
        assert!(contains_normalized(
            "service x {\n  match /a {\n    allow read;\n  }\n}",
            "match /a { allow read; }"
        ));
    }
}
