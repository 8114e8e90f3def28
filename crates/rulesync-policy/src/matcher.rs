// matcher.rs — Formatting-tolerant matching of rule fragments.
//
// Rules documents are hand-edited and reformatted by tools, so a fragment is
// matched in two stages instead of byte for byte:
//
// 1. Canonicalize both the pattern and the candidate text. Whitespace runs and
//    `;` terminators are dropped; where they separated two word characters a
//    single space is kept so `allow read` never collapses into `allowread`.
// 2. Search the canonical pattern in the canonical text.
//
// Every canonical byte remembers the byte range of the original text it came
// from, so a hit maps back to an exact span that can be cut out while the
// rest of the document stays byte-identical.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::fragments::FragmentLibrary;

/// A byte span in a rules document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Result of looking for the insecure catch-all rule in a raw document.
///
/// Computed once per fetched document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsecureMatch {
    /// Span of the first occurrence, if any.
    pub span: Option<Span>,
}

impl InsecureMatch {
    pub fn found(&self) -> bool {
        self.span.is_some()
    }
}

/// Canonical form of a text plus the original byte range of each byte.
struct Canonical {
    text: String,
    origin: Vec<(usize, usize)>,
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn is_separator(ch: char) -> bool {
    ch.is_whitespace() || ch == ';'
}

fn canonicalize(input: &str) -> Canonical {
    let mut text = String::with_capacity(input.len());
    let mut origin = Vec::with_capacity(input.len());
    let mut gap: Option<(usize, usize)> = None;

    for (idx, ch) in input.char_indices() {
        let end = idx + ch.len_utf8();
        if is_separator(ch) {
            gap = Some(match gap {
                Some((start, _)) => (start, end),
                None => (idx, end),
            });
            continue;
        }
        if let Some(span) = gap.take() {
            if text.chars().next_back().is_some_and(is_word_char) && is_word_char(ch) {
                text.push(' ');
                origin.push(span);
            }
        }
        text.push(ch);
        origin.extend(std::iter::repeat((idx, end)).take(ch.len_utf8()));
    }

    Canonical { text, origin }
}

/// A fragment compiled for formatting-tolerant search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TolerantPattern {
    canonical: String,
}

impl TolerantPattern {
    pub fn new(template: &str) -> Self {
        Self {
            canonical: canonicalize(template).text,
        }
    }

    /// Spans of all non-overlapping occurrences in `text`, in order.
    pub fn find_all(&self, text: &str) -> Vec<Span> {
        if self.canonical.is_empty() {
            return Vec::new();
        }
        let haystack = canonicalize(text);
        let bytes = haystack.text.as_bytes();
        let mut spans = Vec::new();
        let mut from = 0;

        while let Some(offset) = haystack.text[from..].find(&self.canonical) {
            let at = from + offset;
            let last = at + self.canonical.len() - 1;
            if self.on_boundary(&haystack.text, at, at + self.canonical.len()) {
                spans.push(Span {
                    start: haystack.origin[at].0,
                    end: haystack.origin[last].1,
                });
                from = at + self.canonical.len();
            } else {
                // Advance to the next char boundary.
                from = at + 1;
                while from < bytes.len() && !haystack.text.is_char_boundary(from) {
                    from += 1;
                }
            }
        }
        spans
    }

    /// Span of the first occurrence in `text`.
    pub fn find(&self, text: &str) -> Option<Span> {
        self.find_all(text).into_iter().next()
    }

    /// A hit must not start or end in the middle of an identifier.
    fn on_boundary(&self, haystack: &str, start: usize, end: usize) -> bool {
        let starts_word = self.canonical.chars().next().is_some_and(is_word_char);
        let ends_word = self.canonical.chars().next_back().is_some_and(is_word_char);
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !(starts_word && before.is_some_and(is_word_char))
            && !(ends_word && after.is_some_and(is_word_char))
    }
}

/// Detects and removes the known-insecure catch-all rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsecurePatternMatcher {
    pattern: TolerantPattern,
}

impl InsecurePatternMatcher {
    pub fn new(template: &str) -> Self {
        Self {
            pattern: TolerantPattern::new(template),
        }
    }

    pub fn from_library(library: &FragmentLibrary) -> Self {
        Self::new(&library.insecure_catch_all)
    }

    /// Span of the first occurrence, widened to the indentation and line
    /// break that introduce it when the match starts its own line.
    pub fn find(&self, text: &str) -> Option<Span> {
        self.pattern
            .find(text)
            .map(|span| widen_to_line_start(text, span))
    }

    pub fn detect(&self, text: &str) -> InsecureMatch {
        InsecureMatch {
            span: self.find(text),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    /// Remove the first occurrence only.
    ///
    /// The rule is expected at most once; further copies are left in place.
    pub fn strip(&self, text: &str) -> String {
        match self.find(text) {
            Some(span) => {
                let mut out = String::with_capacity(text.len() - span.len());
                out.push_str(&text[..span.start]);
                out.push_str(&text[span.end..]);
                out
            }
            None => text.to_string(),
        }
    }
}

fn widen_to_line_start(text: &str, span: Span) -> Span {
    let before = &text[..span.start];
    let indent_start = before.trim_end_matches([' ', '\t']).len();
    let line = &before[..indent_start];
    let start = if let Some(rest) = line.strip_suffix("\r\n") {
        rest.len()
    } else if let Some(rest) = line.strip_suffix('\n') {
        rest.len()
    } else if line.is_empty() {
        0
    } else {
        span.start
    };
    Span { start, ..span }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragments::INSECURE_CATCH_ALL;

    const HEAD: &str = "service cloud.firestore {\n  match /databases/{database}/documents {";
    const TAIL: &str = "\n  }\n}\n";

    #[test]
    fn matches_template_verbatim() {
        let matcher = InsecurePatternMatcher::new(INSECURE_CATCH_ALL);
        let doc = format!("{HEAD}{INSECURE_CATCH_ALL}{TAIL}");
        assert!(matcher.matches(&doc));
    }

    #[test]
    fn matches_with_extra_whitespace_and_no_terminator() {
        let matcher = InsecurePatternMatcher::new(INSECURE_CATCH_ALL);
        let variant = "\n\n      match   /{document=**}\n{\n\n   allow read,   write :\n if   true\n\t}";
        let doc = format!("{HEAD}{variant}{TAIL}");
        assert!(matcher.matches(&doc));
    }

    #[test]
    fn strip_removes_exactly_the_match() {
        let matcher = InsecurePatternMatcher::new(INSECURE_CATCH_ALL);
        let variant = "\n    match /{document=**}  {\n        allow read, write:   if true;\n    }";
        let doc = format!("{HEAD}{variant}{TAIL}");

        let span = matcher.find(&doc).unwrap();
        assert_eq!(span.start, HEAD.len());
        assert_eq!(span.end, HEAD.len() + variant.len());
        assert_eq!(matcher.strip(&doc), format!("{HEAD}{TAIL}"));
    }

    #[test]
    fn strip_removes_only_first_occurrence() {
        let matcher = InsecurePatternMatcher::new(INSECURE_CATCH_ALL);
        let doc = format!("{HEAD}{INSECURE_CATCH_ALL}{INSECURE_CATCH_ALL}{TAIL}");
        let stripped = matcher.strip(&doc);
        assert_eq!(stripped, format!("{HEAD}{INSECURE_CATCH_ALL}{TAIL}"));
        assert!(matcher.matches(&stripped));
    }

    #[test]
    fn conditional_catch_all_is_not_insecure() {
        let matcher = InsecurePatternMatcher::new(INSECURE_CATCH_ALL);
        let doc = "match /{document=**} {\n  allow read, write: if hasAnyRole([\"ADMIN\"]);\n}";
        assert!(!matcher.matches(doc));
    }

    #[test]
    fn true_must_be_a_whole_token() {
        let matcher = InsecurePatternMatcher::new(INSECURE_CATCH_ALL);
        let doc = "match /{document=**} {\n  allow read, write: if trueish();\n}";
        assert!(!matcher.matches(doc));
    }

    #[test]
    fn safe_on_empty_and_arbitrary_input() {
        let matcher = InsecurePatternMatcher::new(INSECURE_CATCH_ALL);
        assert!(!matcher.matches(""));
        assert_eq!(matcher.strip(""), "");
        assert!(!matcher.matches("\u{1F512} ;;; {{{ }}} \r\n"));
        assert!(!InsecurePatternMatcher::new("").matches("anything"));
    }

    #[test]
    fn span_maps_back_across_multibyte_text() {
        let matcher = InsecurePatternMatcher::new(INSECURE_CATCH_ALL);
        let doc = format!("// r\u{e8}gles \u{1F512}\n{INSECURE_CATCH_ALL}\n// fin");
        let stripped = matcher.strip(&doc);
        assert_eq!(stripped, "// r\u{e8}gles \u{1F512}\n\n// fin");
    }

    #[test]
    fn tolerant_pattern_finds_anchor_variants() {
        let anchor = TolerantPattern::new("match /databases/{database}/documents {");
        assert_eq!(
            anchor
                .find_all("match/databases/{database}/documents{ }")
                .len(),
            1
        );
        assert_eq!(
            anchor
                .find_all("match  /databases/{database}/documents\n  {")
                .len(),
            1
        );
        assert!(anchor.find("rematch /databases/{database}/documents {").is_none());
    }
}
