//! Post-translation terminology enforcement (Stage B of the translation
//! agent's cross-batch pipeline).
//!
//! For every term whose key appears in a line's source text, the translated
//! line must contain the expected target — case-insensitively and with
//! whitespace/hyphens normalised away. When it doesn't but the untranslated
//! source form leaked through, a case-insensitive substitution fixes it in
//! place; anything left over is reported, never silently dropped.

use regex::{Regex, RegexBuilder};

/// One terminology table entry relevant to enforcement: a source key and its
/// required target-language rendering.
#[derive(Debug, Clone)]
pub struct TermEntry {
    pub key: String,
    pub translation: String,
}

/// One auto-fix applied to a line.
#[derive(Debug, Clone)]
pub struct AppliedFix {
    pub term_key: String,
    pub before: String,
    pub after: String,
}

/// The result of running enforcement over a single translated line.
#[derive(Debug, Clone)]
pub struct EnforcementResult {
    /// The line's text after any auto-fixes (unchanged if none applied).
    pub text: String,
    pub fixes: Vec<AppliedFix>,
    /// Term keys that apply to this line but could not be auto-fixed —
    /// reported, not mutated.
    pub remaining_inconsistencies: Vec<String>,
}

fn normalize_for_comparison(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

fn case_insensitive_literal(needle: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Run terminology enforcement over one already-translated line.
///
/// `terms` should already be filtered to the entries whose key appears
/// case-insensitively in `source_text` — this function doesn't re-derive
/// that filter so callers can reuse the same dynamic per-chunk filtering they
/// built for the translation prompt.
pub fn enforce(source_text: &str, translated_text: &str, terms: &[TermEntry]) -> EnforcementResult {
    let mut text = translated_text.to_string();
    let mut fixes = Vec::new();
    let mut remaining = Vec::new();

    for term in terms {
        if term.translation.is_empty() {
            continue;
        }
        let source_lower = source_text.to_lowercase();
        if !source_lower.contains(&term.key.to_lowercase()) {
            continue;
        }

        let normalized_translation = normalize_for_comparison(&term.translation);
        let normalized_text = normalize_for_comparison(&text);
        if normalized_text.contains(&normalized_translation) {
            continue;
        }

        let Some(re) = case_insensitive_literal(&term.key) else { continue };
        if re.is_match(&text) {
            let before = text.clone();
            text = re.replace_all(&text, term.translation.as_str()).into_owned();
            fixes.push(AppliedFix { term_key: term.key.clone(), before, after: text.clone() });
        } else {
            remaining.push(term.key.clone());
        }
    }

    EnforcementResult { text, fixes, remaining_inconsistencies: remaining }
}

/// Terms from `table` whose key occurs case-insensitively in `source_text` —
/// the dynamic per-line/per-chunk filter shared by the translation prompt and
/// by [`enforce`].
pub fn filter_terms_in_source<'a>(table: &'a [TermEntry], source_text: &str) -> Vec<&'a TermEntry> {
    let source_lower = source_text.to_lowercase();
    table.iter().filter(|t| source_lower.contains(&t.key.to_lowercase())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(key: &str, translation: &str) -> TermEntry {
        TermEntry { key: key.to_string(), translation: translation.to_string() }
    }

    #[test]
    fn line_already_using_expected_translation_is_left_untouched() {
        let result = enforce("The Shogun ruled.", "El Shōgun gobernó.", &[term("Shogun", "Shōgun")]);
        assert!(result.fixes.is_empty());
        assert!(result.remaining_inconsistencies.is_empty());
        assert_eq!(result.text, "El Shōgun gobernó.");
    }

    #[test]
    fn whitespace_and_hyphen_variants_count_as_already_consistent() {
        let result = enforce("A test-case happened.", "Ocurrió un testcase.", &[term("test-case", "test case")]);
        assert!(result.fixes.is_empty());
    }

    #[test]
    fn leaked_source_term_is_auto_fixed() {
        let result = enforce("The Shogun ruled.", "El Shogun gobernó.", &[term("Shogun", "Shōgun")]);
        assert_eq!(result.fixes.len(), 1);
        assert_eq!(result.text, "El Shōgun gobernó.");
    }

    #[test]
    fn missing_translation_with_no_leaked_source_is_reported_not_mutated() {
        let result = enforce("The Shogun ruled.", "El gobernante gobernó.", &[term("Shogun", "Shōgun")]);
        assert!(result.fixes.is_empty());
        assert_eq!(result.remaining_inconsistencies, vec!["Shogun".to_string()]);
        assert_eq!(result.text, "El gobernante gobernó.");
    }

    #[test]
    fn term_not_present_in_source_is_ignored() {
        let result = enforce("Nothing special here.", "Nada especial aquí.", &[term("Shogun", "Shōgun")]);
        assert!(result.fixes.is_empty());
        assert!(result.remaining_inconsistencies.is_empty());
    }

    #[test]
    fn filter_terms_in_source_keeps_only_matching_keys() {
        let table = vec![term("Shogun", "Shōgun"), term("daimyo", "daimyō")];
        let matches = filter_terms_in_source(&table, "The Shogun spoke.");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].key, "Shogun");
    }
}
