//! Parses the `<textarea>1.foo\n2.bar</textarea>`-shaped numbered-item format
//! every LLM prompt in this pipeline asks the model to answer in.
//!
//! The original source leans on this format everywhere it needs the model to
//! return N discrete items in one completion (translations, back-translations,
//! term verifications) because free-form JSON is unreliable once N grows past
//! a handful of items and the content itself may contain quotes or braces.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn boundary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(\d+)[.、]\s*").unwrap())
}

fn textarea_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<textarea>(.*?)</textarea>").unwrap())
}

fn markdown_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^```\w*\s*$").unwrap())
}

/// Pull numbered items out of a raw LLM completion.
///
/// Steps (grounded on the original's textarea parser):
/// 1. If a `<textarea>...</textarea>` pair is present, only its inner text is
///    parsed; otherwise the whole completion is used as-is (models sometimes
///    drop the wrapping tag while still numbering correctly).
/// 2. Stray markdown code fences (```` ``` ````, with or without a language
///    tag) are stripped — models occasionally wrap the textarea in one.
/// 3. The remaining text is split on `^\d+[.、]\s*` boundaries (an ASCII
///    period or a full-width Chinese comma `、` after the digits, matching
///    numbering conventions in either language).
/// 4. Each split produces `(index, text)`; index is keyed by the parsed
///    number, not by split order, so a model that skips or reorders numbers
///    is still mapped correctly. No index is synthesized for a missing
///    number — callers observe exactly the indices the model returned.
pub fn extract_numbered_items(raw: &str) -> BTreeMap<u32, String> {
    let inner = match textarea_tag_re().captures(raw) {
        Some(caps) => caps.get(1).unwrap().as_str(),
        None => raw,
    };

    let cleaned = markdown_fence_re().replace_all(inner, "");

    let mut items = BTreeMap::new();
    let boundary = boundary_re();
    let mut last_end = 0usize;
    let mut pending_index: Option<u32> = None;

    for caps in boundary.captures_iter(&cleaned) {
        let mat = caps.get(0).unwrap();
        if let Some(index) = pending_index {
            let text = cleaned[last_end..mat.start()].trim().to_string();
            if !text.is_empty() {
                items.insert(index, text);
            }
        }
        pending_index = caps.get(1).unwrap().as_str().parse::<u32>().ok();
        last_end = mat.end();
    }

    if let Some(index) = pending_index {
        let text = cleaned[last_end..].trim().to_string();
        if !text.is_empty() {
            items.insert(index, text);
        }
    }

    items
}

/// Wrap `items` (1-based position -> text) back into the `<textarea>` format
/// used both when building prompts (providing numbered context) and in tests
/// that round-trip a scripted response.
pub fn format_numbered_items<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::from("<textarea>\n");
    for (i, item) in items.into_iter().enumerate() {
        out.push_str(&format!("{}.{}\n", i + 1, item));
    }
    out.push_str("</textarea>");
    out
}

fn bold_italic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*(.+?)\*\*|\*(.+?)\*|__(.+?)__|_(.+?)_").unwrap())
}

fn leading_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+[.、]\s*").unwrap())
}

/// Strip a leading `N.`/`N、` numbering prefix and bold/italic markdown
/// markers (`**x**`, `*x*`, `__x__`, `_x_`) from one extracted item's text,
/// then trim residual whitespace and stray quote/asterisk/underscore
/// characters. Shared by every call site that parses a single line out of a
/// numbered model reply.
pub fn strip_decorations(raw: &str) -> String {
    let no_prefix = leading_number_re().replace(raw, "");
    let no_markup = bold_italic_re().replace_all(&no_prefix, |caps: &regex::Captures| {
        caps.iter()
            .skip(1)
            .find_map(|g| g.map(|m| m.as_str().to_string()))
            .unwrap_or_default()
    });
    no_markup
        .trim_matches(|c: char| c == '*' || c == '_' || c == '"' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_items_wrapped_in_textarea_tag() {
        let raw = "<textarea>\n1.Hola\n2.Mundo\n</textarea>";
        let items = extract_numbered_items(raw);
        assert_eq!(items.get(&1).map(String::as_str), Some("Hola"));
        assert_eq!(items.get(&2).map(String::as_str), Some("Mundo"));
    }

    #[test]
    fn falls_back_to_whole_text_without_tag() {
        let raw = "1.Hola\n2.Mundo";
        let items = extract_numbered_items(raw);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn strips_stray_markdown_fences() {
        let raw = "<textarea>\n```\n1.Hola\n```\n</textarea>";
        let items = extract_numbered_items(raw);
        assert_eq!(items.get(&1).map(String::as_str), Some("Hola"));
    }

    #[test]
    fn supports_fullwidth_chinese_comma_numbering() {
        let raw = "<textarea>\n1、你好\n2、世界\n</textarea>";
        let items = extract_numbered_items(raw);
        assert_eq!(items.get(&1).map(String::as_str), Some("你好"));
        assert_eq!(items.get(&2).map(String::as_str), Some("世界"));
    }

    #[test]
    fn missing_indices_are_not_synthesized() {
        let raw = "<textarea>\n1.One\n3.Three\n</textarea>";
        let items = extract_numbered_items(raw);
        assert_eq!(items.len(), 2);
        assert!(!items.contains_key(&2));
    }

    #[test]
    fn multiline_item_text_is_preserved() {
        let raw = "<textarea>\n1.Line one\nstill line one\n2.Line two\n</textarea>";
        let items = extract_numbered_items(raw);
        assert_eq!(items.get(&1).map(String::as_str), Some("Line one\nstill line one"));
    }

    #[test]
    fn format_then_extract_round_trips() {
        let formatted = format_numbered_items(vec!["alpha", "beta", "gamma"]);
        let items = extract_numbered_items(&formatted);
        assert_eq!(items.get(&1).map(String::as_str), Some("alpha"));
        assert_eq!(items.get(&2).map(String::as_str), Some("beta"));
        assert_eq!(items.get(&3).map(String::as_str), Some("gamma"));
    }
}
