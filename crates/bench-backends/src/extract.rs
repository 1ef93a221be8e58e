//! Response-text post-processing.
//!
//! Reasoning-capable models wrap free-form chain-of-thought in a delimited
//! block ahead of the final answer. That block is stripped before markup
//! extraction so a code sample inside the model's deliberation is never
//! mistaken for the answer; the raw text is preserved verbatim in its own
//! artifact for audit.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

static THINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think\b[^>]*>.*?</think>").expect("valid think pattern"));
static HTML_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<html.*?</html>").expect("valid html pattern"));
static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:html)?\s*(.*?)```").expect("valid fence pattern"));

/// Longest fallback body embedded in the wrapper document.
const FALLBACK_LIMIT: usize = 20_000;

/// Remove delimited reasoning blocks, leaving only the final answer.
pub fn strip_reasoning(text: &str) -> Cow<'_, str> {
    THINK_RE.replace_all(text, "")
}

/// Extract the markup document from a raw model response.
///
/// Preference order: an explicit `<html>…</html>` pair, then a fenced code
/// block containing an `<html` tag, then a wrapper document embedding the
/// (escaped, truncated) response so the artifact is always viewable.
pub fn extract_markup(text: &str) -> String {
    let sanitized = strip_reasoning(text);

    if let Some(m) = HTML_RE.find(&sanitized) {
        return m.as_str().to_string();
    }

    for caps in FENCE_RE.captures_iter(&sanitized) {
        let block = caps[1].trim();
        if block.to_lowercase().contains("<html") {
            return block.to_string();
        }
    }

    wrap_as_document(&sanitized)
}

fn wrap_as_document(text: &str) -> String {
    let escaped: String = text
        .chars()
        .take(FALLBACK_LIMIT)
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            c => c.to_string(),
        })
        .collect();
    format!(
        "<!doctype html><html><head><meta charset='utf-8'><title>Output</title></head>\
         <body><pre>{escaped}</pre></body></html>"
    )
}
