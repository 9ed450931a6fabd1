//! Locating the JSON object inside model chatter.

use regex::Regex;
use std::sync::LazyLock;

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```[ \t]*json[ \t]*\r?\n?").unwrap());

static CLOSING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*```[ \t]*\r?$").unwrap());

static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Candidate JSON text and whether it differs from the trimmed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub changed: bool,
}

/// Pull the most likely JSON object out of `raw`.
///
/// Tried in order: the whole trimmed text if it starts with `{`; a block
/// fenced as `json`; any fenced block whose content starts with `{`; the
/// span from the first `{` to the last `}`; the text unchanged.
///
/// A `json` block ends at the first bare closing fence whose body parses,
/// else the first one after a `}`, else the last fence in the text. File
/// contents may carry fences of their own, and answers often add more fenced
/// blocks after the JSON.
pub fn extract_json(raw: &str) -> Extraction {
    let trimmed = raw.trim();

    let candidate = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else if let Some(block) = json_fenced_block(trimmed) {
        block
    } else if let Some(block) = object_fenced_block(trimmed) {
        block
    } else if let Some(span) = brace_span(trimmed) {
        span.to_string()
    } else {
        trimmed.to_string()
    };

    Extraction {
        changed: candidate != trimmed,
        text: candidate,
    }
}

fn json_fenced_block(text: &str) -> Option<String> {
    let opening = JSON_FENCE.find(text)?;
    let body = &text[opening.end()..];

    let closings: Vec<&str> = CLOSING_FENCE
        .find_iter(body)
        .map(|m| body[..m.start()].trim())
        .collect();
    let block = closings
        .iter()
        .find(|block| serde_json::from_str::<serde_json::Value>(block).is_ok())
        .or_else(|| closings.iter().find(|block| block.ends_with('}')))
        .copied()
        // A truncated response may lack the closing fence.
        .unwrap_or_else(|| match body.rfind("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        });

    (!block.is_empty()).then(|| block.to_string())
}

fn object_fenced_block(text: &str) -> Option<String> {
    ANY_FENCE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .find(|body| body.starts_with('{'))
        .map(str::to_string)
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
