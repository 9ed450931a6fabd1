//! Structural repair of almost-JSON file maps.
//!
//! Models writing file contents into JSON strings routinely forget to escape
//! quotes, emit raw newlines, or over-escape slashes. [`TokenRepairer`]
//! ignores the broken string grammar and instead locates `"path.ext": "`
//! openings directly, reading each value up to the quote that is followed by
//! the next entry or the end of the object. The recovered map is then
//! re-serialized by `serde_json`, which escapes everything correctly.

use crate::project::FileMap;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

/// File names the tokenizer recognises as keys.
const KEY_PATTERN: &str = r"[\w./@\-\[\]]*\.(?:json|html|htm|js|jsx|mjs|cjs|ts|tsx|vue|css|scss|sass|less|md|txt|svg|yml|yaml|toml|env|gitignore|lock|xml)";

static ENTRY_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r#""({KEY_PATTERN})"\s*:\s*""#)).unwrap());

static NEXT_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r#"^\s*,\s*"{KEY_PATTERN}"\s*:"#)).unwrap());

/// Pluggable repair algorithm.
pub trait Repairer: Send + Sync {
    /// Turn broken model output into text that parses as a JSON object, or
    /// `None` if nothing could be recovered.
    fn repair(&self, text: &str) -> Option<String>;

    fn name(&self) -> &str {
        "repairer"
    }
}

/// Tokenizing repairer for `{"path": "contents", ...}` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenRepairer;

impl TokenRepairer {
    pub fn new() -> Self {
        Self
    }
}

impl Repairer for TokenRepairer {
    fn repair(&self, text: &str) -> Option<String> {
        let files = scan_entries(text);
        if !files.is_empty() {
            debug!(entries = files.len(), "Recovered file entries by tokenizing");
            return serde_json::to_string(&files).ok();
        }

        let sanitized = sanitize(text);
        if serde_json::from_str::<Value>(&sanitized).is_ok() {
            debug!("Recovered output by escaping stray characters");
            return Some(sanitized);
        }

        let files = scan_entries(&sanitized);
        if files.is_empty() {
            return None;
        }
        serde_json::to_string(&files).ok()
    }

    fn name(&self) -> &str {
        "token"
    }
}

/// Collect every `"path.ext": "value"` entry. Later duplicates win.
///
/// A final entry that never terminates under the lenient rules is read once
/// more as a strict JSON string ending at the first unescaped quote, which
/// must be followed by `}`. Trailing prose after a well-formed object is
/// tolerated that way; a truly truncated value is dropped.
pub fn scan_entries(text: &str) -> FileMap {
    let mut files = FileMap::new();
    let mut pos = 0;

    while let Some(caps) = ENTRY_OPEN.captures_at(text, pos) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            break;
        };

        let start = whole.end();
        let Some(end) = value_end(text, start).or_else(|| strict_value_end(text, start)) else {
            debug!(path = key.as_str(), "Dropping unterminated entry");
            break;
        };

        files.insert(
            key.as_str().to_string(),
            unescape(&text[start..end]),
        );
        pos = end + 1;
    }

    files
}

/// Byte offset of the quote closing the value that starts at `start`.
fn value_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = start;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' if closes_value(&text[i + 1..]) => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// First unescaped quote after `start`, provided the object closes right after it.
fn strict_value_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = start;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return text[i + 1..].trim_start().starts_with('}').then_some(i),
            _ => i += 1,
        }
    }
    None
}

/// A quote closes a value when only braces follow it, or the next entry.
fn closes_value(rest: &str) -> bool {
    rest.chars().all(|c| c == '}' || c.is_whitespace()) || NEXT_ENTRY.is_match(rest)
}

/// Resolve escape sequences in one left-to-right pass.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.clone().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => {
                        out.push(decoded);
                        for _ in 0..4 {
                            chars.next();
                        }
                    }
                    _ => out.push_str("\\u"),
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

/// Last-resort cleanup: drop control characters, escape raw line breaks and
/// tabs inside strings, and escape quotes that are not followed by JSON
/// structure.
pub fn sanitize(text: &str) -> String {
    let chars: Vec<char> = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if !in_string {
            in_string = c == '"';
            out.push(c);
            i += 1;
            continue;
        }

        match c {
            '\\' => {
                out.push(c);
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 1;
                }
            }
            '"' if is_structural(&chars[i + 1..]) => {
                in_string = false;
                out.push('"');
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
        i += 1;
    }

    out
}

fn is_structural(rest: &[char]) -> bool {
    match rest.iter().find(|c| !c.is_whitespace()) {
        None => true,
        Some(c) => matches!(c, ':' | ',' | '}' | ']'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repaired_map(text: &str) -> FileMap {
        let json = TokenRepairer.repair(text).expect("repairable");
        serde_json::from_str(&json).expect("valid json")
    }

    #[test]
    fn test_unescaped_quotes_in_value() {
        let broken = r#"{"index.html": "<div id="app"></div>", "src/main.js": "import App from "./App.vue""}"#;
        let files = repaired_map(broken);

        assert_eq!(files["index.html"], r#"<div id="app"></div>"#);
        assert_eq!(files["src/main.js"], r#"import App from "./App.vue""#);
    }

    #[test]
    fn test_raw_newlines_and_over_escaping() {
        let broken = "{\"src/App.vue\": \"<template>\n  <a href=\\\"https:\\/\\/vuejs.org\\\">Vue</a>\n</template>\"}";
        let files = repaired_map(broken);

        assert_eq!(
            files["src/App.vue"],
            "<template>\n  <a href=\"https://vuejs.org\">Vue</a>\n</template>"
        );
    }

    #[test]
    fn test_escaped_backslash_before_quote() {
        let broken = r#"{"README.md": "path C:\\dir\\", "package.json": "{}"}"#;
        let files = repaired_map(broken);

        assert_eq!(files["README.md"], "path C:\\dir\\");
        assert_eq!(files["package.json"], "{}");
    }

    #[test]
    fn test_duplicate_key_last_wins() {
        let broken = "{\"a.js\": \"one\n\", \"a.js\": \"two\"}";
        assert_eq!(repaired_map(broken)["a.js"], "two");
    }

    #[test]
    fn test_unterminated_entry_dropped() {
        let truncated = "{\"package.json\": \"{}\", \"src/App.vue\": \"<template>\n<div";
        let files = repaired_map(truncated);

        assert_eq!(files.len(), 1);
        assert!(files.contains_key("package.json"));
    }

    #[test]
    fn test_trailing_prose_keeps_last_entry() {
        let text = "{\"package.json\": \"{}\", \"src/App.vue\": \"<p>{{ count }}</p>\"}\nUse {{ count }} in the template.";
        let files = repaired_map(text);

        assert_eq!(files.len(), 2);
        assert_eq!(files["src/App.vue"], "<p>{{ count }}</p>");
    }

    #[test]
    fn test_truncated_value_with_quotes_dropped() {
        let truncated = "{\"package.json\": \"{}\", \"index.html\": \"<div id=\"app";
        let files = repaired_map(truncated);

        assert_eq!(files.len(), 1);
        assert!(!files.contains_key("index.html"));
    }

    #[test]
    fn test_unicode_escape() {
        assert_eq!(unescape(r"caf\u00e9 \u0001"), "caf\u{e9} \u{1}");
        assert_eq!(unescape(r"bad \uZZ"), "bad \\uZZ");
        assert_eq!(unescape(r"\q"), "\\q");
    }

    #[test]
    fn test_last_resort_for_unrecognised_keys() {
        let broken = "{\"Dockerfile\": \"FROM node\nRUN echo \"hi\"\"}";
        let files = repaired_map(broken);

        assert_eq!(files["Dockerfile"], "FROM node\nRUN echo \"hi\"");
    }

    #[test]
    fn test_prose_is_unrecoverable() {
        assert!(TokenRepairer.repair("Sorry, I can't help with that.").is_none());
    }

    #[test]
    fn test_sanitize_strips_controls() {
        assert_eq!(sanitize("{\"a\u{7}\": \"b\"}"), "{\"a\": \"b\"}");
    }
}
