//! Output Validator
//!
//! Turns raw model text into a verified file map in four stages:
//!
//! 1. **Extract** the JSON object from surrounding prose and fences
//! 2. **Parse** it with `serde_json`
//! 3. **Repair** it with a [`Repairer`] when parsing fails
//! 4. **Check** that every required artifact is present
//!
//! Validation never fails outright; the [`ValidationOutcome`] says how far
//! the text got and carries a best-effort map even when the last stage
//! rejects it.

pub mod extract;
pub mod repair;

pub use extract::{extract_json, Extraction};
pub use repair::{Repairer, TokenRepairer};

use crate::project::{normalize_files, FileMap};
use serde_json::Value;
use tracing::{debug, warn};

/// Paths every deliverable project must contain. A key matches when it
/// contains the sentinel, so `frontend/src/App.vue` satisfies `src/App.vue`.
pub const REQUIRED_ARTIFACTS: [&str; 4] = ["package.json", "index.html", "src/main.js", "src/App.vue"];

/// Result of validating one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    /// Parsed and complete
    pub valid: bool,
    /// Best-effort file map, also set when completeness fails
    pub parsed: Option<FileMap>,
    /// Text actually parsed, when extraction or repair changed it
    pub cleaned: Option<String>,
    /// Why the outcome is not valid
    pub error: Option<String>,
    /// The repair stage was needed
    pub repaired: bool,
}

impl ValidationOutcome {
    fn rejected(error: String, cleaned: Option<String>) -> Self {
        Self {
            valid: false,
            parsed: None,
            cleaned,
            error: Some(error),
            repaired: false,
        }
    }

    /// Whether a non-empty best-effort map exists
    pub fn has_files(&self) -> bool {
        self.parsed.as_ref().is_some_and(|files| !files.is_empty())
    }
}

/// Extraction, repair and completeness checking for model output
pub struct CodeValidator {
    repairer: Box<dyn Repairer>,
    required: Vec<String>,
}

impl Default for CodeValidator {
    fn default() -> Self {
        Self {
            repairer: Box::new(TokenRepairer),
            required: REQUIRED_ARTIFACTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl std::fmt::Debug for CodeValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeValidator")
            .field("repairer", &self.repairer.name())
            .field("required", &self.required)
            .finish()
    }
}

impl CodeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a different repair algorithm
    pub fn with_repairer(mut self, repairer: Box<dyn Repairer>) -> Self {
        self.repairer = repairer;
        self
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Run all stages over raw model output.
    pub fn validate(&self, raw: &str) -> ValidationOutcome {
        let extraction = extract_json(raw);
        let mut cleaned = extraction.changed.then(|| extraction.text.clone());
        let mut repaired = false;

        let files = match parse_files(&extraction.text) {
            Ok(files) => files,
            Err(parse_error) => {
                debug!(error = %parse_error, repairer = self.repairer.name(), "Output did not parse, repairing");
                let Some(fixed) = self.repairer.repair(&extraction.text) else {
                    return ValidationOutcome::rejected(
                        format!("malformed output: {}", parse_error),
                        cleaned,
                    );
                };
                match parse_files(&fixed) {
                    Ok(files) => {
                        repaired = true;
                        cleaned = Some(fixed);
                        files
                    }
                    Err(e) => {
                        return ValidationOutcome::rejected(
                            format!("malformed output after repair: {}", e),
                            Some(fixed),
                        )
                    }
                }
            }
        };

        if files.is_empty() {
            return ValidationOutcome {
                repaired,
                ..ValidationOutcome::rejected("output contains no files".to_string(), cleaned)
            };
        }

        let error = self.check_completeness(&files).err();
        if let Some(error) = &error {
            warn!(files = files.len(), "{}", error);
        }

        ValidationOutcome {
            valid: error.is_none(),
            parsed: Some(files),
            cleaned,
            error,
            repaired,
        }
    }

    /// Required artifacts no key of `files` contains
    pub fn missing_artifacts(&self, files: &FileMap) -> Vec<String> {
        self.required
            .iter()
            .filter(|name| !files.keys().any(|path| path.contains(name.as_str())))
            .cloned()
            .collect()
    }

    /// Fail on the first missing artifact
    pub fn check_completeness(&self, files: &FileMap) -> std::result::Result<(), String> {
        match self.missing_artifacts(files).first() {
            Some(name) => Err(format!("missing required artifact: {}", name)),
            None => Ok(()),
        }
    }
}

/// Parse JSON text into a normalized file map.
fn parse_files(text: &str) -> std::result::Result<FileMap, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    files_from_value(value).ok_or_else(|| "top-level value is not an object".to_string())
}

/// Convert a JSON object into a file map.
///
/// A lone `{"files": {...}}` wrapper is unwrapped, and non-string values are
/// pretty-printed so a manifest emitted as an object still becomes file text.
pub fn files_from_value(value: Value) -> Option<FileMap> {
    let Value::Object(mut object) = value else {
        return None;
    };

    if object.len() == 1 && matches!(object.get("files"), Some(Value::Object(_))) {
        if let Some(Value::Object(inner)) = object.remove("files") {
            object = inner;
        }
    }

    let files = object
        .into_iter()
        .map(|(path, value)| {
            let contents = match value {
                Value::String(text) => text,
                other => serde_json::to_string_pretty(&other).unwrap_or_default(),
            };
            (path, contents)
        })
        .collect();

    Some(normalize_files(files))
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPLETE: &str = r#"{
        "package.json": "{\"name\": \"counter\"}",
        "index.html": "<div id=\"app\"></div>",
        "src/main.js": "import { createApp } from 'vue'",
        "src/App.vue": "<template><button>+1</button></template>"
    }"#;

    #[test]
    fn test_clean_output_is_valid() {
        let outcome = CodeValidator::new().validate(COMPLETE);

        assert!(outcome.valid);
        assert!(!outcome.repaired);
        assert!(outcome.cleaned.is_none());
        assert_eq!(outcome.parsed.unwrap().len(), 4);
    }

    #[test]
    fn test_fenced_output_sets_cleaned() {
        let raw = format!("Sure!\n```json\n{}\n```", COMPLETE);
        let outcome = CodeValidator::new().validate(&raw);

        assert!(outcome.valid);
        assert!(outcome.cleaned.is_some());
        assert!(!outcome.repaired);
    }

    #[test]
    fn test_json_fence_followed_by_shell_fence() {
        let raw = format!("Here:\n```json\n{}\n```\n\nRun it:\n```bash\nnpm run dev\n```", COMPLETE);
        let outcome = CodeValidator::new().validate(&raw);

        assert!(outcome.valid, "{:?}", outcome.error);
        assert!(!outcome.repaired);
        assert_eq!(
            outcome.parsed.unwrap()["src/App.vue"],
            "<template><button>+1</button></template>"
        );
    }

    #[test]
    fn test_trailing_prose_keeps_every_file() {
        let raw = format!("{}\nUse {{{{ count }}}} in the template.", COMPLETE);
        let outcome = CodeValidator::new().validate(&raw);

        assert!(outcome.valid, "{:?}", outcome.error);
        assert_eq!(
            outcome.parsed.unwrap()["src/App.vue"],
            "<template><button>+1</button></template>"
        );
    }

    #[test]
    fn test_broken_output_is_repaired() {
        let broken = "{\"package.json\": \"{}\", \"index.html\": \"<div id=\"app\"></div>\", \
                      \"src/main.js\": \"x\", \"src/App.vue\": \"<template>\n</template>\"}";
        let outcome = CodeValidator::new().validate(broken);

        assert!(outcome.valid, "{:?}", outcome.error);
        assert!(outcome.repaired);
        assert_eq!(
            outcome.parsed.unwrap()["index.html"],
            "<div id=\"app\"></div>"
        );
    }

    #[test]
    fn test_missing_artifact_keeps_best_effort_map() {
        let outcome = CodeValidator::new()
            .validate(r#"{"package.json": "{}", "index.html": "", "src/main.js": ""}"#);

        assert!(!outcome.valid);
        assert_eq!(
            outcome.error.as_deref(),
            Some("missing required artifact: src/App.vue")
        );
        assert!(outcome.has_files());
    }

    #[test]
    fn test_sentinel_matches_nested_paths() {
        let mut files = FileMap::new();
        for path in ["web/package.json", "web/index.html", "web/src/main.js", "web/src/App.vue"] {
            files.insert(path.to_string(), String::new());
        }
        assert!(CodeValidator::new().check_completeness(&files).is_ok());
    }

    #[test]
    fn test_files_wrapper_and_object_values() {
        let value = serde_json::json!({
            "files": {
                "./package.json": { "name": "app", "private": true },
                "src/App.vue": "<template/>"
            }
        });
        let files = files_from_value(value).unwrap();

        assert!(files["package.json"].contains("\"private\": true"));
        assert_eq!(files["src/App.vue"], "<template/>");
    }

    #[test]
    fn test_unrecoverable_output() {
        let outcome = CodeValidator::new().validate("I am unable to help with that request.");

        assert!(!outcome.valid);
        assert!(outcome.parsed.is_none());
        assert!(outcome.error.unwrap().starts_with("malformed output"));
    }

    #[test]
    fn test_non_object_rejected() {
        let outcome = CodeValidator::new().validate("[1, 2, 3]");
        assert!(!outcome.valid);
        assert!(outcome.parsed.is_none());
    }

    struct NeverRepair;

    impl Repairer for NeverRepair {
        fn repair(&self, _text: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_custom_repairer() {
        let validator = CodeValidator::new().with_repairer(Box::new(NeverRepair));
        let outcome = validator.validate("{\"a.js\": \"x\ny\"}");

        assert!(!outcome.valid);
        assert!(!outcome.repaired);
        assert!(format!("{:?}", validator).contains("repairer"));
    }
}
