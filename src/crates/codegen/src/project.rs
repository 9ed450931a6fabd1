//! The generated artifact: a file map plus how it was obtained.

use crate::validator::files_from_value;
use crate::{GeneratorError, Result};
use llm::Usage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Relative path (forward slashes) to file contents.
pub type FileMap = BTreeMap<String, String>;

/// How a result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Model output parsed cleanly
    Model,
    /// Model output needed structural repair or gap filling
    Repaired,
    /// Deterministic template, model output unusable or unavailable
    Fallback,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Model => write!(f, "model"),
            Provenance::Repaired => write!(f, "repaired"),
            Provenance::Fallback => write!(f, "fallback"),
        }
    }
}

/// A generated project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub files: FileMap,
    pub provenance: Provenance,
    /// Continuation rounds spent; zero when the model was not consulted
    #[serde(default)]
    pub rounds: u32,
    #[serde(default)]
    pub usage: Usage,
    /// Remarks for the user, e.g. why a template was used
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl GenerationResult {
    /// Create a result; paths are normalized on the way in.
    pub fn new(files: FileMap, provenance: Provenance) -> Self {
        Self {
            files: normalize_files(files),
            provenance,
            rounds: 0,
            usage: Usage::default(),
            notes: Vec::new(),
        }
    }

    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Contents of one file.
    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }
}

/// Normalize a relative path: forward slashes, no leading `./` or `/`, no
/// empty segments.
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize every key of a file map. On collisions the later key wins.
pub fn normalize_files(files: FileMap) -> FileMap {
    files
        .into_iter()
        .map(|(path, contents)| (normalize_path(&path), contents))
        .filter(|(path, _)| !path.is_empty())
        .collect()
}

/// Load a project saved as a JSON object of path to contents.
///
/// Accepts the same shapes as model output: a bare map or one wrapped in
/// `files`, with non-string values pretty-printed.
pub fn read_file_map(path: impl AsRef<Path>) -> Result<FileMap> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    files_from_value(value).ok_or_else(|| {
        GeneratorError::Validation(format!(
            "{} must contain a JSON object of files",
            path.display()
        ))
    })
}
