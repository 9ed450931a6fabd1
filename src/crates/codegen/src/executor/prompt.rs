//! Built-in prompts.

use crate::project::FileMap;

/// Appended to the user turn when the first round comes back empty.
pub const EMPTY_RETRY_INSTRUCTION: &str = "Your previous reply was empty. \
Produce the full content now: a single JSON object mapping every file path to its complete contents.";

/// Default system prompt for the generate workflow
pub fn generate_system_prompt() -> String {
    r#"You are a project generator. Build a complete, runnable Vue 3 + Vite web project for the user's request.

Reply with ONE JSON object and nothing else:

```json
{
  "package.json": "...",
  "index.html": "...",
  "src/main.js": "...",
  "src/App.vue": "...",
  "other/file.ext": "..."
}
```

Keys are relative paths with forward slashes. Values are the full file contents as JSON strings.
Always include package.json, index.html, src/main.js and src/App.vue."#
        .to_string()
}

/// User turn for the generate workflow
pub fn generate_user_prompt(description: &str) -> String {
    format!("Create a project for this request:\n\n{}", description.trim())
}

/// Default system prompt for the modify workflow
pub fn modify_system_prompt() -> String {
    r#"You are a project editor. You receive an existing project as a JSON object mapping file paths to contents, and an instruction.

Reply with ONE JSON object and nothing else, containing every file you added or changed with its complete new contents.
Keys are relative paths with forward slashes. Values are JSON strings. Omit files that stay the same."#
        .to_string()
}

/// User turn for the modify workflow
pub fn modify_user_prompt(instruction: &str, files: &FileMap) -> String {
    let current = serde_json::to_string_pretty(files).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Current project:\n\n```json\n{}\n```\n\nInstruction:\n\n{}",
        current,
        instruction.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_prompts() {
        assert!(generate_system_prompt().contains("src/App.vue"));
        assert!(generate_user_prompt("  a counter app \n").ends_with("a counter app"));
    }

    #[test]
    fn test_modify_prompt_embeds_files() {
        let mut files = FileMap::new();
        files.insert("src/App.vue".to_string(), "<template/>".to_string());

        let prompt = modify_user_prompt("add a reset button", &files);
        assert!(prompt.contains("\"src/App.vue\""));
        assert!(prompt.contains("add a reset button"));
    }
}
