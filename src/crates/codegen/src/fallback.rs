//! Fallback Synthesizer
//!
//! Deterministic templates used whenever model output cannot be delivered.
//! The synthesized project is a minimal Vue 3 + Vite app whose root
//! component echoes the request, and it always contains every required
//! artifact.

use crate::project::{FileMap, GenerationResult, Provenance};
use crate::validator::REQUIRED_ARTIFACTS;
use serde_json::json;

const DEFAULT_MAX_DESCRIPTION_CHARS: usize = 200;
const UNTITLED: &str = "Untitled project";

/// Builds template projects. Pure and infallible.
#[derive(Debug, Clone)]
pub struct FallbackSynthesizer {
    max_description_chars: usize,
}

impl Default for FallbackSynthesizer {
    fn default() -> Self {
        Self {
            max_description_chars: DEFAULT_MAX_DESCRIPTION_CHARS,
        }
    }
}

impl FallbackSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on how much of the description is echoed into the templates
    pub fn with_max_description_chars(mut self, max: usize) -> Self {
        self.max_description_chars = max.max(1);
        self
    }

    /// Synthesize a complete project for `description`.
    pub fn generate(&self, description: &str) -> GenerationResult {
        GenerationResult::new(self.files(description), Provenance::Fallback)
    }

    /// Add template versions of the required artifacts `files` lacks.
    ///
    /// Returns the completed map and the paths that were added. Existing
    /// entries are never overwritten.
    pub fn complete_missing(&self, mut files: FileMap, description: &str) -> (FileMap, Vec<String>) {
        let template = self.files(description);
        let mut added = Vec::new();

        for name in REQUIRED_ARTIFACTS {
            if files.keys().any(|path| path.contains(name)) {
                continue;
            }
            if let Some(contents) = template.get(name) {
                files.insert(name.to_string(), contents.clone());
                added.push(name.to_string());
            }
        }

        (files, added)
    }

    fn files(&self, description: &str) -> FileMap {
        let text = self.clean(description);
        let html = escape_html(&text);
        let name = package_name(&text);

        let mut files = FileMap::new();
        files.insert("package.json".to_string(), package_json(&name, &text));
        files.insert("vite.config.js".to_string(), VITE_CONFIG.to_string());
        files.insert("index.html".to_string(), index_html(&html));
        files.insert("src/main.js".to_string(), MAIN_JS.to_string());
        files.insert("src/App.vue".to_string(), app_vue(&html));
        files.insert("README.md".to_string(), readme(&text));
        files
    }

    /// Single-line, control-free, length-capped description.
    fn clean(&self, description: &str) -> String {
        let collapsed = description
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let mut text: String = collapsed.chars().take(self.max_description_chars).collect();
        if collapsed.chars().count() > self.max_description_chars {
            text = text.trim_end().to_string();
            text.push_str("...");
        }

        if text.is_empty() {
            UNTITLED.to_string()
        } else {
            text
        }
    }
}

/// Escape text for HTML and Vue templates, including mustache braces.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '{' => out.push_str("&#123;"),
            '}' => out.push_str("&#125;"),
            _ => out.push(c),
        }
    }
    out
}

/// npm-compatible package name derived from the description.
fn package_name(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= 40 {
            break;
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "generated-app".to_string()
    } else {
        slug.to_string()
    }
}

fn package_json(name: &str, description: &str) -> String {
    let manifest = json!({
        "name": name,
        "private": true,
        "version": "0.0.0",
        "description": description,
        "type": "module",
        "scripts": {
            "dev": "vite",
            "build": "vite build",
            "preview": "vite preview"
        },
        "dependencies": {
            "vue": "^3.4.0"
        },
        "devDependencies": {
            "@vitejs/plugin-vue": "^5.0.0",
            "vite": "^5.0.0"
        }
    });
    serde_json::to_string_pretty(&manifest).unwrap_or_else(|_| "{}".to_string())
}

const VITE_CONFIG: &str = r#"import { defineConfig } from 'vite'
import vue from '@vitejs/plugin-vue'

export default defineConfig({
  plugins: [vue()],
})
"#;

const MAIN_JS: &str = r#"import { createApp } from 'vue'
import App from './App.vue'

createApp(App).mount('#app')
"#;

fn index_html(title: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>{title}</title>
  </head>
  <body>
    <div id="app"></div>
    <script type="module" src="/src/main.js"></script>
  </body>
</html>
"#
    )
}

fn app_vue(description: &str) -> String {
    format!(
        r#"<template>
  <main class="app">
    <h1>Your project</h1>
    <p class="request">{description}</p>
    <p class="hint">This starter was generated from a template. Edit <code>src/App.vue</code> to begin.</p>
  </main>
</template>

<script setup>
</script>

<style scoped>
.app {{
  font-family: system-ui, sans-serif;
  max-width: 40rem;
  margin: 4rem auto;
  padding: 0 1rem;
}}

.request {{
  font-size: 1.25rem;
}}

.hint {{
  color: #666;
}}
</style>
"#
    )
}

fn readme(description: &str) -> String {
    format!(
        "# {description}\n\nStarter project generated from a template.\n\n\
         ## Getting started\n\n```bash\nnpm install\nnpm run dev\n```\n"
    )
}
