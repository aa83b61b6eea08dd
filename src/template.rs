//! Minimal markdown templating.
//!
//! - `{{name}}` is replaced by the variable, or nothing when unset
//! - `{{#if name}}...{{/if}}` keeps its body only when `name` is non-empty
//!
//! Conditionals do not nest. After substitution, runs of blank lines
//! collapse to one and the output ends with exactly one newline.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::{Error, Result};
use crate::metadata::sha256_hex;

pub const DEFAULT_TEMPLATE: &str = r#"# {{title}}

![{{title}}]({{filename}})

{{#if description}}
{{description}}
{{/if}}

{{#if extractedText}}
## Extracted Text

{{extractedText}}
{{/if}}

## Details

| Property | Value |
| --- | --- |
| Type | {{type}} |{{#if category}}
| Category | {{category}} |{{/if}}{{#if style}}
| Style | {{style}} |{{/if}}{{#if mood}}
| Mood | {{mood}} |{{/if}}{{#if medium}}
| Medium | {{medium}} |{{/if}}{{#if composition}}
| Composition | {{composition}} |{{/if}}{{#if palette}}
| Palette | {{palette}} |{{/if}}{{#if colors}}
| Colors | {{colors}} |{{/if}}{{#if dimensions}}
| Dimensions | {{dimensions}} |{{/if}}
| Format | {{format}} |
| Size | {{size}} |

{{#if hashtags}}
{{hashtags}}
{{/if}}
"#;

pub const MINIMAL_TEMPLATE: &str = r#"# {{title}}

{{description}}

{{#if extractedText}}
```
{{extractedText}}
```
{{/if}}
"#;

pub const DETAILED_TEMPLATE: &str = r#"---
title: "{{title}}"
type: {{type}}{{#if category}}
category: {{category}}{{/if}}{{#if style}}
style: {{style}}{{/if}}{{#if mood}}
mood: {{mood}}{{/if}}{{#if medium}}
medium: {{medium}}{{/if}}{{#if composition}}
composition: {{composition}}{{/if}}{{#if palette}}
palette: {{palette}}{{/if}}{{#if tags}}
tags: [{{tags}}]{{/if}}
source: {{filename}}
hash: {{hash}}
model: {{model}}
provider: {{provider}}
date: {{datetime}}
---

# {{title}}

![{{title}}]({{filename}})

{{#if note}}
> Focus: {{note}}
{{/if}}

{{#if description}}
## Description

{{description}}
{{/if}}

{{#if extractedText}}
## Extracted Text

{{extractedText}}
{{/if}}

{{#if colors}}
## Colors

{{colors}}
{{/if}}

## File

- **Name:** {{filename}}
- **Format:** {{format}}{{#if dimensions}}
- **Dimensions:** {{dimensions}}{{/if}}
- **Size:** {{size}}
"#;

pub const ALT_TEXT_TEMPLATE: &str = "{{#if subject}}{{subject}}. {{/if}}{{description}}\n";

/// Built-in layouts by name.
pub const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("default", DEFAULT_TEMPLATE),
    ("minimal", MINIMAL_TEMPLATE),
    ("detailed", DETAILED_TEMPLATE),
    ("alt-text", ALT_TEXT_TEMPLATE),
];

pub fn builtin(name: &str) -> Option<&'static str> {
    BUILTIN_TEMPLATES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, source)| *source)
}

/// Flat variable map used for rendering.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub data: HashMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    fn is_truthy(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_empty())
    }
}

/// A template ready to render. `name` takes part in the cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    pub name: String,
    pub source: String,
}

impl TemplateSource {
    pub fn builtin(name: &str) -> Option<Self> {
        builtin(name).map(|source| Self {
            name: name.to_string(),
            source: source.to_string(),
        })
    }

    /// A built-in name, or a path to a UTF-8 template file. File templates
    /// are named after their path plus a short content digest, so editing
    /// the file invalidates earlier cache entries.
    pub fn resolve(name_or_path: &str) -> Result<Self> {
        if let Some(template) = Self::builtin(name_or_path) {
            return Ok(template);
        }

        let path = Path::new(name_or_path);
        if !path.is_file() {
            let known: Vec<&str> = BUILTIN_TEMPLATES.iter().map(|(n, _)| *n).collect();
            return Err(Error::Template(format!(
                "'{}' is neither a built-in template ({}) nor a readable file",
                name_or_path,
                known.join(", ")
            )));
        }

        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Template(format!("{}: {}", path.display(), e)))?;
        let digest = sha256_hex(source.as_bytes());
        Ok(Self {
            name: format!("{}@{}", name_or_path, &digest[..12]),
            source,
        })
    }
}

impl Default for TemplateSource {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            source: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

fn if_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\{\{#if\s+([\w.-]+)\s*\}\}(.*?)\{\{/if\}\}").expect("valid regex")
    })
}

fn variable() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([\w.-]+)\s*\}\}").expect("valid regex"))
}

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
}

/// Render `template` against `context`.
pub fn render(template: &str, context: &TemplateContext) -> String {
    let with_blocks = if_block().replace_all(template, |caps: &Captures| {
        let body = &caps[2];
        if context.is_truthy(&caps[1]) {
            body.to_string()
        } else if body.starts_with('\n') && body.ends_with('\n') {
            // a block spanning whole lines leaves one line break behind
            "\n".to_string()
        } else {
            String::new()
        }
    });

    let substituted = variable().replace_all(&with_blocks, |caps: &Captures| {
        context.get(&caps[1]).unwrap_or("").to_string()
    });

    let collapsed = blank_runs().replace_all(&substituted, "\n\n");
    format!("{}\n", collapsed.trim())
}
