//! Prompt templates with `{{placeholder}}` substitution.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prompt template errors.
#[derive(Debug, Error)]
pub enum PromptError {
    /// Template file not found.
    #[error("template not found: {0}")]
    NotFound(String),

    /// No stored template with this id.
    #[error("unknown prompt id: {0}")]
    UnknownId(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing placeholder value.
    #[error("missing placeholder value: {0}")]
    MissingPlaceholder(String),
}

/// Result type for prompt operations.
pub type Result<T> = std::result::Result<T, PromptError>;

/// Values substituted into a template.
///
/// Keys are case-insensitive, so a `Title` column fills `{{title}}`.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    values: HashMap<String, String>,
}

impl PromptContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self { values: HashMap::new() }
    }

    /// Set a context value.
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.values.insert(normalize_key(key.as_ref()), value.into());
    }

    /// Get a context value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(String::as_str)
    }

    /// Check if context contains a key.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&normalize_key(key))
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Options for template rendering.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Strict mode: error if placeholder is missing.
    pub strict: bool,

    /// Default value for missing placeholders (only used if not strict).
    pub default_value: Option<String>,
}

/// A prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    /// Template content.
    content: String,

    /// Template file path (if loaded from file).
    file_path: Option<PathBuf>,
}

impl PromptTemplate {
    /// Load a prompt template from a file.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PromptError::NotFound(path.display().to_string()));
        }

        let content = fs::read_to_string(path)?;
        Ok(Self { content, file_path: Some(path.to_path_buf()) })
    }

    /// Create a template from a string.
    pub fn from_string(content: impl Into<String>) -> Self {
        Self { content: content.into(), file_path: None }
    }

    /// Get the template content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Get the template file path.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Render the template, replacing unknown placeholders with an empty string.
    ///
    /// # Errors
    ///
    /// Never fails in non-strict mode; kept fallible to mirror `render_with_options`.
    pub fn render(&self, context: &PromptContext) -> Result<String> {
        self.render_with_options(context, &RenderOptions::default())
    }

    /// Render the template with custom options.
    ///
    /// Substitution is single-pass: values that themselves contain `{{...}}` are
    /// inserted verbatim.
    ///
    /// # Errors
    ///
    /// Returns error if a required placeholder is missing from the context.
    pub fn render_with_options(&self, context: &PromptContext, options: &RenderOptions) -> Result<String> {
        let mut out = String::with_capacity(self.content.len());
        let mut rest = self.content.as_str();

        while let Some(open) = rest.find("{{") {
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                break;
            };
            let name = after_open[..close].trim();
            out.push_str(&rest[..open]);

            if name.is_empty() {
                out.push_str(&rest[open..open + 2 + close + 2]);
            } else if let Some(value) = context.get(name) {
                out.push_str(value);
            } else if options.strict {
                return Err(PromptError::MissingPlaceholder(name.to_string()));
            } else if let Some(default) = &options.default_value {
                out.push_str(default);
            }

            rest = &after_open[close + 2..];
        }
        out.push_str(rest);

        Ok(out)
    }

    /// List all distinct placeholders in the template, in order of appearance.
    pub fn list_placeholders(&self) -> Vec<String> {
        let mut placeholders: Vec<String> = Vec::new();
        let mut rest = self.content.as_str();

        while let Some(open) = rest.find("{{") {
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                break;
            };
            let name = after_open[..close].trim();
            if !name.is_empty() && !placeholders.iter().any(|p| p == name) {
                placeholders.push(name.to_string());
            }
            rest = &after_open[close + 2..];
        }

        placeholders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_prompt_context_case_insensitive() {
        let mut context = PromptContext::new();
        context.set("Title", "Protein folding");

        assert_eq!(context.get("title"), Some("Protein folding"));
        assert_eq!(context.get("TITLE"), Some("Protein folding"));
        assert!(context.contains("title"));
        assert!(!context.contains("abstract"));
    }

    #[test]
    fn test_template_load() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Summarize {{abstract}}").unwrap();
        file.flush().unwrap();

        let template = PromptTemplate::load(file.path()).unwrap();
        assert_eq!(template.content(), "Summarize {{abstract}}");
        assert!(template.file_path().is_some());
    }

    #[test]
    fn test_template_load_missing() {
        let result = PromptTemplate::load("/definitely/not/here.md");
        assert!(matches!(result, Err(PromptError::NotFound(_))));
    }

    #[test]
    fn test_template_render_multiple() {
        let template = PromptTemplate::from_string("Title: {{title}}\nAbstract: {{ abstract }}");
        let mut context = PromptContext::new();
        context.set("title", "A");
        context.set("abstract", "B");

        assert_eq!(template.render(&context).unwrap(), "Title: A\nAbstract: B");
    }

    #[test]
    fn test_template_missing_placeholder() {
        let template = PromptTemplate::from_string("Hello {{name}}!");
        let context = PromptContext::new();

        assert_eq!(template.render(&context).unwrap(), "Hello !");

        let options = RenderOptions { strict: true, default_value: None };
        assert!(matches!(
            template.render_with_options(&context, &options),
            Err(PromptError::MissingPlaceholder(name)) if name == "name"
        ));

        let options = RenderOptions { strict: false, default_value: Some("n/a".to_string()) };
        assert_eq!(template.render_with_options(&context, &options).unwrap(), "Hello n/a!");
    }

    #[test]
    fn test_render_is_single_pass() {
        let template = PromptTemplate::from_string("{{a}} and {{b}}");
        let mut context = PromptContext::new();
        context.set("a", "{{b}}");
        context.set("b", "bee");

        assert_eq!(template.render(&context).unwrap(), "{{b}} and bee");
    }

    #[test]
    fn test_render_leaves_malformed_braces() {
        let template = PromptTemplate::from_string("json {\"k\": 1} {{}} {{open");
        let context = PromptContext::new();
        assert_eq!(template.render(&context).unwrap(), "json {\"k\": 1} {{}} {{open");
    }

    #[test]
    fn test_list_placeholders() {
        let template = PromptTemplate::from_string("{{title}} {{abstract}} {{ title }} {name}");
        assert_eq!(template.list_placeholders(), vec!["title", "abstract"]);
    }
}
