//! Stored prompt templates addressable by id.

use super::templates::{PromptError, PromptTemplate, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Id of the built-in template.
pub const DEFAULT_PROMPT_ID: &str = "default";

/// System message sent ahead of every rendered prompt.
pub const SYSTEM_PROMPT: &str = "You are a research assistant helping a team triage scientific literature. \
Answer concisely. When asked for structured output, reply with a single JSON object.";

const DEFAULT_TEMPLATE: &str = "Assess the following publication.\n\nTitle: {{title}}\n\nAbstract: {{abstract}}\n\n\
Reply with a JSON object containing \"summary\" (one sentence) and \"relevance\" (a number between 0 and 1).";

/// Where the prompt for a batch comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PromptSource {
    /// The built-in template.
    #[default]
    Default,
    /// A stored template, by id.
    Stored(String),
    /// Literal template text supplied by the caller.
    Literal(String),
}

/// Collection of stored prompt templates.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: BTreeMap<String, PromptTemplate>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(DEFAULT_PROMPT_ID.to_string(), PromptTemplate::from_string(DEFAULT_TEMPLATE));
        Self { templates }
    }
}

impl PromptLibrary {
    /// Library holding only the built-in template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template under `id`, replacing any previous one.
    pub fn insert(&mut self, id: impl Into<String>, template: PromptTemplate) {
        self.templates.insert(id.into(), template);
    }

    /// Load every `*.md` / `*.txt` file in `dir`; the file stem becomes the id.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or one of its templates cannot be read.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(PromptError::NotFound(dir.display().to_string()));
        }

        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_template = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"));
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_template {
                continue;
            }
            debug!(id, path = %path.display(), "Loaded prompt template");
            self.templates.insert(id.to_string(), PromptTemplate::load(&path)?);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Look up a stored template.
    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.get(id)
    }

    /// Ids of all stored templates, sorted.
    pub fn ids(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    /// Resolve a prompt source to a template.
    ///
    /// # Errors
    ///
    /// Returns `PromptError::UnknownId` for a stored id that does not exist.
    pub fn resolve(&self, source: &PromptSource) -> Result<PromptTemplate> {
        match source {
            PromptSource::Default => self
                .get(DEFAULT_PROMPT_ID)
                .cloned()
                .ok_or_else(|| PromptError::UnknownId(DEFAULT_PROMPT_ID.to_string())),
            PromptSource::Stored(id) => {
                self.get(id).cloned().ok_or_else(|| PromptError::UnknownId(id.clone()))
            }
            PromptSource::Literal(text) => Ok(PromptTemplate::from_string(text.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_template_uses_mapped_fields() {
        let library = PromptLibrary::new();
        let template = library.resolve(&PromptSource::Default).unwrap();
        assert_eq!(template.list_placeholders(), vec!["title", "abstract"]);
    }

    #[test]
    fn test_resolve_stored_and_literal() {
        let mut library = PromptLibrary::new();
        library.insert("tags", PromptTemplate::from_string("Tag: {{abstract}}"));

        let stored = library.resolve(&PromptSource::Stored("tags".into())).unwrap();
        assert_eq!(stored.content(), "Tag: {{abstract}}");

        let literal = library.resolve(&PromptSource::Literal("Hi {{title}}".into())).unwrap();
        assert_eq!(literal.content(), "Hi {{title}}");

        let missing = library.resolve(&PromptSource::Stored("nope".into()));
        assert!(matches!(missing, Err(PromptError::UnknownId(id)) if id == "nope"));
    }

    #[test]
    fn test_load_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("screening.md"), "Screen {{abstract}}").unwrap();
        std::fs::write(dir.path().join("keywords.txt"), "Keywords for {{title}}").unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();

        let mut library = PromptLibrary::new();
        assert_eq!(library.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(library.ids(), vec!["default", "keywords", "screening"]);
    }

    #[test]
    fn test_load_dir_missing() {
        let mut library = PromptLibrary::new();
        assert!(matches!(
            library.load_dir(Path::new("/no/such/prompts")),
            Err(PromptError::NotFound(_))
        ));
    }
}
