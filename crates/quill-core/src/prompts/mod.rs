//! Prompt template system.
//!
//! Templates use `{{placeholder}}` syntax. Every input column is available by its
//! header name, and the mapped content/heading columns are also exposed as
//! `{{abstract}}` and `{{title}}`.
//!
//! # Example
//!
//! ```rust
//! use quill_core::prompts::{PromptContext, PromptTemplate};
//!
//! let template = PromptTemplate::from_string("Summarize: {{abstract}}");
//! let mut context = PromptContext::new();
//! context.set("abstract", "We study protein folding.");
//! assert_eq!(template.render(&context).unwrap(), "Summarize: We study protein folding.");
//! ```

pub mod library;
pub mod templates;

pub use library::{DEFAULT_PROMPT_ID, PromptLibrary, PromptSource, SYSTEM_PROMPT};
pub use templates::{PromptContext, PromptError, PromptTemplate, RenderOptions};
