//! Language registry: the configured languages and which of them are in
//! pipeline scope.
//!
//! A registry is a snapshot loaded from the languages table. Only enabled,
//! non-source languages are synchronized, translated and evaluated.

use crate::models::Language;

#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    source: String,
    languages: Vec<Language>,
}

impl LanguageRegistry {
    pub fn new(source: impl Into<String>, languages: Vec<Language>) -> Self {
        Self {
            source: source.into(),
            languages,
        }
    }

    /// Code of the source-of-truth language.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_source(&self, code: &str) -> bool {
        self.source == code
    }

    pub fn get_by_code(&self, code: &str) -> Option<&Language> {
        self.languages.iter().find(|lang| lang.code == code)
    }

    pub fn is_enabled(&self, code: &str) -> bool {
        self.get_by_code(code)
            .map(|lang| lang.enabled)
            .unwrap_or(false)
    }

    /// Whether `code` is an enabled, non-source language.
    pub fn is_target(&self, code: &str) -> bool {
        !self.is_source(code) && self.is_enabled(code)
    }

    /// Enabled, non-source languages, in configuration order.
    pub fn targets(&self) -> Vec<&Language> {
        self.languages
            .iter()
            .filter(|lang| lang.enabled && lang.code != self.source)
            .collect()
    }

    pub fn target_codes(&self) -> Vec<String> {
        self.targets().into_iter().map(|lang| lang.code.clone()).collect()
    }

    /// Whether rows in `code` take part in health classification:
    /// the source language and every enabled target.
    pub fn in_scope(&self, code: &str) -> bool {
        self.is_source(code) || self.is_enabled(code)
    }

    /// English name for prompts, falling back to the code.
    pub fn display_name<'a>(&'a self, code: &'a str) -> &'a str {
        self.get_by_code(code)
            .map(|lang| lang.name.as_str())
            .unwrap_or(code)
    }

    pub fn list_all(&self) -> &[Language] {
        &self.languages
    }
}
