use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `(translation_key, language_code)` row of the translation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRow {
    pub translation_key: String,
    pub language_code: String,
    pub translated_text: Option<String>,
    pub page_location: String,
    pub context: Option<String>,
    pub approved: bool,
    pub quality_score: Option<f64>,
    pub is_stale: bool,
    pub is_intentionally_empty: bool,
    pub updated_at: DateTime<Utc>,
}

impl TranslationRow {
    /// A row whose text is just its own key (the model echoed the key back).
    pub fn is_broken(&self) -> bool {
        self.translated_text.as_deref() == Some(self.translation_key.as_str())
    }

    /// Non-blank text is present.
    pub fn has_content(&self) -> bool {
        self.translated_text
            .as_deref()
            .map(|text| !text.trim().is_empty())
            .unwrap_or(false)
    }

    /// Text if present and non-blank.
    pub fn text(&self) -> Option<&str> {
        self.translated_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }
}

/// A configured language. Never deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub code: String,
    pub name: String,
    pub enabled: bool,
    pub show_in_switcher: bool,
}

/// A source entry handed to the translation provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceEntry {
    pub key: String,
    pub text: String,
    pub page: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// A validated translation ready to be upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationUpsert {
    pub translation_key: String,
    pub translated_text: String,
    pub page_location: String,
}

/// A coverage row created by key sync: no text yet, flagged stale.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderRow {
    pub translation_key: String,
    pub page_location: String,
    pub context: Option<String>,
}

/// Page location derived from the key prefix: `"pricing.title"` -> `"pricing"`.
pub fn page_location_for_key(key: &str) -> String {
    match key.split_once('.') {
        Some((prefix, _)) if !prefix.is_empty() => prefix.to_string(),
        _ => "general".to_string(),
    }
}
