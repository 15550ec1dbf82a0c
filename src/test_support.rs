//! Shared fixtures for unit tests.

use crate::error::ProviderError;
use crate::models::{page_location_for_key, Language, SourceEntry};
use crate::openai::{TranslatedEntry, TranslationProvider};
use crate::retry::RetryConfig;
use crate::store::{MemoryStore, TranslationStore};
use crate::translation::OrchestratorSettings;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

type Responder =
    dyn Fn(&[SourceEntry], &str) -> Result<Vec<TranslatedEntry>, ProviderError> + Send + Sync;

#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub language: String,
    pub keys: Vec<String>,
}

/// Provider double that answers through a closure and records every call.
pub struct RecordingProvider {
    respond: Box<Responder>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl RecordingProvider {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&[SourceEntry], &str) -> Result<Vec<TranslatedEntry>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TranslationProvider for RecordingProvider {
    async fn translate(
        &self,
        entries: &[SourceEntry],
        target_language: &str,
        _instruction: &str,
    ) -> Result<Vec<TranslatedEntry>, ProviderError> {
        self.calls.lock().unwrap().push(ProviderCall {
            language: target_language.to_string(),
            keys: entries.iter().map(|e| e.key.clone()).collect(),
        });
        (self.respond)(entries, target_language)
    }
}

/// Responder that "translates" by appending `[lang]` to the source text.
pub fn translate_suffix(
    lang: &str,
) -> impl Fn(&[SourceEntry], &str) -> Result<Vec<TranslatedEntry>, ProviderError> + Send + Sync + Clone
{
    let lang = lang.to_string();
    move |entries: &[SourceEntry], _: &str| {
        Ok(entries
            .iter()
            .map(|e| TranslatedEntry {
                key: e.key.clone(),
                text: format!("{} [{}]", e.text, lang),
            })
            .collect())
    }
}

/// Settings with no pauses and a single attempt per batch.
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        source_language: "en".to_string(),
        batch_size: 100,
        max_keys: 2000,
        rate_limit_pause: Duration::ZERO,
        retry: RetryConfig::once(),
    }
}

pub fn language(code: &str, name: &str, enabled: bool) -> Language {
    Language {
        code: code.to_string(),
        name: name.to_string(),
        enabled,
        show_in_switcher: enabled,
    }
}

/// Register English plus the given `(code, name)` targets, all enabled.
pub async fn seed_languages(store: &MemoryStore, targets: &[(&str, &str)]) {
    store.ensure_language(&language("en", "English", true)).await.unwrap();
    for (code, name) in targets {
        store.ensure_language(&language(code, name, true)).await.unwrap();
    }
}

/// Write English source rows.
pub async fn seed_source(store: &MemoryStore, entries: &[(&str, &str)]) {
    for (key, text) in entries {
        store
            .upsert_source("en", key, text, &page_location_for_key(key), None)
            .await
            .unwrap();
    }
}
