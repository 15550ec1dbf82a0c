//! Storage seam for the pipeline.
//!
//! `TranslationStore` is implemented by the Postgres `Database` in production
//! and by `MemoryStore` for tests and dry runs. Every write is keyed by
//! `(translation_key, language_code)` so that sync, translate and remediation
//! are idempotent without any locking.

use crate::error::{StoreError, StoreResult};
use crate::models::{Language, PlaceholderRow, TranslationRow, TranslationUpsert};
use crate::progress::EvaluationProgress;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

#[async_trait]
pub trait TranslationStore: Send + Sync {
    // ========================================================================
    // LANGUAGES
    // ========================================================================

    async fn list_languages(&self) -> StoreResult<Vec<Language>>;

    /// Insert a language if absent. Existing rows are left untouched.
    async fn ensure_language(&self, language: &Language) -> StoreResult<bool>;

    // ========================================================================
    // TRANSLATION ROWS
    // ========================================================================

    async fn all_rows(&self) -> StoreResult<Vec<TranslationRow>>;

    async fn rows_for_language(&self, language: &str) -> StoreResult<Vec<TranslationRow>>;

    async fn keys_for_language(&self, language: &str) -> StoreResult<HashSet<String>>;

    async fn count_rows(&self, language: &str) -> StoreResult<u64>;

    /// Create empty, stale rows. Keys that already exist are skipped.
    /// Returns the number of rows actually created.
    async fn insert_placeholders(&self, language: &str, rows: &[PlaceholderRow]) -> StoreResult<u64>;

    /// Write machine translations: overwrite text, clear `is_stale`,
    /// reset `approved`. Returns the number of rows written.
    async fn upsert_translations(
        &self,
        language: &str,
        entries: &[TranslationUpsert],
    ) -> StoreResult<u64>;

    /// Write a source row. When the text changed, every other language's row
    /// for that key is flagged stale. Returns whether the text changed.
    async fn upsert_source(
        &self,
        source_language: &str,
        key: &str,
        text: &str,
        page_location: &str,
        context: Option<&str>,
    ) -> StoreResult<bool>;

    async fn delete_rows(&self, rows: &[(String, String)]) -> StoreResult<u64>;

    async fn set_quality_score(&self, language: &str, key: &str, score: f64) -> StoreResult<()>;

    /// Approve rows that are neither broken nor stale.
    async fn approve(&self, language: &str, keys: &[String]) -> StoreResult<u64>;

    // ========================================================================
    // EVALUATION PROGRESS
    // ========================================================================

    async fn get_progress(&self, language: &str) -> StoreResult<Option<EvaluationProgress>>;

    async fn list_progress(&self) -> StoreResult<Vec<EvaluationProgress>>;

    async fn save_progress(&self, progress: &EvaluationProgress) -> StoreResult<()>;
}

#[derive(Default)]
struct MemoryState {
    languages: Vec<Language>,
    rows: BTreeMap<(String, String), TranslationRow>,
    progress: BTreeMap<String, EvaluationProgress>,
    failing_keys: HashSet<String>,
}

/// In-process store with the same upsert semantics as the database.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row as-is, bypassing pipeline semantics.
    /// Used to seed fixtures and to simulate corrupted data.
    pub async fn put_row(&self, row: TranslationRow) {
        let mut state = self.state.lock().await;
        state.rows.insert(
            (row.translation_key.clone(), row.language_code.clone()),
            row,
        );
    }

    pub async fn get_row(&self, key: &str, language: &str) -> Option<TranslationRow> {
        let state = self.state.lock().await;
        state
            .rows
            .get(&(key.to_string(), language.to_string()))
            .cloned()
    }

    /// Make any translation upsert that touches `key` fail.
    pub async fn fail_writes_for(&self, key: &str) {
        self.state.lock().await.failing_keys.insert(key.to_string());
    }
}

#[async_trait]
impl TranslationStore for MemoryStore {
    async fn list_languages(&self) -> StoreResult<Vec<Language>> {
        Ok(self.state.lock().await.languages.clone())
    }

    async fn ensure_language(&self, language: &Language) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if state.languages.iter().any(|l| l.code == language.code) {
            return Ok(false);
        }
        state.languages.push(language.clone());
        Ok(true)
    }

    async fn all_rows(&self) -> StoreResult<Vec<TranslationRow>> {
        Ok(self.state.lock().await.rows.values().cloned().collect())
    }

    async fn rows_for_language(&self, language: &str) -> StoreResult<Vec<TranslationRow>> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .values()
            .filter(|row| row.language_code == language)
            .cloned()
            .collect())
    }

    async fn keys_for_language(&self, language: &str) -> StoreResult<HashSet<String>> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .values()
            .filter(|row| row.language_code == language)
            .map(|row| row.translation_key.clone())
            .collect())
    }

    async fn count_rows(&self, language: &str) -> StoreResult<u64> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .values()
            .filter(|row| row.language_code == language)
            .count() as u64)
    }

    async fn insert_placeholders(&self, language: &str, rows: &[PlaceholderRow]) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut created = 0;

        for row in rows {
            let id = (row.translation_key.clone(), language.to_string());
            if state.rows.contains_key(&id) {
                continue;
            }
            state.rows.insert(
                id,
                TranslationRow {
                    translation_key: row.translation_key.clone(),
                    language_code: language.to_string(),
                    translated_text: None,
                    page_location: row.page_location.clone(),
                    context: row.context.clone(),
                    approved: false,
                    quality_score: None,
                    is_stale: true,
                    is_intentionally_empty: false,
                    updated_at: now,
                },
            );
            created += 1;
        }

        Ok(created)
    }

    async fn upsert_translations(
        &self,
        language: &str,
        entries: &[TranslationUpsert],
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().await;

        if let Some(entry) = entries
            .iter()
            .find(|e| state.failing_keys.contains(&e.translation_key))
        {
            return Err(StoreError::Unavailable(format!(
                "write rejected for key '{}'",
                entry.translation_key
            )));
        }

        let now = Utc::now();
        for entry in entries {
            let id = (entry.translation_key.clone(), language.to_string());
            let row = state.rows.entry(id).or_insert_with(|| TranslationRow {
                translation_key: entry.translation_key.clone(),
                language_code: language.to_string(),
                translated_text: None,
                page_location: entry.page_location.clone(),
                context: None,
                approved: false,
                quality_score: None,
                is_stale: false,
                is_intentionally_empty: false,
                updated_at: now,
            });
            row.translated_text = Some(entry.translated_text.clone());
            row.page_location = entry.page_location.clone();
            row.is_stale = false;
            row.approved = false;
            row.updated_at = now;
        }

        Ok(entries.len() as u64)
    }

    async fn upsert_source(
        &self,
        source_language: &str,
        key: &str,
        text: &str,
        page_location: &str,
        context: Option<&str>,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let id = (key.to_string(), source_language.to_string());

        let changed = match state.rows.get_mut(&id) {
            Some(row) => {
                let changed = row.translated_text.as_deref() != Some(text);
                row.translated_text = Some(text.to_string());
                row.page_location = page_location.to_string();
                row.context = context.map(str::to_string);
                row.updated_at = now;
                changed
            }
            None => {
                state.rows.insert(
                    id,
                    TranslationRow {
                        translation_key: key.to_string(),
                        language_code: source_language.to_string(),
                        translated_text: Some(text.to_string()),
                        page_location: page_location.to_string(),
                        context: context.map(str::to_string),
                        approved: true,
                        quality_score: None,
                        is_stale: false,
                        is_intentionally_empty: false,
                        updated_at: now,
                    },
                );
                true
            }
        };

        if changed {
            for row in state.rows.values_mut() {
                if row.translation_key == key && row.language_code != source_language {
                    row.is_stale = true;
                    row.updated_at = now;
                }
            }
        }

        Ok(changed)
    }

    async fn delete_rows(&self, rows: &[(String, String)]) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut deleted = 0;
        for id in rows {
            if state.rows.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn set_quality_score(&self, language: &str, key: &str, score: f64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        match state.rows.get_mut(&(key.to_string(), language.to_string())) {
            Some(row) => {
                row.quality_score = Some(score);
                Ok(())
            }
            None => Err(StoreError::Unavailable(format!(
                "no row for '{}' in '{}'",
                key, language
            ))),
        }
    }

    async fn approve(&self, language: &str, keys: &[String]) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut approved = 0;
        for key in keys {
            if let Some(row) = state.rows.get_mut(&(key.clone(), language.to_string())) {
                if row.is_stale || row.is_broken() || row.approved {
                    continue;
                }
                row.approved = true;
                row.updated_at = now;
                approved += 1;
            }
        }
        Ok(approved)
    }

    async fn get_progress(&self, language: &str) -> StoreResult<Option<EvaluationProgress>> {
        Ok(self.state.lock().await.progress.get(language).cloned())
    }

    async fn list_progress(&self) -> StoreResult<Vec<EvaluationProgress>> {
        Ok(self.state.lock().await.progress.values().cloned().collect())
    }

    async fn save_progress(&self, progress: &EvaluationProgress) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .progress
            .insert(progress.language_code.clone(), progress.clone());
        Ok(())
    }
}
