//! Key synchronization: every enabled target language gets a row for every
//! source key.
//!
//! Missing rows are created as placeholders (no text, stale) so the
//! orchestrator and health report can see them. Sync never deletes and
//! never touches existing rows, so running it twice is a no-op.

use crate::error::{PipelineError, PipelineResult};
use crate::i18n::LanguageRegistry;
use crate::models::{page_location_for_key, PlaceholderRow};
use crate::store::TranslationStore;
use crate::translation::MAX_KEY_LENGTH;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rows per placeholder insert statement.
const INSERT_CHUNK: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub rows_created: u64,
    pub per_language: BTreeMap<String, u64>,
    /// Languages whose inserts failed; other languages are unaffected.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_languages: Vec<String>,
}

pub struct KeySyncEngine {
    store: Arc<dyn TranslationStore>,
    source_language: String,
}

impl KeySyncEngine {
    pub fn new(store: Arc<dyn TranslationStore>, source_language: &str) -> Self {
        Self {
            store,
            source_language: source_language.to_string(),
        }
    }

    pub async fn sync(&self) -> PipelineResult<SyncReport> {
        let registry =
            LanguageRegistry::new(self.source_language.as_str(), self.store.list_languages().await?);
        let mut source_rows = self.store.rows_for_language(&self.source_language).await?;
        source_rows.sort_by(|a, b| a.translation_key.cmp(&b.translation_key));

        let mut report = SyncReport::default();

        for language in registry.targets() {
            let existing = match self.store.keys_for_language(&language.code).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(language = %language.code, error = %e, "Failed to read language keys");
                    report.failed_languages.push(language.code.clone());
                    continue;
                }
            };

            let missing: Vec<PlaceholderRow> = source_rows
                .iter()
                .filter(|row| !existing.contains(&row.translation_key))
                .map(|row| PlaceholderRow {
                    translation_key: row.translation_key.clone(),
                    page_location: row.page_location.clone(),
                    context: row.context.clone(),
                })
                .collect();

            if missing.is_empty() {
                debug!(language = %language.code, "Language already has full key coverage");
                report.per_language.insert(language.code.clone(), 0);
                continue;
            }

            let mut created = 0;
            let mut failed = false;
            for chunk in missing.chunks(INSERT_CHUNK) {
                match self.store.insert_placeholders(&language.code, chunk).await {
                    Ok(n) => created += n,
                    Err(e) => {
                        warn!(language = %language.code, error = %e, "Failed to insert placeholder rows");
                        failed = true;
                        break;
                    }
                }
            }

            if failed {
                report.failed_languages.push(language.code.clone());
            }
            info!(language = %language.code, created, "Synchronized translation keys");
            report.per_language.insert(language.code.clone(), created);
            report.rows_created += created;
        }

        info!(
            rows_created = report.rows_created,
            languages = report.per_language.len(),
            "Key sync finished"
        );
        Ok(report)
    }

    /// Write a source-language entry. Returns whether the text changed, in
    /// which case every target row for the key is now stale.
    pub async fn update_source(
        &self,
        key: &str,
        text: &str,
        context: Option<&str>,
    ) -> PipelineResult<bool> {
        if key.is_empty() || key.chars().count() > MAX_KEY_LENGTH {
            return Err(PipelineError::validation(format!(
                "Translation keys must be 1..{} characters",
                MAX_KEY_LENGTH
            )));
        }

        let changed = self
            .store
            .upsert_source(
                &self.source_language,
                key,
                text,
                &page_location_for_key(key),
                context,
            )
            .await?;

        if changed {
            info!(key = %key, "Source text changed, translations marked stale");
        }
        Ok(changed)
    }
}
