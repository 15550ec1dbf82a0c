//! Corpus-wide health classification and remediation.
//!
//! Every stored row in scope (the source language plus enabled targets) lands
//! in exactly one class. Precedence for target rows is
//! broken > orphaned > stale > healthy; source rows are always healthy.
//! Missing rows are counted separately from the key-set difference.

use crate::error::{PipelineError, PipelineResult};
use crate::i18n::LanguageRegistry;
use crate::models::TranslationRow;
use crate::store::TranslationStore;
use crate::translation::{Orchestrator, TranslateJobResponse};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowHealth {
    Broken,
    Orphaned,
    Stale,
    Healthy,
}

/// Classify a target-language row against its source row.
///
/// A missing source row is treated like an empty one.
pub fn classify_row(row: &TranslationRow, source: Option<&TranslationRow>) -> RowHealth {
    if row.is_broken() {
        return RowHealth::Broken;
    }

    let source_empty = match source {
        Some(source) => !source.has_content() && !source.is_intentionally_empty,
        None => true,
    };
    if source_empty && !row.is_intentionally_empty {
        return RowHealth::Orphaned;
    }

    if row.is_stale {
        RowHealth::Stale
    } else {
        RowHealth::Healthy
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub broken_count: u64,
    pub missing_count: u64,
    pub stale_count: u64,
    pub orphaned_count: u64,
    pub healthy_count: u64,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RowRef {
    pub key: String,
    pub language: String,
}

/// Snapshot plus the rows behind each count, grouped by language where
/// remediation needs it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDetails {
    pub snapshot: HealthSnapshot,
    pub broken: Vec<RowRef>,
    pub orphaned: Vec<RowRef>,
    pub stale: BTreeMap<String, Vec<String>>,
    pub missing: BTreeMap<String, Vec<String>>,
}

/// Pure classification over a full scan.
pub fn analyze(rows: &[TranslationRow], registry: &LanguageRegistry) -> HealthDetails {
    let source_code = registry.source();
    let source_rows: HashMap<&str, &TranslationRow> = rows
        .iter()
        .filter(|row| row.language_code == source_code)
        .map(|row| (row.translation_key.as_str(), row))
        .collect();

    let mut details = HealthDetails::default();
    let mut target_keys: HashMap<&str, BTreeSet<&str>> = HashMap::new();

    for row in rows.iter().filter(|row| registry.in_scope(&row.language_code)) {
        details.snapshot.total_count += 1;

        if row.language_code == source_code {
            details.snapshot.healthy_count += 1;
            continue;
        }

        target_keys
            .entry(row.language_code.as_str())
            .or_default()
            .insert(row.translation_key.as_str());

        let row_ref = || RowRef {
            key: row.translation_key.clone(),
            language: row.language_code.clone(),
        };
        match classify_row(row, source_rows.get(row.translation_key.as_str()).copied()) {
            RowHealth::Broken => {
                details.snapshot.broken_count += 1;
                details.broken.push(row_ref());
            }
            RowHealth::Orphaned => {
                details.snapshot.orphaned_count += 1;
                details.orphaned.push(row_ref());
            }
            RowHealth::Stale => {
                details.snapshot.stale_count += 1;
                details
                    .stale
                    .entry(row.language_code.clone())
                    .or_default()
                    .push(row.translation_key.clone());
            }
            RowHealth::Healthy => details.snapshot.healthy_count += 1,
        }
    }

    let mut source_keys: Vec<&str> = source_rows.keys().copied().collect();
    source_keys.sort_unstable();
    for target in registry.targets() {
        let present = target_keys.get(target.code.as_str());
        let missing: Vec<String> = source_keys
            .iter()
            .filter(|key| present.map_or(true, |keys| !keys.contains(*key)))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            details.snapshot.missing_count += missing.len() as u64;
            details.missing.insert(target.code.clone(), missing);
        }
    }

    details.broken.sort();
    details.orphaned.sort();
    for keys in details.stale.values_mut() {
        keys.sort();
    }
    details
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixReport {
    pub deleted_broken: u64,
    pub retranslated: BTreeMap<String, TranslateJobResponse>,
    /// Stale keys left alone because their source row has no text.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub skipped_stale: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_languages: Vec<String>,
}

pub struct HealthChecker {
    store: Arc<dyn TranslationStore>,
    orchestrator: Arc<Orchestrator>,
    source_language: String,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn TranslationStore>,
        orchestrator: Arc<Orchestrator>,
        source_language: &str,
    ) -> Self {
        Self {
            store,
            orchestrator,
            source_language: source_language.to_string(),
        }
    }

    /// Source keys that have text to translate from.
    async fn translatable_keys(&self) -> PipelineResult<BTreeSet<String>> {
        Ok(self
            .store
            .rows_for_language(&self.source_language)
            .await?
            .into_iter()
            .filter(|row| row.has_content())
            .map(|row| row.translation_key)
            .collect())
    }

    async fn registry(&self) -> PipelineResult<LanguageRegistry> {
        Ok(LanguageRegistry::new(
            self.source_language.as_str(),
            self.store.list_languages().await?,
        ))
    }

    pub async fn scan(&self) -> PipelineResult<HealthSnapshot> {
        Ok(self.scan_detailed().await?.snapshot)
    }

    pub async fn scan_detailed(&self) -> PipelineResult<HealthDetails> {
        let registry = self.registry().await?;
        let rows = self.store.all_rows().await?;
        let details = analyze(&rows, &registry);

        info!(
            broken = details.snapshot.broken_count,
            missing = details.snapshot.missing_count,
            stale = details.snapshot.stale_count,
            orphaned = details.snapshot.orphaned_count,
            healthy = details.snapshot.healthy_count,
            total = details.snapshot.total_count,
            "Health scan complete"
        );
        Ok(details)
    }

    /// Delete broken rows, then re-translate each language's stale keys.
    ///
    /// Orphans are left for manual resolution. One language failing does not
    /// stop the others.
    pub async fn fix_all(&self, cancel: &CancellationToken) -> PipelineResult<FixReport> {
        let details = self.scan_detailed().await?;
        let mut report = FixReport::default();

        // Phase 1
        if !details.broken.is_empty() {
            let ids: Vec<(String, String)> = details
                .broken
                .iter()
                .map(|r| (r.key.clone(), r.language.clone()))
                .collect();
            report.deleted_broken = self.store.delete_rows(&ids).await?;
            info!(deleted = report.deleted_broken, "Deleted broken rows");
        }

        // Phase 2
        let translatable = if details.stale.is_empty() {
            BTreeSet::new()
        } else {
            self.translatable_keys().await?
        };
        for (language, stale) in details.stale {
            let (keys, skipped): (Vec<String>, Vec<String>) =
                stale.into_iter().partition(|key| translatable.contains(key));
            if !skipped.is_empty() {
                warn!(
                    language = %language,
                    keys = ?skipped,
                    "Stale rows have no source text to translate from"
                );
                report.skipped_stale.insert(language.clone(), skipped);
            }
            if keys.is_empty() {
                continue;
            }

            info!(language = %language, keys = keys.len(), "Re-translating stale rows");
            match self.orchestrator.translate_all_keys(&language, keys, cancel).await {
                Ok(response) => {
                    report.retranslated.insert(language, response);
                }
                Err(e) => {
                    warn!(language = %language, error = %e, "Stale re-translation rejected");
                    report.failed_languages.push(language);
                }
            }
        }

        if !details.orphaned.is_empty() {
            warn!(
                count = details.orphaned.len(),
                "Orphaned rows need manual resolution"
            );
        }
        Ok(report)
    }

    /// Re-translate the full source key set into every enabled target.
    pub async fn retranslate_all(
        &self,
        confirm: bool,
        cancel: &CancellationToken,
    ) -> PipelineResult<FixReport> {
        if !confirm {
            return Err(PipelineError::validation(
                "Full re-translation must be explicitly confirmed",
            ));
        }

        let registry = self.registry().await?;
        let keys: Vec<String> = self.translatable_keys().await?.into_iter().collect();

        let mut report = FixReport::default();
        if keys.is_empty() {
            warn!("No source text to re-translate");
            return Ok(report);
        }

        for language in registry.target_codes() {
            warn!(language = %language, keys = keys.len(), "Full re-translation started");
            match self
                .orchestrator
                .translate_all_keys(&language, keys.clone(), cancel)
                .await
            {
                Ok(response) => {
                    report.retranslated.insert(language, response);
                }
                Err(e) => {
                    warn!(language = %language, error = %e, "Full re-translation rejected");
                    report.failed_languages.push(language);
                }
            }
        }
        Ok(report)
    }
}
