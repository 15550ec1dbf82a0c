use crate::config::Config;
use crate::error::{PipelineError, PipelineResult, ProviderError};
use crate::i18n::{LanguageCode, LanguageRegistry, TranslationMetrics, TranslationValidator, PROTECTED_TERMS};
use crate::models::{page_location_for_key, SourceEntry, TranslationUpsert};
use crate::openai::{TranslatedEntry, TranslationProvider};
use crate::retry::{with_retry_if, RetryConfig};
use crate::store::TranslationStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const MAX_KEYS: usize = 2000;
pub const MAX_KEY_LENGTH: usize = 500;

/// Longest pause honoured from a provider's `Retry-After` header.
const MAX_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(60);

/// Translate job request, as accepted at the orchestrator boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateJobRequest {
    pub translation_keys: Vec<String>,
    pub target_language: String,
    #[serde(default)]
    pub source_language: Option<String>,
}

impl TranslateJobRequest {
    pub fn new(target_language: &str, keys: Vec<String>) -> Self {
        Self {
            translation_keys: keys,
            target_language: target_language.to_string(),
            source_language: None,
        }
    }

    /// Reject malformed requests before any store access or provider call.
    pub fn validate(&self, default_source: &str, max_keys: usize) -> PipelineResult<ValidatedJob> {
        let target = LanguageCode::parse(&self.target_language)?;
        let source = LanguageCode::parse(self.source_language.as_deref().unwrap_or(default_source))?;

        if target == source {
            return Err(PipelineError::validation(format!(
                "Target language '{}' is the source language",
                target
            )));
        }
        if self.translation_keys.is_empty() {
            return Err(PipelineError::validation("translationKeys must not be empty"));
        }
        if self.translation_keys.len() > max_keys {
            return Err(PipelineError::validation(format!(
                "Too many translationKeys: {} (max {})",
                self.translation_keys.len(),
                max_keys
            )));
        }
        if let Some(bad) = self
            .translation_keys
            .iter()
            .find(|k| k.is_empty() || k.chars().count() > MAX_KEY_LENGTH)
        {
            return Err(PipelineError::validation(format!(
                "Translation keys must be 1..{} characters, got {}",
                MAX_KEY_LENGTH,
                bad.chars().count()
            )));
        }

        let mut seen = HashSet::new();
        let keys = self
            .translation_keys
            .iter()
            .filter(|k| seen.insert(k.as_str()))
            .cloned()
            .collect();

        Ok(ValidatedJob { target, source, keys })
    }
}

/// A request that passed validation. Keys are de-duplicated, order kept.
#[derive(Debug, Clone)]
pub struct ValidatedJob {
    pub target: LanguageCode,
    pub source: LanguageCode,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Partial,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => f.write_str("success"),
            JobStatus::Partial => f.write_str("partial"),
        }
    }
}

/// Complete accounting of one translate job.
///
/// `count + failed` always equals the number of distinct requested keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateJobResponse {
    pub language: String,
    pub count: usize,
    pub failed: usize,
    pub failed_batches: Vec<usize>,
    pub status: JobStatus,
}

impl TranslateJobResponse {
    fn new(language: &str, count: usize, failed: usize, failed_batches: Vec<usize>) -> Self {
        let status = if failed > 0 || !failed_batches.is_empty() {
            JobStatus::Partial
        } else {
            JobStatus::Success
        };
        Self {
            language: language.to_string(),
            count,
            failed,
            failed_batches,
            status,
        }
    }

    pub fn translated(&self) -> usize {
        self.count
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub source_language: String,
    pub batch_size: usize,
    pub max_keys: usize,
    /// Pause after a batch that ended rate limited
    pub rate_limit_pause: Duration,
    /// Per-batch retry policy for transient provider failures
    pub retry: RetryConfig,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_language: config.source_language.clone(),
            batch_size: config.batch_size.max(1),
            max_keys: config.max_keys.max(1),
            rate_limit_pause: Duration::from_millis(config.rate_limit_pause_ms),
            retry: RetryConfig::provider_batch(config.batch_retry_attempts),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            source_language: "en".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_keys: MAX_KEYS,
            rate_limit_pause: Duration::from_secs(2),
            retry: RetryConfig::default(),
        }
    }
}

enum BatchOutcome {
    Written { written: usize, rejected: usize },
    Failed,
}

/// A finished job and how many batch indices it used.
struct JobOutcome {
    response: TranslateJobResponse,
    batches: usize,
}

/// Drives the translation provider over a key set in fixed-size batches.
///
/// Batches run sequentially. A failed batch is recorded and the job moves on;
/// nothing a batch does can abort the job once its input is validated.
pub struct Orchestrator {
    store: Arc<dyn TranslationStore>,
    provider: Arc<dyn TranslationProvider>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TranslationStore>,
        provider: Arc<dyn TranslationProvider>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Validate and run a translate job.
    ///
    /// Errors are returned only before the first batch: a malformed request,
    /// a target that is not an enabled language, or an unreadable languages
    /// table. Every other outcome is reported in the response.
    pub async fn translate(
        &self,
        request: &TranslateJobRequest,
        cancel: &CancellationToken,
    ) -> PipelineResult<TranslateJobResponse> {
        let job = request.validate(&self.settings.source_language, self.settings.max_keys)?;
        let registry = self.target_registry(&job).await?;
        Ok(self.run(job, &registry, cancel).await.response)
    }

    /// Languages snapshot for a job. Disabled and unconfigured targets are
    /// refused.
    async fn target_registry(&self, job: &ValidatedJob) -> PipelineResult<LanguageRegistry> {
        let registry = LanguageRegistry::new(job.source.as_str(), self.store.list_languages().await?);
        if !registry.is_target(job.target.as_str()) {
            return Err(PipelineError::validation(format!(
                "'{}' is not an enabled target language",
                job.target
            )));
        }
        Ok(registry)
    }

    /// Translate an arbitrary key set, splitting it into jobs of at most
    /// `max_keys`. Used by remediation, which may exceed a single request.
    pub async fn translate_all_keys(
        &self,
        target_language: &str,
        keys: Vec<String>,
        cancel: &CancellationToken,
    ) -> PipelineResult<TranslateJobResponse> {
        let mut total = TranslateJobResponse::new(target_language, 0, 0, Vec::new());
        let mut batch_offset = 0;

        for chunk in keys.chunks(self.settings.max_keys) {
            let request = TranslateJobRequest::new(target_language, chunk.to_vec());
            let job = request.validate(&self.settings.source_language, self.settings.max_keys)?;
            let registry = self.target_registry(&job).await?;
            let JobOutcome { response, batches } = self.run(job, &registry, cancel).await;

            total.count += response.count;
            total.failed += response.failed;
            total
                .failed_batches
                .extend(response.failed_batches.iter().map(|b| b + batch_offset));
            batch_offset += batches;
        }

        Ok(TranslateJobResponse::new(
            target_language,
            total.count,
            total.failed,
            total.failed_batches,
        ))
    }

    async fn run(
        &self,
        job: ValidatedJob,
        registry: &LanguageRegistry,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let target = job.target.as_str();
        let requested = job.keys.len();
        let batch_size = self.settings.batch_size.max(1);

        // One scan of the source language, filtered in memory.
        let source_rows = match self.store.rows_for_language(job.source.as_str()).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(language = %target, error = %e, "Failed to load source rows, job failed");
                let batches = requested.div_ceil(batch_size);
                return JobOutcome {
                    response: TranslateJobResponse::new(target, 0, requested, (0..batches).collect()),
                    batches,
                };
            }
        };

        let by_key: HashMap<&str, _> = source_rows
            .iter()
            .map(|row| (row.translation_key.as_str(), row))
            .collect();

        let mut entries = Vec::with_capacity(requested);
        let mut failed = 0;
        for key in &job.keys {
            match by_key.get(key.as_str()).and_then(|row| row.text().map(|text| (row, text))) {
                Some((row, text)) => entries.push(SourceEntry {
                    key: key.clone(),
                    text: text.to_string(),
                    page: row.page_location.clone(),
                    context: row.context.clone(),
                }),
                None => failed += 1,
            }
        }
        if failed > 0 {
            warn!(
                language = %target,
                count = failed,
                "Requested keys have no source text and were skipped"
            );
        }

        let instruction = build_translation_system_prompt(
            registry.display_name(job.source.as_str()),
            registry.display_name(target),
            &job.target,
        );

        let batch_count = entries.len().div_ceil(batch_size);
        info!(
            language = %target,
            keys = entries.len(),
            batches = batch_count,
            "Starting translation job"
        );

        let mut translated = 0;
        let mut failed_batches = Vec::new();

        for (index, batch) in entries.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                let remaining = entries.len() - index * batch_size;
                warn!(
                    language = %target,
                    batch = index,
                    remaining_keys = remaining,
                    "Translation job cancelled before batch"
                );
                failed += remaining;
                failed_batches.extend(index..batch_count);
                break;
            }

            match self.translate_batch(index, batch, &job.target, &instruction).await {
                BatchOutcome::Written { written, rejected } => {
                    translated += written;
                    failed += rejected;
                }
                BatchOutcome::Failed => {
                    failed += batch.len();
                    failed_batches.push(index);
                }
            }
        }

        let response = TranslateJobResponse::new(target, translated, failed, failed_batches);
        info!(
            language = %target,
            translated = response.count,
            failed = response.failed,
            failed_batches = ?response.failed_batches,
            status = %response.status,
            "Translation job finished"
        );
        JobOutcome {
            response,
            batches: batch_count,
        }
    }

    async fn translate_batch(
        &self,
        index: usize,
        batch: &[SourceEntry],
        target: &LanguageCode,
        instruction: &str,
    ) -> BatchOutcome {
        let metrics = TranslationMetrics::global();
        let provider = &self.provider;
        let language = target.as_str();

        let result = with_retry_if(
            &self.settings.retry,
            &format!("Translation batch {} to {}", index, language),
            || {
                metrics.record_provider_call();
                async move {
                    let result = provider.translate(batch, language, instruction).await;
                    if let Err(e) = &result {
                        metrics.record_provider_failure();
                        if e.is_rate_limited() {
                            metrics.record_rate_limited();
                        }
                    }
                    result
                }
            },
            ProviderError::is_retryable,
        )
        .await;

        let translations = match result {
            Ok(translations) => translations,
            Err(e) => {
                warn!(language = %language, batch = index, error = %e, "Translation batch failed");
                if let ProviderError::RateLimited { retry_after } = &e {
                    let pause = retry_after
                        .map(|d| d.min(MAX_RATE_LIMIT_PAUSE))
                        .unwrap_or(self.settings.rate_limit_pause);
                    if !pause.is_zero() {
                        debug!(language = %language, ?pause, "Pausing after rate limit");
                        tokio::time::sleep(pause).await;
                    }
                }
                return BatchOutcome::Failed;
            }
        };

        let accepted = accept_translations(batch, translations, language, index);
        let rejected = batch.len() - accepted.len();
        metrics.record_entries_rejected(rejected);

        if accepted.is_empty() {
            warn!(language = %language, batch = index, "No valid translations in batch");
            return BatchOutcome::Failed;
        }

        match self.store.upsert_translations(language, &accepted).await {
            Ok(_) => {
                metrics.record_rows_upserted(accepted.len());
                debug!(
                    language = %language,
                    batch = index,
                    written = accepted.len(),
                    rejected,
                    "Translation batch written"
                );
                BatchOutcome::Written {
                    written: accepted.len(),
                    rejected,
                }
            }
            Err(e) => {
                warn!(language = %language, batch = index, error = %e, "Failed to write translation batch");
                BatchOutcome::Failed
            }
        }
    }
}

/// Keep provider entries that answer a requested key with real text.
///
/// Unknown keys and duplicates are ignored; empty and key-echo translations
/// are rejected. Soft validation problems are only logged.
fn accept_translations(
    batch: &[SourceEntry],
    translations: Vec<TranslatedEntry>,
    language: &str,
    index: usize,
) -> Vec<TranslationUpsert> {
    let requested: HashMap<&str, &SourceEntry> =
        batch.iter().map(|entry| (entry.key.as_str(), entry)).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut accepted = Vec::with_capacity(batch.len());

    for entry in translations {
        let Some(source) = requested.get(entry.key.as_str()) else {
            debug!(language = %language, batch = index, key = %entry.key, "Ignoring unrequested key");
            continue;
        };
        if !seen.insert(entry.key.clone()) {
            continue;
        }
        if let Err(reason) = TranslationValidator::check_entry(&entry.key, &entry.text) {
            warn!(language = %language, batch = index, key = %entry.key, %reason, "Rejected translation");
            continue;
        }

        let report = TranslationValidator::validate(&source.text, &entry.text);
        if !report.is_clean() {
            warn!(
                language = %language,
                key = %entry.key,
                errors = ?report.errors,
                warnings = ?report.warnings,
                "Translation validation issues"
            );
        }

        accepted.push(TranslationUpsert {
            page_location: page_location_for_key(&entry.key),
            translated_text: entry.text.trim().to_string(),
            translation_key: entry.key,
        });
    }

    let dropped: Vec<&str> = batch
        .iter()
        .map(|entry| entry.key.as_str())
        .filter(|key| !seen.contains(*key))
        .collect();
    if !dropped.is_empty() {
        warn!(
            language = %language,
            batch = index,
            count = dropped.len(),
            keys = ?dropped,
            "Provider response is missing requested keys"
        );
    }

    accepted
}

/// Build the system instruction sent with every batch.
pub fn build_translation_system_prompt(
    source_name: &str,
    target_name: &str,
    target: &LanguageCode,
) -> String {
    let compound_rule = if target.is_compounding() {
        format!(
            "\n### Compound words:\n- {} forms compound words. Translate whole phrases, not word by word, \
             and join compounds the way a native writer would.\n",
            target_name
        )
    } else {
        String::new()
    };

    format!(
        r#"You are a professional website translator. Translate user interface text from {source} to {target} ({code}).

## Translation Rules

### DO NOT translate (keep verbatim):
- These terms: {terms}
- Interpolation placeholders such as {{name}} or {{{{count}}}}
- HTML tags and attributes, URLs and email addresses
- The translation keys themselves

### Tone:
- Declarative and concise, matching website copy
- Use the informal form of address where the language distinguishes it
- Never leave text in {source} unless it is a protected term
{compound}
### Output format:
- Reply with a JSON object: {{"translations": [{{"key": "<key>", "text": "<translation>"}}]}}
- Return exactly one entry per input key, using the key unchanged
- "text" must be the translation, never the key"#,
        source = source_name,
        target = target_name,
        code = target,
        terms = PROTECTED_TERMS.join(", "),
        compound = compound_rule,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlaceholderRow;
    use crate::store::MemoryStore;
    use crate::test_support::{
        fast_settings, language, seed_languages, seed_source, translate_suffix, RecordingProvider,
    };
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    const TARGETS: &[(&str, &str)] = &[
        ("no", "Norwegian"),
        ("de", "German"),
        ("sv", "Swedish"),
        ("fi", "Finnish"),
    ];

    async fn orchestrator_with(
        store: Arc<MemoryStore>,
        provider: Arc<RecordingProvider>,
        settings: OrchestratorSettings,
    ) -> Orchestrator {
        seed_languages(&store, TARGETS).await;
        Orchestrator::new(store, provider, settings)
    }

    // ==================== Request Validation ====================

    #[test]
    fn test_validate_rejects_empty_keys() {
        let request = TranslateJobRequest::new("no", vec![]);
        assert!(matches!(request.validate("en", MAX_KEYS), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_requests() {
        let request = TranslateJobRequest::new("no", (0..2001).map(|i| format!("k{}", i)).collect());
        let err = request.validate("en", MAX_KEYS).unwrap_err();
        assert!(err.to_string().contains("2001"));
    }

    #[test]
    fn test_validate_rejects_bad_key_lengths() {
        let request = TranslateJobRequest::new("no", vec!["".to_string()]);
        assert!(request.validate("en", MAX_KEYS).is_err());

        let request = TranslateJobRequest::new("no", vec!["x".repeat(501)]);
        assert!(request.validate("en", MAX_KEYS).is_err());

        let request = TranslateJobRequest::new("no", vec!["x".repeat(500)]);
        assert!(request.validate("en", MAX_KEYS).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_language_codes() {
        let request = TranslateJobRequest::new("norsk", keys(&["a"]));
        assert!(request.validate("en", MAX_KEYS).is_err());

        let mut request = TranslateJobRequest::new("no", keys(&["a"]));
        request.source_language = Some("EN".to_string());
        assert!(request.validate("en", MAX_KEYS).is_err());
    }

    #[test]
    fn test_validate_rejects_source_as_target() {
        let request = TranslateJobRequest::new("en", keys(&["a"]));
        assert!(request.validate("en", MAX_KEYS).is_err());
    }

    #[test]
    fn test_validate_dedupes_keys_in_order() {
        let request = TranslateJobRequest::new("pt-BR", keys(&["b", "a", "b"]));
        let job = request.validate("en", MAX_KEYS).unwrap();
        assert_eq!(job.keys, keys(&["b", "a"]));
        assert_eq!(job.target.as_str(), "pt-BR");
        assert_eq!(job.source.as_str(), "en");
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: TranslateJobRequest = serde_json::from_str(
            r#"{"translationKeys":["a"],"targetLanguage":"de","sourceLanguage":"en"}"#,
        )
        .unwrap();
        assert_eq!(request.translation_keys, keys(&["a"]));
        assert_eq!(request.source_language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_validation_error_makes_no_provider_call() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(RecordingProvider::new(translate_suffix("no")));
        let orchestrator = orchestrator_with(store, provider.clone(), fast_settings()).await;

        let result = orchestrator
            .translate(&TranslateJobRequest::new("no", vec![]), &CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_and_unknown_targets_are_refused() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("a", "A"), ("b", "B")]).await;
        store.ensure_language(&language("fr", "French", false)).await.unwrap();
        let provider = Arc::new(RecordingProvider::new(translate_suffix("fr")));
        let orchestrator = orchestrator_with(store.clone(), provider.clone(), fast_settings()).await;

        for target in ["fr", "zz"] {
            let result = orchestrator
                .translate(&TranslateJobRequest::new(target, keys(&["a", "b"])), &CancellationToken::new())
                .await;
            assert!(matches!(result, Err(PipelineError::Validation(_))), "{} accepted", target);

            let result = orchestrator
                .translate_all_keys(target, keys(&["a"]), &CancellationToken::new())
                .await;
            assert!(matches!(result, Err(PipelineError::Validation(_))));
        }

        assert_eq!(provider.call_count(), 0);
        assert!(store.rows_for_language("fr").await.unwrap().is_empty());
        assert!(store.rows_for_language("zz").await.unwrap().is_empty());
    }

    // ==================== Prompt ====================

    #[test]
    fn test_prompt_lists_protected_terms_and_format() {
        let prompt = build_translation_system_prompt("English", "Spanish", &LanguageCode::parse("es").unwrap());

        assert!(prompt.contains("English"));
        assert!(prompt.contains("Spanish (es)"));
        assert!(prompt.contains("GitHub"));
        assert!(prompt.contains("{name}"));
        assert!(prompt.contains(r#"{"translations": [{"key": "<key>""#));
        assert!(!prompt.contains("Compound words"));
    }

    #[test]
    fn test_prompt_adds_compound_rule_for_compounding_languages() {
        let prompt = build_translation_system_prompt("English", "German", &LanguageCode::parse("de").unwrap());
        assert!(prompt.contains("Compound words"));
        assert!(prompt.contains("German forms compound words"));
    }

    // ==================== Job Execution ====================

    #[tokio::test]
    async fn test_translate_success_upserts_rows() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("home.a", "Hello"), ("home.b", "World")]).await;
        let provider = Arc::new(RecordingProvider::new(translate_suffix("no")));
        let orchestrator = orchestrator_with(store.clone(), provider, fast_settings()).await;

        let response = orchestrator
            .translate(
                &TranslateJobRequest::new("no", keys(&["home.a", "home.b"])),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.count, 2);
        assert_eq!(response.failed, 0);
        assert_eq!(response.status, JobStatus::Success);

        let row = store.get_row("home.a", "no").await.unwrap();
        assert_eq!(row.translated_text.as_deref(), Some("Hello [no]"));
        assert_eq!(row.page_location, "home");
        assert!(!row.is_stale);
        assert!(!row.approved);
    }

    #[tokio::test]
    async fn test_echoed_key_is_dropped_and_counted_failed() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("b", "Bee"), ("c", "Sea")]).await;
        store
            .insert_placeholders(
                "no",
                &[
                    PlaceholderRow {
                        translation_key: "b".to_string(),
                        page_location: "general".to_string(),
                        context: None,
                    },
                    PlaceholderRow {
                        translation_key: "c".to_string(),
                        page_location: "general".to_string(),
                        context: None,
                    },
                ],
            )
            .await
            .unwrap();

        let provider = Arc::new(RecordingProvider::new(|entries, _| {
            Ok(entries
                .iter()
                .map(|e| TranslatedEntry {
                    key: e.key.clone(),
                    text: if e.key == "c" { "c".to_string() } else { "Bie".to_string() },
                })
                .collect())
        }));
        let orchestrator = orchestrator_with(store.clone(), provider, fast_settings()).await;

        let response = orchestrator
            .translate(&TranslateJobRequest::new("no", keys(&["b", "c"])), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.count, 1);
        assert_eq!(response.failed, 1);
        assert!(response.failed_batches.is_empty());
        assert_eq!(response.status, JobStatus::Partial);

        assert_eq!(store.get_row("b", "no").await.unwrap().translated_text.as_deref(), Some("Bie"));
        let c = store.get_row("c", "no").await.unwrap();
        assert!(c.translated_text.is_none());
        assert!(c.is_stale);
    }

    #[tokio::test]
    async fn test_batches_are_fixed_size_and_sequential() {
        let store = Arc::new(MemoryStore::new());
        let source: Vec<(String, String)> =
            (0..250).map(|i| (format!("k{:03}", i), format!("Text {}", i))).collect();
        let pairs: Vec<(&str, &str)> = source.iter().map(|(k, t)| (k.as_str(), t.as_str())).collect();
        seed_source(&store, &pairs).await;

        let provider = Arc::new(RecordingProvider::new(translate_suffix("de")));
        let orchestrator = orchestrator_with(store, provider.clone(), fast_settings()).await;

        let all: Vec<String> = source.iter().map(|(k, _)| k.clone()).collect();
        let response = orchestrator
            .translate(&TranslateJobRequest::new("de", all), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.count, 250);
        let sizes: Vec<usize> = provider.calls().iter().map(|c| c.keys.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(provider.calls()[1].keys[0], "k100");
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_job() {
        let store = Arc::new(MemoryStore::new());
        let source: Vec<(String, String)> =
            (0..5).map(|i| (format!("k{}", i), format!("Text {}", i))).collect();
        let pairs: Vec<(&str, &str)> = source.iter().map(|(k, t)| (k.as_str(), t.as_str())).collect();
        seed_source(&store, &pairs).await;

        let provider = Arc::new(RecordingProvider::new(|entries, _| {
            if entries.iter().any(|e| e.key == "k2") {
                return Err(ProviderError::Http {
                    status: 400,
                    body: "bad batch".to_string(),
                });
            }
            translate_suffix("sv")(entries, "sv")
        }));
        let mut settings = fast_settings();
        settings.batch_size = 2;
        let orchestrator = orchestrator_with(store.clone(), provider, settings).await;

        let response = orchestrator
            .translate(
                &TranslateJobRequest::new("sv", source.iter().map(|(k, _)| k.clone()).collect()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.failed_batches, vec![1]);
        assert_eq!(response.count, 3);
        assert_eq!(response.failed, 2);
        assert_eq!(response.count + response.failed, 5);
        assert_eq!(response.status, JobStatus::Partial);
        assert!(store.get_row("k4", "sv").await.is_some());
    }

    #[tokio::test]
    async fn test_batch_with_no_valid_entries_is_failed() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("a", "A text"), ("b", "B text")]).await;
        let provider = Arc::new(RecordingProvider::new(|entries, _| {
            Ok(entries
                .iter()
                .map(|e| TranslatedEntry {
                    key: e.key.clone(),
                    text: "   ".to_string(),
                })
                .collect())
        }));
        let orchestrator = orchestrator_with(store, provider, fast_settings()).await;

        let response = orchestrator
            .translate(&TranslateJobRequest::new("no", keys(&["a", "b"])), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.failed_batches, vec![0]);
        assert_eq!(response.failed, 2);
        assert_eq!(response.count, 0);
    }

    #[tokio::test]
    async fn test_store_write_failure_isolated_to_batch() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("a", "A"), ("b", "B"), ("c", "C"), ("d", "D")]).await;
        store.fail_writes_for("b").await;

        let provider = Arc::new(RecordingProvider::new(translate_suffix("no")));
        let mut settings = fast_settings();
        settings.batch_size = 2;
        let orchestrator = orchestrator_with(store.clone(), provider, settings).await;

        let response = orchestrator
            .translate(
                &TranslateJobRequest::new("no", keys(&["a", "b", "c", "d"])),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.failed_batches, vec![0]);
        assert_eq!(response.count, 2);
        assert_eq!(response.failed, 2);
        assert!(store.get_row("c", "no").await.is_some());
    }

    #[tokio::test]
    async fn test_keys_without_source_text_count_as_failed() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("a", "A"), ("empty", "  ")]).await;
        let provider = Arc::new(RecordingProvider::new(translate_suffix("no")));
        let orchestrator = orchestrator_with(store, provider.clone(), fast_settings()).await;

        let response = orchestrator
            .translate(
                &TranslateJobRequest::new("no", keys(&["a", "empty", "unknown"])),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.count, 1);
        assert_eq!(response.failed, 2);
        assert_eq!(response.status, JobStatus::Partial);
        assert_eq!(provider.calls()[0].keys, keys(&["a"]));
    }

    #[tokio::test]
    async fn test_rate_limited_batch_retried_with_backoff() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("a", "A")]).await;

        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = attempts.clone();
        let provider = Arc::new(RecordingProvider::new(move |entries, lang| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                return Err(ProviderError::RateLimited { retry_after: None });
            }
            translate_suffix("no")(entries, lang)
        }));
        let mut settings = fast_settings();
        settings.retry = RetryConfig::new(3, Duration::from_millis(1));
        let orchestrator = orchestrator_with(store, provider.clone(), settings).await;

        let response = orchestrator
            .translate(&TranslateJobRequest::new("no", keys(&["a"])), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status, JobStatus::Success);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_exhausted_reports_failed_batch() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("a", "A"), ("b", "B")]).await;
        let provider = Arc::new(RecordingProvider::new(|entries, lang| {
            if entries[0].key == "a" {
                return Err(ProviderError::RateLimited { retry_after: None });
            }
            translate_suffix("no")(entries, lang)
        }));
        let mut settings = fast_settings();
        settings.batch_size = 1;
        let orchestrator = orchestrator_with(store, provider.clone(), settings).await;

        let response = orchestrator
            .translate(&TranslateJobRequest::new("no", keys(&["a", "b"])), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.failed_batches, vec![0]);
        assert_eq!(response.count, 1);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_batch() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("a", "A"), ("b", "B"), ("c", "C")]).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let provider = Arc::new(RecordingProvider::new(move |entries, lang| {
            trigger.cancel();
            translate_suffix("no")(entries, lang)
        }));
        let mut settings = fast_settings();
        settings.batch_size = 1;
        let orchestrator = orchestrator_with(store.clone(), provider.clone(), settings).await;

        let response = orchestrator
            .translate(&TranslateJobRequest::new("no", keys(&["a", "b", "c"])), &cancel)
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 1);
        assert_eq!(response.count, 1);
        assert_eq!(response.failed, 2);
        assert_eq!(response.failed_batches, vec![1, 2]);
        assert!(store.get_row("a", "no").await.is_some());
    }

    #[tokio::test]
    async fn test_translate_all_keys_splits_oversized_sets() {
        let store = Arc::new(MemoryStore::new());
        let source: Vec<(String, String)> =
            (0..7).map(|i| (format!("k{}", i), format!("T{}", i))).collect();
        let pairs: Vec<(&str, &str)> = source.iter().map(|(k, t)| (k.as_str(), t.as_str())).collect();
        seed_source(&store, &pairs).await;

        let provider = Arc::new(RecordingProvider::new(translate_suffix("fi")));
        let mut settings = fast_settings();
        settings.max_keys = 3;
        let orchestrator = orchestrator_with(store, provider.clone(), settings).await;

        let response = orchestrator
            .translate_all_keys("fi", source.iter().map(|(k, _)| k.clone()).collect(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.count, 7);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_translate_all_keys_numbers_batches_that_ran() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("k1", "One"), ("k2", "Two"), ("k3", "Three")]).await;

        let provider = Arc::new(RecordingProvider::new(|entries, lang| {
            if entries.iter().any(|e| e.key == "k2") {
                return Err(ProviderError::Http {
                    status: 400,
                    body: "bad batch".to_string(),
                });
            }
            translate_suffix("no")(entries, lang)
        }));
        let mut settings = fast_settings();
        settings.batch_size = 1;
        settings.max_keys = 2;
        let orchestrator = orchestrator_with(store, provider.clone(), settings).await;

        // k0 has no source text, so the first chunk runs a single batch
        let response = orchestrator
            .translate_all_keys("no", keys(&["k0", "k1", "k2", "k3"]), &CancellationToken::new())
            .await
            .unwrap();

        let calls = provider.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].keys, keys(&["k2"]));
        assert_eq!(response.failed_batches, vec![1]);
        assert_eq!(response.count, 2);
        assert_eq!(response.failed, 2);
    }

    #[tokio::test]
    async fn test_never_writes_key_echo() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("a", "A"), ("b", "B")]).await;
        let provider = Arc::new(RecordingProvider::new(|entries, _| {
            Ok(entries
                .iter()
                .map(|e| TranslatedEntry {
                    key: e.key.clone(),
                    text: format!(" {} ", e.key),
                })
                .collect())
        }));
        let orchestrator = orchestrator_with(store.clone(), provider, fast_settings()).await;

        orchestrator
            .translate(&TranslateJobRequest::new("no", keys(&["a", "b"])), &CancellationToken::new())
            .await
            .unwrap();

        let rows = store.rows_for_language("no").await.unwrap();
        assert!(rows.iter().all(|row| !row.is_broken()));
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_keys_missing_from_response_count_as_failed() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("a", "A"), ("b", "B"), ("c", "C")]).await;
        let provider = Arc::new(RecordingProvider::new(|_, _| {
            Ok(vec![
                TranslatedEntry { key: "a".to_string(), text: "Første".to_string() },
                TranslatedEntry { key: "c".to_string(), text: "c".to_string() },
            ])
        }));
        let orchestrator = orchestrator_with(store.clone(), provider, fast_settings()).await;

        let response = orchestrator
            .translate(&TranslateJobRequest::new("no", keys(&["a", "b", "c"])), &CancellationToken::new())
            .await
            .unwrap();

        // b was never answered, c echoed its key
        assert_eq!(response.count, 1);
        assert_eq!(response.failed, 2);
        assert!(response.failed_batches.is_empty());
        assert!(store.get_row("b", "no").await.is_none());
    }

    #[tokio::test]
    async fn test_unrequested_and_duplicate_entries_ignored() {
        let store = Arc::new(MemoryStore::new());
        seed_source(&store, &[("a", "A")]).await;
        let provider = Arc::new(RecordingProvider::new(|_, _| {
            Ok(vec![
                TranslatedEntry { key: "a".to_string(), text: "Første".to_string() },
                TranslatedEntry { key: "a".to_string(), text: "Andre".to_string() },
                TranslatedEntry { key: "zzz".to_string(), text: "Fremmed".to_string() },
            ])
        }));
        let orchestrator = orchestrator_with(store.clone(), provider, fast_settings()).await;

        let response = orchestrator
            .translate(&TranslateJobRequest::new("no", keys(&["a"])), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.count, 1);
        assert_eq!(store.get_row("a", "no").await.unwrap().translated_text.as_deref(), Some("Første"));
        assert!(store.get_row("zzz", "no").await.is_none());
    }

    // ==================== Accounting Properties ====================

    #[derive(Debug, Clone, Copy)]
    enum KeyKind {
        Translated,
        NoSource,
        Echoed,
        Blank,
    }

    fn arb_key_kind() -> impl Strategy<Value = KeyKind> {
        prop_oneof![
            4 => Just(KeyKind::Translated),
            1 => Just(KeyKind::NoSource),
            1 => Just(KeyKind::Echoed),
            1 => Just(KeyKind::Blank),
        ]
    }

    proptest! {
        #[test]
        fn prop_every_key_is_translated_or_failed(
            kinds in prop::collection::vec(arb_key_kind(), 1..30),
            batch_size in 1..8usize,
            max_keys in 1..12usize,
            failing_calls in prop::collection::vec(any::<bool>(), 1..8),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let (response, calls, written) = runtime.block_on(async {
                let store = Arc::new(MemoryStore::new());
                let all_keys: Vec<String> = (0..kinds.len()).map(|i| format!("k{:02}", i)).collect();
                for (key, kind) in all_keys.iter().zip(&kinds) {
                    if !matches!(kind, KeyKind::NoSource) {
                        seed_source(&store, &[(key.as_str(), "Source text")]).await;
                    }
                }

                let echoed: HashSet<String> = all_keys
                    .iter()
                    .zip(&kinds)
                    .filter(|(_, kind)| matches!(kind, KeyKind::Echoed))
                    .map(|(key, _)| key.clone())
                    .collect();
                let blank: HashSet<String> = all_keys
                    .iter()
                    .zip(&kinds)
                    .filter(|(_, kind)| matches!(kind, KeyKind::Blank))
                    .map(|(key, _)| key.clone())
                    .collect();
                let call_index = AtomicUsize::new(0);
                let failing = failing_calls.clone();

                let provider = Arc::new(RecordingProvider::new(move |entries, _| {
                    let call = call_index.fetch_add(1, Ordering::SeqCst);
                    if failing[call % failing.len()] {
                        return Err(ProviderError::Http {
                            status: 400,
                            body: "rejected".to_string(),
                        });
                    }
                    Ok(entries
                        .iter()
                        .map(|e| TranslatedEntry {
                            key: e.key.clone(),
                            text: if echoed.contains(&e.key) {
                                e.key.clone()
                            } else if blank.contains(&e.key) {
                                " ".to_string()
                            } else {
                                format!("{} [no]", e.text)
                            },
                        })
                        .collect())
                }));

                let mut settings = fast_settings();
                settings.batch_size = batch_size;
                settings.max_keys = max_keys;
                let orchestrator = orchestrator_with(store.clone(), provider.clone(), settings).await;

                let response = orchestrator
                    .translate_all_keys("no", all_keys, &CancellationToken::new())
                    .await
                    .unwrap();
                let written = store.rows_for_language("no").await.unwrap().len();
                (response, provider.call_count(), written)
            });

            prop_assert_eq!(response.count + response.failed, kinds.len());
            prop_assert_eq!(response.count, written);
            prop_assert!(response.failed_batches.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(response.failed_batches.iter().all(|&b| b < calls));
            prop_assert_eq!(response.status == JobStatus::Partial, response.failed > 0);
        }
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let response = TranslateJobResponse::new("no", 3, 1, vec![2]);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "language": "no",
                "count": 3,
                "failed": 1,
                "failedBatches": [2],
                "status": "partial"
            })
        );
    }
}
