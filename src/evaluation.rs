//! Quality evaluation runs and approval.
//!
//! An evaluation walks one language's rows in key order, scores each row
//! against its source text and reports every key to the tracker. Paused and
//! failed runs pick up after the tracker's cursor.

use crate::error::{PipelineError, PipelineResult};
use crate::i18n::{LanguageCode, LanguageRegistry, TranslationValidator};
use crate::progress::{EvaluationProgress, EvaluationRun, EvaluationStatus, EvaluationTracker};
use crate::store::TranslationStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Evaluator {
    store: Arc<dyn TranslationStore>,
    tracker: Arc<EvaluationTracker>,
    source_language: String,
}

impl Evaluator {
    pub fn new(
        store: Arc<dyn TranslationStore>,
        tracker: Arc<EvaluationTracker>,
        source_language: &str,
    ) -> Self {
        Self {
            store,
            tracker,
            source_language: source_language.to_string(),
        }
    }

    /// Only enabled, non-source languages are evaluated or approved.
    async fn target(&self, language: &str) -> PipelineResult<LanguageCode> {
        let code = LanguageCode::parse(language)?;
        if code.as_str() == self.source_language {
            return Err(PipelineError::validation(format!(
                "'{}' is the source language",
                language
            )));
        }

        let registry = LanguageRegistry::new(
            self.source_language.as_str(),
            self.store.list_languages().await?,
        );
        if !registry.is_target(code.as_str()) {
            return Err(PipelineError::validation(format!(
                "'{}' is not an enabled target language",
                language
            )));
        }
        Ok(code)
    }

    /// Run (or resume) a quality evaluation for `language`.
    ///
    /// Returns the final progress record: `completed`, or `paused` when
    /// cancelled. A store failure moves the run to `error` and is returned.
    pub async fn evaluate(
        &self,
        language: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<EvaluationProgress> {
        let progress = self.begin(language).await?;
        self.run(progress, cancel).await
    }

    /// Move the tracker into `in_progress`: a fresh start, or a resume for
    /// paused and failed runs. Refused while a run is live or stuck.
    pub async fn begin(&self, language: &str) -> PipelineResult<EvaluationProgress> {
        let code = self.target(language).await?;
        let current = self.tracker.get(code.as_str()).await?;

        match current.status {
            EvaluationStatus::Paused | EvaluationStatus::Error => self.tracker.resume(code.as_str()).await,
            _ => self.tracker.start(code.as_str()).await,
        }
    }

    /// Score the rows of a begun run, starting after its cursor.
    pub async fn run(
        &self,
        progress: EvaluationProgress,
        cancel: &CancellationToken,
    ) -> PipelineResult<EvaluationProgress> {
        let run = progress.run().ok_or_else(|| {
            PipelineError::validation(format!(
                "Evaluation for '{}' has not been started",
                progress.language_code
            ))
        })?;
        let cursor = progress.last_evaluated_key.as_deref();

        match self.score_rows(&run, cursor, cancel).await {
            Ok(true) => self.tracker.complete(&run).await,
            Ok(false) => self.tracker.pause(&run).await,
            Err(e @ PipelineError::StaleJob { .. }) => {
                warn!(language = %run.language, "Evaluation run was superseded, stopping");
                Err(e)
            }
            Err(e) => {
                self.tracker.fail(&run, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Score rows after `cursor`. Returns `false` when cancelled.
    async fn score_rows(
        &self,
        run: &EvaluationRun,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> PipelineResult<bool> {
        let language = run.language.as_str();
        let source: HashMap<String, Option<String>> = self
            .store
            .rows_for_language(&self.source_language)
            .await?
            .into_iter()
            .map(|row| {
                let text = row.text().map(str::to_string);
                (row.translation_key, text)
            })
            .collect();

        let mut rows = self.store.rows_for_language(language).await?;
        rows.sort_by(|a, b| a.translation_key.cmp(&b.translation_key));

        let mut scored = 0;
        for row in rows
            .iter()
            .filter(|row| cursor.map_or(true, |c| row.translation_key.as_str() > c))
        {
            if cancel.is_cancelled() {
                info!(language = %language, scored, "Evaluation cancelled");
                return Ok(false);
            }

            match source.get(&row.translation_key).and_then(|text| text.as_deref()) {
                Some(original) if !row.is_intentionally_empty => {
                    let score = TranslationValidator::quality_score(
                        &row.translation_key,
                        original,
                        row.translated_text.as_deref(),
                    );
                    self.store
                        .set_quality_score(language, &row.translation_key, score)
                        .await?;
                    if score < 0.5 {
                        debug!(language = %language, key = %row.translation_key, score, "Low quality translation");
                    }
                    scored += 1;
                }
                _ => debug!(language = %language, key = %row.translation_key, "No source text, not scored"),
            }

            self.tracker.advance(run, &row.translation_key).await?;
        }

        Ok(true)
    }

    /// Approve rows that are neither broken nor stale. Returns the count approved.
    pub async fn approve(&self, language: &str, keys: &[String]) -> PipelineResult<u64> {
        let code = self.target(language).await?;
        if keys.is_empty() {
            return Err(PipelineError::validation("keys must not be empty"));
        }

        let approved = self.store.approve(code.as_str(), keys).await?;
        if approved < keys.len() as u64 {
            warn!(
                language = %code,
                requested = keys.len(),
                approved,
                "Some rows were not approved (missing, stale or broken)"
            );
        } else {
            info!(language = %code, approved, "Approved translations");
        }
        Ok(approved)
    }
}
