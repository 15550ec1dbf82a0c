//! Wiring for the whole translation pipeline over one store and provider.

use crate::config::Config;
use crate::db::Database;
use crate::error::PipelineResult;
use crate::evaluation::Evaluator;
use crate::health::HealthChecker;
use crate::models::Language;
use crate::openai::{OpenAiTranslator, TranslationProvider};
use crate::progress::{Clock, EvaluationTracker, SystemClock};
use crate::store::TranslationStore;
use crate::sync::KeySyncEngine;
use crate::translation::{Orchestrator, OrchestratorSettings};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Pipeline {
    pub store: Arc<dyn TranslationStore>,
    pub sync: KeySyncEngine,
    pub orchestrator: Arc<Orchestrator>,
    pub tracker: Arc<EvaluationTracker>,
    pub evaluator: Evaluator,
    pub health: HealthChecker,
    /// Cancelled on shutdown; jobs stop before their next batch.
    pub shutdown: CancellationToken,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn TranslationStore>,
        provider: Arc<dyn TranslationProvider>,
        settings: OrchestratorSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let source = settings.source_language.clone();
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), provider, settings));
        let tracker = Arc::new(EvaluationTracker::new(store.clone(), clock));

        Self {
            sync: KeySyncEngine::new(store.clone(), &source),
            evaluator: Evaluator::new(store.clone(), tracker.clone(), &source),
            health: HealthChecker::new(store.clone(), orchestrator.clone(), &source),
            orchestrator,
            tracker,
            store,
            shutdown: CancellationToken::new(),
        }
    }

    /// Production wiring: PostgreSQL store and the OpenAI-compatible provider.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = Database::connect(&config.database_url).await?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;
        let provider = OpenAiTranslator::from_config(client, config);

        let pipeline = Self::new(
            Arc::new(db),
            Arc::new(provider),
            OrchestratorSettings::from_config(config),
            Arc::new(SystemClock),
        );
        pipeline
            .seed_languages(&config.languages)
            .await
            .context("Failed to seed languages")?;
        Ok(pipeline)
    }

    pub fn source_language(&self) -> &str {
        &self.orchestrator.settings().source_language
    }

    /// Register configured languages that are not stored yet. Existing
    /// rows (and their enabled flags) are left alone.
    pub async fn seed_languages(&self, languages: &[Language]) -> PipelineResult<usize> {
        let mut created = 0;
        for language in languages {
            if self.store.ensure_language(language).await? {
                info!(language = %language.code, enabled = language.enabled, "Registered language");
                created += 1;
            }
        }
        Ok(created)
    }
}
