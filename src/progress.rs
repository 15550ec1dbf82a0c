//! Per-language evaluation progress and stuck-job detection.
//!
//! `EvaluationTracker` is the only writer of `EvaluationProgress` records.
//! Everything else (health reports, HTTP polling) reads them.
//!
//! ```text
//! idle ──start──▶ in_progress ──complete──▶ completed
//!                   │  ▲   │
//!             pause │  │   └──fail──▶ error
//!                   ▼  │ resume           │
//!                  paused ◀───────────────┘ (resume also legal from error)
//! ```

use crate::error::{PipelineError, PipelineResult};
use crate::store::TranslationStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Minutes without a liveness update before an in-progress run is stuck.
pub const STUCK_AFTER_MINUTES: i64 = 10;

/// A run that has not evaluated a single key is stuck sooner.
pub const STUCK_BEFORE_FIRST_KEY_MINUTES: i64 = 5;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Idle,
    InProgress,
    Paused,
    Completed,
    Error,
}

impl EvaluationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Idle => "idle",
            EvaluationStatus::InProgress => "in_progress",
            EvaluationStatus::Paused => "paused",
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Error => "error",
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(EvaluationStatus::Idle),
            "in_progress" => Ok(EvaluationStatus::InProgress),
            "paused" => Ok(EvaluationStatus::Paused),
            "completed" => Ok(EvaluationStatus::Completed),
            "error" => Ok(EvaluationStatus::Error),
            other => Err(format!("unknown evaluation status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationProgress {
    pub language_code: String,
    pub status: EvaluationStatus,
    pub total_keys: i64,
    pub evaluated_keys: i64,
    pub last_evaluated_key: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl EvaluationProgress {
    pub fn idle(language: &str, now: DateTime<Utc>) -> Self {
        Self {
            language_code: language.to_string(),
            status: EvaluationStatus::Idle,
            total_keys: 0,
            evaluated_keys: 0,
            last_evaluated_key: None,
            started_at: None,
            updated_at: now,
            completed_at: None,
            error_message: None,
        }
    }

    /// In progress and the liveness timestamp has expired.
    pub fn is_stuck(&self, now: DateTime<Utc>) -> bool {
        if self.status != EvaluationStatus::InProgress {
            return false;
        }
        let silent_for = now - self.updated_at;
        silent_for > Duration::minutes(STUCK_AFTER_MINUTES)
            || (self.evaluated_keys == 0
                && silent_for > Duration::minutes(STUCK_BEFORE_FIRST_KEY_MINUTES))
    }

    /// Identity of the run this record describes, once one has started.
    pub fn run(&self) -> Option<EvaluationRun> {
        self.started_at.map(|started_at| EvaluationRun {
            language: self.language_code.clone(),
            started_at,
        })
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }
}

/// One evaluation run, identified by language and start time. A resume
/// keeps the identity; a fresh start replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRun {
    pub language: String,
    pub started_at: DateTime<Utc>,
}

/// A stuck run, as surfaced to operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckJob {
    pub language: String,
    pub evaluated_keys: i64,
    pub total_keys: i64,
    pub updated_at: DateTime<Utc>,
    pub silent_for_secs: i64,
}

impl StuckJob {
    fn from_progress(progress: &EvaluationProgress, now: DateTime<Utc>) -> Self {
        Self {
            language: progress.language_code.clone(),
            evaluated_keys: progress.evaluated_keys,
            total_keys: progress.total_keys,
            updated_at: progress.updated_at,
            silent_for_secs: (now - progress.updated_at).num_seconds(),
        }
    }

    pub fn into_error(self) -> PipelineError {
        PipelineError::StaleJob {
            language: self.language,
            updated_at: self.updated_at,
        }
    }
}

/// Mean of `completed_at - started_at` over records that have both.
pub fn average_duration(records: &[EvaluationProgress]) -> Option<Duration> {
    let durations: Vec<Duration> = records.iter().filter_map(|p| p.duration()).collect();
    if durations.is_empty() {
        return None;
    }
    let total_ms: i64 = durations.iter().map(|d| d.num_milliseconds()).sum();
    Some(Duration::milliseconds(total_ms / durations.len() as i64))
}

pub struct EvaluationTracker {
    store: Arc<dyn TranslationStore>,
    clock: Arc<dyn Clock>,
}

impl EvaluationTracker {
    pub fn new(store: Arc<dyn TranslationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current record, or a fresh idle one when none exists yet.
    pub async fn get(&self, language: &str) -> PipelineResult<EvaluationProgress> {
        Ok(self
            .store
            .get_progress(language)
            .await?
            .unwrap_or_else(|| EvaluationProgress::idle(language, self.clock.now())))
    }

    pub async fn list(&self) -> PipelineResult<Vec<EvaluationProgress>> {
        Ok(self.store.list_progress().await?)
    }

    /// Begin a fresh run: counters reset, `total_keys` taken from the store.
    ///
    /// A live in-progress run is refused; a stuck one must be reset first.
    pub async fn start(&self, language: &str) -> PipelineResult<EvaluationProgress> {
        let mut progress = self.get(language).await?;
        let now = self.clock.now();

        if progress.status == EvaluationStatus::InProgress {
            if progress.is_stuck(now) {
                return Err(StuckJob::from_progress(&progress, now).into_error());
            }
            return Err(PipelineError::validation(format!(
                "Evaluation for '{}' is already in progress",
                language
            )));
        }

        let total = self.store.count_rows(language).await?;
        progress.status = EvaluationStatus::InProgress;
        progress.total_keys = total as i64;
        progress.evaluated_keys = 0;
        progress.last_evaluated_key = None;
        progress.started_at = Some(now);
        progress.updated_at = now;
        progress.completed_at = None;
        progress.error_message = None;

        self.store.save_progress(&progress).await?;
        info!(language = %language, total_keys = total, "Evaluation started");
        Ok(progress)
    }

    /// Continue a paused or failed run from its cursor, keeping counters.
    pub async fn resume(&self, language: &str) -> PipelineResult<EvaluationProgress> {
        let mut progress = self.get(language).await?;
        self.require(&progress, &[EvaluationStatus::Paused, EvaluationStatus::Error], "resume")?;

        progress.status = EvaluationStatus::InProgress;
        progress.updated_at = self.clock.now();
        progress.error_message = None;

        self.store.save_progress(&progress).await?;
        info!(
            language = %language,
            evaluated_keys = progress.evaluated_keys,
            cursor = ?progress.last_evaluated_key,
            "Evaluation resumed"
        );
        Ok(progress)
    }

    /// Record one processed key. `updated_at` is the liveness signal.
    pub async fn advance(&self, run: &EvaluationRun, key: &str) -> PipelineResult<EvaluationProgress> {
        let mut progress = self.live(run).await?;

        progress.evaluated_keys += 1;
        progress.last_evaluated_key = Some(key.to_string());
        progress.updated_at = self.clock.now();

        self.store.save_progress(&progress).await?;
        Ok(progress)
    }

    pub async fn complete(&self, run: &EvaluationRun) -> PipelineResult<EvaluationProgress> {
        let mut progress = self.live(run).await?;

        let now = self.clock.now();
        progress.status = EvaluationStatus::Completed;
        progress.completed_at = Some(now);
        progress.updated_at = now;

        self.store.save_progress(&progress).await?;
        info!(
            language = %run.language,
            evaluated_keys = progress.evaluated_keys,
            "Evaluation completed"
        );
        Ok(progress)
    }

    /// Move to `error`, keeping counters and cursor so the run can resume.
    pub async fn fail(&self, run: &EvaluationRun, message: &str) -> PipelineResult<EvaluationProgress> {
        let mut progress = self.live(run).await?;

        progress.status = EvaluationStatus::Error;
        progress.error_message = Some(message.to_string());
        progress.updated_at = self.clock.now();

        self.store.save_progress(&progress).await?;
        warn!(language = %run.language, error = %message, "Evaluation failed");
        Ok(progress)
    }

    pub async fn pause(&self, run: &EvaluationRun) -> PipelineResult<EvaluationProgress> {
        let mut progress = self.live(run).await?;

        progress.status = EvaluationStatus::Paused;
        progress.updated_at = self.clock.now();

        self.store.save_progress(&progress).await?;
        info!(language = %run.language, "Evaluation paused");
        Ok(progress)
    }

    /// The stored record, if it is still `run` and still in progress.
    ///
    /// A reset, a restart or any other transition since the run began makes
    /// its writes stale.
    async fn live(&self, run: &EvaluationRun) -> PipelineResult<EvaluationProgress> {
        let progress = self.get(&run.language).await?;
        if progress.status != EvaluationStatus::InProgress
            || progress.started_at != Some(run.started_at)
        {
            warn!(
                language = %run.language,
                run_started_at = %run.started_at,
                status = %progress.status,
                "Ignoring write from superseded evaluation run"
            );
            return Err(PipelineError::StaleJob {
                language: run.language.clone(),
                updated_at: progress.updated_at,
            });
        }
        Ok(progress)
    }

    /// In-progress runs whose liveness timestamp has expired.
    pub async fn detect_stuck(&self) -> PipelineResult<Vec<StuckJob>> {
        let now = self.clock.now();
        Ok(self
            .store
            .list_progress()
            .await?
            .iter()
            .filter(|p| p.is_stuck(now))
            .map(|p| StuckJob::from_progress(p, now))
            .collect())
    }

    /// Operator-triggered reset of stuck runs to `idle`.
    ///
    /// Quality scores already written stay in place.
    pub async fn reset_stuck(&self) -> PipelineResult<Vec<String>> {
        let now = self.clock.now();
        let mut reset = Vec::new();

        for mut progress in self.store.list_progress().await? {
            if !progress.is_stuck(now) {
                continue;
            }
            warn!(
                language = %progress.language_code,
                last_update = %progress.updated_at,
                "Resetting stuck evaluation to idle"
            );
            progress.status = EvaluationStatus::Idle;
            progress.updated_at = now;
            self.store.save_progress(&progress).await?;
            reset.push(progress.language_code);
        }

        Ok(reset)
    }

    pub async fn average_duration(&self) -> PipelineResult<Option<Duration>> {
        Ok(average_duration(&self.store.list_progress().await?))
    }

    fn require(
        &self,
        progress: &EvaluationProgress,
        allowed: &[EvaluationStatus],
        action: &str,
    ) -> PipelineResult<()> {
        if allowed.contains(&progress.status) {
            Ok(())
        } else {
            Err(PipelineError::validation(format!(
                "Cannot {} evaluation for '{}' while {}",
                action, progress.language_code, progress.status
            )))
        }
    }
}
