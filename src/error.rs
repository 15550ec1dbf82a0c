//! Error taxonomy for the translation pipeline.
//!
//! Batch-level failures (`ProviderError`, `StoreError` raised while writing a
//! single batch) are accumulated into job results and never abort a job.
//! `PipelineError` is what escapes an operation.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the translation store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the external translation capability.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Translation provider rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Translation provider error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("Failed to reach translation provider: {0}")]
    Transport(String),

    #[error("Malformed translation provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    /// Rate limits, 5xx and transport failures are transient.
    /// Other 4xx responses and malformed bodies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::Transport(_) => true,
            ProviderError::Http { status, .. } => *status >= 500,
            ProviderError::MalformedResponse(_) => false,
        }
    }
}

/// Errors that escape a pipeline operation.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed request, rejected before any side effect.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("External service error: {0}")]
    ExternalService(#[from] ProviderError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// An evaluation run that is stuck, or a write from a run the stored
    /// record has moved past. Stuck runs must be reset by an operator.
    #[error("Evaluation for '{language}' is stale (last update {updated_at})")]
    StaleJob {
        language: String,
        updated_at: DateTime<Utc>,
    },
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        PipelineError::Validation(message.into())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
