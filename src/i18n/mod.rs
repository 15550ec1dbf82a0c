//! Internationalization (i18n) building blocks shared by the pipeline.
//!
//! # Architecture
//!
//! - `language`: validated language codes and compounding-language detection
//! - `registry`: snapshot of the languages table and which languages are in scope
//! - `validator`: write-time guard, soft checks and quality scoring
//! - `metrics`: translation observability counters
//!
//! # Example
//!
//! ```rust,ignore
//! use translation_sync::i18n::{LanguageCode, LanguageRegistry};
//!
//! let target = LanguageCode::parse("no")?;
//! let registry = LanguageRegistry::new("en", store.list_languages().await?);
//! assert!(registry.is_enabled(target.as_str()));
//! ```

mod language;
mod metrics;
mod registry;
mod validator;

pub use language::LanguageCode;
pub use metrics::{MetricsReport, TranslationMetrics};
pub use registry::LanguageRegistry;
pub use validator::{EntryRejection, TranslationValidator, ValidationReport, PROTECTED_TERMS};
