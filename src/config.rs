use crate::models::Language;
use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // OpenAI-compatible translation provider
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_api_url: String,

    // Languages
    pub source_language: String,
    pub languages: Vec<Language>,

    // Translation pipeline
    pub batch_size: usize,
    pub max_keys: usize,
    pub rate_limit_pause_ms: u64,
    pub batch_retry_attempts: u32,

    // HTTP API
    pub api_key: Option<String>,
    pub port: u16,

    // Scheduling / polling
    pub sync_schedule: String,
    pub progress_poll_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let source_language =
            std::env::var("SOURCE_LANGUAGE").unwrap_or_else(|_| "en".to_string());
        let languages = parse_languages(
            &std::env::var("LANGUAGES").unwrap_or_else(|_| "en:English".to_string()),
        )?;

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL not set")?,

            openai_api_key: std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY not set")?,
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            openai_api_url: std::env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),

            source_language,
            languages,

            batch_size: env_or("TRANSLATION_BATCH_SIZE", 100),
            max_keys: env_or("TRANSLATION_MAX_KEYS", 2000),
            rate_limit_pause_ms: env_or("RATE_LIMIT_PAUSE_MS", 2000),
            batch_retry_attempts: env_or("BATCH_RETRY_ATTEMPTS", 3),

            api_key: std::env::var("API_KEY").ok().filter(|k| !k.is_empty()),
            port: env_or("PORT", 8080),

            sync_schedule: std::env::var("SYNC_SCHEDULE")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),
            progress_poll_secs: env_or("PROGRESS_POLL_SECS", 30),
        })
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse `LANGUAGES`: comma-separated `code:Name` pairs. A trailing `!`
/// on the code marks the language disabled, e.g. `en:English,no:Norwegian,fr!:French`.
pub fn parse_languages(raw: &str) -> Result<Vec<Language>> {
    let mut languages = Vec::new();

    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((code, name)) = item.split_once(':') else {
            bail!("Invalid LANGUAGES entry '{}': expected code:Name", item);
        };
        let (code, enabled) = match code.trim().strip_suffix('!') {
            Some(code) => (code, false),
            None => (code.trim(), true),
        };
        crate::i18n::LanguageCode::parse(code)
            .with_context(|| format!("Invalid LANGUAGES entry '{}'", item))?;

        languages.push(Language {
            code: code.to_string(),
            name: name.trim().to_string(),
            enabled,
            show_in_switcher: enabled,
        });
    }

    Ok(languages)
}
