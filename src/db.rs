use crate::error::{StoreError, StoreResult};
use crate::models::{Language, PlaceholderRow, TranslationRow, TranslationUpsert};
use crate::progress::{EvaluationProgress, EvaluationStatus};
use crate::store::TranslationStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

const SCHEMA: &[(&str, &str)] = &[
    (
        "languages",
        "CREATE TABLE IF NOT EXISTS languages (
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            show_in_switcher BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
    (
        "translations",
        "CREATE TABLE IF NOT EXISTS translations (
            translation_key TEXT NOT NULL,
            language_code TEXT NOT NULL,
            translated_text TEXT,
            page_location TEXT NOT NULL DEFAULT 'general',
            context TEXT,
            approved BOOLEAN NOT NULL DEFAULT FALSE,
            quality_score DOUBLE PRECISION,
            is_stale BOOLEAN NOT NULL DEFAULT FALSE,
            is_intentionally_empty BOOLEAN NOT NULL DEFAULT FALSE,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (translation_key, language_code)
        )",
    ),
    (
        "translations language index",
        "CREATE INDEX IF NOT EXISTS idx_translations_language
            ON translations (language_code)",
    ),
    (
        "evaluation_progress",
        "CREATE TABLE IF NOT EXISTS evaluation_progress (
            language_code TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'idle',
            total_keys BIGINT NOT NULL DEFAULT 0,
            evaluated_keys BIGINT NOT NULL DEFAULT 0,
            last_evaluated_key TEXT,
            started_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            completed_at TIMESTAMPTZ,
            error_message TEXT
        )",
    ),
];

const ROW_COLUMNS: &str = "translation_key, language_code, translated_text, page_location, context, \
     approved, quality_score, is_stale, is_intentionally_empty, updated_at";

/// PostgreSQL-backed translation store.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect and create tables if they do not exist yet
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<()> {
        for &(name, statement) in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create {}", name))?;
        }
        info!("Database schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn translation_from_row(row: &PgRow) -> Result<TranslationRow, sqlx::Error> {
    Ok(TranslationRow {
        translation_key: row.try_get("translation_key")?,
        language_code: row.try_get("language_code")?,
        translated_text: row.try_get("translated_text")?,
        page_location: row.try_get("page_location")?,
        context: row.try_get("context")?,
        approved: row.try_get("approved")?,
        quality_score: row.try_get("quality_score")?,
        is_stale: row.try_get("is_stale")?,
        is_intentionally_empty: row.try_get("is_intentionally_empty")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn progress_from_row(row: &PgRow) -> StoreResult<EvaluationProgress> {
    let language_code: String = row.try_get("language_code")?;
    let status: String = row.try_get("status")?;
    let status: EvaluationStatus = status
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("evaluation_progress '{}': {}", language_code, e)))?;

    Ok(EvaluationProgress {
        language_code,
        status,
        total_keys: row.try_get("total_keys")?,
        evaluated_keys: row.try_get("evaluated_keys")?,
        last_evaluated_key: row.try_get("last_evaluated_key")?,
        started_at: row.try_get("started_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl TranslationStore for Database {
    async fn list_languages(&self) -> StoreResult<Vec<Language>> {
        let rows = sqlx::query(
            "SELECT code, name, enabled, show_in_switcher FROM languages ORDER BY created_at, code",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<Language> {
                Ok(Language {
                    code: row.try_get("code")?,
                    name: row.try_get("name")?,
                    enabled: row.try_get("enabled")?,
                    show_in_switcher: row.try_get("show_in_switcher")?,
                })
            })
            .collect()
    }

    async fn ensure_language(&self, language: &Language) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO languages (code, name, enabled, show_in_switcher)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (code) DO NOTHING",
        )
        .bind(&language.code)
        .bind(&language.name)
        .bind(language.enabled)
        .bind(language.show_in_switcher)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn all_rows(&self) -> StoreResult<Vec<TranslationRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM translations ORDER BY language_code, translation_key",
            ROW_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(translation_from_row).collect::<Result<_, _>>()?)
    }

    async fn rows_for_language(&self, language: &str) -> StoreResult<Vec<TranslationRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM translations WHERE language_code = $1 ORDER BY translation_key",
            ROW_COLUMNS
        ))
        .bind(language)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(translation_from_row).collect::<Result<_, _>>()?)
    }

    async fn keys_for_language(&self, language: &str) -> StoreResult<HashSet<String>> {
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT translation_key FROM translations WHERE language_code = $1")
                .bind(language)
                .fetch_all(&self.pool)
                .await?;

        Ok(keys.into_iter().collect())
    }

    async fn count_rows(&self, language: &str) -> StoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM translations WHERE language_code = $1")
                .bind(language)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }

    async fn insert_placeholders(&self, language: &str, rows: &[PlaceholderRow]) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let keys: Vec<&str> = rows.iter().map(|r| r.translation_key.as_str()).collect();
        let pages: Vec<&str> = rows.iter().map(|r| r.page_location.as_str()).collect();
        let contexts: Vec<Option<&str>> = rows.iter().map(|r| r.context.as_deref()).collect();

        let result = sqlx::query(
            "INSERT INTO translations
                (translation_key, language_code, translated_text, page_location, context,
                 approved, is_stale, is_intentionally_empty, updated_at)
             SELECT k, $1, NULL, p, c, FALSE, TRUE, FALSE, NOW()
             FROM UNNEST($2::text[], $3::text[], $4::text[]) AS u(k, p, c)
             ON CONFLICT (translation_key, language_code) DO NOTHING",
        )
        .bind(language)
        .bind(&keys)
        .bind(&pages)
        .bind(&contexts)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_translations(
        &self,
        language: &str,
        entries: &[TranslationUpsert],
    ) -> StoreResult<u64> {
        if entries.is_empty() {
            return Ok(0);
        }

        let keys: Vec<&str> = entries.iter().map(|e| e.translation_key.as_str()).collect();
        let texts: Vec<&str> = entries.iter().map(|e| e.translated_text.as_str()).collect();
        let pages: Vec<&str> = entries.iter().map(|e| e.page_location.as_str()).collect();

        let result = sqlx::query(
            "INSERT INTO translations
                (translation_key, language_code, translated_text, page_location,
                 approved, is_stale, updated_at)
             SELECT k, $1, t, p, FALSE, FALSE, NOW()
             FROM UNNEST($2::text[], $3::text[], $4::text[]) AS u(k, t, p)
             ON CONFLICT (translation_key, language_code) DO UPDATE SET
                translated_text = EXCLUDED.translated_text,
                page_location = EXCLUDED.page_location,
                approved = FALSE,
                is_stale = FALSE,
                updated_at = NOW()",
        )
        .bind(language)
        .bind(&keys)
        .bind(&texts)
        .bind(&pages)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_source(
        &self,
        source_language: &str,
        key: &str,
        text: &str,
        page_location: &str,
        context: Option<&str>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Option<String>> = sqlx::query_scalar(
            "SELECT translated_text FROM translations
             WHERE translation_key = $1 AND language_code = $2
             FOR UPDATE",
        )
        .bind(key)
        .bind(source_language)
        .fetch_optional(&mut *tx)
        .await?;
        let changed = existing.map_or(true, |current| current.as_deref() != Some(text));

        sqlx::query(
            "INSERT INTO translations
                (translation_key, language_code, translated_text, page_location, context,
                 approved, is_stale, updated_at)
             VALUES ($1, $2, $3, $4, $5, TRUE, FALSE, NOW())
             ON CONFLICT (translation_key, language_code) DO UPDATE SET
                translated_text = EXCLUDED.translated_text,
                page_location = EXCLUDED.page_location,
                context = EXCLUDED.context,
                updated_at = NOW()",
        )
        .bind(key)
        .bind(source_language)
        .bind(text)
        .bind(page_location)
        .bind(context)
        .execute(&mut *tx)
        .await?;

        if changed {
            sqlx::query(
                "UPDATE translations SET is_stale = TRUE, updated_at = NOW()
                 WHERE translation_key = $1 AND language_code <> $2",
            )
            .bind(key)
            .bind(source_language)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(changed)
    }

    async fn delete_rows(&self, rows: &[(String, String)]) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        let languages: Vec<&str> = rows.iter().map(|(_, l)| l.as_str()).collect();

        let result = sqlx::query(
            "DELETE FROM translations t
             USING UNNEST($1::text[], $2::text[]) AS d(k, l)
             WHERE t.translation_key = d.k AND t.language_code = d.l",
        )
        .bind(&keys)
        .bind(&languages)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn set_quality_score(&self, language: &str, key: &str, score: f64) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE translations SET quality_score = $3
             WHERE translation_key = $1 AND language_code = $2",
        )
        .bind(key)
        .bind(language)
        .bind(score)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Unavailable(format!(
                "no row for '{}' in '{}'",
                key, language
            )));
        }
        Ok(())
    }

    async fn approve(&self, language: &str, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE translations SET approved = TRUE, updated_at = NOW()
             WHERE language_code = $1
               AND translation_key = ANY($2)
               AND NOT is_stale
               AND NOT approved
               AND translated_text IS DISTINCT FROM translation_key",
        )
        .bind(language)
        .bind(keys)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_progress(&self, language: &str) -> StoreResult<Option<EvaluationProgress>> {
        let row = sqlx::query("SELECT * FROM evaluation_progress WHERE language_code = $1")
            .bind(language)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(progress_from_row).transpose()
    }

    async fn list_progress(&self) -> StoreResult<Vec<EvaluationProgress>> {
        let rows = sqlx::query("SELECT * FROM evaluation_progress ORDER BY language_code")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(progress_from_row).collect()
    }

    async fn save_progress(&self, progress: &EvaluationProgress) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO evaluation_progress
                (language_code, status, total_keys, evaluated_keys, last_evaluated_key,
                 started_at, updated_at, completed_at, error_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (language_code) DO UPDATE SET
                status = EXCLUDED.status,
                total_keys = EXCLUDED.total_keys,
                evaluated_keys = EXCLUDED.evaluated_keys,
                last_evaluated_key = EXCLUDED.last_evaluated_key,
                started_at = EXCLUDED.started_at,
                updated_at = EXCLUDED.updated_at,
                completed_at = EXCLUDED.completed_at,
                error_message = EXCLUDED.error_message",
        )
        .bind(&progress.language_code)
        .bind(progress.status.as_str())
        .bind(progress.total_keys)
        .bind(progress.evaluated_keys)
        .bind(&progress.last_evaluated_key)
        .bind(progress.started_at)
        .bind(progress.updated_at)
        .bind(progress.completed_at)
        .bind(&progress.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
