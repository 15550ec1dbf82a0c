//! Translation provider boundary.
//!
//! The pipeline only needs "translate these entries into that language".
//! `OpenAiTranslator` implements it over an OpenAI-compatible chat
//! completions endpoint in JSON mode; the model's reply is parsed into a
//! strict `{ "translations": [{ "key", "text" }] }` schema and anything else
//! is reported as a malformed response.

use crate::config::Config;
use crate::error::ProviderError;
use crate::models::SourceEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single translation returned by the provider. Not yet validated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranslatedEntry {
    pub key: String,
    pub text: String,
}

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(
        &self,
        entries: &[SourceEntry],
        target_language: &str,
        instruction: &str,
    ) -> Result<Vec<TranslatedEntry>, ProviderError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    response_format: ResponseFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TranslationPayload {
    translations: Vec<TranslatedEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchPayload<'a> {
    target_language: &'a str,
    entries: &'a [SourceEntry],
}

/// Check if a model is a reasoning model that doesn't support temperature
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("gpt-5")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
}

pub struct OpenAiTranslator {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiTranslator {
    pub fn new(client: reqwest::Client, api_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(
            client,
            &config.openai_api_url,
            &config.openai_api_key,
            &config.openai_model,
        )
    }

    fn build_request(
        &self,
        entries: &[SourceEntry],
        target_language: &str,
        instruction: &str,
    ) -> Result<ChatRequest, ProviderError> {
        let payload = serde_json::to_string(&BatchPayload {
            target_language,
            entries,
        })
        .map_err(|e| ProviderError::MalformedResponse(format!("cannot encode batch: {}", e)))?;

        Ok(ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: instruction.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: payload,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: if is_reasoning_model(&self.model) {
                None
            } else {
                Some(0.2)
            },
        })
    }
}

#[async_trait]
impl TranslationProvider for OpenAiTranslator {
    async fn translate(
        &self,
        entries: &[SourceEntry],
        target_language: &str,
        instruction: &str,
    ) -> Result<Vec<TranslatedEntry>, ProviderError> {
        let request = self.build_request(entries, target_language, instruction)?;

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ProviderError::MalformedResponse("response contained no choices".to_string()))?;

        parse_translation_payload(content)
    }
}

/// Parse the model's reply into translation entries.
///
/// Code fences around the JSON are tolerated; any other shape is rejected.
pub fn parse_translation_payload(content: &str) -> Result<Vec<TranslatedEntry>, ProviderError> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str::<TranslationPayload>(json)
        .map(|payload| payload.translations)
        .map_err(|e| ProviderError::MalformedResponse(format!("unexpected translation payload: {}", e)))
}
