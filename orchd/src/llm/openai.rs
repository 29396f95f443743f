//! OpenAI Chat Completions client - the default `LlmProvider` collaborator.
//!
//! Retries only transport-class errors with exponential backoff, per
//! §4.5 step 3.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, TokenUsage};
use super::error::is_retryable_status;

pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_BACKOFF_MS: u64 = 1000;

pub struct OpenAIClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            http,
        })
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let uses_completion_tokens =
            request.model.starts_with("gpt-5") || request.model.starts_with("o1") || request.model.starts_with("o3");

        let mut body = serde_json::json!({
            "model": request.model,
            "temperature": request.temperature,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
        });

        if uses_completion_tokens {
            body["max_completion_tokens"] = serde_json::json!(request.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(request.max_tokens);
        }

        if let Some(effort) = request.reasoning_effort {
            let level = match effort.to_provider_level() {
                super::ProviderEffort::Low => "low",
                super::ProviderEffort::Medium => "medium",
                super::ProviderEffort::High => "high",
            };
            body["reasoning_effort"] = serde_json::json!(level);
        }

        body
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request_body(request);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: OpenAiResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("empty choices array".to_string()))?;

        Ok(CompletionResponse {
            text: choice.message.content.unwrap_or_default(),
            model: parsed.model,
            usage: TokenUsage {
                input_tokens: parsed.usage.prompt_tokens,
                output_tokens: parsed.usage.completion_tokens,
            },
        })
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.send_once(&request).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < MAX_RETRIES && should_retry(&err) => {
                    warn!(attempt, error = %err, "OpenAIClient::complete: retrying after transport error");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                Err(err) => {
                    debug!(attempt, error = %err, "OpenAIClient::complete: giving up");
                    return Err(err);
                }
            }
        }
    }
}

fn should_retry(err: &LlmError) -> bool {
    match err {
        LlmError::ApiError { status, .. } => is_retryable_status(*status),
        other => other.is_retryable(),
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: OpenAiUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_constants_match_the_agreed_policy() {
        assert_eq!(MAX_RETRIES, 3);
        assert_eq!(INITIAL_BACKOFF_MS, 1000);
    }

    #[test]
    fn rate_limit_and_server_errors_are_retried_schema_errors_are_not() {
        assert!(should_retry(&LlmError::ApiError {
            status: 429,
            message: String::new()
        }));
        assert!(should_retry(&LlmError::ApiError {
            status: 503,
            message: String::new()
        }));
        assert!(!should_retry(&LlmError::ApiError {
            status: 400,
            message: String::new()
        }));
        assert!(!should_retry(&LlmError::InvalidResponse("bad json".to_string())));
    }
}
