//! The `LlmClient` trait: one stateless completion call per invocation.

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Test double that plays back canned responses in order, erroring once
/// exhausted. Grounds every Agent Runtime and state-machine-adjacent
/// test that needs a stand-in model.
pub struct MockLlmClient {
    responses: std::sync::Mutex<Vec<Result<CompletionResponse, LlmError>>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().map(Ok).rev().collect()),
        }
    }

    pub fn with_text(texts: Vec<&str>) -> Self {
        Self::new(
            texts
                .into_iter()
                .map(|t| CompletionResponse {
                    text: t.to_string(),
                    model: "mock".to_string(),
                    usage: super::TokenUsage::default(),
                })
                .collect(),
        )
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut responses = self.responses.lock().unwrap();
        responses
            .pop()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("no more mock responses".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> CompletionRequest {
        CompletionRequest {
            model: "test".to_string(),
            system_prompt: "sys".to_string(),
            user_prompt: "user".to_string(),
            max_tokens: 100,
            temperature: 0.0,
            reasoning_effort: None,
        }
    }

    #[tokio::test]
    async fn mock_client_plays_back_responses_in_order() {
        let client = MockLlmClient::with_text(vec!["one", "two"]);
        assert_eq!(client.complete(req()).await.unwrap().text, "one");
        assert_eq!(client.complete(req()).await.unwrap().text, "two");
        assert!(client.complete(req()).await.is_err());
    }
}
