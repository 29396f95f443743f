//! Agent Runtime (§4.5): merges a compiled context with agent-specific
//! input, calls the model, and validates the parsed JSON against the
//! agent's closed schema.

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use thiserror::Error;

use contextstore::CompiledContext;

use super::{CompletionRequest, LlmClient, LlmError, ReasoningEffort};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(#[from] LlmError),
    #[error("no JSON object found in model response")]
    NoJsonObject,
    #[error("schema validation failed: {0}")]
    SchemaMismatch(#[from] serde_json::Error),
}

impl AgentError {
    /// Non-retryable at this layer per §4.5: schema mismatches surface
    /// to the state machine as the step's failure reason instead of
    /// being retried here.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Transport(e) if e.is_retryable())
    }
}

pub struct AgentCallOutcome<O> {
    pub output: O,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub model: String,
}

/// One model-backed function with a fixed output schema `O`.
pub struct Agent<O> {
    client: Arc<dyn LlmClient>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    reasoning_effort: Option<ReasoningEffort>,
    _marker: std::marker::PhantomData<O>,
}

impl<O: DeserializeOwned> Agent<O> {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 4096,
            temperature: 0.2,
            reasoning_effort: None,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Combine the compiled context with an agent-specific instruction,
    /// call the model, and parse+validate its response.
    pub async fn run(&self, context: &CompiledContext, instruction: &str) -> Result<AgentCallOutcome<O>, AgentError> {
        let user_prompt = format!("{}\n\n{}", context.variable_suffix, instruction);
        let request = CompletionRequest {
            model: self.model.clone(),
            system_prompt: context.stable_prefix.clone(),
            user_prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            reasoning_effort: self.reasoning_effort,
        };

        let start = Instant::now();
        let response = self.client.complete(request).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let json = extract_first_json_object(&response.text).ok_or(AgentError::NoJsonObject)?;
        let output: O = serde_json::from_str(&json)?;

        Ok(AgentCallOutcome {
            output,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            duration_ms,
            model: response.model,
        })
    }
}

/// Scan for the first balanced `{...}` object, tolerating prose before
/// or after it (models routinely wrap JSON in commentary or fences).
fn extract_first_json_object(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::schemas::PlannerOutput;
    use crate::llm::{MockLlmClient, TokenUsage};

    fn compiled() -> CompiledContext {
        CompiledContext {
            stable_prefix: "you are a planner".to_string(),
            variable_suffix: "issue: fix the bug".to_string(),
            metadata: contextstore::ContextMetadata {
                agent_type: contextstore::AgentType::Planner,
                included_sections: vec![],
                approx_chars: 0,
            },
        }
    }

    #[test]
    fn extracts_json_object_surrounded_by_prose() {
        let text = "Sure, here you go:\n```json\n{\"a\": 1}\n```\nHope that helps!";
        assert_eq!(extract_first_json_object(text), Some("{\"a\": 1}".to_string()));
    }

    #[test]
    fn returns_none_when_no_object_present() {
        assert_eq!(extract_first_json_object("no json here"), None);
    }

    #[tokio::test]
    async fn agent_run_parses_validated_output() {
        let json = r#"{
            "definition_of_done": ["tests pass"],
            "plan": ["step 1"],
            "target_files": ["src/lib.rs"],
            "estimated_complexity": "S",
            "estimated_effort": "small",
            "should_breakdown": false
        }"#;
        let client = Arc::new(MockLlmClient::new(vec![super::super::CompletionResponse {
            text: json.to_string(),
            model: "test-model".to_string(),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
        }]));

        let agent: Agent<PlannerOutput> = Agent::new(client, "test-model");
        let outcome = agent.run(&compiled(), "produce a plan").await.unwrap();

        assert_eq!(outcome.output.plan, vec!["step 1"]);
        assert_eq!(outcome.input_tokens, 10);
        assert_eq!(outcome.model, "test-model");
    }

    #[tokio::test]
    async fn agent_run_surfaces_schema_mismatch_as_non_retryable() {
        let client = Arc::new(MockLlmClient::new(vec![super::super::CompletionResponse {
            text: "{\"not\": \"a planner output\"}".to_string(),
            model: "test-model".to_string(),
            usage: TokenUsage::default(),
        }]));
        let agent: Agent<PlannerOutput> = Agent::new(client, "test-model");
        let err = agent.run(&compiled(), "produce a plan").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
