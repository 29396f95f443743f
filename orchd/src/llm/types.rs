//! LLM request/response types (§4.5, §6 LLM provider interface).
//!
//! Unlike a tool-calling chat client, each agent call here is a single
//! stateless completion: one system prompt, one user prompt, one text
//! response. There is no conversation history to thread through - every
//! agent call re-sends its full context (§5 Shared resources).

use serde::{Deserialize, Serialize};

/// Requested reasoning depth. Providers that expose only a three-level
/// dial collapse `{none,low}` into `low` and `{high,xhigh}` into `high`
/// (§4.5 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
    Xhigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn to_provider_level(self) -> ProviderEffort {
        match self {
            ReasoningEffort::None | ReasoningEffort::Low => ProviderEffort::Low,
            ReasoningEffort::Medium => ProviderEffort::Medium,
            ReasoningEffort::High | ReasoningEffort::Xhigh => ProviderEffort::High,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub reasoning_effort: Option<ReasoningEffort>,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_effort_collapses_to_three_provider_levels() {
        assert_eq!(ReasoningEffort::None.to_provider_level(), ProviderEffort::Low);
        assert_eq!(ReasoningEffort::Low.to_provider_level(), ProviderEffort::Low);
        assert_eq!(ReasoningEffort::Medium.to_provider_level(), ProviderEffort::Medium);
        assert_eq!(ReasoningEffort::High.to_provider_level(), ProviderEffort::High);
        assert_eq!(ReasoningEffort::Xhigh.to_provider_level(), ProviderEffort::High);
    }
}
