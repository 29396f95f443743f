//! Agent Runtime (§4.5): uniform model invocation, retried only for
//! transport-class errors, with output validated against closed schemas.

mod agent;
mod client;
mod error;
mod openai;
pub mod schemas;
mod types;

pub use agent::{Agent, AgentCallOutcome, AgentError};
pub use client::{LlmClient, MockLlmClient};
pub use error::LlmError;
pub use openai::{INITIAL_BACKOFF_MS, MAX_RETRIES, OpenAIClient};
pub use types::{CompletionRequest, CompletionResponse, ProviderEffort, ReasoningEffort, TokenUsage};
