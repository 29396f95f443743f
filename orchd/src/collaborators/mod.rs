//! External collaborator interfaces (§6): the code host and the LLM
//! provider are defined as traits so the Orchestrator never depends on a
//! concrete HTTP client. No HTTP server, webhook receiver, or REST client
//! is implemented - that surface is a Non-goal; the CLI exercises these
//! traits directly.

mod repo_host;

pub use repo_host::{CheckResult, MockRepoHost, RepoContext, RepoHost, RepoHostError};

pub use crate::llm::{Agent, CompletionRequest, CompletionResponse, LlmClient, LlmError};
