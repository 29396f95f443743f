//! contextstore - the Memory/Context Compiler
//!
//! Combines immutable, per-repo [`StaticMemory`] with per-task
//! [`SessionMemory`] into a minimal, agent-specific [`CompiledContext`].
//!
//! The compiler itself (`compile`) is a pure function over the two memory
//! records a caller hands it - it performs no store lookups of its own.
//! That is what makes the isolation rule enforceable by construction: a
//! child task's compilation can only ever see its own [`SessionMemory`]
//! plus [`StaticMemory`], because nothing else is reachable from the
//! function's arguments. The caller (the state manager in `orchd`) is
//! responsible for only ever fetching the target task's own session.

mod compiler;
mod error;
mod repo_map;
mod session_memory;
mod static_memory;

pub use compiler::{AgentType, CompileRequest, CompiledContext, ContextMetadata, IncludeSet};
pub use error::{ContextError, ContextResult};
pub use repo_map::{RepoMapEntry, SearchHit, build_repo_map, search_repo};
pub use session_memory::{
    AgentOutputs, AttemptOutcome, AttemptRecord, AttemptsState, OrchestrationState, ReviewComment, SessionContext,
    SessionMemory, SubtaskState, SubtaskStatus,
};
pub use static_memory::{Constraints, RepoConfig, StaticMemory, StaticMemoryCache};
