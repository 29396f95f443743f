use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("static memory not found for repo: {0}")]
    StaticMemoryNotFound(String),
}

pub type ContextResult<T> = Result<T, ContextError>;
