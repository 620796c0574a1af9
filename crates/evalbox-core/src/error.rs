use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalboxError {
    #[error("Candidate error: {0}")]
    Candidate(String),

    #[error("Unsupported candidate type: {0}")]
    UnsupportedCandidate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EvalboxError>;
