use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Cannot reach bridge at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Bridge returned {status} for {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("LLM request failed: {0}")]
    Llm(String),
}

impl BridgeError {
    pub(crate) fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            BridgeError::Unreachable {
                url: url.to_string(),
                reason: e.to_string(),
            }
        } else {
            BridgeError::Http(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
