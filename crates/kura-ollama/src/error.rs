use kura_core::KuraError;
use thiserror::Error;

/// Errors talking to an Ollama server.
#[derive(Debug, Error)]
pub enum OllamaError {
    /// Transport failure (connection refused, TLS, body decoding).
    #[error("ollama request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("ollama returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response parsed but did not have the expected shape.
    #[error("malformed ollama response: {0}")]
    Malformed(String),
}

impl From<OllamaError> for KuraError {
    fn from(err: OllamaError) -> Self {
        KuraError::Service(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OllamaError>;
