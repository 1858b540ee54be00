// Error types for the Ollama client

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OllamaError>;

#[derive(Error, Debug)]
pub enum OllamaError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Ollama returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Ollama error: {0}")]
    Api(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
