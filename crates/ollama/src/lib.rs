//! Minimal Ollama HTTP client: streamed generation and model listing.

pub mod client;
pub mod error;

pub use client::{GenerateRequest, LineBuffer, OllamaClient, DEFAULT_BASE_URL};
pub use error::{OllamaError, Result};
