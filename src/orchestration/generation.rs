// Generation seam - the streamed language-model call the orchestrator relies on

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Receives each streamed fragment as it arrives
pub type TokenSink<'a> = dyn Fn(&str) + Send + Sync + 'a;

/// Backend able to run one streamed generation to completion.
///
/// Implementations report every fragment through `on_token` and always
/// resolve: failures come back as a [`Completion`] carrying whatever text
/// arrived before the error.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        on_token: &TokenSink<'_>,
    ) -> Completion;
}

/// Accumulated output of one call
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub error: Option<GenerationError>,
}

impl Completion {
    pub fn finished(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: None,
        }
    }

    pub fn failed(partial: impl Into<String>, error: GenerationError) -> Self {
        Self {
            text: partial.into(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Model error: {0}")]
    Api(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation task panicked")]
    Panicked,
}

/// Run one call under an optional deadline; expiry is an ordinary failure.
///
/// Fragments streamed before the deadline are kept as the partial text.
pub async fn generate_with_timeout(
    generator: &dyn Generator,
    model: &str,
    prompt: &str,
    timeout: Option<Duration>,
    on_token: &TokenSink<'_>,
) -> Completion {
    let Some(limit) = timeout else {
        return generator.generate(model, prompt, on_token).await;
    };

    let streamed = Mutex::new(String::new());
    let sink = |text: &str| {
        streamed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
        on_token(text);
    };

    match tokio::time::timeout(limit, generator.generate(model, prompt, &sink)).await {
        Ok(completion) => completion,
        Err(_) => {
            let partial = streamed.into_inner().unwrap_or_else(PoisonError::into_inner);
            Completion::failed(partial, GenerationError::Timeout(limit))
        }
    }
}
