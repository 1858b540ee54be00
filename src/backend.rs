// Ollama backend - the production generator behind every agent

use crate::orchestration::generation::{Completion, GenerationError, Generator, TokenSink};
use async_trait::async_trait;
use ollama::{GenerateRequest, OllamaClient, OllamaError};
use tracing::debug;

/// Streams completions from a local or remote Ollama daemon
pub struct OllamaBackend {
    client: OllamaClient,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: OllamaClient::with_base_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// Installed model names, in the order Ollama reports them
    pub async fn list_models(&self) -> Result<Vec<String>, OllamaError> {
        self.client.list_models().await
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self {
            client: OllamaClient::new(),
        }
    }
}

#[async_trait]
impl Generator for OllamaBackend {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        on_token: &TokenSink<'_>,
    ) -> Completion {
        debug!(model = %model, prompt_len = prompt.len(), "Generating");

        let request = GenerateRequest::streamed(model, prompt);
        let mut text = String::new();
        let result = self
            .client
            .generate_stream(&request, &mut text, |token| on_token(token))
            .await;

        match result {
            Ok(()) => Completion::finished(text),
            Err(e) => Completion::failed(text, classify(e)),
        }
    }
}

fn classify(error: OllamaError) -> GenerationError {
    match error {
        OllamaError::Api(message) => GenerationError::Api(message),
        OllamaError::Status { status, body } => {
            GenerationError::Api(format!("status {status}: {body}"))
        }
        other => GenerationError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_stream(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        format!("http://{addr}")
    }

    #[test]
    fn test_status_errors_are_model_errors() {
        let error = classify(OllamaError::Status {
            status: 404,
            body: "model not found".into(),
        });
        assert_eq!(error, GenerationError::Api("status 404: model not found".into()));
    }

    #[tokio::test]
    async fn test_partial_output_survives_stream_error() {
        let base = serve_stream("{\"response\":\"4\"}\n{\"error\":\"out of memory\"}\n").await;
        let backend = OllamaBackend::new(base);

        let completion = backend.generate("m", "2+2", &|_: &str| {}).await;
        assert_eq!(completion.text, "4");
        assert_eq!(
            completion.error,
            Some(GenerationError::Api("out of memory".into()))
        );
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = OllamaBackend::new(format!("http://{addr}"));
        let completion = backend.generate("m", "hi", &|_: &str| {}).await;
        assert!(completion.text.is_empty());
        assert!(matches!(completion.error, Some(GenerationError::Transport(_))));
    }
}
