//! Ollama API client

use crate::error::{OllamaError, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default Ollama API URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama API client
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    /// Create a client for the local Ollama daemon
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client for an Ollama daemon at `base_url`
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stream a completion from `/api/generate`.
    ///
    /// Every `response` fragment is appended to `buffer` and handed to
    /// `on_token` as it arrives. On failure the buffer keeps whatever was
    /// received before the error, so callers can still use partial output.
    pub async fn generate_stream<F>(
        &self,
        request: &GenerateRequest,
        buffer: &mut String,
        mut on_token: F,
    ) -> Result<()>
    where
        F: FnMut(&str),
    {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OllamaError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            for line in lines.push(&bytes) {
                if apply_line(&line, buffer, &mut on_token)? {
                    return Ok(());
                }
            }
        }

        // A final line without trailing newline
        if let Some(line) = lines.finish() {
            apply_line(&line, buffer, &mut on_token)?;
        }

        Ok(())
    }

    /// List installed model names via `/api/tags`
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OllamaError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let tags: TagsResponse = serde_json::from_str(&body)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply one NDJSON line; returns `true` once Ollama reports `done`.
fn apply_line<F>(line: &str, buffer: &mut String, on_token: &mut F) -> Result<bool>
where
    F: FnMut(&str),
{
    let chunk: GenerateChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(error = %e, "Skipping unparseable stream line");
            return Ok(false);
        }
    };

    if let Some(error) = chunk.error {
        return Err(OllamaError::Api(error));
    }

    if !chunk.response.is_empty() {
        buffer.push_str(&chunk.response);
        on_token(&chunk.response);
    }

    Ok(chunk.done)
}

/// Splits a byte stream into trimmed, non-empty lines.
///
/// Transport chunks do not respect line boundaries, so partial lines are
/// held back until their newline arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed bytes and return every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line_bytes = self.pending.drain(..=newline_pos).collect::<Vec<_>>();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Flush whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

impl GenerateRequest {
    /// A streamed request with server-side default options
    pub fn streamed(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: true,
        }
    }
}

#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Serve exactly one HTTP response on a fresh local port
    async fn serve_once(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/x-ndjson\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        format!("http://{addr}")
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&data[..end]).to_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= end + 4 + content_length {
                    return;
                }
            }
        }
    }

    #[test]
    fn test_line_buffer_joins_split_lines() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(br#"{"response":"He"#).is_empty());
        let done = lines.push(b"llo\"}\n\n{\"response\":\"!\"}\n{\"done\"");
        assert_eq!(done, vec![r#"{"response":"Hello"}"#, r#"{"response":"!"}"#]);
        assert_eq!(lines.finish().as_deref(), Some(r#"{"done""#));
        assert_eq!(lines.finish(), None);
    }

    #[tokio::test]
    async fn test_generate_stream_accumulates_tokens() {
        let body = concat!(
            "{\"response\":\"The \",\"done\":false}\n",
            "not json\n",
            "{\"response\":\"answer\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        )
        .to_string();
        let base = serve_once("200 OK", body).await;

        let client = OllamaClient::with_base_url(base);
        let mut text = String::new();
        let mut tokens = Vec::new();
        client
            .generate_stream(
                &GenerateRequest::streamed("m", "p"),
                &mut text,
                |t| tokens.push(t.to_string()),
            )
            .await
            .unwrap();

        assert_eq!(text, "The answer");
        assert_eq!(tokens, vec!["The ", "answer"]);
    }

    #[tokio::test]
    async fn test_generate_stream_keeps_partial_text_on_api_error() {
        let body = concat!(
            "{\"response\":\"partial\",\"done\":false}\n",
            "{\"error\":\"model crashed\"}\n",
        )
        .to_string();
        let base = serve_once("200 OK", body).await;

        let client = OllamaClient::with_base_url(base);
        let mut text = String::new();
        let err = client
            .generate_stream(&GenerateRequest::streamed("m", "p"), &mut text, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, OllamaError::Api(ref msg) if msg == "model crashed"));
        assert_eq!(text, "partial");
    }

    #[tokio::test]
    async fn test_generate_stream_reports_http_status() {
        let base = serve_once("404 Not Found", r#"{"error":"model not found"}"#.to_string()).await;

        let client = OllamaClient::with_base_url(base);
        let mut text = String::new();
        let err = client
            .generate_stream(&GenerateRequest::streamed("missing", "p"), &mut text, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, OllamaError::Status { status: 404, .. }));
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_generate_stream_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = OllamaClient::with_base_url(format!("http://{addr}"));
        let mut text = String::new();
        let result = client
            .generate_stream(&GenerateRequest::streamed("m", "p"), &mut text, |_| {})
            .await;

        assert!(matches!(result, Err(OllamaError::Network(_))));
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_list_models() {
        let body = r#"{"models":[{"name":"llama3.2:latest","size":1},{"name":"qwen2.5:7b"}]}"#;
        let base = serve_once("200 OK", body.to_string()).await;

        let client = OllamaClient::with_base_url(format!("{base}/"));
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3.2:latest", "qwen2.5:7b"]);
    }

    #[test]
    fn test_request_serialization() {
        let json = serde_json::to_value(GenerateRequest::streamed("llama3.2", "hi")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "llama3.2", "prompt": "hi", "stream": true})
        );
    }
}
