//! OpenAI-compatible chat-completions backend.
//!
//! Works against any endpoint that speaks the `/chat/completions` protocol
//! with `stream: true` (OpenAI, DeepSeek, local gateways).

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use super::types::{extract_error_message, ApiRequest, StreamAccumulator};
use super::{BackendEvent, BackendFactory, BackendStream, ModelBackend};
use crate::agent::message::Message;
use crate::agent::profiles::ModelProfile;
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// Streaming client for one model profile.
pub struct OpenAiCompatBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiCompatBackend {
    /// Create a client honoring the profile's endpoint and key.
    ///
    /// The profile timeout bounds connecting only; a streamed answer may run
    /// longer as long as each read arrives within the caller's own limit.
    pub fn new(profile: &ModelProfile) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(profile.timeout())
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client for '{}': {e}", profile.id)))?;

        let endpoint = if profile.endpoint.trim().is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            profile.endpoint.trim().to_string()
        };

        Ok(Self {
            client,
            endpoint,
            api_key: profile.api_key.clone(),
            model: profile.model_name.clone(),
            temperature: profile.temperature,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    async fn status_error(response: Response) -> Error {
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!("Failed to read error body ({}): {}", status, e);
                String::new()
            }
        };
        let message = extract_error_message(&body)
            .unwrap_or_else(|| format!("request failed with status {status}"));

        let kind = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "authentication failed",
            StatusCode::TOO_MANY_REQUESTS => "rate limited",
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => "timed out",
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => "invalid request",
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => "unavailable",
            _ => "transport error",
        };
        Error::BackendInvocation(format!("{kind} ({status}): {message}"))
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::BackendInvocation(format!("timed out: {err}"))
    } else {
        Error::BackendInvocation(err.to_string())
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatBackend {
    async fn stream(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<BackendStream> {
        let request = ApiRequest::streaming(&self.model, self.temperature, messages, tools);
        debug!(
            "POST {} ({} messages, {} tools)",
            self.url(),
            messages.len(),
            tools.len()
        );

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let stream = try_stream! {
            let mut body = response.bytes_stream();
            let mut accumulator = StreamAccumulator::new();

            while let Some(item) = body.next().await {
                let bytes = item.map_err(transport_error)?;
                for delta in accumulator.feed(&bytes)? {
                    yield BackendEvent::TextDelta(delta);
                }
                if accumulator.is_done() {
                    break;
                }
            }

            let (trailing, completed) = accumulator.finish()?;
            if let Some(delta) = trailing {
                yield BackendEvent::TextDelta(delta);
            }
            yield BackendEvent::Completed(completed);
        };

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Builds an [`OpenAiCompatBackend`] per profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiBackendFactory;

impl BackendFactory for OpenAiBackendFactory {
    fn build(&self, profile: &ModelProfile) -> Result<Box<dyn ModelBackend>> {
        Ok(Box::new(OpenAiCompatBackend::new(profile)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(endpoint: &str) -> ModelProfile {
        ModelProfile {
            endpoint: endpoint.to_string(),
            ..ModelProfile::new("fast", "sk-test", "deepseek-chat")
        }
    }

    #[test]
    fn test_url_joins_endpoint() {
        let backend = OpenAiCompatBackend::new(&profile("https://api.deepseek.com/v1/")).unwrap();
        assert_eq!(backend.url(), "https://api.deepseek.com/v1/chat/completions");
        assert_eq!(backend.model_name(), "deepseek-chat");
    }

    #[test]
    fn test_empty_endpoint_uses_default() {
        let backend = OpenAiCompatBackend::new(&profile("")).unwrap();
        assert_eq!(backend.url(), "https://api.openai.com/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_backend_error() {
        let backend = OpenAiCompatBackend::new(&profile("http://127.0.0.1:9")).unwrap();
        let err = match backend.stream(&[Message::user("hi")], &[]).await {
            Ok(_) => panic!("expected connection failure"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::BackendInvocation(_)));
    }

    #[tokio::test]
    async fn test_slow_stream_outlives_profile_timeout() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            for i in 0..5 {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                let line = format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"t{i} \"}}}}]}}\n\n");
                socket.write_all(line.as_bytes()).await.unwrap();
            }
            socket.write_all(b"data: [DONE]\n\n").await.unwrap();
            let _ = socket.shutdown().await;
        });

        let slow = ModelProfile {
            timeout_secs: 1,
            ..profile(&format!("http://{addr}"))
        };
        let backend = OpenAiCompatBackend::new(&slow).unwrap();
        let mut stream = backend.stream(&[Message::user("hi")], &[]).await.unwrap();

        let mut deltas = Vec::new();
        let mut completed = None;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                BackendEvent::TextDelta(text) => deltas.push(text),
                BackendEvent::Completed(response) => completed = Some(response),
            }
        }

        assert_eq!(deltas.len(), 5);
        assert_eq!(completed.unwrap().content, "t0 t1 t2 t3 t4 ");
    }

    #[tokio::test]
    async fn test_truncated_error_body_falls_back_to_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 502 Bad Gateway\r\ncontent-length: 100\r\n\r\n{\"error\"")
                .await
                .unwrap();
            let _ = socket.shutdown().await;
        });

        let backend = OpenAiCompatBackend::new(&profile(&format!("http://{addr}"))).unwrap();
        let err = match backend.stream(&[Message::user("hi")], &[]).await {
            Ok(_) => panic!("expected status failure"),
            Err(e) => e,
        };
        let message = err.to_string();
        assert!(message.contains("unavailable"), "{message}");
        assert!(message.contains("request failed with status 502"), "{message}");
    }
}
