// ABOUTME: HTTP + SSE transport for an OpenCode server (`opencode serve`).
// ABOUTME: Sessions and prompts over JSON POSTs, the event feed decoded from `GET /event`.

use super::opencode::{FeedEvent, OpencodeTransport, PromptResponse, DEFAULT_IDLE_GRACE_MS};
use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Frames larger than this mean the server is not speaking SSE
const MAX_SSE_BUFFER: usize = 8 * 1024 * 1024;

/// Configuration for the opencode backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpencodeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// How long to keep reading the feed after the prompt response arrives
    #[serde(default = "default_idle_grace_ms")]
    pub idle_grace_ms: u64,
    /// Project directory the server should resolve paths against
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:4096".to_string()
}

fn default_idle_grace_ms() -> u64 {
    DEFAULT_IDLE_GRACE_MS
}

pub struct OpencodeHttpTransport {
    client: reqwest::Client,
    config: OpencodeConfig,
}

impl OpencodeHttpTransport {
    pub fn new(config: OpencodeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(self.url(path));
        match &self.config.directory {
            Some(dir) => request.query(&[("directory", dir)]),
            None => request,
        }
    }

    async fn checked(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("OpenCode {} failed with {}: {}", what, status, body);
        }
        Ok(response)
    }
}

impl OpencodeTransport for OpencodeHttpTransport {
    fn create_session<'a>(&'a self) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let response = self
                .post("/session")
                .json(&json!({}))
                .send()
                .await
                .context("Failed to reach OpenCode server")?;
            let session: Value = Self::checked(response, "session create")
                .await?
                .json()
                .await
                .context("Invalid session create response")?;
            session
                .get("id")
                .and_then(|id| id.as_str())
                .map(str::to_string)
                .context("Session create response has no id")
        })
    }

    fn subscribe<'a>(&'a self) -> BoxFuture<'a, Result<BoxStream<'a, FeedEvent>>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url("/event"))
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send()
                .await
                .context("Failed to open OpenCode event feed")?;
            let mut bytes = Self::checked(response, "event feed").await?.bytes_stream();

            let events = async_stream::stream! {
                let mut decoder = SseDecoder::default();
                while let Some(chunk) = bytes.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            tracing::warn!(error = %e, "OpenCode event feed read failed");
                            break;
                        }
                    };
                    let frames = match decoder.push(&chunk) {
                        Ok(frames) => frames,
                        Err(e) => {
                            tracing::warn!(error = %e, "Dropping OpenCode event feed");
                            break;
                        }
                    };
                    for data in frames {
                        match serde_json::from_str::<FeedEvent>(&data) {
                            Ok(event) => yield event,
                            Err(e) => tracing::warn!(error = %e, "Skipping malformed OpenCode event"),
                        }
                    }
                }
            };
            Ok(Box::pin(events) as BoxStream<'a, FeedEvent>)
        })
    }

    fn prompt<'a>(
        &'a self,
        session_id: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<PromptResponse>> {
        Box::pin(async move {
            let response = self
                .post(&format!("/session/{}/message", session_id))
                .json(&json!({"parts": [{"type": "text", "text": text}]}))
                .send()
                .await
                .context("Failed to send prompt to OpenCode")?;
            Self::checked(response, "prompt")
                .await?
                .json()
                .await
                .context("Invalid prompt response")
        })
    }

    fn abort<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let response = self
                .post(&format!("/session/{}/abort", session_id))
                .send()
                .await
                .context("Failed to abort OpenCode session")?;
            Self::checked(response, "abort").await?;
            Ok(())
        })
    }
}

/// Splits a byte stream into SSE frames and returns their joined `data:` lines
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: String,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.buf
            .push_str(&String::from_utf8_lossy(chunk).replace("\r\n", "\n"));
        if self.buf.len() > MAX_SSE_BUFFER {
            bail!("SSE buffer exceeded {} bytes", MAX_SSE_BUFFER);
        }

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let frame: String = self.buf.drain(..pos + 2).collect();
            let data: Vec<&str> = frame
                .lines()
                .filter_map(|line| {
                    line.strip_prefix("data:")
                        .map(|d| d.strip_prefix(' ').unwrap_or(d))
                })
                .collect();
            if !data.is_empty() {
                frames.push(data.join("\n"));
            }
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_decoder_joins_split_frames() {
        let mut decoder = SseDecoder::default();
        assert!(decoder
            .push(b"data: {\"type\":\"session.idle\",")
            .unwrap()
            .is_empty());
        let frames = decoder
            .push(b"\"properties\":{\"sessionID\":\"s1\"}}\r\n\r\n: ping\n\n")
            .unwrap();
        assert_eq!(frames.len(), 1);

        let event: FeedEvent = serde_json::from_str(&frames[0]).unwrap();
        assert!(matches!(event, FeedEvent::SessionIdle { properties } if properties.session_id == "s1"));
    }

    #[test]
    fn test_config_defaults() {
        let config: OpencodeConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:4096");
        assert_eq!(config.idle_grace_ms, 1500);
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let transport = OpencodeHttpTransport::new(OpencodeConfig {
            base_url: "http://localhost:9000/".to_string(),
            idle_grace_ms: 10,
            directory: None,
        })
        .unwrap();
        assert_eq!(transport.url("/session"), "http://localhost:9000/session");
    }
}
