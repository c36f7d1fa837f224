// ABOUTME: JSON-RPC 2.0 transport to `copilot --server --stdio` with Content-Length framing.
// ABOUTME: A reader task resolves pending requests and fans `session.event` notifications out to callbacks.

use super::copilot::{CopilotEvent, CopilotTransport, EventCallback};
use anyhow::{anyhow, bail, Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{mpsc, oneshot};

/// Frames above this size are treated as a corrupt stream
const MAX_CONTENT_LENGTH: usize = 32 * 1024 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// JSON-RPC error code for a method the client does not implement
const METHOD_NOT_FOUND: i64 = -32601;

/// Configuration for the copilot backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Model requested at session creation; server default when absent
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_binary() -> String {
    "copilot".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

type Pending = HashMap<u64, oneshot::Sender<Result<Value>>>;

#[derive(Default)]
struct Shared {
    pending: Mutex<Pending>,
    subscribers: Mutex<HashMap<u64, (String, EventCallback)>>,
}

impl Shared {
    fn dispatch(&self, session_id: &str, event: CopilotEvent) {
        // Snapshot so callbacks run without the lock
        let callbacks: Vec<EventCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|(sid, _)| sid == session_id)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(event.clone());
        }
    }

    fn fail_pending(&self, reason: &str) {
        let pending: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (_, reply) in pending {
            let _ = reply.send(Err(anyhow!("{}", reason)));
        }
    }
}

struct Process {
    child: Child,
    /// Frames queued for the stdin writer task
    writer: mpsc::Sender<Vec<u8>>,
}

pub struct CopilotRpcTransport {
    config: CopilotConfig,
    shared: Arc<Shared>,
    process: tokio::sync::Mutex<Option<Process>>,
    next_id: AtomicU64,
    next_subscription: AtomicU64,
}

impl CopilotRpcTransport {
    pub fn new(config: CopilotConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            process: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
        }
    }

    async fn ensure_started(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Ok(());
        }

        let mut args = vec!["--server".to_string(), "--stdio".to_string()];
        args.extend(self.config.extra_args.iter().cloned());
        tracing::debug!(binary = %self.config.binary, ?args, "Spawning Copilot server");

        let mut child = ProcessCommand::new(&self.config.binary)
            .args(&args)
            .current_dir(&self.config.working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn Copilot CLI")?;

        let mut stdin = child.stdin.take().context("Failed to capture stdin")?;
        let stdout = child.stdout.take().context("Failed to capture stdout")?;
        let stderr = child.stderr.take().context("Failed to capture stderr")?;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    tracing::debug!(stderr = %line, "Copilot stderr");
                }
            }
        });

        let (writer, mut frames) = mpsc::channel::<Vec<u8>>(64);
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let written = async {
                    stdin.write_all(&frame).await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    tracing::warn!(error = %e, "Failed to write to Copilot stdin");
                    break;
                }
            }
        });

        // Weak, so destroy() dropping the writer still closes stdin
        let replies = writer.downgrade();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(message)) => {
                        let Some(reply) = handle_message(&shared, message) else {
                            continue;
                        };
                        match replies.upgrade() {
                            Some(writer) => {
                                if writer.send(encode_frame(&reply)).await.is_err() {
                                    tracing::warn!("Copilot stdin closed while replying");
                                }
                            }
                            None => tracing::debug!("Copilot writer gone, reply dropped"),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Copilot stream corrupt, closing");
                        break;
                    }
                }
            }
            tracing::info!("Copilot server output closed");
            shared.fail_pending("Copilot server exited");
            // Dropping the callbacks closes every turn bridge
            shared
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
        });

        *process = Some(Process { child, writer });
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        let frame = encode_frame(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }));
        let writer = self
            .process
            .lock()
            .await
            .as_ref()
            .map(|process| process.writer.clone())
            .ok_or_else(|| anyhow!("Copilot server is not running"))?;
        writer
            .send(frame)
            .await
            .map_err(|_| anyhow!("Failed to write {} request: Copilot stdin closed", method))?;

        let reply = tokio::time::timeout(REQUEST_TIMEOUT, rx).await;
        match reply {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => bail!("Copilot server dropped {} request", method),
            Err(_) => {
                self.shared
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                bail!("Copilot {} request timed out", method)
            }
        }
    }
}

impl CopilotTransport for CopilotRpcTransport {
    fn create_session<'a>(&'a self) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.ensure_started().await?;
            let mut params = json!({"streaming": true});
            if let Some(model) = &self.config.model {
                params["model"] = json!(model);
            }
            let result = self.request("session.create", params).await?;
            result
                .get("sessionId")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .context("session.create returned no sessionId")
        })
    }

    fn subscribe(&self, session_id: &str, callback: EventCallback) -> u64 {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, (session_id.to_string(), callback));
        id
    }

    fn unsubscribe(&self, subscription: u64) {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&subscription);
    }

    fn send<'a>(&'a self, session_id: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.request("session.send", json!({"sessionId": session_id, "prompt": prompt}))
                .await?;
            Ok(())
        })
    }

    fn abort<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.request("session.abort", json!({"sessionId": session_id}))
                .await?;
            Ok(())
        })
    }

    fn destroy<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let destroyed = self
                .request("session.destroy", json!({"sessionId": session_id}))
                .await;
            if let Some(mut process) = self.process.lock().await.take() {
                drop(process.writer);
                if tokio::time::timeout(Duration::from_secs(5), process.child.wait())
                    .await
                    .is_err()
                {
                    tracing::warn!("Copilot server did not exit, killing");
                    process.child.kill().await.context("Failed to kill Copilot CLI")?;
                }
            }
            destroyed.map(|_| ())
        })
    }
}

/// Route one inbound message: response, notification, or server request.
/// Returns the reply to write back when the message was a request.
fn handle_message(shared: &Shared, message: Value) -> Option<Value> {
    let request_id = message.get("id").filter(|id| !id.is_null()).cloned();
    let method = message.get("method").and_then(|v| v.as_str());

    match (request_id, method) {
        (Some(request_id), Some(method)) => {
            tracing::debug!(method = %method, "Rejecting Copilot server request");
            return Some(json!({
                "jsonrpc": "2.0",
                "id": request_id,
                "error": {
                    "code": METHOD_NOT_FOUND,
                    "message": format!("Method not found: {}", method),
                },
            }));
        }
        (Some(request_id), None) => {
            let Some(id) = request_id.as_u64() else {
                tracing::debug!(id = %request_id, "Response with non-numeric id");
                return None;
            };
            let reply = shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            let Some(reply) = reply else {
                tracing::debug!(id, "Response for unknown request");
                return None;
            };
            let result = match message.get("error") {
                Some(error) => Err(anyhow!(
                    "{}",
                    error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("JSON-RPC error")
                )),
                None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = reply.send(result);
        }
        (None, Some("session.event")) => {
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let session_id = params
                .get("sessionId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            match params
                .get("event")
                .cloned()
                .map(serde_json::from_value::<CopilotEvent>)
            {
                Some(Ok(event)) => shared.dispatch(&session_id, event),
                Some(Err(e)) => tracing::warn!(error = %e, "Skipping malformed session.event"),
                None => tracing::warn!("session.event without event"),
            }
        }
        (None, Some(method)) => {
            tracing::debug!(method = %method, "Ignoring Copilot server notification");
        }
        (None, None) => tracing::warn!(message = %message, "Unrecognized JSON-RPC message"),
    }
    None
}

pub fn encode_frame(message: &Value) -> Vec<u8> {
    let body = message.to_string();
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(body.as_bytes());
    frame
}

/// Read one framed message; `None` on clean end of stream
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .context("Failed to read frame header")?;
        if n == 0 {
            return Ok(None);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                content_length = value.trim().parse::<usize>().ok();
            }
        }
    }

    let length = content_length.context("Missing Content-Length header")?;
    if length > MAX_CONTENT_LENGTH {
        bail!("Content-Length {} exceeds {}", length, MAX_CONTENT_LENGTH);
    }
    let mut body = vec![0; length];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read frame body")?;
    serde_json::from_slice(&body)
        .map(Some)
        .context("Frame body is not JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_frame_sequence() {
        let mut bytes = encode_frame(&json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
        bytes.extend(encode_frame(&json!({"jsonrpc": "2.0", "method": "session.event"})));
        let mut reader = BufReader::new(&bytes[..]);

        let first = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(first["id"], 1);
        let second = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(second["method"], "session.event");
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length() {
        let bytes = format!("Content-Length: {}\r\n\r\n", MAX_CONTENT_LENGTH + 1);
        let mut reader = BufReader::new(bytes.as_bytes());
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[test]
    fn test_notifications_reach_matching_session_only() {
        let shared = Shared::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        shared.subscribers.lock().unwrap().insert(
            1,
            (
                "s1".to_string(),
                Arc::new(move |event: CopilotEvent| sink.lock().unwrap().push(event.event_type)),
            ),
        );

        for sid in ["s1", "s2"] {
            let reply = handle_message(
                &shared,
                json!({
                    "jsonrpc": "2.0",
                    "method": "session.event",
                    "params": {"sessionId": sid, "event": {"type": "session.idle", "data": {}}}
                }),
            );
            assert!(reply.is_none());
        }

        assert_eq!(*seen.lock().unwrap(), vec!["session.idle".to_string()]);
    }

    #[tokio::test]
    async fn test_response_resolves_pending_request() {
        let shared = Shared::default();
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().unwrap().insert(7, tx);

        let reply =
            handle_message(&shared, json!({"jsonrpc": "2.0", "id": 7, "result": {"sessionId": "abc"}}));
        assert!(reply.is_none());
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result["sessionId"], "abc");
    }

    #[test]
    fn test_server_request_gets_method_not_found_reply() {
        let reply = handle_message(
            &Shared::default(),
            json!({
                "jsonrpc": "2.0",
                "id": "perm-1",
                "method": "permission.request",
                "params": {"kind": "shell"}
            }),
        )
        .unwrap();

        assert_eq!(reply["jsonrpc"], "2.0");
        assert_eq!(reply["id"], "perm-1");
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(reply["error"]["message"], "Method not found: permission.request");
    }

    #[test]
    fn test_error_response_fails_pending_request() {
        let shared = Shared::default();
        let (tx, mut rx) = oneshot::channel();
        shared.pending.lock().unwrap().insert(3, tx);

        let reply = handle_message(
            &shared,
            json!({"jsonrpc": "2.0", "id": 3, "error": {"code": -32000, "message": "no session"}}),
        );

        assert!(reply.is_none());
        let err = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "no session");
    }
}
