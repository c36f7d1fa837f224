// ABOUTME: Claude Code subprocess transport speaking bidirectional stream-json.
// ABOUTME: Registers subagent hook callbacks at initialize and acks each callback as it arrives.

use super::claude::{
    ClaudeTransport, HookAck, HookCallbacks, SdkMessage, SubagentStartInput, SubagentStopInput,
};
use crate::bridge::DEFAULT_CAPACITY;
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::mpsc;

const SUBAGENT_START_CALLBACK: &str = "hook_subagent_start";
const SUBAGENT_STOP_CALLBACK: &str = "hook_subagent_stop";

/// Configuration for the claude backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeCliConfig {
    /// Path to the claude binary
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Working directory for the agent
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Backend session to resume on connect
    #[serde(default)]
    pub resume: Option<String>,
}

fn default_binary() -> String {
    "claude".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Default)]
struct Shared {
    hooks: Mutex<Option<Arc<dyn HookCallbacks>>>,
    turn: Mutex<Option<mpsc::Sender<SdkMessage>>>,
    /// Interrupted turns whose `result` has not been read yet
    stale_results: Mutex<usize>,
    backend_session: Mutex<Option<String>>,
}

impl Shared {
    fn hooks(&self) -> Option<Arc<dyn HookCallbacks>> {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn turn(&self) -> Option<mpsc::Sender<SdkMessage>> {
        self.turn.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn end_turn(&self) {
        self.turn.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Detach the running turn. Its output keeps arriving until claude
    /// writes that turn's `result`, so that much is discarded.
    fn interrupt_turn(&self) {
        if self.turn.lock().unwrap_or_else(|e| e.into_inner()).take().is_some() {
            *self.stale_results.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        }
    }

    /// Where a message read from stdout goes. `None` while the output of an
    /// interrupted turn is still being drained.
    fn route(&self, is_result: bool) -> Option<mpsc::Sender<SdkMessage>> {
        let mut stale = self.stale_results.lock().unwrap_or_else(|e| e.into_inner());
        if *stale > 0 {
            if is_result {
                *stale -= 1;
            }
            return None;
        }
        drop(stale);
        self.turn()
    }

    fn reset(&self) {
        self.end_turn();
        *self.stale_results.lock().unwrap_or_else(|e| e.into_inner()) = 0;
    }
}

pub struct ClaudeCliTransport {
    config: ClaudeCliConfig,
    shared: Arc<Shared>,
    writer: Mutex<Option<mpsc::Sender<String>>>,
    child: tokio::sync::Mutex<Option<Child>>,
    next_request: AtomicU64,
}

impl ClaudeCliTransport {
    pub fn new(config: ClaudeCliConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            writer: Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
            next_request: AtomicU64::new(1),
        }
    }

    /// Backend session id reported by `system/init`, used for `--resume`
    pub fn backend_session(&self) -> Option<String> {
        self.shared
            .backend_session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--print",
            "--verbose",
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--include-partial-messages",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(session) = self.backend_session().or_else(|| self.config.resume.clone()) {
            args.push("--resume".to_string());
            args.push(session);
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    fn writer(&self) -> Result<mpsc::Sender<String>> {
        self.writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| anyhow!("Claude process is not running"))
    }

    async fn write(&self, message: Value) -> Result<()> {
        self.writer()?
            .send(message.to_string())
            .await
            .map_err(|_| anyhow!("Claude stdin closed"))
    }

    async fn control_request(&self, request: Value) -> Result<()> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        self.write(json!({
            "type": "control_request",
            "request_id": format!("req_{}", id),
            "request": request,
        }))
        .await
    }
}

impl ClaudeTransport for ClaudeCliTransport {
    fn connect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let args = self.args();
            tracing::debug!(?args, "Spawning Claude CLI");

            let mut child = ProcessCommand::new(&self.config.binary)
                .args(&args)
                .current_dir(&self.config.working_dir)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .context("Failed to spawn Claude CLI")?;

            let mut stdin = child.stdin.take().context("Failed to capture stdin")?;
            let stdout = child.stdout.take().context("Failed to capture stdout")?;
            let stderr = child.stderr.take().context("Failed to capture stderr")?;

            let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
            tokio::spawn(async move {
                while let Some(line) = line_rx.recv().await {
                    let written = async {
                        stdin.write_all(line.as_bytes()).await?;
                        stdin.write_all(b"\n").await?;
                        stdin.flush().await
                    }
                    .await;
                    if let Err(e) = written {
                        tracing::warn!(error = %e, "Failed to write to Claude stdin");
                        break;
                    }
                }
            });

            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.is_empty() {
                        tracing::warn!(stderr = %line, "Claude CLI stderr");
                    }
                }
            });

            tokio::spawn(read_stdout(stdout, Arc::clone(&self.shared), line_tx.clone()));

            *self.writer.lock().unwrap_or_else(|e| e.into_inner()) = Some(line_tx);
            *self.child.lock().await = Some(child);

            self.control_request(json!({
                "subtype": "initialize",
                "hooks": {
                    "SubagentStart": [{"matcher": null, "hookCallbackIds": [SUBAGENT_START_CALLBACK]}],
                    "SubagentStop": [{"matcher": null, "hookCallbackIds": [SUBAGENT_STOP_CALLBACK]}],
                },
            }))
            .await
            .context("Failed to initialize Claude session")
        })
    }

    fn query<'a>(
        &'a self,
        prompt: &'a str,
        hooks: Arc<dyn HookCallbacks>,
    ) -> BoxFuture<'a, Result<BoxStream<'a, SdkMessage>>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<SdkMessage>(DEFAULT_CAPACITY);
            *self.shared.hooks.lock().unwrap_or_else(|e| e.into_inner()) = Some(hooks);
            *self.shared.turn.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

            let session_id = self.backend_session().unwrap_or_else(|| "default".to_string());
            self.write(json!({
                "type": "user",
                "message": {"role": "user", "content": prompt},
                "parent_tool_use_id": null,
                "session_id": session_id,
            }))
            .await?;

            let messages = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|message| (message, rx))
            });
            Ok(Box::pin(messages) as BoxStream<'a, SdkMessage>)
        })
    }

    fn interrupt<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.control_request(json!({"subtype": "interrupt"})).await?;
            self.shared.interrupt_turn();
            Ok(())
        })
    }

    fn close<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            // Closing stdin lets claude exit on its own
            self.writer.lock().unwrap_or_else(|e| e.into_inner()).take();
            self.shared.reset();
            self.shared.hooks.lock().unwrap_or_else(|e| e.into_inner()).take();

            if let Some(mut child) = self.child.lock().await.take() {
                let waited =
                    tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await;
                if waited.is_err() {
                    tracing::warn!("Claude did not exit after stdin closed, killing");
                    child.kill().await.context("Failed to kill Claude CLI")?;
                }
            }
            Ok(())
        })
    }
}

async fn read_stdout<R>(
    stdout: R,
    shared: Arc<Shared>,
    writer: mpsc::Sender<String>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let json: Value = match serde_json::from_str(&line) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, line = %line, "Skipping non-JSON Claude output");
                continue;
            }
        };

        match json.get("type").and_then(|t| t.as_str()) {
            Some("control_request") => {
                let response = answer_control_request(&json, &shared);
                if writer.send(response.to_string()).await.is_err() {
                    tracing::warn!("Claude stdin closed while answering control request");
                }
            }
            Some("control_response") => {
                tracing::debug!(response = %json, "Claude control response");
            }
            _ => {
                let message: SdkMessage = match serde_json::from_value(json) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping malformed Claude message");
                        continue;
                    }
                };

                if let SdkMessage::System {
                    subtype,
                    session_id: Some(session_id),
                } = &message
                {
                    if subtype == "init" {
                        *shared
                            .backend_session
                            .lock()
                            .unwrap_or_else(|e| e.into_inner()) = Some(session_id.clone());
                    }
                }

                let is_result = matches!(message, SdkMessage::Result { .. });
                let Some(turn) = shared.route(is_result) else {
                    tracing::debug!(is_result, "Discarding Claude output with no live turn");
                    continue;
                };
                if turn.send(message).await.is_err() {
                    tracing::debug!("Turn receiver closed, discarding Claude message");
                }
                if is_result {
                    shared.end_turn();
                }
            }
        }
    }

    tracing::info!("Claude process output closed");
    shared.reset();
}

/// Build the reply to a control request. Hook callbacks are acked with
/// whatever the registered callbacks return; the callbacks never wait.
fn answer_control_request(json: &Value, shared: &Shared) -> Value {
    let request_id = json
        .get("request_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let request = json.get("request").cloned().unwrap_or(Value::Null);
    let subtype = request.get("subtype").and_then(|s| s.as_str()).unwrap_or("");

    if subtype != "hook_callback" {
        tracing::debug!(subtype = %subtype, "Unsupported Claude control request");
        return json!({
            "type": "control_response",
            "response": {
                "subtype": "error",
                "request_id": request_id,
                "error": format!("unsupported control request: {}", subtype),
            },
        });
    }

    let input = request.get("input").cloned().unwrap_or(Value::Null);
    let callback_id = request
        .get("callback_id")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let ack = match (callback_id, shared.hooks()) {
        (SUBAGENT_START_CALLBACK, Some(hooks)) => {
            let input: SubagentStartInput = serde_json::from_value(input).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Malformed SubagentStart input");
                SubagentStartInput::default()
            });
            hooks.subagent_start(&input)
        }
        (SUBAGENT_STOP_CALLBACK, Some(hooks)) => {
            let input: SubagentStopInput = serde_json::from_value(input).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Malformed SubagentStop input");
                SubagentStopInput::default()
            });
            hooks.subagent_stop(&input)
        }
        (other, _) => {
            tracing::debug!(callback_id = %other, "Hook callback with no listener");
            HookAck::proceed()
        }
    };

    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": ack,
        },
    })
}
