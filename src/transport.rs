//! The line-delimited JSON-RPC transport (LDT): one instance per downstream
//! child process. Owns the child's pipes, a strictly increasing request-id
//! counter, and the pending-request table that lets concurrent callers share
//! a single child without interleaving frames on its stdin.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};

use crate::error::{ChainerError, Result};
use crate::framing::{looks_like_non_frame, FrameBuffer};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The capability a downstream client needs. Abstracted behind a trait so
/// the registry and chain executor can be exercised against an in-memory
/// double without spawning real child processes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value>;
    async fn notify(&self, method: &str, params: Value) -> Result<()>;
    async fn close(&self);
}

type Pending = HashMap<i64, oneshot::Sender<Result<Value>>>;

/// A spawned downstream MCP server reachable over stdio.
pub struct ChildTransport {
    server_key: String,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicI64,
    child: Arc<Mutex<Child>>,
}

impl ChildTransport {
    pub fn spawn(
        server_key: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ChainerError::Transport(format!("spawning {server_key} ({command}): {e}")))?;

        let stdin = child.stdin.take().expect("child spawned with piped stdin");
        let stdout = child.stdout.take().expect("child spawned with piped stdout");
        let stderr = child.stderr.take().expect("child spawned with piped stderr");

        let pending: Arc<Mutex<Pending>> = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(read_stdout_loop(server_key.to_string(), stdout, pending.clone()));
        tokio::spawn(read_stderr_loop(server_key.to_string(), stderr));

        tracing::info!(server = server_key, command, "spawned downstream server");

        Ok(ChildTransport {
            server_key: server_key.to_string(),
            stdin: Arc::new(Mutex::new(stdin)),
            pending,
            next_id: AtomicI64::new(1),
            child: Arc::new(Mutex::new(child)),
        })
    }

    async fn write_frame(&self, frame: Value) -> Result<()> {
        let mut line = serde_json::to_string(&frame)
            .map_err(|e| ChainerError::Transport(format!("encoding frame: {e}")))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ChainerError::Transport(format!("writing to {}: {e}", self.server_key)))
    }
}

#[async_trait]
impl Transport for ChildTransport {
    async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        if let Err(e) = self.write_frame(frame).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChainerError::Transport(format!("{} transport closed", self.server_key))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ChainerError::Timeout(timeout))
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let frame = serde_json::json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.write_frame(frame).await
    }

    async fn close(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(ChainerError::Transport("closed".to_string())));
        }
        drop(pending);
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
        tracing::info!(server = self.server_key, "closed downstream transport");
    }
}

async fn read_stdout_loop(
    server_key: String,
    stdout: tokio::process::ChildStdout,
    pending: Arc<Mutex<Pending>>,
) {
    let mut reader = BufReader::new(stdout);
    let mut frame_buf = FrameBuffer::new();
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                for candidate in frame_buf.push(&line) {
                    if looks_like_non_frame(&candidate) {
                        tracing::debug!(server = %server_key, "discarding non-frame stdout line");
                        continue;
                    }
                    let trimmed = candidate.trim();
                    let first = trimmed.chars().next();
                    if !matches!(first, Some('{') | Some('[')) {
                        tracing::debug!(server = %server_key, "discarding non-json stdout line");
                        continue;
                    }
                    match serde_json::from_str::<Value>(trimmed) {
                        Ok(value) => dispatch(&server_key, value, &pending).await,
                        Err(_) => {
                            tracing::debug!(server = %server_key, "discarding unparsable stdout line");
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(server = %server_key, error = %e, "stdout read error");
                break;
            }
        }
    }
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(ChainerError::Transport(format!("{server_key} exited"))));
    }
    tracing::info!(server = %server_key, "downstream stdout closed");
}

async fn read_stderr_loop(server_key: String, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => classify_and_log(&server_key, &line),
            _ => break,
        }
    }
}

fn classify_and_log(server_key: &str, line: &str) {
    let trimmed = line.trim_start();
    if trimmed.starts_with("[ERROR]") {
        tracing::error!(server = server_key, message = trimmed);
    } else if trimmed.starts_with("[WARN]") {
        tracing::warn!(server = server_key, message = trimmed);
    } else if trimmed.starts_with("[INFO]") {
        tracing::info!(server = server_key, message = trimmed);
    } else if trimmed.starts_with("[DEBUG]") {
        tracing::debug!(server = server_key, message = trimmed);
    } else if trimmed.to_ascii_lowercase().contains("error") {
        tracing::error!(server = server_key, message = trimmed);
    } else {
        tracing::warn!(server = server_key, message = trimmed);
    }
}

/// Dispatch a parsed frame to its matching pending continuation. Frames
/// without a numeric id, or whose id has no matching entry (already
/// resolved, timed out, or spurious), are discarded at debug.
async fn dispatch(server_key: &str, value: Value, pending: &Arc<Mutex<Pending>>) {
    let Some(id) = value.get("id").and_then(|v| v.as_i64()) else {
        tracing::debug!(server = %server_key, "discarding frame without numeric id");
        return;
    };
    let tx = {
        let mut guard = pending.lock().await;
        guard.remove(&id)
    };
    let Some(tx) = tx else {
        tracing::debug!(server = %server_key, id, "discarding frame for unknown or resolved id");
        return;
    };
    let result = if let Some(err) = value.get("error") {
        let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(-32000);
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown downstream error")
            .to_string();
        Err(ChainerError::Remote { code, message })
    } else {
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    };
    let _ = tx.send(result);
}
