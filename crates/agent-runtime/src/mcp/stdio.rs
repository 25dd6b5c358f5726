//! stdio transport: newline-delimited JSON over a child process's pipes

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{McpError, Transport};

const INBOUND_BUFFER: usize = 64;

pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<BufWriter<ChildStdin>>,
    reader: JoinHandle<()>,
}

impl StdioTransport {
    /// Launch `command` with piped stdin/stdout; stderr passes through
    pub fn spawn(
        command: &str,
        args: &[String],
    ) -> Result<(Self, mpsc::Receiver<Value>), McpError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("child stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("child stdout was not captured".into()))?;
        debug!(command, pid = ?child.id(), "Spawned MCP server process");

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let reader = tokio::spawn(read_lines(stdout, tx));

        Ok((
            Self {
                child: Mutex::new(child),
                stdin: Mutex::new(BufWriter::new(stdin)),
                reader,
            },
            rx,
        ))
    }
}

async fn read_lines(stdout: ChildStdout, tx: mpsc::Sender<Value>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match serde_json::from_str::<Value>(&line) {
                Ok(value) => {
                    if tx.send(value).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Discarding non-JSON line from server"),
            },
            Ok(None) => {
                debug!("MCP server closed stdout");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed reading from MCP server");
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &Value) -> Result<(), McpError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(&line)
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        stdin.flush().await.map_err(|e| McpError::Transport(e.to_string()))
    }

    async fn shutdown(&self) -> Result<(), McpError> {
        self.reader.abort();

        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "MCP server already exited");
                Ok(())
            }
            _ => child.kill().await.map_err(|e| McpError::Transport(e.to_string())),
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
