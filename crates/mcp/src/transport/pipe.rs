//! Subprocess transport: newline-delimited JSON over the child's stdin/stdout.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use toolmesh_core::PipeParams;

use super::{Inbound, McpTransport, TaskGuard, TransportLink, CHANNEL_CAPACITY};
use crate::codec::{self, JsonRpcMessage};
use crate::error::McpError;

#[cfg(unix)]
const BASELINE_ENV: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

#[cfg(windows)]
const BASELINE_ENV: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PATHEXT",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// Spawns the server command and talks to it over its standard streams.
///
/// The child sees only a small baseline of the parent's environment plus
/// the descriptor's `env`. Its stderr goes straight to ours.
pub struct PipeTransport {
    server: String,
    params: PipeParams,
}

impl PipeTransport {
    pub fn new(server: impl Into<String>, params: PipeParams) -> Self {
        Self {
            server: server.into(),
            params,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.params.command);
        cmd.args(&self.params.args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for key in BASELINE_ENV {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.envs(&self.params.env);
        cmd
    }
}

#[async_trait]
impl McpTransport for PipeTransport {
    async fn open(&mut self) -> Result<TransportLink, McpError> {
        let mut child = self.command().spawn().map_err(|e| {
            McpError::Connection(format!("failed to spawn '{}': {e}", self.params.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connection("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connection("child stdout unavailable".to_string()))?;

        info!(
            server = %self.server,
            command = %self.params.command,
            pid = child.id().unwrap_or_default(),
            "Spawned pipe server"
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(pump(
            self.server.clone(),
            child,
            stdin,
            stdout,
            outbound_rx,
            inbound_tx,
        ));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
            session_id: None,
            task: TaskGuard::new(task),
        })
    }
}

/// Moves lines both ways until either side ends, then kills the child.
async fn pump(
    server: String,
    mut child: Child,
    mut stdin: ChildStdin,
    stdout: ChildStdout,
    mut outbound: mpsc::Receiver<JsonRpcMessage>,
    inbound: mpsc::Sender<Inbound>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let decoded = codec::decode(&line);
                    if let Err(e) = &decoded {
                        warn!(server = %server, error = %e, "Undecodable line from pipe server");
                    }
                    if inbound.send(decoded).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(server = %server, "Pipe server closed stdout");
                    break;
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "Failed reading from pipe server");
                    break;
                }
            },
            message = outbound.recv() => {
                let Some(message) = message else { break };
                match write_line(&mut stdin, &message).await {
                    Ok(()) => {}
                    Err(McpError::Io(e)) => {
                        warn!(server = %server, error = %e, "Failed writing to pipe server");
                        break;
                    }
                    Err(e) => {
                        let failure = McpError::Delivery {
                            id: message.id().cloned(),
                            reason: e.to_string(),
                        };
                        if inbound.send(Err(failure)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(server = %server, error = %e, "Pipe server already gone");
    }
    info!(server = %server, "Pipe transport closed");
}

async fn write_line(stdin: &mut ChildStdin, message: &JsonRpcMessage) -> Result<(), McpError> {
    let line = codec::encode(message)?;
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}
