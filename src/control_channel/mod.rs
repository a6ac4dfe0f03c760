//! Control channel - authenticated command/result rendezvous
//!
//! ## Responsibilities
//!
//! - Accept authenticated TCP connections from external clients
//! - Bridge newline-delimited JSON command frames onto the orchestrator's
//!   command queue and relay exactly one result per command back
//!
//! The protocol is strictly one-outstanding-request: a command is enqueued
//! and its result awaited under one lock, so concurrent clients cannot
//! interleave results. The endpoint half is constructed here and handed to
//! the orchestrator by ownership; there is no process-wide singleton.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};

/// Wire token starting a processing session
pub const START_TOKEN: &str = "process_video_cfg";
/// Wire token stopping the running session
pub const STOP_TOKEN: &str = "stop_process_video";

/// Fixed backoff while the channel endpoint is not yet reachable
const BOOTSTRAP_RETRY: Duration = Duration::from_secs(1);

/// A command token received over the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartProcessing,
    StopProcessing,
    Unknown(String),
}

impl Command {
    pub fn parse(token: &str) -> Self {
        match token {
            START_TOKEN => Self::StartProcessing,
            STOP_TOKEN => Self::StopProcessing,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Self::StartProcessing => START_TOKEN,
            Self::StopProcessing => STOP_TOKEN,
            Self::Unknown(token) => token,
        }
    }
}

/// Orchestrator's verdict on one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// State transition performed
    Accepted,
    /// Valid command, wrong state (double start/stop)
    Rejected,
    /// Unrecognized token, state unchanged
    Invalid,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthFrame {
    auth: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthReply {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommandFrame {
    command: String,
}

/// Result frame written back to the client
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultFrame {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<CommandOutcome> for ResultFrame {
    fn from(outcome: CommandOutcome) -> Self {
        match outcome {
            CommandOutcome::Accepted => Self {
                success: true,
                error: None,
            },
            CommandOutcome::Rejected => Self {
                success: false,
                error: None,
            },
            CommandOutcome::Invalid => Self {
                success: false,
                error: Some("invalid_cmd".to_string()),
            },
        }
    }
}

/// The orchestrator's half of the rendezvous: dequeue commands, enqueue
/// one outcome per command.
pub struct CoreEndpoint {
    pub commands: mpsc::Receiver<Command>,
    pub results: mpsc::Sender<CommandOutcome>,
}

struct Exchange {
    commands: mpsc::Sender<Command>,
    results: mpsc::Receiver<CommandOutcome>,
}

/// Listening side of the control channel
pub struct ControlChannel {
    listener: TcpListener,
    auth_key: String,
    exchange: Arc<Mutex<Exchange>>,
}

impl ControlChannel {
    /// Bind the channel endpoint and create the connected core endpoint.
    pub async fn bind(host: &str, port: u16, auth_key: &str) -> Result<(Self, CoreEndpoint)> {
        let listener = TcpListener::bind((host, port)).await?;
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (result_tx, result_rx) = mpsc::channel(1);
        let channel = Self {
            listener,
            auth_key: auth_key.to_string(),
            exchange: Arc::new(Mutex::new(Exchange {
                commands: cmd_tx,
                results: result_rx,
            })),
        };
        let endpoint = CoreEndpoint {
            commands: cmd_rx,
            results: result_tx,
        };
        Ok((channel, endpoint))
    }

    /// Bind, retrying forever with a fixed backoff. Expected during
    /// coordinated startup when the endpoint is not yet free.
    pub async fn bind_with_retry(host: &str, port: u16, auth_key: &str) -> (Self, CoreEndpoint) {
        loop {
            match Self::bind(host, port, auth_key).await {
                Ok(bound) => return bound,
                Err(e) => {
                    tracing::warn!(
                        host = %host,
                        port = port,
                        error = %e,
                        "Control channel endpoint unavailable, retrying"
                    );
                    tokio::time::sleep(BOOTSTRAP_RETRY).await;
                }
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve client connections forever.
    pub async fn serve(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "Control channel accept failed");
                    continue;
                }
            };
            tracing::debug!(peer = %peer, "Control channel client connected");
            let auth_key = self.auth_key.clone();
            let exchange = self.exchange.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, auth_key, exchange).await {
                    tracing::debug!(peer = %peer, error = %e, "Control channel client closed");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    auth_key: String,
    exchange: Arc<Mutex<Exchange>>,
) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let first = lines
        .next_line()
        .await?
        .ok_or_else(|| Error::Channel("peer closed before handshake".to_string()))?;
    let auth: AuthFrame = serde_json::from_str(&first)
        .map_err(|_| Error::Channel("malformed handshake frame".to_string()))?;
    if auth.auth != auth_key {
        tracing::warn!("Control channel handshake rejected");
        write_frame(
            &mut write,
            &AuthReply {
                ok: false,
                error: Some("unauthorized".to_string()),
            },
        )
        .await?;
        return Ok(());
    }
    write_frame(&mut write, &AuthReply { ok: true, error: None }).await?;

    while let Some(line) = lines.next_line().await? {
        let command = match serde_json::from_str::<CommandFrame>(&line) {
            Ok(frame) => Command::parse(&frame.command),
            Err(_) => {
                write_frame(
                    &mut write,
                    &ResultFrame {
                        success: false,
                        error: Some("malformed_frame".to_string()),
                    },
                )
                .await?;
                continue;
            }
        };

        // One outstanding request across all clients: enqueue the command
        // and await its result under the same lock.
        let outcome = {
            let mut exchange = exchange.lock().await;
            exchange
                .commands
                .send(command)
                .await
                .map_err(|_| Error::Channel("orchestrator gone".to_string()))?;
            exchange
                .results
                .recv()
                .await
                .ok_or_else(|| Error::Channel("orchestrator gone".to_string()))?
        };
        write_frame(&mut write, &ResultFrame::from(outcome)).await?;
    }
    Ok(())
}

async fn write_frame<T: Serialize>(write: &mut OwnedWriteHalf, frame: &T) -> Result<()> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    write.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Client side of the control channel, used by external tooling and tests.
#[derive(Debug)]
pub struct ControlClient {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl ControlClient {
    /// Connect and authenticate in one attempt.
    pub async fn connect(addr: SocketAddr, auth_key: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let mut frame = serde_json::to_string(&AuthFrame {
            auth: auth_key.to_string(),
        })?;
        frame.push('\n');
        write.write_all(frame.as_bytes()).await?;

        let reply = lines
            .next_line()
            .await?
            .ok_or_else(|| Error::Channel("peer closed during handshake".to_string()))?;
        let reply: AuthReply = serde_json::from_str(&reply)
            .map_err(|_| Error::Channel("malformed handshake reply".to_string()))?;
        if !reply.ok {
            return Err(Error::Channel(
                reply.error.unwrap_or_else(|| "handshake rejected".to_string()),
            ));
        }
        Ok(Self { lines, write })
    }

    /// Connect, retrying forever with a fixed backoff while the endpoint is
    /// unreachable. Authentication failures are returned immediately.
    pub async fn connect_with_retry(addr: SocketAddr, auth_key: &str) -> Result<Self> {
        loop {
            match Self::connect(addr, auth_key).await {
                Ok(client) => return Ok(client),
                Err(e @ Error::Channel(_)) => return Err(e),
                Err(e) => {
                    tracing::info!(addr = %addr, error = %e, "Control channel not reachable, retrying");
                    tokio::time::sleep(BOOTSTRAP_RETRY).await;
                }
            }
        }
    }

    /// Send one command token and await its result.
    pub async fn send(&mut self, token: &str) -> Result<ResultFrame> {
        let mut frame = serde_json::to_string(&CommandFrame {
            command: token.to_string(),
        })?;
        frame.push('\n');
        self.write.write_all(frame.as_bytes()).await?;

        let line = self
            .lines
            .next_line()
            .await?
            .ok_or_else(|| Error::Channel("peer closed awaiting result".to_string()))?;
        Ok(serde_json::from_str(&line)
            .map_err(|_| Error::Channel("malformed result frame".to_string()))?)
    }
}
