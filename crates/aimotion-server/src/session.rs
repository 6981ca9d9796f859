//! [`Session`] – the read/reply loop for one connected client.
//!
//! Reads are strictly sequential: a chunk is fed to the [`Transmission`]
//! and fully handled (including any drone command it triggers) before the
//! next read is issued.

use std::time::Duration;

use aimotion_types::AimError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::dispatch::{Command, Dispatcher};
use crate::protocol::ParsedCommand;
use crate::transmission::{CORRUPTED_REPLY, Step, Transmission};

/// Size of the per-session read buffer.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default time allowed between two reads of an unfinished payload.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a client may stay silent between commands before the
/// connection is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

pub const TIMEOUT_REPLY: &[u8] = b"Transmission aborted: timed out waiting for _EOF.";

/// One client connection.
pub struct Session<S> {
    stream: S,
    peer: String,
    transmission: Transmission,
    dispatcher: Dispatcher,
    receive_timeout: Duration,
    idle_timeout: Duration,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: impl Into<String>, dispatcher: Dispatcher) -> Self {
        Self {
            stream,
            peer: peer.into(),
            transmission: Transmission::default(),
            dispatcher,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Override the payload receive timeout (builder-style).
    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    /// Override the idle timeout (builder-style).
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Override the payload size cap (builder-style).
    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.transmission = Transmission::new(max_payload_bytes);
        self
    }

    /// Serve the client until it disconnects or stays silent for longer
    /// than the idle timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Transport`] when reading from or writing to the
    /// client fails.  Command failures are replied to and never end the
    /// session.
    pub async fn run(mut self) -> Result<(), AimError> {
        info!(peer = %self.peer, "session started");
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = if self.transmission.is_active() {
                match timeout(self.receive_timeout, self.stream.read(&mut buf)).await {
                    Ok(read) => read,
                    Err(_) => {
                        warn!(
                            peer = %self.peer,
                            buffered = self.transmission.buffered(),
                            "payload receive timed out"
                        );
                        self.transmission.reset();
                        self.reply(TIMEOUT_REPLY).await?;
                        continue;
                    }
                }
            } else {
                match timeout(self.idle_timeout, self.stream.read(&mut buf)).await {
                    Ok(read) => read,
                    Err(_) => {
                        warn!(
                            peer = %self.peer,
                            idle_secs = self.idle_timeout.as_secs(),
                            "client idle, closing session"
                        );
                        return Ok(());
                    }
                }
            };

            let n = match read {
                Ok(0) => {
                    self.transmission.reset();
                    info!(peer = %self.peer, "session closed by client");
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) => {
                    self.transmission.reset();
                    return Err(AimError::Transport(format!("read from {}: {e}", self.peer)));
                }
            };

            let was_receiving = self.transmission.is_active();
            match self.transmission.feed(&buf[..n]) {
                Step::Reject(reply) => {
                    debug!(peer = %self.peer, reply = %String::from_utf8_lossy(reply), "frame rejected");
                    self.reply(reply).await?;
                }
                Step::Dispatch(parsed) => {
                    self.acknowledge(&parsed).await?;
                    self.run_command(parsed, None).await?;
                }
                Step::Begin(parsed) => {
                    self.acknowledge(&parsed).await?;
                }
                Step::Receiving => {}
                Step::Complete { command, payload } => {
                    if !was_receiving {
                        self.acknowledge(&command).await?;
                    }
                    debug!(peer = %self.peer, bytes = payload.len(), "payload complete");
                    self.run_command(command, Some(payload)).await?;
                }
                Step::Corrupted => {
                    self.reply(CORRUPTED_REPLY).await?;
                }
                Step::Overflow { limit } => {
                    let reply = format!("Transmission aborted: payload exceeds {limit} bytes.");
                    self.reply(reply.as_bytes()).await?;
                }
            }
        }
    }

    async fn acknowledge(&mut self, parsed: &ParsedCommand) -> Result<(), AimError> {
        let reply = format!("Command received: {}", parsed.kind.name());
        self.reply(reply.as_bytes()).await
    }

    async fn run_command(
        &mut self,
        parsed: ParsedCommand,
        payload: Option<Vec<u8>>,
    ) -> Result<(), AimError> {
        let name = parsed.kind.name();
        let outcome = match Command::from_parsed(parsed, payload) {
            Ok(command) => self.dispatcher.execute(command).await,
            Err(e) => Err(e),
        };
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                warn!(peer = %self.peer, command = name, error = %e, "command failed");
                e.to_string()
            }
        };
        self.reply(reply.as_bytes()).await
    }

    async fn reply(&mut self, bytes: &[u8]) -> Result<(), AimError> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| AimError::Transport(format!("write to {}: {e}", self.peer)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| AimError::Transport(format!("flush to {}: {e}", self.peer)))
    }
}
