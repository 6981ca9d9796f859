//! [`Transmission`] – the per-connection framing state machine.
//!
//! While idle, every chunk read from the socket is parsed as a command
//! frame.  A payload-bearing command switches the machine to receiving: from
//! then on bytes are only appended, never parsed, until the buffer ends with
//! [`SENTINEL`].  TCP may split the stream anywhere, including inside the
//! sentinel, so the check always runs over the whole accumulated buffer.

use tracing::{debug, warn};

use crate::protocol::{PAYLOAD_OPEN, ParseOutcome, ParsedCommand, SENTINEL, parse_command};

/// Default cap on a single payload.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

pub const CORRUPTED_REPLY: &[u8] = b"Transmission corrupted: payload must start with '{'.";

/// What the session should do after a chunk was fed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The chunk was not a valid frame; send the diagnostic.
    Reject(&'static [u8]),
    /// A command without payload: run it now.
    Dispatch(ParsedCommand),
    /// A payload command was accepted and its payload is being collected.
    Begin(ParsedCommand),
    /// More payload bytes were collected.
    Receiving,
    /// The payload is complete (sentinel stripped).
    Complete {
        command: ParsedCommand,
        payload: Vec<u8>,
    },
    /// A payload command arrived without the opening `{`.
    Corrupted,
    /// The payload grew past the configured cap and was dropped.
    Overflow { limit: usize },
}

/// Framing state of one connection.
#[derive(Debug)]
pub struct Transmission {
    active: bool,
    buffer: Vec<u8>,
    pending: Option<ParsedCommand>,
    max_payload_bytes: usize,
}

impl Default for Transmission {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_BYTES)
    }
}

impl Transmission {
    pub fn new(max_payload_bytes: usize) -> Self {
        Self {
            active: false,
            buffer: Vec::new(),
            pending: None,
            max_payload_bytes,
        }
    }

    /// `true` while a payload is being collected.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Bytes collected so far for the current payload.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial payload and return to idle.
    pub fn reset(&mut self) {
        if self.active {
            debug!(dropped = self.buffer.len(), "transmission reset");
        }
        self.active = false;
        self.buffer = Vec::new();
        self.pending = None;
    }

    /// Feed one chunk read from the connection.
    pub fn feed(&mut self, chunk: &[u8]) -> Step {
        if self.active {
            return self.append(chunk);
        }

        let command = match parse_command(chunk) {
            ParseOutcome::Parsed(command) => command,
            outcome => {
                // Every non-parsed outcome carries a diagnostic.
                return Step::Reject(outcome.diagnostic().unwrap_or_default());
            }
        };

        if !command.kind.has_payload() {
            return Step::Dispatch(command);
        }

        let Some(start) = chunk.iter().position(|&b| b == PAYLOAD_OPEN) else {
            warn!(command = command.kind.name(), "payload does not start with '{{'");
            return Step::Corrupted;
        };

        self.active = true;
        self.pending = Some(command.clone());
        match self.append(&chunk[start..]) {
            Step::Receiving => Step::Begin(command),
            step => step,
        }
    }

    fn append(&mut self, chunk: &[u8]) -> Step {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.ends_with(SENTINEL) {
            let mut payload = std::mem::take(&mut self.buffer);
            payload.truncate(payload.len() - SENTINEL.len());
            let command = self.pending.take();
            self.reset();

            if payload.len() > self.max_payload_bytes {
                return Step::Overflow {
                    limit: self.max_payload_bytes,
                };
            }
            return match command {
                Some(command) => Step::Complete { command, payload },
                None => Step::Corrupted,
            };
        }

        if self.buffer.len() > self.max_payload_bytes + SENTINEL.len() {
            warn!(limit = self.max_payload_bytes, "payload too large, dropping");
            self.reset();
            return Step::Overflow {
                limit: self.max_payload_bytes,
            };
        }

        Step::Receiving
    }
}
