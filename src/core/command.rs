//! Command link between callers and the modem worker
//!
//! Callers submit a [`CommandRequest`] and block until the matching
//! [`CommandResponse`] comes back. Requests travel over one bounded queue
//! (a full queue blocks the caller); each request carries its own
//! single-slot reply channel, so a response can only ever reach the caller
//! that asked for it.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest command text accepted, in bytes
pub const COMMAND_CAPACITY: usize = 128;

/// Default request queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 2;

/// Command request errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Text longer than [`COMMAND_CAPACITY`]
    #[error("Command too long: {len} bytes (max {max})")]
    TooLong {
        /// Actual length
        len: usize,
        /// Allowed length
        max: usize,
    },

    /// Text carries its own line terminator
    #[error("Command must not contain CR or LF")]
    LineTerminator,
}

/// What the worker should do with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandOpcode {
    /// Plain AT transaction
    At,
    /// Dial into data mode; expects a connect marker
    EnterLinkMode,
    /// Escape back to command mode
    ExitLinkMode,
}

impl fmt::Display for CommandOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At => write!(f, "at"),
            Self::EnterLinkMode => write!(f, "enter-link"),
            Self::ExitLinkMode => write!(f, "exit-link"),
        }
    }
}

/// A single command for the worker. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    opcode: CommandOpcode,
    text: String,
    timeout: u32,
}

impl CommandRequest {
    /// Build a request. `timeout` is a poll budget, not wall-clock time.
    pub fn new(
        opcode: CommandOpcode,
        text: impl Into<String>,
        timeout: u32,
    ) -> Result<Self, CommandError> {
        let text = text.into();
        if text.len() > COMMAND_CAPACITY {
            return Err(CommandError::TooLong {
                len: text.len(),
                max: COMMAND_CAPACITY,
            });
        }
        if text.contains(['\r', '\n']) {
            return Err(CommandError::LineTerminator);
        }
        Ok(Self {
            opcode,
            text,
            timeout,
        })
    }

    /// Plain AT command
    pub fn at(text: impl Into<String>, timeout: u32) -> Result<Self, CommandError> {
        Self::new(CommandOpcode::At, text, timeout)
    }

    /// Opcode
    pub fn opcode(&self) -> CommandOpcode {
        self.opcode
    }

    /// Command text, without line terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Poll budget
    pub fn timeout(&self) -> u32 {
        self.timeout
    }
}

/// Result of one request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandResponse {
    /// Whether the modem acknowledged the command
    pub ok: bool,
    /// Raw response bytes as read from the link
    pub text: Bytes,
}

impl CommandResponse {
    /// Build a response
    pub fn new(ok: bool, text: Bytes) -> Self {
        Self { ok, text }
    }

    /// Failed response with no text
    pub fn failed() -> Self {
        Self::default()
    }

    /// Response text, lossily decoded
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.text).into_owned()
    }
}

/// A request plus its reply slot, as seen by the worker
pub(crate) struct Transaction {
    pub(crate) request: CommandRequest,
    reply: Sender<CommandResponse>,
}

impl Transaction {
    /// Deliver the response. A caller that went away is not an error.
    pub(crate) fn respond(self, response: CommandResponse) {
        if self.reply.send(response).is_err() {
            tracing::debug!(opcode = %self.request.opcode, "caller dropped before response");
        }
    }
}

/// Caller side of the command link
#[derive(Debug, Clone)]
pub struct CommandLink {
    tx: Sender<Transaction>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl CommandLink {
    /// Create a link and the worker's receiving end
    pub(crate) fn channel(depth: usize) -> (Self, Receiver<Transaction>) {
        let (tx, rx) = bounded(depth.max(1));
        (Self { tx }, rx)
    }

    /// Submit a request and wait for its response.
    ///
    /// Blocks while the request queue is full, then until the worker has
    /// serviced the request. If the worker is gone the response is a
    /// failure.
    pub fn submit(&self, request: CommandRequest) -> CommandResponse {
        let (reply, reply_rx) = bounded(1);
        let opcode = request.opcode;

        if self.tx.send(Transaction { request, reply }).is_err() {
            tracing::warn!(%opcode, "modem worker not running, command dropped");
            return CommandResponse::failed();
        }

        match reply_rx.recv() {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!(%opcode, "modem worker exited before responding");
                CommandResponse::failed()
            }
        }
    }
}
