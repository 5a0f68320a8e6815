//! Control messages posted by the page to the worker.

use bytes::Bytes;
use serde::Deserialize;
use tracing::trace;

/// A message event.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: Bytes,
    /// Client that posted the message.
    pub source: Option<String>,
}

impl MessageEvent {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            source: None,
        }
    }
}

/// Commands the worker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
}

impl ControlMessage {
    /// Parse a message payload. Unknown or malformed messages yield `None`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        match serde_json::from_slice(data) {
            Ok(message) => Some(message),
            Err(e) => {
                trace!(error = %e, "Ignoring unrecognized message");
                None
            }
        }
    }
}

/// What the worker did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Ignored,
    /// `SKIP_WAITING` received; `activated` tells whether activation ran now
    /// or was deferred until install finishes.
    SkipWaiting { activated: bool },
}
