use std::time::Duration;

use thiserror::Error;

use crate::bridge::transport::TransportError;
use crate::state::StateError;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// No handler is registered under this name - the two sides disagree on
    /// the protocol version.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("handler for '{command}' failed: {message}")]
    Handler { command: String, message: String },

    #[error("call to '{command}' timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    /// The inbound side closed while the call was waiting.
    #[error("channel closed before a response arrived")]
    ChannelClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to encode arguments: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode '{command}': {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

impl BridgeError {
    pub fn decode(command: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            command: command.into(),
            source,
        }
    }
}

/// Failure reported by a command handler.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

impl From<StateError> for HandlerError {
    fn from(e: StateError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
