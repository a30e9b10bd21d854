//! Wire protocol types for panel-host communication.
//!
//! One message shape travels in both directions:
//! - **Request**: `{command, data, callback?}` - a command name with positional arguments
//! - **Response**: `{command: <token>, data: [result]}` - the request's callback token echoed back
//!
//! Whether an inbound message is a request or a response is decided by the receiver:
//! a message whose `command` equals one of its pending tokens is a response.

use std::borrow::Borrow;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

const TOKEN_PREFIX: &str = "__cb_";

/// Correlation token tying a response to the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallToken(String);

impl CallToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Borrow<str> for CallToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mints correlation tokens from a monotonic counter.
///
/// Tokens from one minter never repeat, so a fresh token can't collide with
/// any call still pending on the same correlator.
#[derive(Debug, Default)]
pub struct TokenMinter {
    next: AtomicU64,
}

impl TokenMinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self) -> CallToken {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        CallToken(format!("{TOKEN_PREFIX}{n}"))
    }
}

/// A message on the panel-host channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Command name for requests, correlation token for responses.
    pub command: String,

    /// Positional arguments, or a single-element result for responses.
    #[serde(default)]
    pub data: Vec<Value>,

    /// Present only on requests that expect a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl Message {
    /// Fire-and-forget request: the receiver runs the handler but never replies.
    pub fn request(command: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            data,
            callback: None,
        }
    }

    /// Request expecting a response tagged with `token`.
    pub fn call(command: impl Into<String>, data: Vec<Value>, token: &CallToken) -> Self {
        Self {
            command: command.into(),
            data,
            callback: Some(token.as_str().to_string()),
        }
    }

    pub fn response(token: impl Into<String>, result: Value) -> Self {
        Self {
            command: token.into(),
            data: vec![result],
            callback: None,
        }
    }

    /// The callback token, if the sender asked for a reply.
    pub fn reply_token(&self) -> Option<&str> {
        self.callback.as_deref().filter(|t| !t.is_empty())
    }

    /// Result carried by a response (`data[0]`, `null` if empty).
    pub fn into_result(self) -> Value {
        self.data.into_iter().next().unwrap_or(Value::Null)
    }
}

/// A typed panel command.
///
/// The implementing struct's fields are the command's positional arguments:
/// unit structs encode as `[]`, newtype structs as `[value]` and tuple structs
/// as `[a, b, ...]`, whatever JSON shape the fields themselves take.
pub trait Command: Serialize + DeserializeOwned + Send + 'static {
    /// Wire name of the command.
    const NAME: &'static str;

    /// Number of positional arguments (fields of the struct).
    const ARITY: usize;

    /// What the remote handler returns.
    type Output: Serialize + DeserializeOwned + Send + 'static;
}

/// Encode a request struct as exactly `C::ARITY` positional arguments.
pub fn encode_args<C: Command>(args: &C) -> Result<Vec<Value>, serde_json::Error> {
    let value = serde_json::to_value(args)?;
    match (C::ARITY, value) {
        (0, _) => Ok(Vec::new()),
        // serde_json writes a newtype as its inner value; keep it whole.
        (1, single) => Ok(vec![single]),
        (arity, Value::Array(items)) if items.len() == arity => Ok(items),
        (arity, other) => Err(serde::ser::Error::custom(format!(
            "{} must serialize as {arity} positional arguments, got {other}",
            C::NAME
        ))),
    }
}

/// Decode exactly `C::ARITY` positional arguments into a request struct.
pub fn decode_args<C: Command>(mut data: Vec<Value>) -> Result<C, serde_json::Error> {
    if data.len() != C::ARITY {
        return Err(serde::de::Error::invalid_length(
            data.len(),
            &format!("{} positional arguments for {}", C::ARITY, C::NAME).as_str(),
        ));
    }
    let value = match C::ARITY {
        0 => Value::Null,
        1 => data.pop().unwrap_or(Value::Null),
        _ => Value::Array(data),
    };
    serde_json::from_value(value)
}
