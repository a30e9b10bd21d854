//! Length-prefixed JSON frames for stream transports.
//!
//! Each message is a 4-byte big-endian body length followed by the JSON body.
//! The length prefix keeps the stream in sync even when a body fails to
//! parse, so a malformed message costs only its own frame.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Upper bound on a single frame. Panel state blobs are small; anything near
/// this is a bug on the sending side.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Stream failure or a broken length prefix. The stream can't be resynced.
    #[error("frame i/o error: {0}")]
    Io(#[from] io::Error),

    /// A complete frame whose body isn't a valid message. Later frames are intact.
    #[error("{len} byte frame is not a valid message: {source}")]
    Malformed {
        len: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{len} byte message exceeds the {max} byte frame limit")]
    TooLarge { len: usize, max: usize },

    #[error("message could not be serialized: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl FrameError {
    /// Whether the reader can keep going with the next frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

pub struct JsonCodec<T> {
    frames: LengthDelimitedCodec,
    max_frame_length: usize,
    _message: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max_frame_length)
                .new_codec(),
            max_frame_length,
            _message: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, FrameError> {
        let Some(body) = self.frames.decode(src)? else {
            return Ok(None);
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|source| FrameError::Malformed {
                len: body.len(),
                source,
            })
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), FrameError> {
        let body = serde_json::to_vec(&item).map_err(FrameError::Serialize)?;
        // Refuse before touching `dst`, so a rejected message leaves no partial frame.
        if body.len() > self.max_frame_length {
            return Err(FrameError::TooLarge {
                len: body.len(),
                max: self.max_frame_length,
            });
        }
        tracing::trace!(frame_bytes = body.len(), "Encoding frame");
        Ok(self.frames.encode(Bytes::from(body), dst)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::Message;
    use serde_json::json;

    #[test]
    fn frame_carries_length_prefix() {
        let mut codec = JsonCodec::<Message>::new();
        let mut buf = BytesMut::new();

        codec
            .encode(Message::response("__cb_0", json!(1)), &mut buf)
            .unwrap();

        let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(body_len, buf.len() - 4);
    }

    #[test]
    fn decodes_consecutive_frames() {
        let mut codec = JsonCodec::<Message>::new();
        let mut buf = BytesMut::new();

        let first = Message::request("hello", vec![json!("hi")]);
        let second = Message::response("__cb_3", json!({"nested": [1, null, ""]}));
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut codec = JsonCodec::<Message>::new();
        let mut full = BytesMut::new();
        codec
            .encode(Message::request("hello", vec![]), &mut full)
            .unwrap();

        let mut partial = full.split_to(full.len() - 2);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);

        partial.extend_from_slice(&full);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn malformed_body_skips_only_its_frame() {
        let mut codec = JsonCodec::<Message>::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(b"{{{");
        let next = Message::request("hello", vec![json!("still here")]);
        codec.encode(next.clone(), &mut buf).unwrap();

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::Malformed { len: 3, .. }));
        assert!(err.is_recoverable());
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(next));
    }

    #[test]
    fn oversized_message_leaves_buffer_untouched() {
        let mut codec = JsonCodec::<Message>::with_max_frame_length(8);
        let mut buf = BytesMut::new();

        let err = codec
            .encode(Message::request("a-long-command-name", vec![]), &mut buf)
            .unwrap_err();

        assert!(matches!(err, FrameError::TooLarge { max: 8, .. }));
        assert!(!err.is_recoverable());
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_incoming_frame_is_fatal() {
        let mut codec = JsonCodec::<Message>::with_max_frame_length(8);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&64u32.to_be_bytes());
        buf.extend_from_slice(&[b' '; 64]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }
}
