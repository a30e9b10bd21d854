//! Wire layer of the panel-host bridge.
//!
//! - **protocol**: Message shape, correlation tokens, typed command trait
//! - **codec**: Length-delimited JSON framing for AsyncRead/AsyncWrite
//! - **transport**: One-way posting primitives and the fallback-aware adapter

pub mod codec;
pub mod protocol;
pub mod transport;
