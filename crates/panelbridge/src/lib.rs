//! panelbridge: request/response bridge between an editor panel and its host.
//!
//! The channel between the two sides is one-way and unordered. The
//! [`Correlator`] turns it into awaited calls by tagging each request with a
//! callback token; the [`Dispatcher`] on the other side runs the named handler
//! and posts the result back under that token. An [`Endpoint`] ties both to an
//! inbound stream.

pub mod bridge;
pub mod commands;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod state;

pub use bridge::protocol::{CallToken, Command, Message};
pub use bridge::transport::{
    ChannelTransport, FramedTransport, Inbound, Transport, TransportAdapter, TransportError,
    spawn_reader,
};
pub use commands::{HostCommand, HostHandler, host_dispatcher};
pub use config::BridgeConfig;
pub use correlator::{Correlator, PendingCalls};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use endpoint::Endpoint;
pub use error::{BridgeError, HandlerError};
pub use state::{StateError, StateStore};
