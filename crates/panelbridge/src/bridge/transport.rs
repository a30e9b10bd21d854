//! Transports carrying [`Message`]s between the panel and its host.
//!
//! - **ChannelTransport**: in-process pair of bounded queues
//! - **FramedTransport**: length-delimited JSON over any AsyncWrite (stdio, pipes, sockets)
//!
//! Both are one-way: `post` sends, and the opposite direction arrives on an
//! [`Inbound`] receiver handed out when the transport is built.
//! [`TransportAdapter`] fronts whichever one was acquired and degrades to a
//! log sink when there is none.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::{FrameError, JsonCodec};
use super::protocol::Message;
use crate::state::StateStore;

/// Messages arriving from the other side.
pub type Inbound = mpsc::Receiver<Message>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One-way posting primitive.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn post(&self, message: Message) -> Result<(), TransportError>;
}

/// In-process transport backed by a bounded mpsc queue.
pub struct ChannelTransport {
    tx: mpsc::Sender<Message>,
}

impl ChannelTransport {
    /// Two connected ends. Posting on one end delivers to the other end's inbound.
    pub fn pair(capacity: usize) -> ((Arc<Self>, Inbound), (Arc<Self>, Inbound)) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (
            (Arc::new(Self { tx: b_tx }), a_rx),
            (Arc::new(Self { tx: a_tx }), b_rx),
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn post(&self, message: Message) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Transport writing framed JSON to a byte stream.
pub struct FramedTransport<W> {
    writer: Mutex<FramedWrite<W, JsonCodec<Message>>>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> FramedTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(FramedWrite::new(writer, JsonCodec::new())),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> Transport for FramedTransport<W> {
    async fn post(&self, message: Message) -> Result<(), TransportError> {
        let mut w = self.writer.lock().await;
        w.send(message).await?;
        Ok(())
    }
}

/// Spawn a task decoding framed messages from `reader` into an [`Inbound`].
///
/// A frame whose body isn't a valid message is logged and skipped. The task
/// ends on EOF, on a stream or length-prefix error, or when the receiver is
/// dropped.
pub fn spawn_reader<R>(reader: R, capacity: usize) -> Inbound
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(reader_task(
        FramedRead::new(reader, JsonCodec::<Message>::new()),
        tx,
    ));
    rx
}

async fn reader_task<R: AsyncRead + Unpin>(
    mut reader: FramedRead<R, JsonCodec<Message>>,
    tx: mpsc::Sender<Message>,
) {
    loop {
        match reader.next().await {
            Some(Ok(message)) => {
                if tx.send(message).await.is_err() {
                    tracing::trace!("Inbound receiver dropped, stopping reader");
                    break;
                }
            }
            Some(Err(e)) if e.is_recoverable() => {
                tracing::warn!(error = %e, "Skipping malformed inbound frame");
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Inbound reader error");
                break;
            }
            None => {
                tracing::debug!("Inbound stream closed");
                break;
            }
        }
    }
}

/// Uniform posting surface whether or not a host channel exists.
///
/// The host channel is probed once, at construction. Without one the adapter
/// is in fallback mode: posts go to the log and state lives in a local
/// [`StateStore`].
pub struct TransportAdapter {
    host: Option<Arc<dyn Transport>>,
    state: StateStore,
}

impl TransportAdapter {
    /// Probe for a host channel and remember the outcome for the adapter's lifetime.
    pub fn acquire<F>(probe: F, state: StateStore) -> Self
    where
        F: FnOnce() -> Option<Arc<dyn Transport>>,
    {
        match probe() {
            Some(host) => {
                tracing::debug!("Host channel acquired");
                Self {
                    host: Some(host),
                    state,
                }
            }
            None => Self::detached(state),
        }
    }

    pub fn connected(host: Arc<dyn Transport>) -> Self {
        Self {
            host: Some(host),
            state: StateStore::in_memory(),
        }
    }

    pub fn detached(state: StateStore) -> Self {
        tracing::info!("No host channel, running in fallback mode");
        Self { host: None, state }
    }

    pub fn is_connected(&self) -> bool {
        self.host.is_some()
    }

    /// Local store backing state reads and writes in fallback mode.
    pub fn state_store(&self) -> &StateStore {
        &self.state
    }
}

#[async_trait]
impl Transport for TransportAdapter {
    async fn post(&self, message: Message) -> Result<(), TransportError> {
        match &self.host {
            Some(host) => host.post(message).await,
            None => {
                let json = serde_json::to_string(&message)?;
                tracing::info!(
                    target: "panelbridge::fallback",
                    payload = %json,
                    "Posted without host channel"
                );
                Ok(())
            }
        }
    }
}
