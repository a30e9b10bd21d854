//! One side of the bridge: routes inbound messages to pending calls or to the
//! local dispatcher.
//!
//! Flow per inbound message:
//! 1. `command` matches a pending token -> settle that call
//! 2. otherwise, with a dispatcher -> run its handler on a separate task
//! 3. otherwise -> log and drop
//!
//! When the inbound channel closes, every pending call fails with
//! `ChannelClosed` and the loop waits for in-flight handlers before exiting.

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};

use crate::bridge::transport::{Inbound, TransportAdapter};
use crate::config::BridgeConfig;
use crate::correlator::{Correlator, PendingCalls};
use crate::dispatcher::Dispatcher;

pub struct Endpoint {
    correlator: Arc<Correlator>,
    task: JoinHandle<()>,
}

impl Endpoint {
    /// Start routing `inbound`. Must be called inside a tokio runtime.
    pub fn spawn(
        adapter: Arc<TransportAdapter>,
        inbound: Inbound,
        dispatcher: Option<Dispatcher>,
        config: &BridgeConfig,
    ) -> Self {
        let pending = Arc::new(PendingCalls::new());
        let correlator = Arc::new(Correlator::new(
            Arc::clone(&adapter),
            Arc::clone(&pending),
            config.call_timeout,
        ));

        tracing::debug!(
            connected = adapter.is_connected(),
            serves = dispatcher.is_some(),
            timeout = ?config.call_timeout,
            "Starting endpoint"
        );
        let task = tokio::spawn(route_inbound(
            inbound,
            pending,
            dispatcher.map(Arc::new),
            adapter,
        ));

        Self { correlator, task }
    }

    pub fn correlator(&self) -> Arc<Correlator> {
        Arc::clone(&self.correlator)
    }

    /// Wait for the inbound channel to close and in-flight handlers to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Endpoint routing task failed");
        }
    }
}

async fn route_inbound(
    mut inbound: Inbound,
    pending: Arc<PendingCalls>,
    dispatcher: Option<Arc<Dispatcher>>,
    adapter: Arc<TransportAdapter>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            message = inbound.recv() => {
                let Some(message) = message else {
                    break;
                };
                let Some(request) = pending.settle(message) else {
                    continue;
                };
                let Some(dispatcher) = &dispatcher else {
                    tracing::warn!(
                        command = %request.command,
                        "No dispatcher on this side, dropping message"
                    );
                    continue;
                };

                let dispatcher = Arc::clone(dispatcher);
                let adapter = Arc::clone(&adapter);
                in_flight.spawn(async move {
                    let command = request.command.clone();
                    if let Err(e) = dispatcher.dispatch(request, adapter.as_ref()).await {
                        tracing::warn!(%command, error = %e, "Dispatch failed");
                    }
                });
            }

            Some(done) = in_flight.join_next() => {
                if let Err(e) = done {
                    tracing::error!(error = %e, "Handler task panicked");
                }
            }
        }
    }

    let failed = pending.fail_all();
    tracing::debug!(failed, in_flight = in_flight.len(), "Inbound channel closed");

    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            tracing::error!(error = %e, "Handler task panicked");
        }
    }
}
