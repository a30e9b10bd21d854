//! Awaitable calls on top of the one-way transport.
//!
//! Each call gets a fresh token and a pending waiter. The endpoint's routing
//! loop hands every inbound message to [`PendingCalls::settle`] first; a
//! message whose `command` equals a pending token completes that call.
//! Matching is by token only, so concurrent calls settle in whatever order
//! their responses arrive.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::bridge::protocol::{CallToken, Command, Message, TokenMinter, encode_args};
use crate::bridge::transport::{Transport, TransportAdapter};
use crate::commands::{GetState, SetState};
use crate::error::BridgeError;
use crate::state::StateStore;

/// Calls waiting for a response, keyed by token.
#[derive(Debug, Default)]
pub struct PendingCalls {
    waiters: DashMap<CallToken, oneshot::Sender<Value>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, token: CallToken) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(token, tx);
        rx
    }

    /// Complete the call whose token equals `message.command`.
    ///
    /// Returns the message back untouched when it isn't a response to a
    /// pending call, so the caller can treat it as a request.
    pub fn settle(&self, message: Message) -> Option<Message> {
        let Some((token, tx)) = self.waiters.remove(message.command.as_str()) else {
            return Some(message);
        };
        tracing::trace!(%token, "Response matched pending call");
        if tx.send(message.into_result()).is_err() {
            tracing::trace!(%token, "Caller stopped waiting before the response arrived");
        }
        None
    }

    /// Drop the waiter for `token`. Returns whether it was still pending.
    pub fn cancel(&self, token: &CallToken) -> bool {
        self.waiters.remove(token).is_some()
    }

    /// Drop every waiter; their callers see [`BridgeError::ChannelClosed`].
    pub fn fail_all(&self) -> usize {
        let count = self.waiters.len();
        self.waiters.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

pub struct Correlator {
    adapter: Arc<TransportAdapter>,
    pending: Arc<PendingCalls>,
    minter: TokenMinter,
    timeout: Option<Duration>,
}

impl Correlator {
    pub fn new(
        adapter: Arc<TransportAdapter>,
        pending: Arc<PendingCalls>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            adapter,
            pending,
            minter: TokenMinter::new(),
            timeout,
        }
    }

    /// Correlator with no host channel: every call returns its default.
    pub fn detached(state: StateStore) -> Self {
        Self::new(
            Arc::new(TransportAdapter::detached(state)),
            Arc::new(PendingCalls::new()),
            None,
        )
    }

    pub fn is_connected(&self) -> bool {
        self.adapter.is_connected()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send `command` and wait for the remote handler's result.
    ///
    /// Without a host channel this returns `default` immediately and writes nothing.
    pub async fn invoke(
        &self,
        command: &str,
        args: Vec<Value>,
        default: Value,
    ) -> Result<Value, BridgeError> {
        if !self.adapter.is_connected() {
            tracing::trace!(%command, "No host channel, returning default");
            return Ok(default);
        }

        let token = self.minter.mint();
        // Register before posting: the response may arrive before we await.
        let rx = self.pending.register(token.clone());

        tracing::trace!(%command, %token, "Posting call");
        if let Err(e) = self
            .adapter
            .post(Message::call(command, args, &token))
            .await
        {
            self.pending.cancel(&token);
            return Err(e.into());
        }

        let settled = match self.timeout {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(settled) => settled,
                Err(_) => {
                    self.pending.cancel(&token);
                    tracing::warn!(%command, %token, timeout = ?limit, "Call timed out");
                    return Err(BridgeError::Timeout {
                        command: command.to_string(),
                        after: limit,
                    });
                }
            },
        };

        settled.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Typed [`invoke`](Self::invoke).
    pub async fn call<C: Command>(
        &self,
        command: C,
        default: C::Output,
    ) -> Result<C::Output, BridgeError> {
        if !self.adapter.is_connected() {
            return Ok(default);
        }
        let args = encode_args(&command).map_err(BridgeError::Encode)?;
        let result = self.invoke(C::NAME, args, Value::Null).await?;
        serde_json::from_value(result).map_err(|e| BridgeError::decode(C::NAME, e))
    }

    /// Read a state value from the host, or from the local store in fallback mode.
    pub async fn get_state<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, BridgeError> {
        if !self.adapter.is_connected() {
            return Ok(self.adapter.state_store().get(key)?);
        }
        let value = self.call(GetState(key.to_string()), Value::Null).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| BridgeError::decode(GetState::NAME, e))
    }

    /// Write a state value to the host, or to the local store in fallback mode.
    pub async fn set_state<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), BridgeError> {
        if !self.adapter.is_connected() {
            return Ok(self.adapter.state_store().set(key, value)?);
        }
        let value = serde_json::to_value(value).map_err(BridgeError::Encode)?;
        self.call(SetState(key.to_string(), value), ()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::transport::{ChannelTransport, Inbound};
    use crate::commands::Hello;
    use serde_json::json;

    fn connected(timeout: Option<Duration>) -> (Arc<Correlator>, Arc<PendingCalls>, Inbound) {
        let ((ours, _ours_in), (_, remote_in)) = ChannelTransport::pair(8);
        let pending = Arc::new(PendingCalls::new());
        let correlator = Correlator::new(
            Arc::new(TransportAdapter::connected(ours)),
            Arc::clone(&pending),
            timeout,
        );
        (Arc::new(correlator), pending, remote_in)
    }

    #[tokio::test]
    async fn detached_returns_default_without_round_trip() {
        let correlator = Correlator::detached(StateStore::in_memory());

        let value = correlator
            .invoke("getState", vec![json!("theme")], json!("light"))
            .await
            .unwrap();

        assert_eq!(value, json!("light"));
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.is_connected());
    }

    #[tokio::test]
    async fn detached_typed_call_returns_default() {
        let correlator = Correlator::detached(StateStore::in_memory());
        let opened = correlator
            .call(crate::commands::OpenFolder("/x".into()), false)
            .await
            .unwrap();
        assert!(!opened);
    }

    #[tokio::test]
    async fn call_posts_request_and_resolves_on_matching_response() {
        let (correlator, pending, mut remote_in) = connected(None);

        let call = tokio::spawn({
            let correlator = Arc::clone(&correlator);
            async move {
                correlator
                    .invoke("getState", vec![json!("theme")], Value::Null)
                    .await
            }
        });

        let request = remote_in.recv().await.unwrap();
        assert_eq!(request.command, "getState");
        assert_eq!(request.data, vec![json!("theme")]);
        let token = request.callback.clone().unwrap();

        assert!(pending.settle(Message::response(token, json!("dark"))).is_none());
        assert_eq!(call.await.unwrap().unwrap(), json!("dark"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn unrelated_message_is_returned_for_dispatch() {
        let pending = PendingCalls::new();
        let _rx = pending.register(TokenMinter::new().mint());

        let request = Message::request("hello", vec![json!("hi")]);
        assert_eq!(pending.settle(request.clone()), Some(request));
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn settling_one_token_leaves_others_pending() {
        let (correlator, pending, mut remote_in) = connected(None);

        let first = tokio::spawn({
            let c = Arc::clone(&correlator);
            async move { c.invoke("a", vec![], Value::Null).await }
        });
        let a = remote_in.recv().await.unwrap().callback.unwrap();

        let second = tokio::spawn({
            let c = Arc::clone(&correlator);
            async move { c.invoke("b", vec![], Value::Null).await }
        });
        let b = remote_in.recv().await.unwrap().callback.unwrap();
        assert_ne!(a, b);

        pending.settle(Message::response(b, json!(2)));
        assert_eq!(second.await.unwrap().unwrap(), json!(2));
        assert!(!first.is_finished());
        assert_eq!(pending.len(), 1);

        pending.settle(Message::response(a, json!(1)));
        assert_eq!(first.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn timeout_fails_call_and_drops_waiter() {
        let (correlator, _pending, _remote_in) = connected(Some(Duration::from_millis(20)));

        let err = correlator
            .invoke("hello", vec![json!("anyone?")], Value::Null)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Timeout { ref command, .. } if command == "hello"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn fail_all_reports_channel_closed() {
        let (correlator, pending, mut remote_in) = connected(None);

        let call = tokio::spawn({
            let c = Arc::clone(&correlator);
            async move { c.call(Hello("hi".into()), ()).await }
        });
        remote_in.recv().await.unwrap();

        assert_eq!(pending.fail_all(), 1);
        assert!(matches!(
            call.await.unwrap(),
            Err(BridgeError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn failed_post_drops_waiter() {
        let ((ours, _ours_in), (_, remote_in)) = ChannelTransport::pair(1);
        drop(remote_in);
        let correlator = Correlator::new(
            Arc::new(TransportAdapter::connected(ours)),
            Arc::new(PendingCalls::new()),
            None,
        );

        let err = correlator
            .invoke("hello", vec![], Value::Null)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Transport(_)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn fallback_state_uses_local_store() {
        let correlator = Correlator::detached(StateStore::in_memory());

        assert_eq!(correlator.get_state::<String>("theme").await.unwrap(), None);
        correlator.set_state("theme", "dark").await.unwrap();
        assert_eq!(
            correlator.get_state::<String>("theme").await.unwrap().as_deref(),
            Some("dark")
        );
    }
}
