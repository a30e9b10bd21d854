//! Command dispatch on the receiving side of the bridge.
//!
//! Handlers are registered by command name on a [`DispatcherBuilder`]; the
//! built [`Dispatcher`] is immutable and shared between dispatch tasks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::bridge::protocol::{Command, Message, decode_args};
use crate::bridge::transport::Transport;
use crate::error::{BridgeError, HandlerError};

pub type HandlerFuture = BoxFuture<'static, Result<Value, HandlerError>>;

type BoxedHandler = Arc<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<String, BoxedHandler>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an untyped handler receiving the raw positional arguments.
    ///
    /// Registering a name twice replaces the earlier handler.
    pub fn register<F, Fut>(mut self, command: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let command = command.into();
        let handler: BoxedHandler = Arc::new(move |args| handler(args).boxed());
        if self.handlers.insert(command.clone(), handler).is_some() {
            tracing::debug!(%command, "Replacing previously registered handler");
        }
        self
    }

    /// Register a handler for a typed [`Command`].
    ///
    /// Arguments that don't decode into `C` fail the call as a handler error.
    pub fn handle<C, F, Fut>(self, handler: F) -> Self
    where
        C: Command,
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C::Output, HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(C::NAME, move |args| {
            let handler = Arc::clone(&handler);
            async move {
                let request: C = decode_args(args).map_err(|e| {
                    HandlerError::new(format!("invalid arguments for {}: {e}", C::NAME))
                })?;
                let output = handler(request).await?;
                Ok::<_, HandlerError>(serde_json::to_value(output)?)
            }
        })
    }

    pub fn build(self) -> Dispatcher {
        tracing::debug!(commands = self.handlers.len(), "Dispatcher built");
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

pub struct Dispatcher {
    handlers: HashMap<String, BoxedHandler>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the handler for `message` and, if it carries a callback token,
    /// post the result back over `transport`.
    ///
    /// An unknown command or a failing handler posts nothing.
    pub async fn dispatch(
        &self,
        message: Message,
        transport: &dyn Transport,
    ) -> Result<(), BridgeError> {
        let reply_to = message.reply_token().map(str::to_string);
        let Message { command, data, .. } = message;

        let handler = self
            .handlers
            .get(&command)
            .ok_or_else(|| BridgeError::UnknownCommand(command.clone()))?;

        tracing::trace!(%command, args = data.len(), "Dispatching");
        let result = handler(data).await.map_err(|e| BridgeError::Handler {
            command: command.clone(),
            message: e.to_string(),
        })?;

        match reply_to {
            Some(token) => {
                tracing::trace!(%command, %token, "Posting response");
                transport.post(Message::response(token, result)).await?;
            }
            None => tracing::trace!(%command, "No callback, result discarded"),
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bridge::protocol::TokenMinter;
    use crate::bridge::transport::TransportError;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    /// Transport that records everything posted to it.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) sent: StdMutex<Vec<Message>>,
    }

    impl RecordingTransport {
        pub(crate) fn take(&self) -> Vec<Message> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn post(&self, message: Message) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Add(i64, i64);

    impl Command for Add {
        const NAME: &'static str = "add";
        const ARITY: usize = 2;
        type Output = i64;
    }

    fn echo_args() -> Dispatcher {
        Dispatcher::builder()
            .register("echo", |args: Vec<Value>| async move {
                Ok::<_, HandlerError>(Value::Array(args))
            })
            .build()
    }

    #[tokio::test]
    async fn handler_receives_args_and_result_is_posted_to_callback() {
        let transport = RecordingTransport::default();
        let args = vec![json!("a"), json!(2), json!({"k": [true]})];

        echo_args()
            .dispatch(
                Message {
                    command: "echo".into(),
                    data: args.clone(),
                    callback: Some("__cb_9".into()),
                },
                &transport,
            )
            .await
            .unwrap();

        assert_eq!(
            transport.take(),
            vec![Message::response("__cb_9", Value::Array(args))]
        );
    }

    #[tokio::test]
    async fn unknown_command_errors_and_posts_nothing() {
        let transport = RecordingTransport::default();

        let err = echo_args()
            .dispatch(
                Message::call("missing", vec![], &TokenMinter::new().mint()),
                &transport,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::UnknownCommand(ref name) if name == "missing"));
        assert!(transport.take().is_empty());
    }

    #[tokio::test]
    async fn request_without_callback_gets_no_response() {
        let transport = RecordingTransport::default();

        echo_args()
            .dispatch(Message::request("echo", vec![json!(1)]), &transport)
            .await
            .unwrap();

        assert!(transport.take().is_empty());
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let dispatcher = Dispatcher::builder()
            .register("hello", |_| async { Ok::<_, HandlerError>(json!("first")) })
            .register("hello", |_| async { Ok::<_, HandlerError>(json!("second")) })
            .build();
        let transport = RecordingTransport::default();

        let mut msg = Message::request("hello", vec![]);
        msg.callback = Some("__cb_1".into());
        dispatcher.dispatch(msg, &transport).await.unwrap();

        assert_eq!(dispatcher.commands(), vec!["hello"]);
        assert_eq!(transport.take()[0].data, vec![json!("second")]);
    }

    #[tokio::test]
    async fn failing_handler_posts_nothing() {
        let dispatcher = Dispatcher::builder()
            .register("boom", |_| async {
                Err::<Value, _>(HandlerError::new("disk full"))
            })
            .build();
        let transport = RecordingTransport::default();

        let mut msg = Message::request("boom", vec![]);
        msg.callback = Some("__cb_2".into());
        let err = dispatcher.dispatch(msg, &transport).await.unwrap_err();

        assert!(matches!(err, BridgeError::Handler { ref message, .. } if message == "disk full"));
        assert!(transport.take().is_empty());
    }

    #[tokio::test]
    async fn typed_handler_decodes_arguments() {
        let dispatcher = Dispatcher::builder()
            .handle(|Add(a, b): Add| async move { Ok::<_, HandlerError>(a + b) })
            .build();
        let transport = RecordingTransport::default();
        assert!(dispatcher.contains("add"));

        let mut msg = Message::request("add", vec![json!(2), json!(40)]);
        msg.callback = Some("__cb_3".into());
        dispatcher.dispatch(msg, &transport).await.unwrap();
        assert_eq!(transport.take()[0].data, vec![json!(42)]);

        let mut bad = Message::request("add", vec![json!("two")]);
        bad.callback = Some("__cb_4".into());
        let err = dispatcher.dispatch(bad, &transport).await.unwrap_err();
        assert!(matches!(err, BridgeError::Handler { .. }));
    }
}
