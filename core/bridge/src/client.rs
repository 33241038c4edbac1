// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::RwLock;
use tether_pubsub::{MessageDispatcher, MessageHandler, MessageQueue, PushEnvelope, SubscriberId};
use tracing::{debug, info, trace};

use crate::config::{ClientConfiguration, ConnectionRequest};
use crate::engine::{NativeEngine, RequestType};
use crate::errors::BridgeError;
use crate::ffi::EntryPoints;
use crate::pending::PendingCall;
use crate::registry::{ClientHandle, ClientRegistry};
use crate::response::Value;
use crate::runtime::get_runtime;

static CLIENT_REGISTRY: OnceLock<ClientRegistry<ClientCore>> = OnceLock::new();

/// Every live client, keyed by its native handle.
pub fn client_registry() -> &'static ClientRegistry<ClientCore> {
    CLIENT_REGISTRY.get_or_init(ClientRegistry::new)
}

/// State of a client shared with the push path.
#[derive(Debug)]
pub struct ClientCore {
    handle: ClientHandle,
    engine: Arc<dyn NativeEngine>,
    closed: AtomicBool,
    // held shared while a command is issued, exclusively while closing
    issuing: RwLock<()>,
    dispatcher: MessageDispatcher,
    default_subscriber: Option<(SubscriberId, Arc<MessageHandler>)>,
    request_timeout: Option<Duration>,
}

impl ClientCore {
    pub fn handle(&self) -> ClientHandle {
        self.handle
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Entry of a decoded push notification.
    pub fn handle_push(&self, envelope: PushEnvelope) -> usize {
        if self.is_closed() {
            debug!(handle = %self.handle, "push for closed client, dropped");
            return 0;
        }
        trace!(handle = %self.handle, kind = %envelope.kind, "push received");
        self.dispatcher.dispatch(envelope)
    }
}

/// A connection to the native engine.
///
/// Calls block on the bridge runtime or can be awaited with
/// [`Client::call_async`]. Pub/sub messages for the configured
/// subscriptions go to the configured callback or to a queue.
#[derive(Debug)]
pub struct Client {
    core: Arc<ClientCore>,
}

impl Client {
    pub fn connect(
        config: ClientConfiguration,
        engine: Arc<dyn NativeEngine>,
    ) -> Result<Client, BridgeError> {
        config
            .validate()
            .map_err(|e| BridgeError::Configuration(e.to_string()))?;

        let request = ConnectionRequest::from(&config);

        let dispatcher = MessageDispatcher::new();
        let default_subscriber = match request.subscriptions.as_ref() {
            Some(subscriptions) => {
                let handler = Arc::new(MessageHandler::new(
                    config.callback().cloned(),
                    config.context().cloned(),
                ));
                let id = dispatcher.register_subscriber(handler.clone());
                // sharded channels are exact names
                for channel in subscriptions
                    .channels
                    .iter()
                    .chain(&subscriptions.sharded_channels)
                {
                    dispatcher.add_subscription(id, channel)?;
                }
                for pattern in &subscriptions.patterns {
                    dispatcher.add_pattern_subscription(id, pattern)?;
                }
                Some((id, handler))
            }
            None => None,
        };

        let handle = engine
            .connect(&request, EntryPoints::bridge())
            .map_err(BridgeError::Connection)?;

        let subscribed = default_subscriber.is_some();
        let core = Arc::new(ClientCore {
            handle,
            engine,
            closed: AtomicBool::new(false),
            issuing: RwLock::new(()),
            dispatcher,
            default_subscriber,
            request_timeout: config.request_timeout(),
        });
        client_registry().register(handle, core.clone());

        info!(%handle, name = ?config.client_name(), %subscribed, "client connected");
        Ok(Client { core })
    }

    pub fn handle(&self) -> ClientHandle {
        self.core.handle
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.core.dispatcher
    }

    /// Queue of the configured subscriptions, for pull-style consumption.
    pub fn message_queue(&self) -> Result<&MessageQueue, BridgeError> {
        let (_, handler) = self.core.default_subscriber.as_ref().ok_or_else(|| {
            BridgeError::Configuration("no pub/sub subscriptions configured".to_string())
        })?;
        Ok(handler.queue()?)
    }

    /// Subscriber created for the configured subscriptions, if any.
    pub fn default_subscriber(&self) -> Option<SubscriberId> {
        self.core.default_subscriber.as_ref().map(|(id, _)| *id)
    }

    /// Issues a command and blocks until its result arrives. Must not be
    /// called from within an async context.
    pub fn call(&self, request_type: RequestType, args: &[&[u8]]) -> Result<Value, BridgeError> {
        get_runtime().block_on(self.call_async(request_type, args))
    }

    pub fn call_with_timeout(
        &self,
        request_type: RequestType,
        args: &[&[u8]],
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        get_runtime().block_on(self.call_async_with_timeout(request_type, args, Some(timeout)))
    }

    pub async fn call_async(
        &self,
        request_type: RequestType,
        args: &[&[u8]],
    ) -> Result<Value, BridgeError> {
        self.call_async_with_timeout(request_type, args, self.core.request_timeout)
            .await
    }

    async fn call_async_with_timeout(
        &self,
        request_type: RequestType,
        args: &[&[u8]],
        timeout: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        let call = {
            let _open = self.core.issuing.read();
            if self.is_closed() {
                return Err(BridgeError::Closing("client is closed".to_string()));
            }
            PendingCall::issue(&self.core.engine, self.core.handle, request_type, args)
        };
        call.wait(timeout).await
    }

    /// Closes the client. Commands already being issued finish issuing
    /// first, and none reaches the engine after its connection is closed.
    /// In-flight calls are not awaited; their late completions are still
    /// accepted and released.
    pub fn close(&self) {
        {
            // waits for commands being issued; later calls see the flag
            let _closing = self.core.issuing.write();
            if self.core.closed.swap(true, Ordering::AcqRel) {
                return;
            }
        }

        client_registry().unregister(self.core.handle);
        self.core.engine.close(self.core.handle);
        self.core.dispatcher.close();
        info!(handle = %self.core.handle, "client closed");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tether_pubsub::{PubSubError, PubSubMessage, PushKind};
    use tracing_test::traced_test;

    use crate::config::PubSubSubscriptions;
    use crate::slot::tests::idle_engine;

    fn subscriptions() -> PubSubSubscriptions {
        PubSubSubscriptions {
            channels: vec!["news".to_string()],
            patterns: vec!["news.*".to_string()],
            sharded_channels: vec!["orders".to_string()],
        }
    }

    #[test]
    fn test_connect_requires_address() {
        let result = Client::connect(ClientConfiguration::new(), idle_engine());
        assert!(matches!(result, Err(BridgeError::Configuration(_))));
    }

    #[test]
    #[traced_test]
    fn test_close_is_idempotent() {
        let client = Client::connect(
            ClientConfiguration::new().with_address("localhost:6379"),
            idle_engine(),
        )
        .unwrap();
        let handle = client.handle();
        assert!(client_registry().lookup(handle).is_some());

        client.close();
        client.close();
        assert!(client.is_closed());
        assert!(client_registry().lookup(handle).is_none());
        assert!(logs_contain("client closed"));

        let result = client.call(RequestType(1), &[]);
        assert_eq!(
            result,
            Err(BridgeError::Closing("client is closed".to_string()))
        );
    }

    #[test]
    fn test_call_times_out() {
        let client = Client::connect(
            ClientConfiguration::new()
                .with_address("localhost:6379")
                .with_request_timeout(Duration::from_millis(20)),
            idle_engine(),
        )
        .unwrap();

        assert!(matches!(
            client.call(RequestType(1), &[b"GET".as_slice()]),
            Err(BridgeError::Timeout(_))
        ));
        assert!(matches!(
            client.call_with_timeout(RequestType(1), &[], Duration::from_millis(10)),
            Err(BridgeError::Timeout(_))
        ));
    }

    #[test]
    fn test_message_queue_availability() {
        let plain = Client::connect(
            ClientConfiguration::new().with_address("a:1"),
            idle_engine(),
        )
        .unwrap();
        assert!(matches!(
            plain.message_queue(),
            Err(BridgeError::Configuration(_))
        ));
        assert!(plain.default_subscriber().is_none());

        let with_callback = Client::connect(
            ClientConfiguration::new()
                .with_address("a:1")
                .with_subscriptions(subscriptions())
                .with_callback(|_msg, _ctx| {}, None),
            idle_engine(),
        )
        .unwrap();
        assert_eq!(
            with_callback.message_queue().unwrap_err(),
            BridgeError::PubSub(PubSubError::CallbackConfigured)
        );

        let with_queue = Client::connect(
            ClientConfiguration::new()
                .with_address("a:1")
                .with_subscriptions(subscriptions()),
            idle_engine(),
        )
        .unwrap();
        assert!(with_queue.message_queue().unwrap().is_empty());
    }

    #[test]
    fn test_push_reaches_queue_through_registry() {
        let client = Client::connect(
            ClientConfiguration::new()
                .with_address("a:1")
                .with_subscriptions(subscriptions()),
            idle_engine(),
        )
        .unwrap();

        let core = client_registry().lookup(client.handle()).unwrap();
        let delivered = core.handle_push(PushEnvelope::new(
            PushKind::ShardedMessage,
            PubSubMessage::new("o-1", "orders"),
        ));
        assert_eq!(delivered, 1);

        let delivered = core.handle_push(PushEnvelope::new(
            PushKind::PatternMessage,
            PubSubMessage::new("hello", "news.eu").with_pattern("news.*"),
        ));
        assert_eq!(delivered, 1);

        let queue = client.message_queue().unwrap();
        assert_eq!(queue.pop().unwrap().channel(), "orders");
        assert_eq!(queue.pop().unwrap().pattern(), Some("news.*"));

        client.close();
        assert_eq!(
            core.handle_push(PushEnvelope::new(
                PushKind::Message,
                PubSubMessage::new("late", "news"),
            )),
            0
        );
        assert!(queue.is_closed());
    }
}
