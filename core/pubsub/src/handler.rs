// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tracing::{Span, debug, error, trace, warn};

use crate::errors::PubSubError;
use crate::message::{PubSubMessage, PushEnvelope, PushKind};
use crate::queue::MessageQueue;

/// Opaque user value handed back to the callback on every message.
pub type CallbackContext = Arc<dyn Any + Send + Sync>;

/// Callback invoked for every message, on the subscriber's own delivery
/// thread.
pub type MessageCallback = Arc<dyn Fn(PubSubMessage, Option<&CallbackContext>) + Send + Sync>;

/// What happened to a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the subscriber's callback thread.
    Scheduled,
    /// No callback configured, the message was pushed on the queue.
    Queued,
    /// The handler is closed, the message was dropped.
    Dropped,
}

/// Messages accepted by a callback worker and not yet fully handled.
#[derive(Debug, Default)]
struct Backlog {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Backlog {
    fn accept(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn len(&self) -> usize {
        *self.count.lock()
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        !self
            .idle
            .wait_while_for(&mut count, |count| *count > 0, timeout)
            .timed_out()
    }
}

/// Ordered hand-off to the thread that runs a subscriber's callback.
///
/// A slow or blocked callback only delays its own subscriber: the
/// delivering thread never waits for it.
#[derive(Debug)]
struct CallbackWorker {
    sender: Mutex<Option<mpsc::UnboundedSender<PubSubMessage>>>,
    backlog: Arc<Backlog>,
}

impl CallbackWorker {
    fn spawn(
        callback: MessageCallback,
        context: Option<CallbackContext>,
    ) -> std::io::Result<CallbackWorker> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PubSubMessage>();
        let backlog = Arc::new(Backlog::default());
        // deliveries are logged in the span the subscriber was created in
        let span = Span::current();

        let worker_backlog = backlog.clone();
        thread::Builder::new()
            .name("pubsub-callback".to_string())
            .spawn(move || {
                let _entered = span.enter();
                while let Some(message) = rx.blocking_recv() {
                    invoke(&callback, context.as_ref(), message);
                    worker_backlog.finish();
                }
                trace!("callback worker stopped");
            })?;

        Ok(CallbackWorker {
            sender: Mutex::new(Some(tx)),
            backlog,
        })
    }

    fn submit(&self, message: PubSubMessage) -> Delivery {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Delivery::Dropped;
        };
        self.backlog.accept();
        match tx.send(message) {
            Ok(()) => Delivery::Scheduled,
            Err(_) => {
                self.backlog.finish();
                Delivery::Dropped
            }
        }
    }

    // the worker drains what was already accepted, then stops
    fn close(&self) {
        self.sender.lock().take();
    }
}

/// Runs the callback inside a panic boundary. Returns false if it panicked.
fn invoke(
    callback: &MessageCallback,
    context: Option<&CallbackContext>,
    message: PubSubMessage,
) -> bool {
    let channel = message.channel().to_string();
    match catch_unwind(AssertUnwindSafe(|| callback(message, context))) {
        Ok(()) => true,
        Err(panic) => {
            error!(
                %channel,
                reason = %panic_message(panic.as_ref()),
                "pubsub callback panicked",
            );
            false
        }
    }
}

/// Per-subscriber delivery adapter: a callback if one is configured,
/// otherwise a [`MessageQueue`].
pub struct MessageHandler {
    callback: Option<MessageCallback>,
    context: Option<CallbackContext>,
    worker: Option<CallbackWorker>,
    queue: MessageQueue,
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("callback", &self.callback.is_some())
            .field("context", &self.context.is_some())
            .field("in_flight", &self.in_flight())
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Default for MessageHandler {
    fn default() -> Self {
        MessageHandler::new(None, None)
    }
}

impl MessageHandler {
    /// Creates the handler. With a callback, a dedicated delivery thread is
    /// started; it stops once the handler is closed or dropped.
    pub fn new(callback: Option<MessageCallback>, context: Option<CallbackContext>) -> Self {
        let worker = callback.as_ref().and_then(|callback| {
            CallbackWorker::spawn(callback.clone(), context.clone())
                .map_err(|e| error!(error = %e, "cannot start callback thread, messages will be dropped"))
                .ok()
        });

        MessageHandler {
            callback,
            context,
            worker,
            queue: MessageQueue::new(),
        }
    }

    /// Handler that buffers every message for pull-style consumption.
    pub fn with_queue() -> Self {
        MessageHandler::default()
    }

    pub fn with_callback<F>(callback: F, context: Option<CallbackContext>) -> Self
    where
        F: Fn(PubSubMessage, Option<&CallbackContext>) + Send + Sync + 'static,
    {
        MessageHandler::new(Some(Arc::new(callback)), context)
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn context(&self) -> Option<&CallbackContext> {
        self.context.as_ref()
    }

    /// The queue used for pull-style consumption.
    pub fn queue(&self) -> Result<&MessageQueue, PubSubError> {
        if self.callback.is_some() {
            return Err(PubSubError::CallbackConfigured);
        }
        Ok(&self.queue)
    }

    /// Messages handed to the callback and not yet fully handled.
    pub fn in_flight(&self) -> usize {
        self.worker.as_ref().map_or(0, |w| w.backlog.len())
    }

    /// Blocks until every message handed to the callback so far was
    /// handled, or `timeout` elapsed. Returns false on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        match &self.worker {
            Some(worker) => worker.backlog.wait_idle(timeout),
            None => true,
        }
    }

    /// Delivers one message: either the callback gets it or the message is
    /// queued, never both. Callbacks run on the subscriber's own thread, in
    /// delivery order; a panicking callback is logged and contained.
    pub fn deliver(&self, message: PubSubMessage) -> Delivery {
        if self.callback.is_none() {
            self.queue.push(message);
            return Delivery::Queued;
        }

        match &self.worker {
            Some(worker) => worker.submit(message),
            None => {
                warn!(%message, "no callback thread, dropping message");
                Delivery::Dropped
            }
        }
    }

    /// Delivers the message carried by an envelope. Subscription
    /// acknowledgements are only logged.
    pub fn handle(&self, envelope: PushEnvelope) -> Option<Delivery> {
        match envelope.kind {
            PushKind::Message | PushKind::PatternMessage | PushKind::ShardedMessage => {
                Some(self.deliver(envelope.message))
            }
            PushKind::Subscribe
            | PushKind::Unsubscribe
            | PushKind::PatternSubscribe
            | PushKind::PatternUnsubscribe
            | PushKind::ShardedSubscribe
            | PushKind::ShardedUnsubscribe => {
                debug!(kind = %envelope.kind, channel = %envelope.message.channel(), "subscription acknowledgement");
                None
            }
        }
    }

    /// Releases consumers blocked on the queue and stops the callback
    /// thread once it has handled what it already accepted.
    pub fn close(&self) {
        if let Some(worker) = &self.worker {
            worker.close();
        }
        self.queue.close();
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
