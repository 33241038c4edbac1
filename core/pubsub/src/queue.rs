// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::errors::PubSubError;
use crate::message::PubSubMessage;

#[derive(Debug, Default)]
struct QueueState {
    // messages nobody was waiting for, oldest first
    buffer: VecDeque<PubSubMessage>,
    // blocked consumers, oldest first
    waiters: VecDeque<oneshot::Sender<PubSubMessage>>,
    // "new message" notifications, capacity 1 each
    signals: Vec<mpsc::Sender<()>>,
    closed: bool,
}

impl QueueState {
    /// Hand the message to the oldest live waiter. Gives the message back if
    /// there is none.
    fn hand_off(&mut self, mut message: PubSubMessage) -> Option<PubSubMessage> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(message) {
                Ok(()) => return None,
                // the waiter dropped its handle, try the next one
                Err(returned) => message = returned,
            }
        }
        Some(message)
    }

    fn notify_signals(&mut self) {
        self.signals.retain(|signal| match signal.try_send(()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

/// FIFO of push messages with blocking and non-blocking consumption.
///
/// A message is either handed to the oldest blocked waiter or buffered,
/// never both, so every pushed message reaches exactly one consumer.
#[derive(Debug, Default)]
pub struct MessageQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        MessageQueue::default()
    }

    pub fn push(&self, message: PubSubMessage) {
        let mut state = self.state.lock();
        if state.closed {
            debug!(%message, "message queue closed, dropping message");
            return;
        }

        match state.hand_off(message) {
            None => trace!("message handed to waiting consumer"),
            Some(message) => {
                trace!(%message, "message buffered");
                state.buffer.push_back(message);
                state.notify_signals();
            }
        }
    }

    /// Non-blocking pop of the oldest buffered message.
    pub fn pop(&self) -> Option<PubSubMessage> {
        self.state.lock().buffer.pop_front()
    }

    /// Returns a handle that resolves to the next message.
    ///
    /// If a message is already buffered the handle is ready immediately.
    /// Otherwise the handle is registered as a waiter and completes on the
    /// next `push`. The handle can be awaited or waited on with
    /// [`NextMessage::wait`].
    pub fn wait_for_next(&self) -> NextMessage {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if let Some(message) = state.buffer.pop_front() {
                // rx is alive, this cannot fail
                let _ = tx.send(message);
            } else if !state.closed {
                state.waiters.push_back(tx);
            }
            // closed and empty: tx is dropped and the handle reports QueueClosed
        }

        NextMessage {
            receiver: Some(rx),
            queue: Arc::downgrade(&self.state),
            done: false,
        }
    }

    /// Blocks the current thread until a message is available.
    ///
    /// Must not be called from an async context.
    pub fn next_message_blocking(&self) -> Result<PubSubMessage, PubSubError> {
        self.wait_for_next().wait()
    }

    pub async fn next_message(&self) -> Result<PubSubMessage, PubSubError> {
        self.wait_for_next().await
    }

    /// Registers a "new message" signal.
    ///
    /// The receiver is notified every time a message is buffered. Signals are
    /// best-effort and coalesced: consumers should drain the queue with
    /// [`MessageQueue::pop`] after each notification. Dropping the receiver
    /// unregisters it.
    pub fn register_signal(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        let mut state = self.state.lock();
        if !state.buffer.is_empty() {
            let _ = tx.try_send(());
        }
        state.signals.push(tx);
        rx
    }

    /// Releases every blocked waiter with [`PubSubError::QueueClosed`].
    ///
    /// Buffered messages can still be popped; new messages are dropped.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let waiters = state.waiters.len();
        state.waiters.clear();
        state.signals.clear();
        debug!(%waiters, buffered = state.buffer.len(), "message queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().buffer.is_empty()
    }

    #[cfg(test)]
    fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

/// Pending result of [`MessageQueue::wait_for_next`].
///
/// Dropping the handle after a message was handed to it puts the message
/// back at the head of the queue.
#[derive(Debug)]
pub struct NextMessage {
    // taken by `wait`, which consumes the handle
    receiver: Option<oneshot::Receiver<PubSubMessage>>,
    queue: Weak<Mutex<QueueState>>,
    done: bool,
}

impl NextMessage {
    /// Blocks the current thread until the message arrives or the queue is
    /// closed. Must not be called from an async context.
    pub fn wait(mut self) -> Result<PubSubMessage, PubSubError> {
        let receiver = self.receiver.take().ok_or(PubSubError::QueueClosed)?;
        self.done = true;
        receiver.blocking_recv().map_err(|_| PubSubError::QueueClosed)
    }

    /// Takes the message if it already arrived.
    pub fn try_take(&mut self) -> Option<PubSubMessage> {
        if self.done {
            return None;
        }
        match self.receiver.as_mut()?.try_recv() {
            Ok(message) => {
                self.done = true;
                Some(message)
            }
            Err(_) => None,
        }
    }
}

impl Future for NextMessage {
    type Output = Result<PubSubMessage, PubSubError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(receiver) = this.receiver.as_mut() else {
            return Poll::Ready(Err(PubSubError::QueueClosed));
        };
        match Pin::new(receiver).poll(cx) {
            Poll::Ready(res) => {
                this.done = true;
                Poll::Ready(res.map_err(|_| PubSubError::QueueClosed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for NextMessage {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Some(mut receiver) = self.receiver.take() else {
            return;
        };
        receiver.close();
        let Ok(message) = receiver.try_recv() else {
            return;
        };
        let Some(queue) = self.queue.upgrade() else {
            return;
        };

        debug!(%message, "waiter dropped with a message, putting it back");
        let mut state = queue.lock();
        if let Some(message) = state.hand_off(message) {
            state.buffer.push_front(message);
            state.notify_signals();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    use tracing_test::traced_test;

    fn msg(i: usize) -> PubSubMessage {
        PubSubMessage::new(format!("payload-{}", i), "news")
    }

    #[test]
    #[traced_test]
    fn test_push_then_pop() {
        let q = MessageQueue::new();
        assert!(q.pop().is_none());

        q.push(msg(1));
        q.push(msg(2));
        assert_eq!(q.len(), 2);

        assert_eq!(q.pop().unwrap(), msg(1));
        assert_eq!(q.pop().unwrap(), msg(2));
        assert!(q.pop().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_then_wait_returns_buffered_message() {
        let q = MessageQueue::new();
        q.push(msg(1));

        let mut next = q.wait_for_next();
        assert_eq!(next.try_take(), Some(msg(1)));
        assert!(q.is_empty());
        assert_eq!(q.waiters(), 0);
    }

    #[test]
    #[traced_test]
    fn test_wait_before_push_blocks_until_push() {
        let q = Arc::new(MessageQueue::new());

        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.next_message_blocking())
        };

        // wait until the consumer is registered as a waiter
        while q.waiters() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        q.push(msg(7));
        assert_eq!(consumer.join().unwrap().unwrap(), msg(7));
        // handed off directly, never buffered
        assert!(q.is_empty());
    }

    #[test]
    fn test_blocking_wait_on_ready_and_closed_handles() {
        let q = MessageQueue::new();
        q.push(msg(1));

        // already resolved: returns without blocking
        assert_eq!(q.wait_for_next().wait(), Ok(msg(1)));

        let pending = q.wait_for_next();
        q.close();
        assert_eq!(pending.wait(), Err(PubSubError::QueueClosed));
        assert_eq!(q.next_message_blocking(), Err(PubSubError::QueueClosed));
        assert_eq!(q.waiters(), 0);
    }

    #[test]
    fn test_waiters_are_served_oldest_first() {
        let q = MessageQueue::new();
        let mut first = q.wait_for_next();
        let mut second = q.wait_for_next();

        q.push(msg(1));
        q.push(msg(2));

        assert_eq!(first.try_take(), Some(msg(1)));
        assert_eq!(second.try_take(), Some(msg(2)));
    }

    #[test]
    #[traced_test]
    fn test_abandoned_waiter_does_not_lose_message() {
        let q = MessageQueue::new();

        // waiter gone before the push: the message is buffered
        let gone = q.wait_for_next();
        drop(gone);
        q.push(msg(1));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Some(msg(1)));

        // waiter gone after the push: the message goes back to the queue
        let handed = q.wait_for_next();
        q.push(msg(2));
        q.push(msg(3));
        drop(handed);
        assert_eq!(q.pop(), Some(msg(2)));
        assert_eq!(q.pop(), Some(msg(3)));
    }

    #[tokio::test]
    async fn test_signals_are_best_effort() {
        let q = MessageQueue::new();
        let mut signal = q.register_signal();

        q.push(msg(1));
        q.push(msg(2));

        // coalesced into a single notification
        assert!(signal.try_recv().is_ok());
        assert!(signal.try_recv().is_err());

        // the consumer drains the buffer, not the signal
        assert_eq!(q.pop(), Some(msg(1)));
        assert_eq!(q.pop(), Some(msg(2)));

        // a message handed to a waiter does not fire the signal
        let next = q.wait_for_next();
        q.push(msg(3));
        assert!(signal.try_recv().is_err());
        assert_eq!(next.await.unwrap(), msg(3));

        // dropped receivers are pruned on the next push
        drop(signal);
        q.push(msg(4));
        assert!(q.state.lock().signals.is_empty());
    }

    #[test]
    fn test_signal_registered_after_buffering_fires() {
        let q = MessageQueue::new();
        q.push(msg(1));
        let mut signal = q.register_signal();
        assert!(signal.try_recv().is_ok());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_close_releases_waiters() {
        let q = Arc::new(MessageQueue::new());
        q.push(msg(1));

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move {
                // first call gets the buffered message, second one blocks
                let first = q.next_message().await;
                let second = q.next_message().await;
                (first, second)
            })
        };

        while q.waiters() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        q.close();
        assert!(q.is_closed());

        let (first, second) = waiter.await.unwrap();
        assert_eq!(first.unwrap(), msg(1));
        assert_eq!(second.unwrap_err(), PubSubError::QueueClosed);

        // pushes after close are dropped
        q.push(msg(2));
        assert!(q.is_empty());
        assert_eq!(q.wait_for_next().await.unwrap_err(), PubSubError::QueueClosed);
        assert!(logs_contain("message queue closed"));
    }

    #[test]
    fn test_concurrent_push_and_wait_delivers_exactly_once_in_order() {
        const PRODUCED: usize = 2000;
        const CONSUMERS: usize = 4;

        let q = Arc::new(MessageQueue::new());

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let q = q.clone();
                thread::spawn(move || {
                    let mut received = Vec::new();
                    while let Ok(message) = q.next_message_blocking() {
                        received.push(message);
                    }
                    received
                })
            })
            .collect();

        for i in 0..PRODUCED {
            q.push(msg(i));
        }

        // let the consumers drain what was buffered before closing
        while !q.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        q.close();

        let mut seen = HashSet::new();
        for consumer in consumers {
            let received = consumer.join().unwrap();
            // each consumer observes push order
            let indexes: Vec<usize> = received
                .iter()
                .map(|m| {
                    m.payload_str()
                        .unwrap()
                        .trim_start_matches("payload-")
                        .parse()
                        .unwrap()
                })
                .collect();
            assert!(indexes.windows(2).all(|w| w[0] < w[1]));
            for i in indexes {
                assert!(seen.insert(i), "message {} delivered twice", i);
            }
        }
        assert_eq!(seen.len(), PRODUCED);
    }
}
