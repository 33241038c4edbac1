// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::errors::PubSubError;
use crate::handler::{Delivery, MessageHandler};
use crate::message::{PushEnvelope, PushKind};
use crate::tables::{SubscriberId, SubscriptionTable, Topic};

/// Delivery state of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Registered, no subscription yet.
    Idle,
    /// At least one channel or pattern subscription.
    Subscribed,
    /// A message is being delivered right now.
    Delivering,
    /// Unregistered. Terminal: ids are never reused.
    Removed,
}

#[derive(Debug, Default)]
struct DispatcherState {
    table: SubscriptionTable,
    handlers: HashMap<SubscriberId, Arc<MessageHandler>>,
}

/// Fan-out router for push notifications.
///
/// Tables are only changed through the explicit add/remove calls; the
/// subscribe and unsubscribe acknowledgements that flow through
/// [`MessageDispatcher::dispatch`] never touch them.
#[derive(Debug)]
pub struct MessageDispatcher {
    state: RwLock<DispatcherState>,
    next_id: AtomicU64,
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        MessageDispatcher {
            state: RwLock::new(DispatcherState::default()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl MessageDispatcher {
    pub fn new() -> Self {
        MessageDispatcher::default()
    }

    pub fn register_subscriber(&self, handler: Arc<MessageHandler>) -> SubscriberId {
        let id = SubscriberId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.state.write().handlers.insert(id, handler);
        debug!(subscriber = %id, "subscriber registered");
        id
    }

    /// Removes the subscriber from every table and returns the topics it
    /// was subscribed to. A dispatch that already took its snapshot may
    /// still deliver one last message to it.
    pub fn unregister_subscriber(&self, id: SubscriberId) -> Result<HashSet<Topic>, PubSubError> {
        let mut state = self.state.write();
        let handler = state
            .handlers
            .remove(&id)
            .ok_or(PubSubError::SubscriberNotFound(id))?;
        let topics = state.table.remove_subscriber(id);
        drop(state);

        handler.close();
        debug!(subscriber = %id, topics = topics.len(), "subscriber unregistered");
        Ok(topics)
    }

    pub fn add_subscription(&self, id: SubscriberId, channel: &str) -> Result<(), PubSubError> {
        self.add(id, Topic::Channel(channel.to_string()))
    }

    pub fn add_pattern_subscription(
        &self,
        id: SubscriberId,
        pattern: &str,
    ) -> Result<(), PubSubError> {
        self.add(id, Topic::Pattern(pattern.to_string()))
    }

    pub fn remove_subscription(&self, id: SubscriberId, channel: &str) -> Result<(), PubSubError> {
        self.state
            .write()
            .table
            .remove(id, &Topic::Channel(channel.to_string()))
    }

    pub fn remove_pattern_subscription(
        &self,
        id: SubscriberId,
        pattern: &str,
    ) -> Result<(), PubSubError> {
        self.state
            .write()
            .table
            .remove(id, &Topic::Pattern(pattern.to_string()))
    }

    fn add(&self, id: SubscriberId, topic: Topic) -> Result<(), PubSubError> {
        let mut state = self.state.write();
        if !state.handlers.contains_key(&id) {
            warn!(subscriber = %id, %topic, "cannot subscribe an unknown subscriber");
            return Err(PubSubError::SubscriberNotFound(id));
        }
        state.table.add(id, topic);
        Ok(())
    }

    /// Routes one push notification and returns the number of subscribers
    /// it was delivered to.
    ///
    /// Exact-channel and sharded messages go to the channel subscribers,
    /// pattern messages to the subscribers of the pattern reported by the
    /// native side. Handlers run outside the lock. Callbacks run on each
    /// subscriber's own thread, so a slow, blocked or panicking subscriber
    /// does not hold up delivery to the others.
    pub fn dispatch(&self, envelope: PushEnvelope) -> usize {
        let targets: Vec<(SubscriberId, Arc<MessageHandler>)> = {
            let state = self.state.read();
            let ids = match envelope.kind {
                PushKind::Message | PushKind::ShardedMessage => {
                    state.table.match_channel(envelope.message.channel())
                }
                PushKind::PatternMessage => match envelope.message.pattern() {
                    Some(pattern) => state.table.match_pattern(pattern),
                    None => {
                        warn!(channel = %envelope.message.channel(), "pattern message without pattern, dropping");
                        return 0;
                    }
                },
                PushKind::Subscribe
                | PushKind::Unsubscribe
                | PushKind::PatternSubscribe
                | PushKind::PatternUnsubscribe
                | PushKind::ShardedSubscribe
                | PushKind::ShardedUnsubscribe => {
                    debug!(kind = %envelope.kind, channel = %envelope.message.channel(), "subscription acknowledgement, tables unchanged");
                    return 0;
                }
            };

            ids.into_iter()
                .filter_map(|id| state.handlers.get(&id).map(|h| (id, h.clone())))
                .collect()
        };

        if targets.is_empty() {
            debug!(kind = %envelope.kind, message = %envelope.message, "no subscriber for message");
            return 0;
        }

        let mut delivered = 0;
        for (id, handler) in targets {
            match handler.deliver(envelope.message.clone()) {
                Delivery::Scheduled | Delivery::Queued => delivered += 1,
                Delivery::Dropped => {
                    debug!(subscriber = %id, "subscriber closed, message dropped");
                }
            }
        }
        trace!(%delivered, "message dispatched");
        delivered
    }

    pub fn handler(&self, id: SubscriberId) -> Option<Arc<MessageHandler>> {
        self.state.read().handlers.get(&id).cloned()
    }

    pub fn subscriptions_of(&self, id: SubscriberId) -> HashSet<Topic> {
        self.state.read().table.topics_of(id)
    }

    pub fn match_channel(&self, channel: &str) -> Vec<SubscriberId> {
        self.state.read().table.match_channel(channel)
    }

    pub fn match_pattern(&self, pattern: &str) -> Vec<SubscriberId> {
        self.state.read().table.match_pattern(pattern)
    }

    pub fn subscriber_state(&self, id: SubscriberId) -> SubscriberState {
        let state = self.state.read();
        match state.handlers.get(&id) {
            None => SubscriberState::Removed,
            Some(handler) if handler.in_flight() > 0 => SubscriberState::Delivering,
            Some(_) if state.table.has_subscriptions(id) => SubscriberState::Subscribed,
            Some(_) => SubscriberState::Idle,
        }
    }

    /// Closes every subscriber queue, releasing blocked consumers.
    pub fn close(&self) {
        let handlers: Vec<Arc<MessageHandler>> =
            self.state.read().handlers.values().cloned().collect();
        for handler in handlers {
            handler.close();
        }
    }
}

impl Display for MessageDispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        writeln!(f, "Subscribers: {}", state.handlers.len())?;
        write!(f, "{}", state.table)
    }
}
