// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::tables::{SubscriberId, Topic};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PubSubError {
    // Queue lifecycle
    #[error("message queue is closed")]
    QueueClosed,
    #[error("messages are delivered to a callback, no queue available")]
    CallbackConfigured,

    // Subscription tables
    #[error("subscriber not found: {0}")]
    SubscriberNotFound(SubscriberId),
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(Topic),
}
