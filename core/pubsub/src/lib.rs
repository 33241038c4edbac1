// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Delivery side of push notifications.
//!
//! A [`MessageDispatcher`] routes every incoming [`PushEnvelope`] to the
//! subscribers registered for its channel or pattern. Each subscriber owns a
//! [`MessageHandler`], which either invokes a user callback or buffers the
//! message in a [`MessageQueue`] for pull-style consumption.

pub mod dispatcher;
pub mod errors;
pub mod handler;
pub mod message;
pub mod queue;
pub mod tables;

pub use dispatcher::{MessageDispatcher, SubscriberState};
pub use errors::PubSubError;
pub use handler::{CallbackContext, Delivery, MessageCallback, MessageHandler};
pub use message::{PubSubMessage, PushEnvelope, PushKind};
pub use queue::{MessageQueue, NextMessage};
pub use tables::{SubscriberId, SubscriptionTable, Topic};
