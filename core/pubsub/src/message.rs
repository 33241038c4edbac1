// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};

use bytes::Bytes;

/// A pub/sub message received from a push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    payload: Bytes,
    channel: String,
    pattern: Option<String>,
}

impl PubSubMessage {
    pub fn new(payload: impl Into<Bytes>, channel: impl Into<String>) -> Self {
        PubSubMessage {
            payload: payload.into(),
            channel: channel.into(),
            pattern: None,
        }
    }

    pub fn with_pattern(self, pattern: impl Into<String>) -> Self {
        PubSubMessage {
            pattern: Some(pattern.into()),
            ..self
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl Display for PubSubMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.pattern {
            Some(pattern) => write!(
                f,
                "channel={} pattern={} len={}",
                self.channel,
                pattern,
                self.payload.len()
            ),
            None => write!(f, "channel={} len={}", self.channel, self.payload.len()),
        }
    }
}

/// Kind of a push notification that carries pub/sub traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushKind {
    Message,
    PatternMessage,
    ShardedMessage,
    Subscribe,
    Unsubscribe,
    PatternSubscribe,
    PatternUnsubscribe,
    ShardedSubscribe,
    ShardedUnsubscribe,
}

impl PushKind {
    /// True for the kinds that carry a published message.
    pub fn is_message(&self) -> bool {
        matches!(
            self,
            PushKind::Message | PushKind::PatternMessage | PushKind::ShardedMessage
        )
    }
}

impl Display for PushKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PushKind::Message => "message",
            PushKind::PatternMessage => "pmessage",
            PushKind::ShardedMessage => "smessage",
            PushKind::Subscribe => "subscribe",
            PushKind::Unsubscribe => "unsubscribe",
            PushKind::PatternSubscribe => "psubscribe",
            PushKind::PatternUnsubscribe => "punsubscribe",
            PushKind::ShardedSubscribe => "ssubscribe",
            PushKind::ShardedUnsubscribe => "sunsubscribe",
        };
        f.write_str(name)
    }
}

/// A push notification decoded at the native boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEnvelope {
    pub kind: PushKind,
    pub message: PubSubMessage,
}

impl PushEnvelope {
    pub fn new(kind: PushKind, message: PubSubMessage) -> Self {
        PushEnvelope { kind, message }
    }
}
