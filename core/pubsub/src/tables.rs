// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};

use tracing::{debug, warn};

use crate::errors::PubSubError;

/// Identifier of a logical subscriber inside a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn new(id: u64) -> Self {
        SubscriberId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for SubscriberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscription target: an exact channel name or a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Channel(String),
    Pattern(String),
}

impl Display for Topic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Channel(c) => write!(f, "channel {}", c),
            Topic::Pattern(p) => write!(f, "pattern {}", p),
        }
    }
}

/// Channel and pattern subscription tables.
///
/// Pattern matching is done by the native side, which reports the pattern
/// that matched; the pattern table is therefore looked up by exact key.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    // channel -> subscribers
    channels: HashMap<String, HashSet<SubscriberId>>,
    // pattern -> subscribers
    patterns: HashMap<String, HashSet<SubscriberId>>,
    // subscriber -> topics, used to purge a subscriber
    subscribers: HashMap<SubscriberId, HashSet<Topic>>,
}

impl SubscriptionTable {
    fn map_for<'a, 't>(
        &'a mut self,
        topic: &'t Topic,
    ) -> (&'a mut HashMap<String, HashSet<SubscriberId>>, &'t str) {
        match topic {
            Topic::Channel(c) => (&mut self.channels, c.as_str()),
            Topic::Pattern(p) => (&mut self.patterns, p.as_str()),
        }
    }

    /// Adds a subscription. Returns false if it already existed.
    pub fn add(&mut self, id: SubscriberId, topic: Topic) -> bool {
        let (map, key) = self.map_for(&topic);
        let added = match map.get_mut(key) {
            None => {
                debug!(%topic, subscriber = %id, "subscription table: add first subscription");
                map.insert(key.to_string(), HashSet::from([id]));
                true
            }
            Some(set) => set.insert(id),
        };

        if !added {
            debug!(%topic, subscriber = %id, "subscription already present");
            return false;
        }

        self.subscribers.entry(id).or_default().insert(topic);
        true
    }

    pub fn remove(&mut self, id: SubscriberId, topic: &Topic) -> Result<(), PubSubError> {
        let (map, key) = self.map_for(topic);
        let removed = match map.get_mut(key) {
            None => false,
            Some(set) => {
                let removed = set.remove(&id);
                if set.is_empty() {
                    map.remove(key);
                }
                removed
            }
        };

        if !removed {
            warn!(%topic, subscriber = %id, "subscription not found");
            return Err(PubSubError::SubscriptionNotFound(topic.clone()));
        }

        if let Some(topics) = self.subscribers.get_mut(&id) {
            topics.remove(topic);
            if topics.is_empty() {
                self.subscribers.remove(&id);
            }
        }
        debug!(%topic, subscriber = %id, "subscription successfully removed");
        Ok(())
    }

    /// Removes every subscription of a subscriber and returns them.
    pub fn remove_subscriber(&mut self, id: SubscriberId) -> HashSet<Topic> {
        let topics = self.subscribers.remove(&id).unwrap_or_default();
        for topic in &topics {
            let (map, key) = self.map_for(topic);
            if let Some(set) = map.get_mut(key) {
                set.remove(&id);
                if set.is_empty() {
                    map.remove(key);
                }
            }
        }
        debug!(subscriber = %id, removed = topics.len(), "subscriber purged from tables");
        topics
    }

    pub fn match_channel(&self, channel: &str) -> Vec<SubscriberId> {
        Self::collect(self.channels.get(channel))
    }

    pub fn match_pattern(&self, pattern: &str) -> Vec<SubscriberId> {
        Self::collect(self.patterns.get(pattern))
    }

    pub fn topics_of(&self, id: SubscriberId) -> HashSet<Topic> {
        self.subscribers.get(&id).cloned().unwrap_or_default()
    }

    pub fn has_subscriptions(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Topic, &[SubscriberId]),
    {
        for (channel, ids) in self.channels.iter() {
            let ids: Vec<SubscriberId> = ids.iter().copied().collect();
            f(&Topic::Channel(channel.clone()), ids.as_ref());
        }
        for (pattern, ids) in self.patterns.iter() {
            let ids: Vec<SubscriberId> = ids.iter().copied().collect();
            f(&Topic::Pattern(pattern.clone()), ids.as_ref());
        }
    }

    fn collect(set: Option<&HashSet<SubscriberId>>) -> Vec<SubscriberId> {
        let mut ids: Vec<SubscriberId> = set.map(|s| s.iter().copied().collect()).unwrap_or_default();
        ids.sort();
        ids
    }
}

impl Display for SubscriptionTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Subscription Table")?;
        writeln!(f, "  Channels:")?;
        for (channel, ids) in self.channels.iter() {
            writeln!(f, "    {}: {:?}", channel, Self::collect(Some(ids)))?;
        }
        writeln!(f, "  Patterns:")?;
        for (pattern, ids) in self.patterns.iter() {
            writeln!(f, "    {}: {:?}", pattern, Self::collect(Some(ids)))?;
        }
        Ok(())
    }
}
