// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

/// Opaque value handed to the native side in place of an address.
///
/// Tokens are indexes into a [`PinnedSlots`] arena, never real addresses.
/// Zero is never issued.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken(usize);

impl CorrelationToken {
    pub fn from_raw(raw: usize) -> Self {
        CorrelationToken(raw)
    }

    pub fn as_raw(&self) -> usize {
        self.0
    }
}

impl Display for CorrelationToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Arena of objects currently pinned for the native side.
///
/// A pinned object stays alive until it is unpinned. [`PinnedSlots::resolve`]
/// hands out a shared reference, so the resolver keeps the object alive even
/// if the holder unpins concurrently. Resolving a token that is not pinned
/// returns `None`.
#[derive(Debug)]
pub struct PinnedSlots<T> {
    next: AtomicUsize,
    slots: Mutex<HashMap<usize, Arc<T>>>,
}

impl<T> Default for PinnedSlots<T> {
    fn default() -> Self {
        PinnedSlots {
            next: AtomicUsize::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> PinnedSlots<T> {
    pub fn new() -> Self {
        PinnedSlots::default()
    }

    pub fn pin(&self, obj: Arc<T>) -> CorrelationToken {
        let mut raw = self.next.fetch_add(1, Ordering::Relaxed);
        if raw == 0 {
            // wrapped around, 0 is reserved
            raw = self.next.fetch_add(1, Ordering::Relaxed);
        }
        self.slots.lock().insert(raw, obj);
        trace!(token = %CorrelationToken(raw), "pinned");
        CorrelationToken(raw)
    }

    pub fn resolve(&self, token: CorrelationToken) -> Option<Arc<T>> {
        self.slots.lock().get(&token.0).cloned()
    }

    pub fn unpin(&self, token: CorrelationToken) -> Option<Arc<T>> {
        let obj = self.slots.lock().remove(&token.0);
        if obj.is_some() {
            trace!(%token, "unpinned");
        }
        obj
    }

    pub fn is_pinned(&self, token: CorrelationToken) -> bool {
        self.slots.lock().contains_key(&token.0)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
