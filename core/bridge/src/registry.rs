// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

/// Identifier of a native connection, as reported by the engine.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(usize);

impl ClientHandle {
    pub fn from_raw(raw: usize) -> Self {
        ClientHandle(raw)
    }

    pub fn as_raw(&self) -> usize {
        self.0
    }
}

impl Display for ClientHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Maps native connection handles to live clients.
///
/// Push notifications only carry the handle, so they are routed through
/// this table. Lookups are linearizable with register and unregister: once
/// `unregister` returns, no later lookup finds the client.
#[derive(Debug)]
pub struct ClientRegistry<C> {
    clients: RwLock<HashMap<ClientHandle, Arc<C>>>,
}

impl<C> Default for ClientRegistry<C> {
    fn default() -> Self {
        ClientRegistry {
            clients: RwLock::new(HashMap::new()),
        }
    }
}

impl<C> ClientRegistry<C> {
    pub fn new() -> Self {
        ClientRegistry::default()
    }

    /// Registers a client, returning the one it replaced, if any.
    pub fn register(&self, handle: ClientHandle, client: Arc<C>) -> Option<Arc<C>> {
        let previous = self.clients.write().insert(handle, client);
        if previous.is_some() {
            warn!(%handle, "client handle registered twice, replacing");
        } else {
            debug!(%handle, "client registered");
        }
        previous
    }

    pub fn unregister(&self, handle: ClientHandle) -> Option<Arc<C>> {
        let removed = self.clients.write().remove(&handle);
        if removed.is_some() {
            debug!(%handle, "client unregistered");
        }
        removed
    }

    pub fn lookup(&self, handle: ClientHandle) -> Option<Arc<C>> {
        self.clients.read().get(&handle).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}
