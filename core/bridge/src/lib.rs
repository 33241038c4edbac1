// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Bridge between blocking or async Rust callers and a native engine that
//! completes commands through C callbacks on its own threads.
//!
//! Each issued command gets a [`DeliverySlot`] pinned in a process-wide
//! arena; the native side only ever sees the slot's [`CorrelationToken`].
//! Push notifications are routed by [`ClientHandle`] through the client
//! registry to the client's [`tether_pubsub::MessageDispatcher`].

pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod ffi;
pub mod init;
pub mod pending;
pub mod pinning;
mod push;
pub mod registry;
pub mod response;
pub mod runtime;
pub mod slot;

pub use client::{Client, ClientCore, client_registry};
pub use config::{
    ClientConfiguration, ConfigError, ConfigLoader, ConnectionRequest, PubSubSubscriptions,
};
pub use engine::{NativeEngine, RequestType};
pub use errors::BridgeError;
pub use ffi::{CommandResponse, EntryPoints, NativePushKind, RequestErrorKind, ResponseType};
pub use init::initialize_from_config;
pub use pending::{PendingCall, pending_calls};
pub use pinning::{CorrelationToken, PinnedSlots};
pub use registry::{ClientHandle, ClientRegistry};
pub use response::{NativeResponse, Value};
pub use runtime::{RuntimeConfiguration, configure_runtime, get_runtime};
pub use slot::{CallResult, Completion, DeliverySlot, SlotError};
pub use tether_tracing::{LogOutput, TracingConfiguration};
