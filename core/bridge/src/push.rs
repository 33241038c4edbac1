// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use tether_pubsub::{PubSubMessage, PushEnvelope};
use tracing::{debug, warn};

use crate::client::client_registry;
use crate::ffi::NativePushKind;
use crate::registry::ClientHandle;

/// Borrowed native buffer, valid only during the entry point call.
pub(crate) type RawBuffer = (*const u8, i64);

unsafe fn copy_buffer((ptr, len): RawBuffer) -> Option<Bytes> {
    if ptr.is_null() || len < 0 {
        return None;
    }
    if len == 0 {
        return Some(Bytes::new());
    }
    let raw = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
    Some(Bytes::copy_from_slice(raw))
}

/// Decodes a push notification and hands it to the client that owns
/// `handle`. Every buffer is copied before this returns.
///
/// # Safety
///
/// Each non-null buffer must be valid for reads of its length.
pub(crate) unsafe fn route_push(
    handle: ClientHandle,
    kind: u32,
    message: RawBuffer,
    channel: RawBuffer,
    pattern: RawBuffer,
) {
    let native_kind = match NativePushKind::try_from(kind) {
        Ok(kind) => kind,
        Err(raw) => {
            warn!(%handle, kind = raw, "unknown push kind, dropped");
            return;
        }
    };

    let Some(kind) = native_kind.to_push_kind() else {
        debug!(%handle, kind = ?native_kind, "non pub/sub push notification, dropped");
        return;
    };

    let Some(client) = client_registry().lookup(handle) else {
        debug!(%handle, %kind, "push for unknown client, dropped");
        return;
    };

    let payload = unsafe { copy_buffer(message) }.unwrap_or_default();
    let channel = unsafe { copy_buffer(channel) }
        .map(|raw| String::from_utf8_lossy(&raw).into_owned())
        .unwrap_or_default();
    let pattern = unsafe { copy_buffer(pattern) }.map(|raw| String::from_utf8_lossy(&raw).into_owned());

    let mut message = PubSubMessage::new(payload, channel);
    if let Some(pattern) = pattern {
        message = message.with_pattern(pattern);
    }

    client.handle_push(PushEnvelope::new(kind, message));
}
