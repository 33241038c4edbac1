// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};

use crate::config::ConnectionRequest;
use crate::ffi::{CommandResponse, EntryPoints};
use crate::pinning::CorrelationToken;
use crate::registry::ClientHandle;

/// Command identifier understood by the native engine.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestType(pub u32);

impl Display for RequestType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The native command engine behind the bridge.
///
/// The engine signals every issued command exactly once, on a thread of its
/// own, through the [`EntryPoints`] received at connect time. It owns the
/// allocator of every [`CommandResponse`] it produces and frees one when it
/// is handed back through [`NativeEngine::release_response`].
pub trait NativeEngine: Send + Sync + 'static {
    fn connect(
        &self,
        request: &ConnectionRequest,
        entry_points: EntryPoints,
    ) -> Result<ClientHandle, String>;

    /// Starts a command. Arguments are copied before the call returns.
    fn issue_command(
        &self,
        handle: ClientHandle,
        token: CorrelationToken,
        request_type: RequestType,
        args: &[&[u8]],
    );

    /// # Safety
    ///
    /// `response` must come from this engine and must not be used afterwards.
    unsafe fn release_response(&self, response: *mut CommandResponse);

    /// Closes a connection. Commands still in flight are signalled later or
    /// never.
    fn close(&self, handle: ClientHandle);
}

impl std::fmt::Debug for dyn NativeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NativeEngine")
    }
}
