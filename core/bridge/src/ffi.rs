// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! C ABI shared with the native engine.
//!
//! Discriminants cross the boundary as plain `u32` and are validated on
//! arrival, so an unexpected value from the native side is reported instead
//! of producing an invalid enum.

use std::ffi::{c_char, c_double, c_long};

use tether_pubsub::PushKind;

use crate::pending;
use crate::pinning::CorrelationToken;
use crate::push;
use crate::registry::ClientHandle;

/// Response of a command, allocated and owned by the native engine.
///
/// Only one group of fields is meaningful, selected by `response_type`.
/// A map is an array of entries, each with `map_key` and `map_value` set.
/// The engine frees the tree when the bridge hands it back through
/// `NativeEngine::release_response`.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub response_type: u32,
    pub int_value: i64,
    pub float_value: c_double,
    pub bool_value: bool,

    pub string_value: *mut c_char,
    pub string_value_len: c_long,

    pub array_value: *mut CommandResponse,
    pub array_value_len: c_long,

    pub map_key: *mut CommandResponse,
    pub map_value: *mut CommandResponse,

    pub sets_value: *mut CommandResponse,
    pub sets_value_len: c_long,
}

impl Default for CommandResponse {
    fn default() -> Self {
        CommandResponse {
            response_type: ResponseType::Null as u32,
            int_value: 0,
            float_value: 0.0,
            bool_value: false,
            string_value: std::ptr::null_mut(),
            string_value_len: 0,
            array_value: std::ptr::null_mut(),
            array_value_len: 0,
            map_key: std::ptr::null_mut(),
            map_value: std::ptr::null_mut(),
            sets_value: std::ptr::null_mut(),
            sets_value_len: 0,
        }
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Null = 0,
    Int = 1,
    Float = 2,
    Bool = 3,
    String = 4,
    Array = 5,
    Map = 6,
    Sets = 7,
    Ok = 8,
}

impl TryFrom<u32> for ResponseType {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        let response_type = match raw {
            0 => ResponseType::Null,
            1 => ResponseType::Int,
            2 => ResponseType::Float,
            3 => ResponseType::Bool,
            4 => ResponseType::String,
            5 => ResponseType::Array,
            6 => ResponseType::Map,
            7 => ResponseType::Sets,
            8 => ResponseType::Ok,
            other => return Err(other),
        };
        Ok(response_type)
    }
}

/// Error kind reported with a failed command.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestErrorKind {
    #[default]
    Unspecified = 0,
    ExecAbort = 1,
    Timeout = 2,
    Disconnect = 3,
}

impl From<u32> for RequestErrorKind {
    fn from(raw: u32) -> Self {
        match raw {
            1 => RequestErrorKind::ExecAbort,
            2 => RequestErrorKind::Timeout,
            3 => RequestErrorKind::Disconnect,
            _ => RequestErrorKind::Unspecified,
        }
    }
}

/// Push notification kind as emitted by the native engine.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativePushKind {
    Disconnection = 0,
    Other = 1,
    Invalidate = 2,
    Message = 3,
    PMessage = 4,
    SMessage = 5,
    Unsubscribe = 6,
    PUnsubscribe = 7,
    SUnsubscribe = 8,
    Subscribe = 9,
    PSubscribe = 10,
    SSubscribe = 11,
}

impl TryFrom<u32> for NativePushKind {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        let kind = match raw {
            0 => NativePushKind::Disconnection,
            1 => NativePushKind::Other,
            2 => NativePushKind::Invalidate,
            3 => NativePushKind::Message,
            4 => NativePushKind::PMessage,
            5 => NativePushKind::SMessage,
            6 => NativePushKind::Unsubscribe,
            7 => NativePushKind::PUnsubscribe,
            8 => NativePushKind::SUnsubscribe,
            9 => NativePushKind::Subscribe,
            10 => NativePushKind::PSubscribe,
            11 => NativePushKind::SSubscribe,
            other => return Err(other),
        };
        Ok(kind)
    }
}

impl NativePushKind {
    /// The pub/sub kind, or `None` for notifications that are not pub/sub
    /// traffic.
    pub fn to_push_kind(self) -> Option<PushKind> {
        match self {
            NativePushKind::Disconnection | NativePushKind::Other | NativePushKind::Invalidate => {
                None
            }
            NativePushKind::Message => Some(PushKind::Message),
            NativePushKind::PMessage => Some(PushKind::PatternMessage),
            NativePushKind::SMessage => Some(PushKind::ShardedMessage),
            NativePushKind::Unsubscribe => Some(PushKind::Unsubscribe),
            NativePushKind::PUnsubscribe => Some(PushKind::PatternUnsubscribe),
            NativePushKind::SUnsubscribe => Some(PushKind::ShardedUnsubscribe),
            NativePushKind::Subscribe => Some(PushKind::Subscribe),
            NativePushKind::PSubscribe => Some(PushKind::PatternSubscribe),
            NativePushKind::SSubscribe => Some(PushKind::ShardedSubscribe),
        }
    }
}

/// Invoked by a native worker thread when a command succeeded.
pub type SuccessCallback = unsafe extern "C" fn(token: usize, response: *mut CommandResponse);

/// Invoked by a native worker thread when a command failed. The message is
/// copied before the callback returns.
pub type FailureCallback = unsafe extern "C" fn(token: usize, message: *const c_char, kind: u32);

/// Invoked by a native worker thread for every push notification. All
/// buffers are copied before the callback returns; `pattern` may be null.
pub type PushCallback = unsafe extern "C" fn(
    handle: usize,
    kind: u32,
    message: *const u8,
    message_len: i64,
    channel: *const u8,
    channel_len: i64,
    pattern: *const u8,
    pattern_len: i64,
);

/// Entry points handed to the native engine when a connection is created.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct EntryPoints {
    pub on_succeeded: SuccessCallback,
    pub on_failed: FailureCallback,
    pub on_push: PushCallback,
}

impl EntryPoints {
    /// The bridge's own entry points.
    pub fn bridge() -> Self {
        EntryPoints {
            on_succeeded: tether_on_succeeded,
            on_failed: tether_on_failed,
            on_push: tether_on_push,
        }
    }
}

impl std::fmt::Debug for EntryPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPoints")
            .field("on_succeeded", &(self.on_succeeded as usize))
            .field("on_failed", &(self.on_failed as usize))
            .field("on_push", &(self.on_push as usize))
            .finish()
    }
}

/// # Safety
///
/// `response` must be null or a response allocated by the engine that issued
/// the command for `token`, not yet released. Ownership of the response is
/// transferred to the bridge.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tether_on_succeeded(token: usize, response: *mut CommandResponse) {
    unsafe { pending::complete_succeeded(CorrelationToken::from_raw(token), response) }
}

/// # Safety
///
/// `message` must be null or a valid NUL-terminated string for the duration
/// of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tether_on_failed(token: usize, message: *const c_char, kind: u32) {
    unsafe { pending::complete_failed(CorrelationToken::from_raw(token), message, kind) }
}

/// # Safety
///
/// Each non-null buffer must be valid for reads of its length for the
/// duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tether_on_push(
    handle: usize,
    kind: u32,
    message: *const u8,
    message_len: i64,
    channel: *const u8,
    channel_len: i64,
    pattern: *const u8,
    pattern_len: i64,
) {
    unsafe {
        push::route_push(
            ClientHandle::from_raw(handle),
            kind,
            (message, message_len),
            (channel, channel_len),
            (pattern, pattern_len),
        )
    }
}
