// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! A Rust stand-in for the native engine.
//!
//! [`MockEngine`] answers commands from its own threads through the real
//! `extern "C"` entry points, owns the allocator of every response it hands
//! out and counts how many were released.

use std::collections::{HashMap, HashSet};
use std::ffi::{CString, c_long};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tether_bridge::{
    ClientHandle, CommandResponse, ConnectionRequest, CorrelationToken, EntryPoints,
    NativeEngine, NativePushKind, RequestErrorKind, RequestType, ResponseType, Value,
};
use tracing::debug;

/// How the engine answers a request type.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Value(Value),
    Error(RequestErrorKind, String),
    /// Replies with the first argument as a string.
    Echo,
    /// Never answers on its own; see [`MockEngine::complete_parked`].
    Silent,
    Delayed(Duration, Box<Reply>),
}

#[derive(Debug, Default)]
struct Stats {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

#[derive(Debug)]
struct Parked {
    token: CorrelationToken,
    entry_points: EntryPoints,
}

pub struct MockEngine {
    replies: Mutex<HashMap<RequestType, Reply>>,
    default_reply: Reply,
    connect_error: Option<String>,
    connections: Mutex<HashMap<ClientHandle, EntryPoints>>,
    requests: Mutex<Vec<ConnectionRequest>>,
    closed: Mutex<HashSet<ClientHandle>>,
    parked: Mutex<Vec<Parked>>,
    next_handle: AtomicUsize,
    issued: AtomicUsize,
    late_commands: AtomicUsize,
    stats: Arc<Stats>,
}

impl std::fmt::Debug for MockEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEngine")
            .field("connections", &self.connections.lock().len())
            .field("issued", &self.issued.load(Ordering::SeqCst))
            .field("allocated", &self.allocated())
            .field("released", &self.released())
            .finish()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        MockEngine {
            replies: Mutex::new(HashMap::new()),
            default_reply: Reply::Value(Value::Okay),
            connect_error: None,
            connections: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            closed: Mutex::new(HashSet::new()),
            parked: Mutex::new(Vec::new()),
            next_handle: AtomicUsize::new(1),
            issued: AtomicUsize::new(0),
            late_commands: AtomicUsize::new(0),
            stats: Arc::new(Stats::default()),
        }
    }
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(MockEngine::default())
    }

    /// An engine whose connections always fail.
    pub fn unreachable(message: &str) -> Arc<Self> {
        Arc::new(MockEngine {
            connect_error: Some(message.to_string()),
            ..Default::default()
        })
    }

    pub fn on(&self, request_type: RequestType, reply: Reply) {
        self.replies.lock().insert(request_type, reply);
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Commands issued on a connection that was already closed.
    pub fn late_commands(&self) -> usize {
        self.late_commands.load(Ordering::SeqCst)
    }

    pub fn allocated(&self) -> usize {
        self.stats.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.stats.released.load(Ordering::SeqCst)
    }

    /// Responses handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.allocated() - self.released()
    }

    pub fn is_closed(&self, handle: ClientHandle) -> bool {
        self.closed.lock().contains(&handle)
    }

    pub fn last_request(&self) -> Option<ConnectionRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn parked(&self) -> Vec<CorrelationToken> {
        self.parked.lock().iter().map(|p| p.token).collect()
    }

    /// Answers a command held back by [`Reply::Silent`], on the calling
    /// thread. Returns false if no such command is parked.
    pub fn complete_parked(&self, token: CorrelationToken, reply: Reply) -> bool {
        let parked = {
            let mut parked = self.parked.lock();
            match parked.iter().position(|p| p.token == token) {
                Some(index) => parked.remove(index),
                None => return false,
            }
        };
        deliver(&self.stats, parked.entry_points, token, reply, &[]);
        true
    }

    /// Emits a push notification for `handle` on the calling thread, the
    /// way a native worker does.
    pub fn publish(
        &self,
        handle: ClientHandle,
        kind: NativePushKind,
        channel: &str,
        payload: &[u8],
        pattern: Option<&str>,
    ) {
        let entry_points = self.connections.lock().get(&handle).copied();
        // pushes for unknown handles go through the bridge entry point
        let on_push = entry_points
            .map(|e| e.on_push)
            .unwrap_or(EntryPoints::bridge().on_push);

        let (pattern_ptr, pattern_len) = match pattern {
            Some(p) => (p.as_ptr(), p.len() as i64),
            None => (std::ptr::null(), 0),
        };
        unsafe {
            on_push(
                handle.as_raw(),
                kind as u32,
                payload.as_ptr(),
                payload.len() as i64,
                channel.as_ptr(),
                channel.len() as i64,
                pattern_ptr,
                pattern_len,
            )
        }
    }

    /// Like [`MockEngine::publish`], from a fresh thread; returns once the
    /// notification was handled.
    pub fn publish_from_worker(
        self: &Arc<Self>,
        handle: ClientHandle,
        kind: NativePushKind,
        channel: &str,
        payload: &[u8],
        pattern: Option<&str>,
    ) {
        let engine = self.clone();
        let channel = channel.to_string();
        let payload = payload.to_vec();
        let pattern = pattern.map(str::to_string);
        let worker = thread::Builder::new()
            .name("native-push".to_string())
            .spawn(move || engine.publish(handle, kind, &channel, &payload, pattern.as_deref()));
        if let Ok(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl NativeEngine for MockEngine {
    fn connect(
        &self,
        request: &ConnectionRequest,
        entry_points: EntryPoints,
    ) -> Result<ClientHandle, String> {
        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }
        let handle = ClientHandle::from_raw(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.connections.lock().insert(handle, entry_points);
        self.requests.lock().push(request.clone());
        debug!(%handle, "mock connection created");
        Ok(handle)
    }

    fn issue_command(
        &self,
        handle: ClientHandle,
        token: CorrelationToken,
        request_type: RequestType,
        args: &[&[u8]],
    ) {
        self.issued.fetch_add(1, Ordering::SeqCst);

        let Some(entry_points) = self.connections.lock().get(&handle).copied() else {
            debug!(%handle, "command on unknown connection");
            return;
        };

        let reply = self
            .replies
            .lock()
            .get(&request_type)
            .cloned()
            .unwrap_or_else(|| self.default_reply.clone());

        let reply = if self.is_closed(handle) {
            self.late_commands.fetch_add(1, Ordering::SeqCst);
            Reply::Error(RequestErrorKind::Disconnect, "connection closed".to_string())
        } else {
            reply
        };

        if reply == Reply::Silent {
            self.parked.lock().push(Parked {
                token,
                entry_points,
            });
            return;
        }

        let args: Vec<Vec<u8>> = args.iter().map(|a| a.to_vec()).collect();
        let stats = self.stats.clone();
        thread::spawn(move || {
            let args: Vec<&[u8]> = args.iter().map(Vec::as_slice).collect();
            deliver(&stats, entry_points, token, reply, &args);
        });
    }

    unsafe fn release_response(&self, response: *mut CommandResponse) {
        unsafe { free_response(response) };
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self, handle: ClientHandle) {
        self.closed.lock().insert(handle);
        debug!(%handle, "mock connection closed");
    }
}

fn deliver(
    stats: &Stats,
    entry_points: EntryPoints,
    token: CorrelationToken,
    reply: Reply,
    args: &[&[u8]],
) {
    match reply {
        Reply::Value(value) => {
            let response = allocate(&value);
            stats.allocated.fetch_add(1, Ordering::SeqCst);
            unsafe { (entry_points.on_succeeded)(token.as_raw(), response) }
        }
        Reply::Error(kind, message) => {
            let message = CString::new(message).unwrap_or_default();
            unsafe { (entry_points.on_failed)(token.as_raw(), message.as_ptr(), kind as u32) }
        }
        Reply::Echo => {
            let value = args
                .first()
                .map(|a| Value::String(bytes::Bytes::copy_from_slice(a)))
                .unwrap_or(Value::Nil);
            deliver(stats, entry_points, token, Reply::Value(value), args)
        }
        Reply::Delayed(delay, reply) => {
            thread::sleep(delay);
            deliver(stats, entry_points, token, *reply, args)
        }
        Reply::Silent => {}
    }
}

fn into_raw_slice<T>(items: Vec<T>) -> (*mut T, c_long) {
    let len = items.len() as c_long;
    let ptr = Box::into_raw(items.into_boxed_slice()) as *mut T;
    (ptr, len)
}

unsafe fn from_raw_slice<T>(ptr: *mut T, len: c_long) -> Box<[T]> {
    unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len as usize)) }
}

fn build(value: &Value) -> CommandResponse {
    let mut response = CommandResponse::default();
    match value {
        Value::Nil => response.response_type = ResponseType::Null as u32,
        Value::Okay => response.response_type = ResponseType::Ok as u32,
        Value::Int(i) => {
            response.response_type = ResponseType::Int as u32;
            response.int_value = *i;
        }
        Value::Float(x) => {
            response.response_type = ResponseType::Float as u32;
            response.float_value = *x;
        }
        Value::Bool(b) => {
            response.response_type = ResponseType::Bool as u32;
            response.bool_value = *b;
        }
        Value::String(raw) => {
            response.response_type = ResponseType::String as u32;
            let (ptr, len) = into_raw_slice(raw.to_vec());
            response.string_value = ptr as *mut _;
            response.string_value_len = len;
        }
        Value::Array(items) => {
            response.response_type = ResponseType::Array as u32;
            let (ptr, len) = into_raw_slice(items.iter().map(build).collect());
            response.array_value = ptr;
            response.array_value_len = len;
        }
        Value::Set(items) => {
            response.response_type = ResponseType::Sets as u32;
            let (ptr, len) = into_raw_slice(items.iter().map(build).collect());
            response.sets_value = ptr;
            response.sets_value_len = len;
        }
        Value::Map(entries) => {
            response.response_type = ResponseType::Map as u32;
            let entries = entries
                .iter()
                .map(|(k, v)| CommandResponse {
                    map_key: Box::into_raw(Box::new(build(k))),
                    map_value: Box::into_raw(Box::new(build(v))),
                    ..Default::default()
                })
                .collect();
            let (ptr, len) = into_raw_slice(entries);
            response.array_value = ptr;
            response.array_value_len = len;
        }
    }
    response
}

fn allocate(value: &Value) -> *mut CommandResponse {
    Box::into_raw(Box::new(build(value)))
}

unsafe fn free_children(response: &mut CommandResponse) {
    match ResponseType::try_from(response.response_type) {
        Ok(ResponseType::String) => {
            drop(unsafe {
                from_raw_slice(response.string_value as *mut u8, response.string_value_len)
            });
        }
        Ok(ResponseType::Array) => {
            let mut items = unsafe { from_raw_slice(response.array_value, response.array_value_len) };
            for item in items.iter_mut() {
                unsafe { free_children(item) };
            }
        }
        Ok(ResponseType::Sets) => {
            let mut items = unsafe { from_raw_slice(response.sets_value, response.sets_value_len) };
            for item in items.iter_mut() {
                unsafe { free_children(item) };
            }
        }
        Ok(ResponseType::Map) => {
            let entries = unsafe { from_raw_slice(response.array_value, response.array_value_len) };
            for entry in entries.iter() {
                unsafe {
                    free_response(entry.map_key);
                    free_response(entry.map_value);
                }
            }
        }
        _ => {}
    }
}

unsafe fn free_response(response: *mut CommandResponse) {
    if response.is_null() {
        return;
    }
    let mut response = unsafe { Box::from_raw(response) };
    unsafe { free_children(&mut response) };
}
