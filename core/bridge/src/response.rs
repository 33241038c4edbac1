// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::ffi::c_long;
use std::fmt::{Display, Formatter};
use std::ptr::NonNull;
use std::sync::Arc;

use bytes::Bytes;

use crate::engine::NativeEngine;
use crate::errors::BridgeError;
use crate::ffi::{CommandResponse, ResponseType};

/// A decoded command response, owned by Rust.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Okay,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(Bytes),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::String(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Okay => f.write_str("OK"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::String(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Array(items) | Value::Set(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

unsafe fn slice_of<'a, T>(ptr: *const T, len: c_long, what: &str) -> Result<&'a [T], BridgeError> {
    if len < 0 {
        return Err(BridgeError::InvalidResponse(format!(
            "negative {} length {}",
            what, len
        )));
    }
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(BridgeError::InvalidResponse(format!(
            "null {} with length {}",
            what, len
        )));
    }
    Ok(unsafe { std::slice::from_raw_parts(ptr, len as usize) })
}

unsafe fn decode_child(ptr: *const CommandResponse, what: &str) -> Result<Value, BridgeError> {
    match unsafe { ptr.as_ref() } {
        Some(child) => unsafe { decode_response(child) },
        None => Err(BridgeError::InvalidResponse(format!("null {}", what))),
    }
}

/// Copies a native response tree into a [`Value`].
///
/// # Safety
///
/// Every pointer reachable from `response` must be valid for reads of the
/// length it is paired with.
pub unsafe fn decode_response(response: &CommandResponse) -> Result<Value, BridgeError> {
    let response_type = ResponseType::try_from(response.response_type).map_err(|raw| {
        BridgeError::InvalidResponse(format!("unknown response type {}", raw))
    })?;

    let value = match response_type {
        ResponseType::Null => Value::Nil,
        ResponseType::Ok => Value::Okay,
        ResponseType::Int => Value::Int(response.int_value),
        ResponseType::Float => Value::Float(response.float_value),
        ResponseType::Bool => Value::Bool(response.bool_value),
        ResponseType::String => {
            let raw = unsafe {
                slice_of(
                    response.string_value as *const u8,
                    response.string_value_len,
                    "string",
                )?
            };
            Value::String(Bytes::copy_from_slice(raw))
        }
        ResponseType::Array => {
            let items = unsafe { slice_of(response.array_value, response.array_value_len, "array")? };
            let decoded = items
                .iter()
                .map(|item| unsafe { decode_response(item) })
                .collect::<Result<Vec<_>, _>>()?;
            Value::Array(decoded)
        }
        ResponseType::Map => {
            let entries = unsafe { slice_of(response.array_value, response.array_value_len, "map")? };
            let mut decoded = Vec::with_capacity(entries.len());
            for entry in entries {
                let key = unsafe { decode_child(entry.map_key, "map key")? };
                let value = unsafe { decode_child(entry.map_value, "map value")? };
                decoded.push((key, value));
            }
            Value::Map(decoded)
        }
        ResponseType::Sets => {
            let items = unsafe { slice_of(response.sets_value, response.sets_value_len, "set")? };
            let decoded = items
                .iter()
                .map(|item| unsafe { decode_response(item) })
                .collect::<Result<Vec<_>, _>>()?;
            Value::Set(decoded)
        }
    };

    Ok(value)
}

/// A response still owned by the native allocator.
///
/// The response is handed back to the engine exactly once, when the guard is
/// dropped, whether or not it was decoded successfully.
pub struct NativeResponse {
    ptr: NonNull<CommandResponse>,
    engine: Arc<dyn NativeEngine>,
}

impl NativeResponse {
    /// Takes ownership of a native response. Returns `None` for a null
    /// pointer, which is reported as [`Value::Nil`].
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a response allocated by `engine` that was not
    /// released yet.
    pub unsafe fn from_raw(ptr: *mut CommandResponse, engine: Arc<dyn NativeEngine>) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| NativeResponse { ptr, engine })
    }

    pub fn decode(&self) -> Result<Value, BridgeError> {
        // the tree stays valid until the guard is dropped
        unsafe { decode_response(self.ptr.as_ref()) }
    }
}

impl Drop for NativeResponse {
    fn drop(&mut self) {
        unsafe { self.engine.release_response(self.ptr.as_ptr()) }
    }
}

impl std::fmt::Debug for NativeResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeResponse")
            .field("ptr", &self.ptr)
            .finish()
    }
}
