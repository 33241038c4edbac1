// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::ffi::{CStr, c_char};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, trace};

use crate::engine::{NativeEngine, RequestType};
use crate::errors::BridgeError;
use crate::ffi::{CommandResponse, RequestErrorKind};
use crate::pinning::{CorrelationToken, PinnedSlots};
use crate::registry::ClientHandle;
use crate::response::{NativeResponse, Value};
use crate::slot::{CallResult, Completion, DeliverySlot};

static PENDING_CALLS: OnceLock<PinnedSlots<DeliverySlot>> = OnceLock::new();

/// Every delivery slot currently awaiting its native completion.
pub fn pending_calls() -> &'static PinnedSlots<DeliverySlot> {
    PENDING_CALLS.get_or_init(PinnedSlots::new)
}

/// A command issued to the native engine, awaiting its result.
///
/// Dropping a pending call before it settled abandons the slot; the
/// completion that arrives later releases the pin.
pub struct PendingCall {
    token: CorrelationToken,
    slot: Arc<DeliverySlot>,
    receiver: oneshot::Receiver<CallResult>,
    settled: bool,
}

impl PendingCall {
    /// Pins a fresh delivery slot and starts the command. No lock is held
    /// while the engine runs, so it may complete from inside `issue_command`.
    pub fn issue(
        engine: &Arc<dyn NativeEngine>,
        handle: ClientHandle,
        request_type: RequestType,
        args: &[&[u8]],
    ) -> Self {
        let (slot, receiver) = DeliverySlot::new(engine.clone());
        let slot = Arc::new(slot);
        let token = pending_calls().pin(slot.clone());

        debug!(%token, %handle, %request_type, args = args.len(), "issue command");
        engine.issue_command(handle, token, request_type, args);

        PendingCall {
            token,
            slot,
            receiver,
            settled: false,
        }
    }

    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// Waits for the result, or until `timeout` elapses.
    pub async fn wait(mut self, timeout: Option<Duration>) -> CallResult {
        let received = match timeout {
            None => (&mut self.receiver).await.ok(),
            Some(duration) => match tokio::time::timeout(duration, &mut self.receiver).await {
                Ok(received) => received.ok(),
                Err(_) => {
                    if self.slot.abandon() {
                        // the completion will unpin
                        self.settled = true;
                        debug!(token = %self.token, ?duration, "request timed out");
                        return Err(BridgeError::Timeout(format!(
                            "no response within {:?}",
                            duration
                        )));
                    }
                    // completed while the timer fired
                    self.receiver.try_recv().ok()
                }
            },
        };

        pending_calls().unpin(self.token);
        self.settled = true;

        received.unwrap_or_else(|| {
            Err(BridgeError::Request(
                "delivery slot dropped without a result".to_string(),
            ))
        })
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.slot.abandon() {
            debug!(token = %self.token, "pending call dropped before completion");
        } else {
            pending_calls().unpin(self.token);
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("token", &self.token)
            .field("slot", &self.slot)
            .field("settled", &self.settled)
            .finish()
    }
}

fn settle(token: CorrelationToken, slot: &DeliverySlot, result: CallResult) {
    match slot.complete(result) {
        Ok(Completion::Delivered) => trace!(%token, "result delivered"),
        Ok(Completion::Abandoned) => {
            debug!(%token, "caller gone, releasing pin");
            pending_calls().unpin(token);
        }
        Err(e) => error!(%token, error = %e, "duplicate completion ignored"),
    }
}

/// # Safety
///
/// See [`crate::ffi::tether_on_succeeded`].
pub(crate) unsafe fn complete_succeeded(token: CorrelationToken, response: *mut CommandResponse) {
    let Some(slot) = pending_calls().resolve(token) else {
        // the engine that allocated it is only known through the slot
        if response.is_null() {
            error!(%token, "success callback for unknown token, dropped");
        } else {
            error!(%token, ?response, "success callback for unknown token, response leaked");
        }
        return;
    };

    let result = match unsafe { NativeResponse::from_raw(response, slot.engine().clone()) } {
        // released when the guard goes out of scope
        Some(response) => response.decode(),
        None => Ok(Value::Nil),
    };
    settle(token, &slot, result);
}

/// # Safety
///
/// See [`crate::ffi::tether_on_failed`].
pub(crate) unsafe fn complete_failed(token: CorrelationToken, message: *const c_char, kind: u32) {
    let message = if message.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(message) }
            .to_string_lossy()
            .into_owned()
    };

    let Some(slot) = pending_calls().resolve(token) else {
        error!(%token, %message, "failure callback for unknown token, dropped");
        return;
    };

    let kind = RequestErrorKind::from(kind);
    settle(token, &slot, Err(BridgeError::from_native(kind, message)));
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::ffi::CString;

    use tracing_test::traced_test;

    use crate::ffi::ResponseType;
    use crate::slot::tests::idle_engine;

    fn issue() -> PendingCall {
        PendingCall::issue(
            &idle_engine(),
            ClientHandle::from_raw(1),
            RequestType(7),
            &[b"key".as_slice()],
        )
    }

    fn boxed_int(i: i64) -> *mut CommandResponse {
        Box::into_raw(Box::new(CommandResponse {
            response_type: ResponseType::Int as u32,
            int_value: i,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_success_round_trip() {
        let call = issue();
        let token = call.token();
        assert!(pending_calls().is_pinned(token));

        unsafe { complete_succeeded(token, boxed_int(42)) };

        assert_eq!(call.wait(None).await, Ok(Value::Int(42)));
        assert!(!pending_calls().is_pinned(token));
    }

    #[tokio::test]
    async fn test_null_response_is_nil() {
        let call = issue();
        let token = call.token();
        unsafe { complete_succeeded(token, std::ptr::null_mut()) };
        assert_eq!(call.wait(None).await, Ok(Value::Nil));
    }

    #[tokio::test]
    async fn test_failure_maps_kind() {
        let call = issue();
        let token = call.token();

        let message = CString::new("EXECABORT Transaction discarded").unwrap();
        unsafe { complete_failed(token, message.as_ptr(), RequestErrorKind::ExecAbort as u32) };

        assert_eq!(
            call.wait(None).await,
            Err(BridgeError::ExecAbort(
                "EXECABORT Transaction discarded".to_string()
            ))
        );
        assert!(!pending_calls().is_pinned(token));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_timeout_then_late_completion() {
        let call = issue();
        let token = call.token();

        let result = call.wait(Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(BridgeError::Timeout(_))));

        // still pinned until the native side signals
        assert!(pending_calls().is_pinned(token));

        unsafe { complete_succeeded(token, boxed_int(1)) };
        assert!(!pending_calls().is_pinned(token));
        assert!(logs_contain("caller gone, releasing pin"));
    }

    #[tokio::test]
    async fn test_completion_before_timeout() {
        let call = issue();
        let token = call.token();
        unsafe { complete_failed(token, std::ptr::null(), RequestErrorKind::Timeout as u32) };
        assert_eq!(
            call.wait(Some(Duration::from_secs(5))).await,
            Err(BridgeError::Timeout(String::new()))
        );
        assert!(!pending_calls().is_pinned(token));
    }

    #[test]
    fn test_drop_before_completion() {
        let call = issue();
        let token = call.token();
        drop(call);

        assert!(pending_calls().is_pinned(token));
        unsafe { complete_failed(token, std::ptr::null(), 3) };
        assert!(!pending_calls().is_pinned(token));
    }

    #[test]
    fn test_drop_after_completion() {
        let call = issue();
        let token = call.token();
        unsafe { complete_succeeded(token, boxed_int(3)) };

        // delivered but never consumed: dropping the call unpins
        drop(call);
        assert!(!pending_calls().is_pinned(token));
    }

    #[test]
    #[traced_test]
    fn test_unknown_token_is_dropped() {
        let token = CorrelationToken::from_raw(usize::MAX);
        unsafe { complete_failed(token, std::ptr::null(), 0) };
        assert!(logs_contain("failure callback for unknown token"));

        unsafe { complete_succeeded(token, std::ptr::null_mut()) };
        assert!(logs_contain("success callback for unknown token, dropped"));

        // ownership is not taken: the response stays with the caller
        let response = boxed_int(9);
        unsafe { complete_succeeded(token, response) };
        assert!(logs_contain("response leaked"));
        drop(unsafe { Box::from_raw(response) });
    }

    #[tokio::test]
    #[traced_test]
    async fn test_completion_after_unpin_is_reported() {
        let call = issue();
        let token = call.token();
        unsafe { complete_succeeded(token, boxed_int(1)) };
        assert_eq!(call.wait(None).await, Ok(Value::Int(1)));

        // a second success after the caller unpinned
        let late = boxed_int(2);
        unsafe { complete_succeeded(token, late) };
        assert!(logs_contain("response leaked"));
        drop(unsafe { Box::from_raw(late) });
    }

    #[tokio::test]
    #[traced_test]
    async fn test_duplicate_completion_ignored() {
        let call = issue();
        let token = call.token();

        unsafe { complete_succeeded(token, boxed_int(1)) };
        unsafe { complete_succeeded(token, boxed_int(2)) };
        assert!(logs_contain("duplicate completion ignored"));

        assert_eq!(call.wait(None).await, Ok(Value::Int(1)));
    }
}
