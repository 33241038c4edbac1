// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use tether_pubsub::PubSubError;
use thiserror::Error;

use crate::ffi::RequestErrorKind;

/// Error returned to the caller of a bridged request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    // Reported by the native engine
    #[error("request error: {0}")]
    Request(String),
    #[error("exec abort error: {0}")]
    ExecAbort(String),
    #[error("timeout error: {0}")]
    Timeout(String),
    #[error("disconnect error: {0}")]
    Disconnect(String),

    // Client lifecycle
    #[error("closing error: {0}")]
    Closing(String),
    #[error("connection error: {0}")]
    Connection(String),

    // Local failures
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("pubsub error: {0}")]
    PubSub(#[from] PubSubError),
}

impl BridgeError {
    /// Maps a native error kind 1:1 onto the error taxonomy.
    pub fn from_native(kind: RequestErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            RequestErrorKind::Unspecified => BridgeError::Request(message),
            RequestErrorKind::ExecAbort => BridgeError::ExecAbort(message),
            RequestErrorKind::Timeout => BridgeError::Timeout(message),
            RequestErrorKind::Disconnect => BridgeError::Disconnect(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_native() {
        assert_eq!(
            BridgeError::from_native(RequestErrorKind::Unspecified, "wrong type"),
            BridgeError::Request("wrong type".to_string())
        );
        assert_eq!(
            BridgeError::from_native(RequestErrorKind::ExecAbort, "aborted"),
            BridgeError::ExecAbort("aborted".to_string())
        );
        assert_eq!(
            BridgeError::from_native(RequestErrorKind::Timeout, "slow"),
            BridgeError::Timeout("slow".to_string())
        );
        assert_eq!(
            BridgeError::from_native(RequestErrorKind::Disconnect, "gone"),
            BridgeError::Disconnect("gone".to_string())
        );
    }

    #[test]
    fn test_display() {
        let errors = vec![
            BridgeError::Request("a".to_string()),
            BridgeError::ExecAbort("b".to_string()),
            BridgeError::Timeout("c".to_string()),
            BridgeError::Disconnect("d".to_string()),
            BridgeError::Closing("e".to_string()),
            BridgeError::Connection("f".to_string()),
            BridgeError::InvalidResponse("g".to_string()),
            BridgeError::Configuration("h".to_string()),
            BridgeError::PubSub(PubSubError::QueueClosed),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
        assert_eq!(
            BridgeError::Closing("client closed".to_string()).to_string(),
            "closing error: client closed"
        );
    }
}
