//! Protocol-level error taxonomy
//!
//! Everything local to handling a single message is contained and converted
//! into a protocol response or a log entry; only a closed transport is
//! allowed to terminate a session or relay link.

use serde_json::Value;
use thiserror::Error;

use crate::frame::ErrorCode;

/// Errors in OCPP message handling
#[derive(Debug, Error)]
pub enum OcppError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed envelope: {0}")]
    Framing(&'static str),

    #[error("unknown message type: {0}")]
    UnknownMessageType(i64),

    #[error("remote error: {code:?} - {description}")]
    Remote {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("timeout waiting for response")]
    Timeout,

    #[error("call cancelled")]
    Cancelled,

    #[error("transport closed")]
    TransportClosed,

    #[error("transport error: {0}")]
    Transport(String),
}

impl OcppError {
    /// A framing error rejects one message; the stream stays usable.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            OcppError::Json(_) | OcppError::Framing(_) | OcppError::UnknownMessageType(_)
        )
    }
}
