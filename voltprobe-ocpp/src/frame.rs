//! OCPP JSON-RPC envelope framing
//!
//! OCPP runs JSON-RPC style framing over WebSocket with positional arrays:
//! - CALL: [2, uniqueId, action, payload]
//! - CALLRESULT: [3, uniqueId, payload]
//! - CALLERROR: [4, uniqueId, errorCode, errorDescription, errorDetails]
//!
//! The codec performs no semantic validation of action names or payload
//! schemas; that is the dispatcher's job.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::OcppError;
use crate::types::*;

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

/// OCPP error codes (fixed vocabulary)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    FormatViolation,
    GenericError,
    InternalError,
    MessageTypeNotSupported,
    NotImplemented,
    NotSupported,
    OccurrenceConstraintViolation,
    PropertyConstraintViolation,
    ProtocolError,
    SecurityError,
    TypeConstraintViolation,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// OCPP CALL message (request)
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub unique_id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    /// Create a new CALL with an auto-generated unique id
    pub fn new(action: impl Into<String>, payload: impl Serialize) -> Result<Self, OcppError> {
        Ok(Self {
            unique_id: Uuid::new_v4().to_string(),
            action: action.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Create BootNotification call
    pub fn boot_notification(vendor: &str, model: &str) -> Result<Self, OcppError> {
        Self::new(
            "BootNotification",
            BootNotificationRequest {
                charge_point_vendor: vendor.to_string(),
                charge_point_model: model.to_string(),
            },
        )
    }

    /// Create Heartbeat call
    pub fn heartbeat() -> Result<Self, OcppError> {
        Self::new("Heartbeat", HeartbeatRequest {})
    }

    /// Create Authorize call
    pub fn authorize(id_tag: &str) -> Result<Self, OcppError> {
        Self::new(
            "Authorize",
            AuthorizeRequest {
                id_tag: id_tag.to_string(),
            },
        )
    }

    /// Create StartTransaction call
    pub fn start_transaction(
        connector_id: i64,
        id_tag: &str,
        meter_start: i64,
    ) -> Result<Self, OcppError> {
        Self::new(
            "StartTransaction",
            StartTransactionRequest {
                connector_id,
                id_tag: id_tag.to_string(),
                meter_start,
                timestamp: Utc::now(),
            },
        )
    }

    /// Create MeterValues call with one sampled energy reading in Wh
    pub fn meter_values(
        connector_id: i64,
        transaction_id: Option<i64>,
        energy_wh: i64,
    ) -> Result<Self, OcppError> {
        Self::new(
            "MeterValues",
            MeterValuesRequest {
                connector_id,
                transaction_id,
                meter_value: vec![MeterValue {
                    timestamp: Utc::now(),
                    sampled_value: vec![SampledValue {
                        value: energy_wh.to_string(),
                        unit: Some("Wh".to_string()),
                    }],
                }],
            },
        )
    }

    /// Create StopTransaction call
    pub fn stop_transaction(
        transaction_id: i64,
        meter_stop: i64,
        id_tag: &str,
    ) -> Result<Self, OcppError> {
        Self::new(
            "StopTransaction",
            StopTransactionRequest {
                transaction_id,
                meter_stop,
                id_tag: id_tag.to_string(),
                timestamp: Utc::now(),
            },
        )
    }

    /// Serialize to wire format: [2, uniqueId, action, payload]
    pub fn to_bytes(&self) -> Result<Vec<u8>, OcppError> {
        let array = serde_json::json!([
            MessageType::Call as i32,
            &self.unique_id,
            &self.action,
            &self.payload
        ]);
        Ok(serde_json::to_vec(&array)?)
    }

    /// Parse the payload as a specific request type
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, OcppError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// OCPP CALLRESULT message (success response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub unique_id: String,
    pub payload: Value,
}

impl CallResult {
    /// Create a new CALLRESULT answering the given unique id
    pub fn new(unique_id: impl Into<String>, payload: impl Serialize) -> Result<Self, OcppError> {
        Ok(Self {
            unique_id: unique_id.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Serialize to wire format: [3, uniqueId, payload]
    pub fn to_bytes(&self) -> Result<Vec<u8>, OcppError> {
        let array = serde_json::json!([
            MessageType::CallResult as i32,
            &self.unique_id,
            &self.payload
        ]);
        Ok(serde_json::to_vec(&array)?)
    }

    /// Parse the payload as a specific response type
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, OcppError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// OCPP CALLERROR message (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub unique_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    /// Create a new CALLERROR with empty details
    pub fn new(
        unique_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Serialize to wire format: [4, uniqueId, errorCode, errorDescription, errorDetails]
    pub fn to_bytes(&self) -> Result<Vec<u8>, OcppError> {
        let array = serde_json::json!([
            MessageType::CallError as i32,
            &self.unique_id,
            self.error_code.to_string(),
            &self.error_description,
            &self.error_details
        ]);
        Ok(serde_json::to_vec(&array)?)
    }
}

/// Parsed OCPP message (any of the three wire shapes)
#[derive(Debug, Clone, PartialEq)]
pub enum OcppMessage {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl OcppMessage {
    /// Parse an OCPP message from JSON bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, OcppError> {
        let array: Vec<Value> = serde_json::from_slice(bytes)?;

        if array.is_empty() {
            return Err(OcppError::Framing("empty array"));
        }

        let msg_type = array[0]
            .as_i64()
            .ok_or(OcppError::Framing("message type is not an integer"))?;

        match msg_type {
            2 => {
                if array.len() != 4 {
                    return Err(OcppError::Framing("CALL must have 4 elements"));
                }

                let unique_id = array[1]
                    .as_str()
                    .ok_or(OcppError::Framing("unique id is not a string"))?
                    .to_string();

                let action = array[2]
                    .as_str()
                    .ok_or(OcppError::Framing("action is not a string"))?
                    .to_string();

                Ok(OcppMessage::Call(Call {
                    unique_id,
                    action,
                    payload: array[3].clone(),
                }))
            }
            3 => {
                if array.len() != 3 {
                    return Err(OcppError::Framing("CALLRESULT must have 3 elements"));
                }

                let unique_id = array[1]
                    .as_str()
                    .ok_or(OcppError::Framing("unique id is not a string"))?
                    .to_string();

                Ok(OcppMessage::CallResult(CallResult {
                    unique_id,
                    payload: array[2].clone(),
                }))
            }
            4 => {
                if array.len() != 5 {
                    return Err(OcppError::Framing("CALLERROR must have 5 elements"));
                }

                let unique_id = array[1]
                    .as_str()
                    .ok_or(OcppError::Framing("unique id is not a string"))?
                    .to_string();

                let error_code_str = array[2]
                    .as_str()
                    .ok_or(OcppError::Framing("error code is not a string"))?;

                // Unknown codes degrade to GenericError rather than rejecting
                let error_code: ErrorCode =
                    serde_json::from_value(Value::String(error_code_str.to_string()))
                        .unwrap_or(ErrorCode::GenericError);

                let error_description = array[3].as_str().unwrap_or("").to_string();

                Ok(OcppMessage::CallError(CallError {
                    unique_id,
                    error_code,
                    error_description,
                    error_details: array[4].clone(),
                }))
            }
            other => Err(OcppError::UnknownMessageType(other)),
        }
    }

    /// Get the correlation id
    pub fn unique_id(&self) -> &str {
        match self {
            OcppMessage::Call(c) => &c.unique_id,
            OcppMessage::CallResult(r) => &r.unique_id,
            OcppMessage::CallError(e) => &e.unique_id,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, OcppError> {
        match self {
            OcppMessage::Call(c) => c.to_bytes(),
            OcppMessage::CallResult(r) => r.to_bytes(),
            OcppMessage::CallError(e) => e.to_bytes(),
        }
    }
}
