//! Action dispatch
//!
//! Maps an action name to a handler and guarantees every inbound CALL is
//! answered exactly once: unknown actions get `NotSupported`, malformed
//! payloads get `ProtocolError`, and a handler fault gets `InternalError`.
//! The handler map is built once at construction; there is no global
//! registry.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::frame::{Call, CallError, CallResult, ErrorCode, OcppMessage};
use crate::ledger::{LedgerError, TransactionLedger};
use crate::types::*;

/// Failure inside a handler, converted at the dispatch boundary
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("handler fault: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Payload(e.to_string())
    }
}

/// Capabilities a handler sees: the session's ledger and its configuration
pub struct DispatchContext {
    pub ledger: Mutex<TransactionLedger>,
    pub allowed_tokens: HashSet<String>,
    pub heartbeat_interval: u32,
}

type Handler = Box<dyn Fn(&DispatchContext, &Value) -> Result<Value, HandlerError> + Send + Sync>;

/// Per-session action dispatcher
pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
    context: DispatchContext,
}

fn respond<T: Serialize>(payload: T) -> Result<Value, HandlerError> {
    serde_json::to_value(payload).map_err(|e| HandlerError::Internal(e.to_string()))
}

impl Dispatcher {
    /// Dispatcher with no handlers; everything is answered `NotSupported`
    pub fn empty(context: DispatchContext) -> Self {
        Self {
            handlers: HashMap::new(),
            context,
        }
    }

    /// Charge-point side: no inbound actions are served
    pub fn charge_point() -> Self {
        Self::empty(DispatchContext {
            ledger: Mutex::new(TransactionLedger::new()),
            allowed_tokens: HashSet::new(),
            heartbeat_interval: 0,
        })
    }

    /// Central-system side: the handlers a CSMS answers charge points with
    pub fn central_system(allowed_tokens: HashSet<String>, heartbeat_interval: u32) -> Self {
        let context = DispatchContext {
            ledger: Mutex::new(TransactionLedger::new()),
            allowed_tokens,
            heartbeat_interval,
        };

        Self::empty(context)
            .with_handler("BootNotification", |cx, payload| {
                let req: BootNotificationRequest = serde_json::from_value(payload.clone())?;
                info!(
                    vendor = %req.charge_point_vendor,
                    model = %req.charge_point_model,
                    "boot notification"
                );
                respond(BootNotificationResponse {
                    status: RegistrationStatus::Accepted,
                    current_time: Utc::now(),
                    interval: cx.heartbeat_interval,
                })
            })
            .with_handler("Heartbeat", |_cx, _payload| {
                respond(HeartbeatResponse {
                    current_time: Utc::now(),
                })
            })
            .with_handler("Authorize", |cx, payload| {
                let req: AuthorizeRequest = serde_json::from_value(payload.clone())?;
                let status = if cx.allowed_tokens.contains(&req.id_tag) {
                    AuthorizationStatus::Accepted
                } else {
                    AuthorizationStatus::Invalid
                };
                info!(id_tag = %req.id_tag, ?status, "authorize");
                respond(AuthorizeResponse {
                    id_tag_info: IdTagInfo { status },
                })
            })
            .with_handler("StartTransaction", |cx, payload| {
                let req: StartTransactionRequest = serde_json::from_value(payload.clone())?;
                let transaction_id = cx
                    .ledger
                    .lock()
                    .start(req.meter_start)
                    .map_err(|e| HandlerError::Internal(e.to_string()))?;
                info!(
                    transaction_id,
                    connector_id = req.connector_id,
                    id_tag = %req.id_tag,
                    "transaction started"
                );
                respond(StartTransactionResponse {
                    transaction_id,
                    id_tag_info: IdTagInfo {
                        status: AuthorizationStatus::Accepted,
                    },
                })
            })
            .with_handler("MeterValues", |cx, payload| {
                let req: MeterValuesRequest = serde_json::from_value(payload.clone())?;
                let energy: i64 = req
                    .meter_value
                    .first()
                    .and_then(|mv| mv.sampled_value.first())
                    .ok_or_else(|| HandlerError::Payload("no sampled value".into()))?
                    .value
                    .parse()
                    .map_err(|_| HandlerError::Payload("sampled value is not numeric".into()))?;

                info!(connector_id = req.connector_id, energy_wh = energy, "meter values");

                if let Some(transaction_id) = req.transaction_id {
                    if let Err(LedgerError::UnknownTransaction(id)) =
                        cx.ledger.lock().update(transaction_id, energy)
                    {
                        // Still answered; a stray update must not kill the session
                        warn!(transaction_id = id, "meter update for unknown transaction");
                    }
                }
                respond(MeterValuesResponse {})
            })
            .with_handler("StopTransaction", |cx, payload| {
                let req: StopTransactionRequest = serde_json::from_value(payload.clone())?;
                let status = match cx.ledger.lock().stop(req.transaction_id, req.meter_stop) {
                    Ok(total) => {
                        info!(
                            transaction_id = req.transaction_id,
                            total_wh = total,
                            id_tag = %req.id_tag,
                            "transaction ended"
                        );
                        AuthorizationStatus::Accepted
                    }
                    Err(LedgerError::UnknownTransaction(id)) => {
                        warn!(transaction_id = id, "stop for unknown transaction");
                        AuthorizationStatus::Invalid
                    }
                    Err(e) => return Err(HandlerError::Internal(e.to_string())),
                };
                respond(StopTransactionResponse {
                    id_tag_info: IdTagInfo { status },
                })
            })
    }

    /// Register a handler for an action name
    pub fn with_handler<F>(mut self, action: &str, handler: F) -> Self
    where
        F: Fn(&DispatchContext, &Value) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.handlers.insert(action.to_string(), Box::new(handler));
        self
    }

    /// Answer one inbound call with a CALLRESULT or CALLERROR
    pub fn dispatch(&self, call: &Call) -> OcppMessage {
        let handler = match self.handlers.get(&call.action) {
            Some(h) => h,
            None => {
                warn!(action = %call.action, "no handler for action");
                return OcppMessage::CallError(CallError::new(
                    &call.unique_id,
                    ErrorCode::NotSupported,
                    format!("no handler for {}", call.action),
                ));
            }
        };

        match handler(&self.context, &call.payload) {
            Ok(payload) => OcppMessage::CallResult(CallResult {
                unique_id: call.unique_id.clone(),
                payload,
            }),
            Err(HandlerError::Payload(reason)) => OcppMessage::CallError(CallError::new(
                &call.unique_id,
                ErrorCode::ProtocolError,
                reason,
            )),
            Err(HandlerError::Internal(reason)) => {
                warn!(action = %call.action, %reason, "handler fault");
                OcppMessage::CallError(CallError::new(
                    &call.unique_id,
                    ErrorCode::InternalError,
                    reason,
                ))
            }
        }
    }

    /// Shared handler context (ledger, configuration)
    pub fn context(&self) -> &DispatchContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csms() -> Dispatcher {
        let tokens: HashSet<String> = ["RFID_123".to_string()].into_iter().collect();
        Dispatcher::central_system(tokens, 10)
    }

    fn call(unique_id: &str, action: &str, payload: Value) -> Call {
        Call {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }

    fn result_payload(msg: OcppMessage) -> Value {
        match msg {
            OcppMessage::CallResult(r) => r.payload,
            other => panic!("expected CallResult, got {:?}", other),
        }
    }

    #[test]
    fn test_boot_notification_accepted() {
        let dispatcher = csms();
        let msg = dispatcher.dispatch(&call(
            "1",
            "BootNotification",
            serde_json::json!({"chargePointVendor": "X", "chargePointModel": "Y"}),
        ));

        let payload = result_payload(msg);
        assert_eq!(payload["status"], "Accepted");
        assert_eq!(payload["interval"], 10);
        assert!(payload["currentTime"].is_string());
    }

    #[test]
    fn test_heartbeat_returns_current_time() {
        let dispatcher = csms();
        let msg = dispatcher.dispatch(&call("2", "Heartbeat", serde_json::json!({})));
        assert!(result_payload(msg)["currentTime"].is_string());
    }

    #[test]
    fn test_authorize_outside_allow_set_is_invalid() {
        let dispatcher = csms();

        let msg = dispatcher.dispatch(&call(
            "3",
            "Authorize",
            serde_json::json!({"idTag": "RFID_999"}),
        ));
        assert_eq!(result_payload(msg)["idTagInfo"]["status"], "Invalid");

        let msg = dispatcher.dispatch(&call(
            "4",
            "Authorize",
            serde_json::json!({"idTag": "RFID_123"}),
        ));
        assert_eq!(result_payload(msg)["idTagInfo"]["status"], "Accepted");
    }

    #[test]
    fn test_full_transaction_scenario() {
        let dispatcher = csms();

        let start = Call::start_transaction(1, "RFID_123", 0).unwrap();
        let payload = result_payload(dispatcher.dispatch(&start));
        let tx_id = payload["transactionId"].as_i64().unwrap();

        for wh in [700, 1400] {
            let mv = Call::meter_values(1, Some(tx_id), wh).unwrap();
            result_payload(dispatcher.dispatch(&mv));
        }

        let stop = Call::stop_transaction(tx_id, 1400, "RFID_123").unwrap();
        let payload = result_payload(dispatcher.dispatch(&stop));
        assert_eq!(payload["idTagInfo"]["status"], "Accepted");
        assert!(dispatcher.context().ledger.lock().is_empty());

        // Second stop for the same id is answered Invalid, not a crash
        let stop = Call::stop_transaction(tx_id, 1400, "RFID_123").unwrap();
        let payload = result_payload(dispatcher.dispatch(&stop));
        assert_eq!(payload["idTagInfo"]["status"], "Invalid");
    }

    #[test]
    fn test_meter_values_for_unknown_transaction_still_answered() {
        let dispatcher = csms();
        let mv = Call::meter_values(1, Some(999), 700).unwrap();
        let msg = dispatcher.dispatch(&mv);
        assert!(matches!(msg, OcppMessage::CallResult(_)));
    }

    #[test]
    fn test_unknown_action_not_supported() {
        let dispatcher = csms();
        let msg = dispatcher.dispatch(&call("9", "DiagnosticsStatusNotification", serde_json::json!({})));
        match msg {
            OcppMessage::CallError(e) => {
                assert_eq!(e.unique_id, "9");
                assert_eq!(e.error_code, ErrorCode::NotSupported);
            }
            other => panic!("expected CallError, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload_is_protocol_error() {
        let dispatcher = csms();
        let msg = dispatcher.dispatch(&call(
            "10",
            "Authorize",
            serde_json::json!({"wrongField": true}),
        ));
        match msg {
            OcppMessage::CallError(e) => assert_eq!(e.error_code, ErrorCode::ProtocolError),
            other => panic!("expected CallError, got {:?}", other),
        }
    }

    #[test]
    fn test_charge_point_side_serves_nothing() {
        let dispatcher = Dispatcher::charge_point();
        let msg = dispatcher.dispatch(&call("11", "Reset", serde_json::json!({})));
        assert!(matches!(msg, OcppMessage::CallError(_)));
    }
}
