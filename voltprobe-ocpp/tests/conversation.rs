//! End-to-end charge point / central system conversation over in-memory
//! streams, following the classic 1.6 charging flow: boot, authorize,
//! start, meter updates, stop.

use std::time::Duration;

use voltprobe_ocpp::{
    Call, ChannelStream, Dispatcher, OcppError, Session, SessionConfig, SessionHandle,
};

fn spawn_pair() -> (SessionHandle, tokio::task::JoinHandle<()>) {
    let (cp_stream, csms_stream) = ChannelStream::pair(16);

    let config = SessionConfig::new("CP_1").with_call_timeout(Duration::from_secs(2));

    let csms_dispatcher =
        Dispatcher::central_system(config.allowed_tokens.clone(), config.heartbeat_interval);
    let (csms_session, _csms_handle) = Session::new(&config, csms_stream, csms_dispatcher);

    let (cp_session, cp_handle) = Session::new(&config, cp_stream, Dispatcher::charge_point());

    let join = tokio::spawn(async move {
        let _ = tokio::join!(csms_session.run(), cp_session.run());
    });

    (cp_handle, join)
}

#[tokio::test]
async fn test_full_charging_conversation() {
    let (cp, _join) = spawn_pair();

    // Boot
    let boot_call = Call::boot_notification("GreenCharge", "Falcon").unwrap();
    let boot = cp.call(&boot_call.action, boot_call.payload).await.unwrap();
    assert_eq!(boot["status"], "Accepted");
    assert_eq!(boot["interval"], 10);

    // Authorize with an allow-listed token
    let auth_call = Call::authorize("RFID_123").unwrap();
    let auth = cp.call(&auth_call.action, auth_call.payload).await.unwrap();
    assert_eq!(auth["idTagInfo"]["status"], "Accepted");

    // Start
    let start_call = Call::start_transaction(1, "RFID_123", 0).unwrap();
    let start = cp.call(&start_call.action, start_call.payload).await.unwrap();
    assert_eq!(start["idTagInfo"]["status"], "Accepted");
    let tx_id = start["transactionId"].as_i64().unwrap();

    // Two meter updates
    for wh in [700, 1400] {
        let mv_call = Call::meter_values(1, Some(tx_id), wh).unwrap();
        cp.call(&mv_call.action, mv_call.payload).await.unwrap();
    }

    // Stop; billed from the last update, the stop reading is advisory
    let stop_call = Call::stop_transaction(tx_id, 1400, "RFID_123").unwrap();
    let stop = cp.call(&stop_call.action, stop_call.payload).await.unwrap();
    assert_eq!(stop["idTagInfo"]["status"], "Accepted");

    // A replayed stop is rejected, not crashed on
    let replay = Call::stop_transaction(tx_id, 1400, "RFID_123").unwrap();
    let stop = cp.call(&replay.action, replay.payload).await.unwrap();
    assert_eq!(stop["idTagInfo"]["status"], "Invalid");
}

#[tokio::test]
async fn test_unauthorized_token_is_rejected() {
    let (cp, _join) = spawn_pair();

    let auth_call = Call::authorize("RFID_999").unwrap();
    let auth = cp.call(&auth_call.action, auth_call.payload).await.unwrap();
    assert_eq!(auth["idTagInfo"]["status"], "Invalid");
}

#[tokio::test]
async fn test_unknown_action_surfaces_as_remote_error() {
    let (cp, _join) = spawn_pair();

    let result = cp
        .call("GetCompositeSchedule", serde_json::json!({}))
        .await;
    assert!(matches!(result, Err(OcppError::Remote { .. })));
}
