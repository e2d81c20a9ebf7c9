//! Protocol session
//!
//! One session per logical endpoint: it owns its correlation table, its
//! dispatcher (and through it the transaction ledger), and its stream.
//! Nothing else mutates those. The event loop answers inbound calls,
//! routes responses to their waiting callers, and on stream closure cancels
//! everything still in flight.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::correlation::{CallOutcome, CorrelationTable};
use crate::dispatch::Dispatcher;
use crate::error::OcppError;
use crate::frame::OcppMessage;
use crate::stream::MessageStream;

/// Clonable handle for issuing calls on a running session
#[derive(Clone)]
pub struct SessionHandle {
    identity: String,
    calls: CorrelationTable,
}

impl SessionHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Send a call and await its settled outcome
    pub async fn call(&self, action: &str, payload: Value) -> CallOutcome {
        self.calls.send(action, payload).await
    }

    /// Calls currently awaiting a response
    pub async fn pending_calls(&self) -> usize {
        self.calls.pending_count().await
    }
}

enum Event {
    Inbound(Result<Option<OcppMessage>, OcppError>),
    Outbound(Option<OcppMessage>),
}

/// The unit of protocol state for one endpoint
pub struct Session<S: MessageStream> {
    identity: String,
    stream: S,
    calls: CorrelationTable,
    dispatcher: Dispatcher,
    outgoing_rx: mpsc::Receiver<OcppMessage>,
}

impl<S: MessageStream> Session<S> {
    /// Build a session over an already-connected stream
    pub fn new(config: &SessionConfig, stream: S, dispatcher: Dispatcher) -> (Self, SessionHandle) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(64);
        let calls = CorrelationTable::new(outgoing_tx, config.call_timeout);

        let handle = SessionHandle {
            identity: config.identity.clone(),
            calls: calls.clone(),
        };

        (
            Self {
                identity: config.identity.clone(),
                stream,
                calls,
                dispatcher,
                outgoing_rx,
            },
            handle,
        )
    }

    /// Drive the session until the stream closes or fails.
    ///
    /// Whatever the outcome, every pending call is settled (as `Cancelled`)
    /// before this returns; a failed session never takes anything else down.
    pub async fn run(mut self) -> Result<(), OcppError> {
        info!(identity = %self.identity, "session started");
        let result = self.pump().await;

        self.calls.cancel_all().await;
        self.stream.close().await;

        match &result {
            Ok(()) => info!(identity = %self.identity, "session closed"),
            Err(e) => warn!(identity = %self.identity, error = %e, "session failed"),
        }
        result
    }

    async fn pump(&mut self) -> Result<(), OcppError> {
        loop {
            let event = tokio::select! {
                inbound = self.stream.receive() => Event::Inbound(inbound),
                outbound = self.outgoing_rx.recv() => Event::Outbound(outbound),
            };

            match event {
                Event::Inbound(Ok(Some(OcppMessage::Call(call)))) => {
                    let response = self.dispatcher.dispatch(&call);
                    self.stream.send(response).await?;
                }
                Event::Inbound(Ok(Some(OcppMessage::CallResult(result)))) => {
                    self.calls.resolve(&result.unique_id, Ok(result.payload)).await;
                }
                Event::Inbound(Ok(Some(OcppMessage::CallError(error)))) => {
                    self.calls
                        .resolve(
                            &error.unique_id,
                            Err(OcppError::Remote {
                                code: error.error_code,
                                description: error.error_description,
                                details: error.error_details,
                            }),
                        )
                        .await;
                }
                Event::Inbound(Ok(None)) => return Ok(()),
                Event::Inbound(Err(e)) if e.is_framing() => {
                    // Reject the message, keep the stream
                    warn!(identity = %self.identity, error = %e, "rejecting malformed frame");
                }
                Event::Inbound(Err(e)) => return Err(e),
                Event::Outbound(Some(msg)) => self.stream.send(msg).await?,
                // All call handles dropped; nothing left to transmit
                Event::Outbound(None) => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::frame::{Call, OcppMessage};
    use crate::stream::ChannelStream;
    use std::time::Duration;

    fn csms_session(
        stream: ChannelStream,
    ) -> (Session<ChannelStream>, SessionHandle) {
        let config = SessionConfig::new("CP_1").with_call_timeout(Duration::from_secs(1));
        let dispatcher = Dispatcher::central_system(
            config.allowed_tokens.clone(),
            config.heartbeat_interval,
        );
        Session::new(&config, stream, dispatcher)
    }

    #[tokio::test]
    async fn test_inbound_call_is_answered() {
        let (server_side, mut client_side) = ChannelStream::pair(8);
        let (session, _handle) = csms_session(server_side);
        let task = tokio::spawn(session.run());

        let call = Call::heartbeat().unwrap();
        let id = call.unique_id.clone();
        client_side
            .send(OcppMessage::Call(call))
            .await
            .unwrap();

        match client_side.receive().await.unwrap() {
            Some(OcppMessage::CallResult(result)) => {
                assert_eq!(result.unique_id, id);
                assert!(result.payload["currentTime"].is_string());
            }
            other => panic!("expected CallResult, got {:?}", other),
        }

        client_side.close().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_cancels_pending_calls() {
        let (server_side, mut client_side) = ChannelStream::pair(8);
        let config = SessionConfig::new("CP_1").with_call_timeout(Duration::from_secs(30));
        let (session, handle) =
            Session::new(&config, server_side, Dispatcher::charge_point());
        let task = tokio::spawn(session.run());

        let pending =
            tokio::spawn(async move { handle.call("Heartbeat", serde_json::json!({})).await });

        // Swallow the outbound call, then hang up without answering
        assert!(matches!(
            client_side.receive().await.unwrap(),
            Some(OcppMessage::Call(_))
        ));
        client_side.close().await;

        assert!(matches!(
            pending.await.unwrap(),
            Err(OcppError::Cancelled)
        ));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_session_usable_after_call_timeout() {
        let (server_side, mut client_side) = ChannelStream::pair(8);
        let config = SessionConfig::new("CP_1").with_call_timeout(Duration::from_millis(200));
        let (session, handle) =
            Session::new(&config, server_side, Dispatcher::charge_point());
        let task = tokio::spawn(session.run());

        let result = handle.call("Heartbeat", serde_json::json!({})).await;
        assert!(matches!(result, Err(OcppError::Timeout)));
        assert_eq!(handle.pending_calls().await, 0);

        // Drain the timed-out call and answer it late: must go nowhere
        let stale_id = match client_side.receive().await.unwrap() {
            Some(OcppMessage::Call(call)) => call.unique_id,
            other => panic!("expected Call, got {:?}", other),
        };
        client_side
            .send(OcppMessage::CallResult(
                crate::frame::CallResult::new(&stale_id, serde_json::json!({"late": true})).unwrap(),
            ))
            .await
            .unwrap();

        // A later call on the same session still works
        let h = handle.clone();
        let second = tokio::spawn(async move { h.call("Heartbeat", serde_json::json!({})).await });

        let live_id = match client_side.receive().await.unwrap() {
            Some(OcppMessage::Call(call)) => call.unique_id,
            other => panic!("expected Call, got {:?}", other),
        };
        assert_ne!(live_id, stale_id);
        client_side
            .send(OcppMessage::CallResult(
                crate::frame::CallResult::new(&live_id, serde_json::json!({"ok": true})).unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(second.await.unwrap().unwrap()["ok"], true);

        client_side.close().await;
        task.await.unwrap().unwrap();
    }
}
