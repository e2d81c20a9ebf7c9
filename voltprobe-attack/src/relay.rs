//! Transparent interception relay
//!
//! Sits between a charge point and its central system, pumping messages in
//! both directions and applying a transform to each one before forwarding:
//! decode, transform, re-encode, in that order. Per-direction ordering is
//! preserved; nothing is guaranteed across the two directions. Fail-open on
//! transform error (the original message is forwarded), fail-closed on
//! transport error (the link comes down). No successfully decoded message
//! is silently dropped.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{header, HeaderValue},
    },
};
use tracing::{info, warn};

use voltprobe_ocpp::{connect, MessageStream, OcppError, OcppMessage, WsStream, OCPP_SUBPROTOCOL};

use crate::transform::{Direction, Transform};

/// Relay link lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Relaying,
    Closing,
    Closed,
}

/// What a finished link did
#[derive(Debug, Default, Clone)]
pub struct RelayReport {
    pub forwarded_to_central: u64,
    pub forwarded_to_device: u64,
    pub tampered: u64,
    pub transform_faults: u64,
    pub dropped: u64,
}

/// One intercepted connection pair.
///
/// Not a session: it originates no calls of its own, owns neither side's
/// correlation state, and lives only as long as both streams do.
pub struct RelayLink<D: MessageStream, C: MessageStream> {
    device: D,
    central: C,
    transform: Arc<dyn Transform>,
    state: LinkState,
    report: RelayReport,
}

impl<D: MessageStream, C: MessageStream> RelayLink<D, C> {
    pub fn new(device: D, central: C, transform: Arc<dyn Transform>) -> Self {
        Self {
            device,
            central,
            transform,
            state: LinkState::Connecting,
            report: RelayReport::default(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Pump until either side closes, then close the other and report.
    pub async fn run(mut self) -> RelayReport {
        self.state = LinkState::Relaying;
        info!("relay link up");

        loop {
            let (direction, event) = tokio::select! {
                inbound = self.device.receive() => (Direction::DeviceToCentral, inbound),
                inbound = self.central.receive() => (Direction::CentralToDevice, inbound),
            };

            match event {
                Ok(Some(msg)) => {
                    if let Err(e) = self.forward(msg, direction).await {
                        warn!(?direction, error = %e, "forwarding failed, closing link");
                        break;
                    }
                }
                Ok(None) => {
                    info!(?direction, "stream closed");
                    break;
                }
                Err(e) if e.is_framing() => {
                    // Undecodable; dropped, never forwarded blind
                    self.report.dropped += 1;
                    warn!(?direction, error = %e, "dropping undecodable frame");
                }
                Err(e) => {
                    warn!(?direction, error = %e, "transport error, closing link");
                    break;
                }
            }
        }

        self.state = LinkState::Closing;
        self.device.close().await;
        self.central.close().await;
        self.state = LinkState::Closed;

        info!(
            to_central = self.report.forwarded_to_central,
            to_device = self.report.forwarded_to_device,
            tampered = self.report.tampered,
            "relay link down"
        );
        self.report
    }

    async fn forward(&mut self, msg: OcppMessage, direction: Direction) -> Result<(), OcppError> {
        let outgoing = match self.transform.apply(&msg, direction) {
            Ok(transformed) => {
                if transformed != msg {
                    self.report.tampered += 1;
                }
                transformed
            }
            Err(e) => {
                // Fail-open: the original message still goes through
                self.report.transform_faults += 1;
                warn!(?direction, error = %e, "transform fault, forwarding original");
                msg
            }
        };

        let sent = match direction {
            Direction::DeviceToCentral => self.central.send(outgoing).await,
            Direction::CentralToDevice => self.device.send(outgoing).await,
        };

        match sent {
            Ok(()) => {
                match direction {
                    Direction::DeviceToCentral => self.report.forwarded_to_central += 1,
                    Direction::CentralToDevice => self.report.forwarded_to_device += 1,
                }
                Ok(())
            }
            Err(e) => {
                self.report.dropped += 1;
                warn!(?direction, error = %e, "message dropped: destination unreachable");
                Err(e)
            }
        }
    }
}

/// Accept charge points on `listener` and relay each to the real central
/// system at `csms_url`, deriving the identity from the request path.
pub async fn serve(
    listener: TcpListener,
    csms_url: String,
    transform: Arc<dyn Transform>,
) -> Result<(), OcppError> {
    info!(%csms_url, "interception proxy listening");

    loop {
        let (socket, peer) = listener
            .accept()
            .await
            .map_err(|e| OcppError::Transport(e.to_string()))?;
        info!(%peer, "incoming connection");

        let csms_url = csms_url.clone();
        let transform = transform.clone();
        tokio::spawn(async move {
            match accept_link(socket, &csms_url, transform).await {
                Ok(report) => info!(tampered = report.tampered, "link finished"),
                Err(e) => warn!(error = %e, "link setup failed"),
            }
        });
    }
}

async fn accept_link(
    socket: TcpStream,
    csms_url: &str,
    transform: Arc<dyn Transform>,
) -> Result<RelayReport, OcppError> {
    let mut identity = String::new();
    let callback = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        identity = req.uri().path().trim_matches('/').to_string();
        resp.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(OCPP_SUBPROTOCOL),
        );
        Ok(resp)
    };

    let ws = accept_hdr_async(socket, callback)
        .await
        .map_err(|e| OcppError::Transport(e.to_string()))?;
    let device = WsStream::new(ws);
    info!(%identity, "charge point connected, dialing central system");

    let central = connect(csms_url, &identity).await?;
    Ok(RelayLink::new(device, central, transform).run().await)
}
