//! Duplex message streams
//!
//! The core consumes an already-connected stream and a logical peer
//! identity; how the stream came to exist (handshake, TLS) is the caller's
//! business. Two implementations: [`WsStream`] over a tungstenite WebSocket
//! and [`ChannelStream`], an in-memory pair for tests and demos.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        handshake::client::Request,
        http::{header, Uri},
        protocol::WebSocketConfig,
        Message as WsMessage,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use crate::error::OcppError;
use crate::frame::OcppMessage;

/// OCPP 1.6 WebSocket subprotocol
pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// A duplex OCPP message stream.
///
/// `receive` returns `Ok(None)` when the peer closed the stream. A framing
/// error (`err.is_framing()`) rejects one message and leaves the stream
/// usable; any other error is terminal.
pub trait MessageStream: Send {
    fn send(&mut self, msg: OcppMessage) -> impl Future<Output = Result<(), OcppError>> + Send;

    fn receive(&mut self) -> impl Future<Output = Result<Option<OcppMessage>, OcppError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// WebSocket-backed message stream
pub struct WsStream<T> {
    inner: WebSocketStream<T>,
}

impl<T> WsStream<T> {
    pub fn new(inner: WebSocketStream<T>) -> Self {
        Self { inner }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> MessageStream for WsStream<T> {
    async fn send(&mut self, msg: OcppMessage) -> Result<(), OcppError> {
        let bytes = msg.to_bytes()?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        debug!(frame = %text, "sending");
        self.inner
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| OcppError::Transport(e.to_string()))
    }

    async fn receive(&mut self) -> Result<Option<OcppMessage>, OcppError> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(Ok(WsMessage::Text(text))) => {
                    debug!(frame = %text, "received");
                    return OcppMessage::parse(text.as_bytes()).map(Some);
                }
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                    // Pong is produced by tungstenite itself
                    continue;
                }
                Some(Ok(other)) => {
                    warn!(?other, "ignoring non-text frame");
                    continue;
                }
                Some(Err(e)) => return Err(OcppError::Transport(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}

/// Dial a central system, appending the identity to the URL path and
/// negotiating the OCPP subprotocol.
pub async fn connect(
    csms_url: &str,
    identity: &str,
) -> Result<WsStream<MaybeTlsStream<TcpStream>>, OcppError> {
    let url = format!("{}/{}", csms_url.trim_end_matches('/'), identity);
    let uri: Uri = url
        .parse()
        .map_err(|_| OcppError::Transport(format!("invalid url: {}", url)))?;

    let request = Request::builder()
        .uri(&url)
        .header(header::SEC_WEBSOCKET_PROTOCOL, OCPP_SUBPROTOCOL)
        .header(header::HOST, uri.host().unwrap_or("localhost"))
        .body(())
        .map_err(|e| OcppError::Transport(e.to_string()))?;

    let ws_config = WebSocketConfig {
        max_message_size: Some(64 * 1024),
        max_frame_size: Some(16 * 1024),
        ..Default::default()
    };

    let (ws, response) = connect_async_with_config(request, Some(ws_config), false)
        .await
        .map_err(|e| OcppError::Transport(e.to_string()))?;

    let accepted = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok());
    if accepted != Some(OCPP_SUBPROTOCOL) {
        warn!(?accepted, "peer did not accept the {} subprotocol", OCPP_SUBPROTOCOL);
    }

    debug!(%url, "connected");
    Ok(WsStream::new(ws))
}

/// In-memory duplex stream; one half of a cross-wired channel pair
pub struct ChannelStream {
    tx: Option<mpsc::Sender<OcppMessage>>,
    rx: mpsc::Receiver<OcppMessage>,
}

impl ChannelStream {
    /// Create two streams wired to each other
    pub fn pair(capacity: usize) -> (ChannelStream, ChannelStream) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (
            ChannelStream {
                tx: Some(a_tx),
                rx: b_rx,
            },
            ChannelStream {
                tx: Some(b_tx),
                rx: a_rx,
            },
        )
    }
}

impl MessageStream for ChannelStream {
    async fn send(&mut self, msg: OcppMessage) -> Result<(), OcppError> {
        match &self.tx {
            Some(tx) => tx.send(msg).await.map_err(|_| OcppError::TransportClosed),
            None => Err(OcppError::TransportClosed),
        }
    }

    async fn receive(&mut self) -> Result<Option<OcppMessage>, OcppError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Call;

    #[tokio::test]
    async fn test_channel_pair_delivers_in_order() {
        let (mut left, mut right) = ChannelStream::pair(8);

        let m1 = OcppMessage::Call(Call::heartbeat().unwrap());
        let m2 = OcppMessage::Call(Call::authorize("RFID_123").unwrap());
        left.send(m1.clone()).await.unwrap();
        left.send(m2.clone()).await.unwrap();

        assert_eq!(right.receive().await.unwrap(), Some(m1));
        assert_eq!(right.receive().await.unwrap(), Some(m2));
    }

    #[tokio::test]
    async fn test_close_ends_both_directions() {
        let (mut left, mut right) = ChannelStream::pair(8);
        left.close().await;

        assert_eq!(right.receive().await.unwrap(), None);
        assert!(matches!(
            left.send(OcppMessage::Call(Call::heartbeat().unwrap())).await,
            Err(OcppError::TransportClosed)
        ));
    }
}
