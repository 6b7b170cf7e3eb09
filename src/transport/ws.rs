//! Default WebSocket transport
//!
//! Wraps `tokio-tungstenite` behind the [`Transport`] trait. One instance
//! carries one control channel; the session never reaches past this type
//! to the socket.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use super::{TlsPolicy, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket control-channel transport
#[derive(Default)]
pub struct WsTransport {
    stream: Option<WsStream>,
    compression: bool,
}

impl WsTransport {
    /// Create a transport that is not yet connected
    pub fn new() -> Self {
        Self::default()
    }

    fn stream_mut(&mut self) -> Result<&mut WsStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

/// Classify a tungstenite read error. Peer resets and mid-stream EOFs are
/// the abnormal-closure shape the session maps to a terminated statement.
fn classify_recv_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;

    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ClosedAbnormally,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::ClosedAbnormally
        }
        WsError::Io(e)
            if matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
            ) =>
        {
            TransportError::ClosedAbnormally
        }
        other => TransportError::Recv(other.to_string()),
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(
        &mut self,
        url: &str,
        tls: Option<&TlsPolicy>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let connector = match tls {
            Some(policy) => {
                let client_config = policy
                    .build_client_config()
                    .map_err(|e| TransportError::Connect(e.to_string()))?;
                Some(Connector::Rustls(Arc::new(client_config)))
            }
            None => Some(Connector::Plain),
        };

        tracing::debug!(url = url, "connecting control channel");
        let dial = connect_async_tls_with_config(url, None, true, connector);
        let (stream, _response) = tokio::time::timeout(timeout, dial)
            .await
            .map_err(|_| TransportError::ConnectTimeout(timeout))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    async fn send_json(&mut self, value: &serde_json::Value) -> Result<(), TransportError> {
        let text = value.to_string();
        self.stream_mut()?
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv_json(&mut self) -> Result<serde_json::Value, TransportError> {
        let stream = self.stream_mut()?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| TransportError::Recv(format!("invalid JSON: {}", e)));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return serde_json::from_slice(&bytes)
                        .map_err(|e| TransportError::Recv(format!("invalid JSON: {}", e)));
                }
                // Keepalive traffic; tungstenite answers pings on flush.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::ClosedAbnormally),
                Some(Err(e)) => return Err(classify_recv_error(e)),
            }
        }
    }

    fn enable_compression(&mut self, enabled: bool) {
        // tungstenite negotiates no permessage-deflate; the flag is kept so
        // the session's post-login disable matches the protocol sequence.
        self.compression = enabled;
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
