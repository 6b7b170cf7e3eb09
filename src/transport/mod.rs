//! Control-channel transport
//!
//! The session talks to the server through the [`Transport`] trait: a
//! duplex JSON message channel. The default implementation is a WebSocket
//! client; tests substitute scripted doubles via
//! [`Config::transport_factory`](crate::Config::transport_factory).

mod tls;
mod ws;

pub use tls::TlsPolicy;
pub use ws::WsTransport;

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a [`Transport`] implementation
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not establish the channel
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connect timeout elapsed before the handshake completed
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A write failed
    #[error("send failed: {0}")]
    Send(String),

    /// A read failed
    #[error("receive failed: {0}")]
    Recv(String),

    /// The peer dropped the channel without a closing handshake. The
    /// server does this when it kills a statement on timeout.
    #[error("connection closed abnormally")]
    ClosedAbnormally,

    /// Operation attempted before `connect` or after `close`
    #[error("transport is not connected")]
    NotConnected,
}

/// Duplex JSON message channel between session and server
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Establish the channel to `url` (a `ws://` or `wss://` URL),
    /// applying `tls` when the scheme requires it, bounded by `timeout`.
    async fn connect(
        &mut self,
        url: &str,
        tls: Option<&TlsPolicy>,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Serialize and send one JSON message
    async fn send_json(&mut self, value: &serde_json::Value) -> Result<(), TransportError>;

    /// Receive and parse exactly one JSON message
    async fn recv_json(&mut self) -> Result<serde_json::Value, TransportError>;

    /// Toggle write compression on the channel
    fn enable_compression(&mut self, enabled: bool);

    /// Tear the channel down; safe to call more than once
    async fn close(&mut self);
}
