//! Error types for the Exasol driver
//!
//! This module defines all error types that can occur during driver
//! operations, from control-channel I/O failures to server-reported SQL
//! errors and bulk side-channel faults.

use std::io;
use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Exasol driver
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid argument passed to a public entry point
    #[error("invalid configuration: {0}")]
    Config(String),

    // =========================================================================
    // Control-Channel Errors
    // =========================================================================
    /// Failed to establish the control channel
    #[error("unable to connect to {url}: {source}")]
    TransportConnect {
        url: String,
        #[source]
        source: TransportError,
    },

    /// Failed to write a request on the control channel
    #[error("unable to send request: {0}")]
    TransportSend(#[source] TransportError),

    /// Failed to read a response from the control channel
    #[error("unable to receive response: {0}")]
    TransportRecv(#[source] TransportError),

    /// The control channel closed abnormally mid-query, which the server
    /// does when a statement is killed by its timeout
    #[error("Server terminated statement")]
    ServerTerminatedStatement,

    /// A response violated the expected wire shape
    #[error("protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Server Errors
    // =========================================================================
    /// The server responded with status != "ok"
    #[error("server error{}: {text}",
        sqlcode.as_deref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    Server {
        text: String,
        sqlcode: Option<String>,
    },

    /// A response arrived without the expected result set
    #[error("response is missing a result set")]
    MissingResultSet,

    /// A query produced a result count other than one
    #[error("expected exactly one result, got {0}")]
    UnexpectedResultCount(u64),

    // =========================================================================
    // Bulk Side-Channel Errors
    // =========================================================================
    /// The binary proxy handshake failed
    #[error("unable to set up proxy: {0}")]
    ProxyHandshake(String),

    /// I/O failure on the proxy socket
    #[error("proxy transfer failed after {bytes} bytes: {source}")]
    ProxyIo {
        bytes: u64,
        #[source]
        source: io::Error,
    },

    /// Malformed HTTP chunk framing on the proxy socket
    #[error("invalid chunk framing: {0}")]
    ProxyFraming(String),

    /// The configured query timeout fired during a bulk transfer
    #[error("bulk transfer timed out")]
    BulkTimeout,
}

impl Error {
    /// Create a server error from the exception block of a response
    pub(crate) fn server(text: impl Into<String>, sqlcode: Option<String>) -> Self {
        Error::Server {
            text: text.into(),
            sqlcode,
        }
    }

    /// Check if this is the server's "Statement handle not found" error,
    /// which is recovered internally by re-preparing once
    pub fn is_stale_statement_handle(&self) -> bool {
        matches!(self, Error::Server { text, .. } if text.contains("Statement handle not found"))
    }

    /// Check if this is a proxy connect refusal observed before any bytes
    /// moved. The server occasionally refuses the very first callback into
    /// the proxy it just announced; that attempt is safe to repeat.
    pub fn is_retryable_proxy_connect(&self) -> bool {
        matches!(
            self,
            Error::ProxyIo { bytes: 0, source } if source.kind() == io::ErrorKind::ConnectionRefused
        )
    }
}
