//! Connection configuration
//!
//! Holds everything needed to reach an Exasol cluster: host (or an IPv4
//! host range), port, credentials, optional TLS policy, timeouts, and
//! driver behavior toggles.
//!
//! Cluster nodes are commonly addressed as a range, e.g.
//! `10.0.2.11..14`, which expands to the four node addresses and is tried
//! in random order until one completes the handshake.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::error::{Error, Result};
use crate::transport::{Transport, TlsPolicy};

/// Default Exasol websocket port
pub const DEFAULT_PORT: u16 = 8563;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Factory for substituting a custom [`Transport`] implementation,
/// primarily for test doubles.
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// Connection configuration for Exasol.
///
/// # Examples
///
/// ```rust
/// use exasol_rs::Config;
/// use std::time::Duration;
///
/// let config = Config::new("localhost", 8563, "sys", "exasol")
///     .query_timeout(Duration::from_secs(300))
///     .client_name("etl-loader");
/// ```
#[derive(Clone)]
pub struct Config {
    /// Host to connect to; either a plain hostname/IP or an IPv4 range
    /// of the form `a.b.c.x..y`
    pub host: String,
    /// Port to connect to
    pub port: u16,
    /// Username for authentication
    pub username: String,
    /// Password for authentication (stored temporarily)
    password: String,
    /// TLS policy; presence selects `wss://` over `ws://`
    pub tls: Option<TlsPolicy>,
    /// Client application name reported at login
    pub client_name: String,
    /// Client application version reported at login
    pub client_version: String,
    /// Timeout for the socket + websocket handshake
    pub connect_timeout: Duration,
    /// Per-query timeout; zero disables. Sent to the server as the
    /// `queryTimeout` attribute and applied locally to bulk round-trips.
    pub query_timeout: Duration,
    /// When set, server errors are returned but not logged at error level
    pub suppress_errors: bool,
    /// Whether prepared statements are kept in the session cache
    pub cache_prepared_statements: bool,
    /// Custom transport factory, used by tests to substitute a double
    pub transport: Option<TransportFactory>,
}

impl Config {
    /// Create a new configuration
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            tls: None,
            client_name: String::new(),
            client_version: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            query_timeout: Duration::ZERO,
            suppress_errors: false,
            cache_prepared_statements: true,
            transport: None,
        }
    }

    /// Enable TLS with the given policy; the control channel then uses
    /// `wss://` instead of `ws://`
    pub fn tls(mut self, policy: TlsPolicy) -> Self {
        self.tls = Some(policy);
        self
    }

    /// Set the client application name reported at login
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Set the client application version reported at login
    pub fn client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the query timeout
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Legacy whole-second timeout, kept for configurations written
    /// against older driver versions. Maps onto [`Config::query_timeout`].
    pub fn timeout_secs(mut self, seconds: u32) -> Self {
        self.query_timeout = Duration::from_secs(seconds as u64);
        self
    }

    /// Suppress error-level logging of server errors
    pub fn suppress_errors(mut self, suppress: bool) -> Self {
        self.suppress_errors = suppress;
        self
    }

    /// Enable or disable the prepared-statement cache
    pub fn cache_prepared_statements(mut self, enabled: bool) -> Self {
        self.cache_prepared_statements = enabled;
        self
    }

    /// Substitute a custom transport (test doubles)
    pub fn transport_factory(mut self, factory: TransportFactory) -> Self {
        self.transport = Some(factory);
        self
    }

    /// Get the password (for authentication)
    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// Set the password
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    /// The websocket URL scheme implied by the TLS policy
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "wss"
        } else {
            "ws"
        }
    }

    /// Candidate hosts for connecting, in attempt order.
    ///
    /// A plain host yields itself. An IPv4 range `a.b.c.x..y` yields the
    /// inclusive list of addresses, shuffled so that connection load
    /// spreads across cluster nodes.
    pub fn candidate_hosts(&self) -> Result<Vec<String>> {
        let mut hosts = expand_host_range(&self.host)?;
        if hosts.len() > 1 {
            hosts.shuffle(&mut rand::thread_rng());
        }
        Ok(hosts)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("client_name", &self.client_name)
            .field("client_version", &self.client_version)
            .field("connect_timeout", &self.connect_timeout)
            .field("query_timeout", &self.query_timeout)
            .field("suppress_errors", &self.suppress_errors)
            .field("cache_prepared_statements", &self.cache_prepared_statements)
            .field("transport", &self.transport.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

/// Expand an IPv4 host range of the form `a.b.c.x..y` into the inclusive
/// address list. Anything not matching that shape passes through as a
/// single-element list.
pub(crate) fn expand_host_range(host: &str) -> Result<Vec<String>> {
    let Some((head, last)) = host.split_once("..") else {
        return Ok(vec![host.to_string()]);
    };

    let octets: Vec<&str> = head.split('.').collect();
    if octets.len() != 4 || last.is_empty() {
        return Ok(vec![host.to_string()]);
    }
    if !octets.iter().all(|o| o.bytes().all(|b| b.is_ascii_digit()))
        || !last.bytes().all(|b| b.is_ascii_digit())
    {
        return Ok(vec![host.to_string()]);
    }

    let prefix = format!("{}.{}.{}", octets[0], octets[1], octets[2]);
    let start: u8 = octets[3]
        .parse()
        .map_err(|_| Error::Config(format!("invalid host range start in {:?}", host)))?;
    let end: u8 = last
        .parse()
        .map_err(|_| Error::Config(format!("invalid host range end in {:?}", host)))?;
    if start > end {
        return Err(Error::Config(format!(
            "host range start {} exceeds end {} in {:?}",
            start, end, host
        )));
    }

    Ok((start..=end)
        .map(|n| format!("{}.{}", prefix, n))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_host_passthrough() {
        assert_eq!(
            expand_host_range("db.example.com").unwrap(),
            vec!["db.example.com"]
        );
        assert_eq!(expand_host_range("10.0.2.15").unwrap(), vec!["10.0.2.15"]);
    }

    #[test]
    fn test_range_expansion() {
        assert_eq!(
            expand_host_range("10.0.2.11..14").unwrap(),
            vec!["10.0.2.11", "10.0.2.12", "10.0.2.13", "10.0.2.14"]
        );
    }

    #[test]
    fn test_single_element_range() {
        assert_eq!(expand_host_range("10.0.2.11..11").unwrap(), vec!["10.0.2.11"]);
    }

    #[test]
    fn test_inverted_range_is_error() {
        assert!(expand_host_range("10.0.2.14..11").is_err());
    }

    #[test]
    fn test_non_range_with_dots_passthrough() {
        // Not four numeric octets before the `..`, so not a range.
        assert_eq!(
            expand_host_range("node..example.com").unwrap(),
            vec!["node..example.com"]
        );
    }

    #[test]
    fn test_candidate_hosts_cover_range() {
        let config = Config::new("192.168.1.1..4", 8563, "sys", "exasol");
        let mut hosts = config.candidate_hosts().unwrap();
        hosts.sort();
        assert_eq!(
            hosts,
            vec!["192.168.1.1", "192.168.1.2", "192.168.1.3", "192.168.1.4"]
        );
    }

    #[test]
    fn test_legacy_timeout_remap() {
        let config = Config::new("localhost", 8563, "sys", "exasol").timeout_secs(30);
        assert_eq!(config.query_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_scheme_follows_tls() {
        let config = Config::new("localhost", 8563, "sys", "exasol");
        assert_eq!(config.scheme(), "ws");

        let config = config.tls(TlsPolicy::new());
        assert_eq!(config.scheme(), "wss");
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = Config::new("localhost", 8563, "sys", "secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }
}
