//! Exasol session
//!
//! This module provides the main `Connection` type: one websocket control
//! channel, logged in and authenticated, with attribute management, the
//! execute engine, streamed fetching, and the prepared-statement cache.
//!
//! # Example
//!
//! ```rust,no_run
//! use exasol_rs::{Config, Connection};
//!
//! #[tokio::main]
//! async fn main() -> exasol_rs::Result<()> {
//!     let config = Config::new("localhost", 8563, "sys", "exasol");
//!     let conn = Connection::connect(config).await?;
//!
//!     conn.execute("CREATE TABLE t (id INT, val VARCHAR(16))").await?;
//!
//!     let mut rows = conn.fetch("SELECT id, val FROM t ORDER BY id").await?;
//!     while let Some(row) = rows.recv().await {
//!         println!("{:?}", row);
//!     }
//!
//!     conn.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::Engine;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::messages::{
    Attributes, ClosePreparedRequest, CloseResultSetRequest, CreatePreparedData,
    CreatePreparedRequest, DataType, ExecuteData, ExecutePreparedRequest, ExecuteRequest,
    FetchData, FetchRequest, LoginData, LoginRequest, AuthRequest, PlainCommand, Response,
    ResultSetBlock, SessionData, SetAttributesRequest,
};
use crate::row::{transpose, Row, RowProducer, RowStream};
use crate::statement_cache::{PreparedStatement, StatementCache};
use crate::transport::{Transport, TransportError, WsTransport};

/// Driver name reported to the server at login
pub const DRIVER_NAME: &str = "exasol-rs";

/// Page size requested per `fetch` round-trip (the server maximum)
const FETCH_CHUNK_BYTES: u64 = 64 * 1024 * 1024;

/// Cumulative session statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Current number of cached prepared statements
    pub stmt_cache_len: usize,
    /// Number of prepares that could not be served from the cache
    pub stmt_cache_miss: u64,
}

/// Options for [`Connection::execute_with`].
///
/// `binds` is row-major by default; set `columnar_binds` when the data is
/// already laid out one vector per column (the wire form), which skips a
/// transposition.
#[derive(Debug, Default)]
pub struct ExecOptions {
    /// Bind parameter matrix; empty means a plain execute
    pub binds: Vec<Row>,
    /// Schema to resolve unqualified names against
    pub default_schema: Option<String>,
    /// Positional overrides for the server-reported parameter types
    pub data_types: Vec<DataType>,
    /// Whether `binds` is already column-major
    pub columnar_binds: bool,
}

/// Options for [`Connection::fetch_with`]
#[derive(Debug, Default)]
pub struct FetchOptions {
    /// Bind parameters for a single-row bind
    pub binds: Row,
    /// Schema to resolve unqualified names against
    pub default_schema: Option<String>,
}

/// State behind the session mutex: the transport plus everything that
/// must only be touched while holding it
pub(crate) struct SessionInner {
    transport: Box<dyn Transport>,
    cache: StatementCache,
    stats: SessionStats,
}

impl SessionInner {
    async fn recv(&mut self) -> Result<Value> {
        match self.transport.recv_json().await {
            Ok(value) => Ok(value),
            Err(TransportError::ClosedAbnormally) => Err(Error::ServerTerminatedStatement),
            Err(e) => Err(Error::TransportRecv(e)),
        }
    }

    /// One serialized request/response pair. The caller holds the session
    /// mutex for the whole exchange, which is what serializes commands.
    async fn round_trip(&mut self, request: Value) -> Result<Value> {
        self.transport
            .send_json(&request)
            .await
            .map_err(Error::TransportSend)?;
        self.recv().await
    }
}

/// Cheap-to-clone handle on the session internals, shared with background
/// tasks (result pagers, bulk coordinators)
#[derive(Clone)]
pub(crate) struct SessionCore {
    pub(crate) inner: Arc<Mutex<SessionInner>>,
    pub(crate) config: Arc<Config>,
    /// The host that actually won the connect race (relevant for host
    /// ranges); the bulk proxy dials the same node
    connected_host: Arc<str>,
    suppress_errors: Arc<AtomicBool>,
}

impl SessionCore {
    fn new(transport: Box<dyn Transport>, config: Arc<Config>, connected_host: &str) -> Self {
        let suppress = config.suppress_errors;
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                transport,
                cache: StatementCache::new(),
                stats: SessionStats::default(),
            })),
            config,
            connected_host: Arc::from(connected_host),
            suppress_errors: Arc::new(AtomicBool::new(suppress)),
        }
    }

    fn cache_enabled(&self) -> bool {
        self.config.cache_prepared_statements
    }

    pub(crate) fn connected_host(&self) -> &str {
        &self.connected_host
    }

    pub(crate) fn errors_suppressed(&self) -> bool {
        self.suppress_errors.load(Ordering::Relaxed)
    }

    /// Flip error suppression, returning the previous value so the caller
    /// can restore it
    pub(crate) fn set_suppress_errors(&self, suppress: bool) -> bool {
        self.suppress_errors.swap(suppress, Ordering::Relaxed)
    }

    fn serialize(req: &impl Serialize) -> Result<Value> {
        serde_json::to_value(req)
            .map_err(|e| Error::Protocol(format!("unable to serialize request: {}", e)))
    }

    /// Send a request and wait for its response
    pub(crate) async fn send_cmd<T: DeserializeOwned>(
        &self,
        req: &(impl Serialize + Sync),
    ) -> Result<Response<T>> {
        let request = Self::serialize(req)?;
        let raw = {
            let mut inner = self.inner.lock().await;
            inner.round_trip(request).await?
        };
        self.decode(raw)
    }

    /// Write a request now; the returned receiver reads the response
    /// later, after side-channel work. Exactly one receive per send.
    pub(crate) async fn async_send(
        &self,
        req: &(impl Serialize + Sync),
    ) -> Result<ResponseReceiver> {
        let request = Self::serialize(req)?;
        {
            let mut inner = self.inner.lock().await;
            inner
                .transport
                .send_json(&request)
                .await
                .map_err(Error::TransportSend)?;
        }
        Ok(ResponseReceiver { core: self.clone() })
    }

    fn decode<T: DeserializeOwned>(&self, raw: Value) -> Result<Response<T>> {
        let resp: Response<T> = serde_json::from_value(raw)
            .map_err(|e| Error::Protocol(format!("unable to decode response: {}", e)))?;
        if !resp.is_ok() {
            let err = match resp.exception {
                Some(ex) => Error::server(ex.text, ex.sqlcode),
                None => Error::server(format!("server status {:?}", resp.status), None),
            };
            if !self.errors_suppressed() {
                tracing::error!(error = %err, "server error");
            }
            return Err(err);
        }
        Ok(resp)
    }

    async fn close_transport(&self) {
        self.inner.lock().await.transport.close().await;
    }

    async fn evict_cached(&self, sql: &str) {
        let mut inner = self.inner.lock().await;
        inner.cache.remove(sql);
        inner.stats.stmt_cache_len = inner.cache.len();
    }

    /// Three-message login handshake
    async fn login(&self) -> Result<SessionData> {
        tracing::debug!("logging in");
        let resp: Response<LoginData> = self.send_cmd(&LoginRequest::new()).await?;
        let key = resp
            .response_data
            .ok_or_else(|| Error::Protocol("login response missing public key".to_string()))?;

        let encrypted = encrypt_password(self.config.password(), &key)?;

        tracing::debug!(username = %self.config.username, "authenticating");
        let auth = AuthRequest {
            username: self.config.username.clone(),
            password: encrypted,
            use_compression: false,
            client_name: self.config.client_name.clone(),
            client_version: self.config.client_version.clone(),
            driver_name: DRIVER_NAME.to_string(),
            client_os: std::env::consts::OS.to_string(),
            client_os_username: std::env::var("USER").unwrap_or_default(),
            client_runtime: String::new(),
            attributes: Attributes {
                autocommit: Some(true),
                query_timeout: Some(self.config.query_timeout.as_secs() as u32),
                ..Attributes::default()
            },
        };
        let resp: Response<SessionData> = self.send_cmd(&auth).await?;
        let session = resp
            .response_data
            .ok_or_else(|| Error::Protocol("auth response missing session data".to_string()))?;

        tracing::info!(session_id = session.session_id, "connected");
        self.inner.lock().await.transport.enable_compression(false);
        Ok(session)
    }
}

/// Deferred read half of an [`SessionCore::async_send`]. Consuming it
/// reads exactly one response from the control channel.
pub(crate) struct ResponseReceiver {
    core: SessionCore,
}

impl ResponseReceiver {
    /// Read the pending response, checking only its status
    pub(crate) async fn receive(self) -> Result<()> {
        let raw = {
            let mut inner = self.core.inner.lock().await;
            inner.recv().await?
        };
        self.core.decode::<Value>(raw).map(|_| ())
    }
}

/// Encrypt a password with the server's RSA public key (PKCS#1 v1.5) and
/// base64-encode the result
fn encrypt_password(password: &str, key: &LoginData) -> Result<String> {
    let modulus = hex::decode(key.public_key_modulus.trim())
        .map_err(|e| Error::Protocol(format!("invalid public key modulus: {}", e)))?;
    let exponent = u64::from_str_radix(key.public_key_exponent.trim(), 16)
        .map_err(|e| Error::Protocol(format!("invalid public key exponent: {}", e)))?;

    let public_key = RsaPublicKey::new(BigUint::from_bytes_be(&modulus), BigUint::from(exponent))
        .map_err(|e| Error::Protocol(format!("invalid server public key: {}", e)))?;
    let encrypted = public_key
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, password.as_bytes())
        .map_err(|e| Error::Protocol(format!("unable to encrypt password: {}", e)))?;

    Ok(base64::engine::general_purpose::STANDARD.encode(encrypted))
}

/// A logged-in Exasol session.
///
/// # Thread Safety
///
/// `Connection` is `Send` and `Sync`; individual commands serialize
/// through an internal mutex. Multi-command sequences that must run
/// without interleaving from other tasks should hold the guard returned
/// by [`lock`](Connection::lock) for their duration.
pub struct Connection {
    core: SessionCore,
    session: SessionData,
    closed: AtomicBool,
    op_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Connect and authenticate.
    ///
    /// A host of the form `a.b.c.x..y` is expanded to the inclusive IP
    /// range and each candidate is tried in random order until one
    /// completes the handshake.
    pub async fn connect(config: Config) -> Result<Self> {
        let hosts = config.candidate_hosts()?;
        let config = Arc::new(config);

        let mut transport: Box<dyn Transport> = match &config.transport {
            Some(factory) => factory(),
            None => Box::new(WsTransport::new()),
        };

        let mut last_err = None;
        let mut connected_host = None;
        for host in &hosts {
            let url = format!("{}://{}:{}", config.scheme(), host, config.port);
            match transport
                .connect(&url, config.tls.as_ref(), config.connect_timeout)
                .await
            {
                Ok(()) => {
                    connected_host = Some(host.clone());
                    break;
                }
                Err(source) => {
                    tracing::debug!(url = url.as_str(), error = %source, "connect attempt failed");
                    last_err = Some(Error::TransportConnect { url, source });
                }
            }
        }
        let Some(connected_host) = connected_host else {
            return Err(last_err
                .unwrap_or_else(|| Error::Config("no candidate hosts to connect to".to_string())));
        };

        let core = SessionCore::new(transport, config, &connected_host);
        match core.login().await {
            Ok(session) => Ok(Connection {
                core,
                session,
                closed: AtomicBool::new(false),
                op_lock: Arc::new(Mutex::new(())),
            }),
            Err(e) => {
                core.close_transport().await;
                Err(e)
            }
        }
    }

    /// Server-assigned session identifier
    pub fn session_id(&self) -> u64 {
        self.session.session_id
    }

    /// Server metadata captured at login
    pub fn session_data(&self) -> &SessionData {
        &self.session
    }

    /// Cumulative statistics for this session
    pub async fn stats(&self) -> SessionStats {
        self.core.inner.lock().await.stats.clone()
    }

    /// Acquire the session-wide caller lock.
    ///
    /// Individual commands are always serialized internally; this guard is
    /// for composing atomic multi-command sequences across concurrent
    /// workers. Dropping the guard releases the lock.
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.op_lock).lock_owned().await
    }

    pub(crate) fn core(&self) -> &SessionCore {
        &self.core
    }

    // =========================================================================
    // Attribute management
    // =========================================================================

    /// Fetch the current session attributes
    pub async fn get_session_attributes(&self) -> Result<Attributes> {
        tracing::debug!("getting session attributes");
        let resp: Response<Value> = self
            .core
            .send_cmd(&PlainCommand {
                command: "getAttributes",
            })
            .await?;
        resp.attributes
            .ok_or_else(|| Error::Protocol("getAttributes response missing attributes".to_string()))
    }

    /// Turn autocommit on
    pub async fn enable_autocommit(&self) -> Result<()> {
        tracing::debug!("enabling autocommit");
        self.set_attributes(Attributes::autocommit(true)).await
    }

    /// Turn autocommit off. The `false` travels literally on the wire.
    pub async fn disable_autocommit(&self) -> Result<()> {
        tracing::debug!("disabling autocommit");
        self.set_attributes(Attributes::autocommit(false)).await
    }

    /// Set the server-side query timeout in seconds (0 disables)
    pub async fn set_query_timeout(&self, seconds: u32) -> Result<()> {
        self.set_attributes(Attributes::query_timeout(seconds)).await
    }

    async fn set_attributes(&self, attributes: Attributes) -> Result<()> {
        let _: Response<Value> = self
            .core
            .send_cmd(&SetAttributesRequest::new(attributes))
            .await?;
        Ok(())
    }

    /// Commit the open transaction
    pub async fn commit(&self) -> Result<()> {
        tracing::debug!("committing transaction");
        self.execute("COMMIT").await?;
        Ok(())
    }

    /// Roll back the open transaction
    pub async fn rollback(&self) -> Result<()> {
        tracing::debug!("rolling back transaction");
        self.execute("ROLLBACK").await?;
        Ok(())
    }

    // =========================================================================
    // Execute engine
    // =========================================================================

    /// Execute a statement without binds; returns the affected-row count
    pub async fn execute(&self, sql: &str) -> Result<i64> {
        self.execute_with(sql, ExecOptions::default()).await
    }

    /// Execute a statement, with binds going through a prepared statement;
    /// returns the first result's affected-row count
    pub async fn execute_with(&self, sql: &str, opts: ExecOptions) -> Result<i64> {
        let data = self.execute_inner(sql, opts).await?;
        Ok(data.results.first().map_or(0, |r| r.row_count()))
    }

    /// Run a query and stream its rows.
    ///
    /// The returned [`RowStream`] is fed by a background task that pages
    /// through the server-side result set; a mid-stream failure terminates
    /// the stream and lands in its error slot.
    pub async fn fetch(&self, sql: &str) -> Result<RowStream> {
        self.fetch_with(sql, FetchOptions::default()).await
    }

    /// [`fetch`](Connection::fetch) with single-row binds and a default schema
    pub async fn fetch_with(&self, sql: &str, opts: FetchOptions) -> Result<RowStream> {
        let exec_opts = ExecOptions {
            binds: if opts.binds.is_empty() {
                Vec::new()
            } else {
                vec![opts.binds]
            },
            default_schema: opts.default_schema,
            ..ExecOptions::default()
        };
        let data = self.execute_inner(sql, exec_opts).await?;

        if data.num_results != 1 {
            return Err(Error::UnexpectedResultCount(data.num_results));
        }
        let block = data
            .results
            .into_iter()
            .next()
            .ok_or(Error::MissingResultSet)?;
        let result_set = block.result_set.ok_or(Error::MissingResultSet)?;

        let (producer, stream) = RowStream::channel();
        tokio::spawn(run_result_pager(self.core.clone(), result_set, producer));
        Ok(stream)
    }

    /// Run a query and buffer every row. Use [`fetch`](Connection::fetch)
    /// for large results.
    pub async fn fetch_all(&self, sql: &str) -> Result<Vec<Row>> {
        self.fetch(sql).await?.collect().await
    }

    async fn execute_inner(&self, sql: &str, opts: ExecOptions) -> Result<ExecuteData> {
        let has_binds = opts.binds.first().is_some_and(|row| !row.is_empty());

        if !has_binds {
            tracing::debug!(sql = sql, "executing");
            let req = ExecuteRequest::new(sql, opts.default_schema.as_deref());
            let resp: Response<ExecuteData> = self.core.send_cmd(&req).await?;
            return Ok(resp.response_data.unwrap_or_default());
        }

        let schema = opts.default_schema.as_deref();
        let statement = self.prepared(schema, sql).await?;

        let mut columns = statement.columns;
        for (i, data_type) in opts.data_types.iter().enumerate() {
            if let Some(column) = columns.get_mut(i) {
                column.data_type = data_type.clone();
            }
        }

        let data = if opts.columnar_binds {
            opts.binds
        } else {
            transpose(opts.binds)
        };
        let num_columns = data.len();
        let num_rows = data.first().map_or(0, Vec::len);

        tracing::debug!(columns = num_columns, rows = num_rows, "executing prepared statement");
        let mut req = ExecutePreparedRequest {
            command: "executePreparedStatement",
            attributes: None,
            statement_handle: statement.handle,
            num_columns,
            num_rows,
            columns,
            data,
        };

        let mut result = self.core.send_cmd::<ExecuteData>(&req).await;

        // The server occasionally forgets handles it issued. Re-prepare
        // once and repeat the execute with the fresh handle.
        if matches!(&result, Err(e) if e.is_stale_statement_handle()) {
            tracing::warn!(handle = req.statement_handle, "statement handle not found, re-preparing");
            self.core.evict_cached(sql).await;
            let statement = self.prepared(schema, sql).await?;
            req.statement_handle = statement.handle;
            result = self.core.send_cmd::<ExecuteData>(&req).await;
        }

        let resp = result?;
        if !self.core.cache_enabled() {
            self.close_prepared(req.statement_handle).await;
        }
        Ok(resp.response_data.unwrap_or_default())
    }

    // =========================================================================
    // Prepared statements
    // =========================================================================

    /// Get a prepared statement for `sql`, from cache when possible
    async fn prepared(&self, schema: Option<&str>, sql: &str) -> Result<PreparedStatement> {
        if self.core.cache_enabled() {
            let mut inner = self.core.inner.lock().await;
            if let Some(statement) = inner.cache.get(sql) {
                return Ok(statement);
            }
        }

        tracing::debug!(sql = sql, "preparing statement");
        let req = CreatePreparedRequest::new(sql, schema);
        let resp: Response<CreatePreparedData> = self.core.send_cmd(&req).await?;
        let data = resp.response_data.ok_or_else(|| {
            Error::Protocol("createPreparedStatement response missing data".to_string())
        })?;
        let statement = PreparedStatement {
            handle: data.statement_handle,
            columns: data.parameter_data.columns,
        };

        let evicted = {
            let mut inner = self.core.inner.lock().await;
            inner.stats.stmt_cache_miss += 1;
            if self.core.cache_enabled() {
                inner.cache.insert(sql.to_string(), statement.clone());
                let evicted = inner.cache.evict_lru_if_full();
                inner.stats.stmt_cache_len = inner.cache.len();
                evicted
            } else {
                None
            }
        };
        if let Some(old) = evicted {
            self.close_prepared(old.handle).await;
        }

        Ok(statement)
    }

    /// Close a server-side statement handle, best-effort
    async fn close_prepared(&self, handle: i64) {
        tracing::debug!(handle = handle, "closing statement handle");
        if let Err(e) = self
            .core
            .send_cmd::<Value>(&ClosePreparedRequest::new(handle))
            .await
        {
            tracing::warn!(handle = handle, error = %e, "unable to close statement handle");
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Close every cached statement handle, tell the server goodbye, and
    /// release the transport. Never fails; repeated calls are no-ops.
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(session_id = self.session.session_id, "disconnecting");

        let handles = {
            let mut inner = self.core.inner.lock().await;
            inner.cache.drain_handles()
        };
        for handle in handles {
            self.close_prepared(handle).await;
        }

        if let Err(e) = self
            .core
            .send_cmd::<Value>(&PlainCommand {
                command: "disconnect",
            })
            .await
        {
            tracing::warn!(error = %e, "unable to disconnect cleanly");
        }
        self.core.close_transport().await;
    }
}

/// Background producer that pages through a result set and feeds the
/// [`RowStream`]
async fn run_result_pager(core: SessionCore, result_set: ResultSetBlock, producer: RowProducer) {
    if result_set.num_rows == 0 {
        return;
    }

    let Some(handle) = result_set.result_set_handle else {
        // Whole result arrived inline.
        producer.send_columnar(result_set.data).await;
        return;
    };

    let mut consumed: u64 = 0;
    while consumed < result_set.num_rows {
        let req = FetchRequest::new(handle, consumed, FETCH_CHUNK_BYTES);
        let chunk = match core.send_cmd::<FetchData>(&req).await {
            Ok(resp) => resp.response_data.unwrap_or_else(|| FetchData {
                num_rows: 0,
                data: Vec::new(),
            }),
            Err(e) => {
                producer.fail(e);
                break;
            }
        };
        if chunk.num_rows == 0 {
            producer.fail(Error::Protocol(
                "fetch returned no rows before end of result set".to_string(),
            ));
            break;
        }
        consumed += chunk.num_rows;
        if !producer.send_columnar(chunk.data).await {
            // Consumer dropped the stream; stop paging.
            break;
        }
    }

    if let Err(e) = core
        .send_cmd::<Value>(&CloseResultSetRequest::new(handle))
        .await
    {
        tracing::warn!(handle = handle, error = %e, "unable to close result set");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;
    use rsa::RsaPrivateKey;

    #[test]
    fn test_encrypt_password_round_trip() {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 512).expect("keygen");
        let public_key = RsaPublicKey::from(&private_key);

        let login_data = LoginData {
            public_key_modulus: hex::encode(public_key.n().to_bytes_be()),
            public_key_exponent: format!("{:x}", public_key.e()),
            public_key_pem: None,
        };

        let encoded = encrypt_password("exasol", &login_data).unwrap();
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let plaintext = private_key.decrypt(Pkcs1v15Encrypt, &ciphertext).unwrap();
        assert_eq!(plaintext, b"exasol");
    }

    #[test]
    fn test_encrypt_password_rejects_bad_modulus() {
        let login_data = LoginData {
            public_key_modulus: "not hex".to_string(),
            public_key_exponent: "10001".to_string(),
            public_key_pem: None,
        };
        assert!(matches!(
            encrypt_password("x", &login_data),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_exec_options_default_is_plain_execute() {
        let opts = ExecOptions::default();
        assert!(opts.binds.is_empty());
        assert!(!opts.columnar_binds);
        assert!(opts.default_schema.is_none());
    }
}
