//! Bulk IMPORT/EXPORT coordination
//!
//! The fastest way in or out of the database is the CSV side channel: the
//! bulk SQL carries a URL placeholder, the coordinator opens a proxy,
//! substitutes the announced address, fires the statement on the control
//! channel, and then races the two concurrent activities (the byte
//! transfer on the proxy socket, the statement response on the control
//! channel) against the configured query timeout.
//!
//! Two interface families:
//!
//! - **Bulk** ([`Connection::bulk_insert`] etc.) moves the whole dataset
//!   through one byte buffer. Convenient, memory-hungry.
//! - **Stream** ([`Connection::stream_insert`] etc.) moves a channel of
//!   byte slices. Slices of roughly 10 KiB work well for the write path.
//!
//! Within each family, `insert`/`select` address a single table while
//! `execute`/`query` accept arbitrary IMPORT/EXPORT statements carrying a
//! `%s` placeholder for the proxy URL.

use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::{Connection, ResponseReceiver, SessionCore};
use crate::error::{Error, Result};
use crate::messages::ExecuteRequest;
use crate::pool::{global_pool, BufferPool};
use crate::proxy::Proxy;

/// Total attempts for the write path
const WRITE_ATTEMPTS: u32 = 2;
/// Total attempts for the read path
const READ_ATTEMPTS: u32 = 3;

type ErrorSlot = Arc<Mutex<Option<Error>>>;

impl Connection {
    /// IMPORT a CSV byte buffer into one table. Identifiers are embedded
    /// as given; quote them if they need quoting.
    pub async fn bulk_insert(&self, schema: &str, table: &str, data: &[u8]) -> Result<()> {
        self.bulk_execute(&table_import_sql(schema, table), data).await
    }

    /// Run an arbitrary IMPORT statement (containing one `%s` URL
    /// placeholder) fed from a CSV byte buffer
    pub async fn bulk_execute(&self, sql: &str, data: &[u8]) -> Result<()> {
        let (tx, rx) = mpsc::channel(1);
        tx.send(data.to_vec()).await.expect("fresh channel");
        drop(tx);
        self.stream_execute(sql, rx).await
    }

    /// EXPORT one table as CSV into a byte buffer
    pub async fn bulk_select(&self, schema: &str, table: &str) -> Result<Vec<u8>> {
        self.bulk_query(&table_export_sql(schema, table)).await
    }

    /// Run an arbitrary EXPORT statement (containing one `%s` URL
    /// placeholder), buffering the CSV it produces
    pub async fn bulk_query(&self, sql: &str) -> Result<Vec<u8>> {
        let mut stream = self.stream_query(sql)?;
        let mut out = Vec::new();
        while let Some(chunk) = stream.recv().await {
            out.extend_from_slice(&chunk);
            stream.recycle(chunk);
        }
        stream.close().await;
        match stream.take_error() {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// IMPORT a channel of CSV byte slices into one table
    pub async fn stream_insert(
        &self,
        schema: &str,
        table: &str,
        data: mpsc::Receiver<Vec<u8>>,
    ) -> Result<()> {
        self.stream_execute(&table_import_sql(schema, table), data).await
    }

    /// Run an arbitrary IMPORT statement fed from a channel of byte
    /// slices.
    ///
    /// Retries once on a proxy-connect refusal, but only while zero bytes
    /// have been written; once any slice has been consumed the input
    /// cannot be replayed and the error is final.
    pub async fn stream_execute(&self, sql: &str, mut data: mpsc::Receiver<Vec<u8>>) -> Result<()> {
        validate_template(sql)?;
        let core = self.core().clone();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match stream_execute_attempt(&core, sql, &mut data).await {
                Ok(_written) => return Ok(()),
                Err(err) => {
                    if err.is_retryable_proxy_connect() && attempt < WRITE_ATTEMPTS {
                        tracing::warn!(error = %err, "bulk import failed before any data moved, retrying");
                        continue;
                    }
                    if transferred_bytes(&err) > 0 {
                        tracing::warn!("data already sent, not retrying");
                    }
                    log_bulk_error(&core, sql, &err);
                    return Err(err);
                }
            }
        }
    }

    /// EXPORT one table as a stream of CSV byte slices
    pub fn stream_select(&self, schema: &str, table: &str) -> Result<ExportStream> {
        self.stream_query(&table_export_sql(schema, table))
    }

    /// Run an arbitrary EXPORT statement, streaming the CSV it produces.
    ///
    /// The transfer starts in the background and the handle is returned
    /// immediately. Drain [`ExportStream::recv`] until it yields `None`,
    /// then call [`ExportStream::close`]; a transfer failure appears in
    /// [`ExportStream::take_error`]. Connect refusals before any data
    /// arrived are retried with a fresh proxy, twice.
    pub fn stream_query(&self, sql: &str) -> Result<ExportStream> {
        validate_template(sql)?;
        let core = self.core().clone();
        let sql = sql.to_string();

        let (data_tx, data_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let bytes_read = Arc::new(AtomicU64::new(0));
        let error: ErrorSlot = Arc::new(Mutex::new(None));

        let task = tokio::spawn(run_stream_query(
            core.clone(),
            sql,
            data_tx,
            stop_rx,
            Arc::clone(&bytes_read),
            Arc::clone(&error),
        ));

        Ok(ExportStream {
            data: data_rx,
            pool: global_pool(),
            bytes_read,
            error,
            stop: stop_tx,
            task: Some(task),
            core,
        })
    }
}

/// Handle on a background CSV export.
///
/// Owns the proxy-side reader task: dropping the handle stops the
/// transfer, and [`close`](ExportStream::close) does so while guaranteeing
/// the background task has fully wound down.
pub struct ExportStream {
    data: mpsc::Receiver<Vec<u8>>,
    pool: Arc<BufferPool>,
    bytes_read: Arc<AtomicU64>,
    error: ErrorSlot,
    stop: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
    core: SessionCore,
}

impl ExportStream {
    /// Receive the next CSV slice; `None` when the export is finished or
    /// failed (check [`take_error`](ExportStream::take_error))
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.data.recv().await
    }

    /// Return a consumed slice to the shared buffer pool. Optional; not
    /// returning buffers merely costs allocations.
    pub fn recycle(&self, buffer: Vec<u8>) {
        self.pool.put(buffer);
    }

    /// Total bytes received from the server, final once the stream closed
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }

    /// Take the terminal transfer error, if any
    pub fn take_error(&self) -> Option<Error> {
        self.error.lock().expect("error slot poisoned").take()
    }

    /// Stop the transfer (if still running) and wait for the background
    /// reader to wind down. Idempotent. Errors induced by the forced stop
    /// are suppressed rather than logged.
    pub async fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let prev = self.core.set_suppress_errors(true);
        // A full buffer means a stop is already queued.
        let _ = self.stop.try_send(());
        // Unblock a producer stuck publishing into the data channel.
        self.data.close();
        let _ = task.await;
        self.core.set_suppress_errors(prev);
    }
}

/// Open a proxy, substitute its URL into the SQL template, and fire the
/// statement asynchronously on the control channel
async fn init_proxy(core: &SessionCore, sql: &str) -> Result<(Proxy, ResponseReceiver)> {
    let mut proxy = Proxy::open(core.connected_host(), core.config.port, global_pool()).await?;

    let sql = sql.replacen("%s", &proxy.url(), 1);
    tracing::debug!(sql = sql.as_str(), "stream sql");

    let request = ExecuteRequest::new(sql, None);
    match core.async_send(&request).await {
        Ok(receiver) => Ok((proxy, receiver)),
        Err(err) => {
            proxy.shutdown().await;
            Err(err)
        }
    }
}

/// One write attempt: race the proxy upload against the statement
/// response, bounded by the query timeout
async fn stream_execute_attempt(
    core: &SessionCore,
    sql: &str,
    data: &mut mpsc::Receiver<Vec<u8>>,
) -> Result<u64> {
    let (mut proxy, receiver) = init_proxy(core, sql).await?;
    let result = {
        let upload = proxy.write(data);
        race_transfer(upload, receiver.receive(), core.config.query_timeout).await
    };
    proxy.shutdown().await;
    result
}

/// One read attempt, symmetric to the write attempt. Bytes received are
/// recorded as soon as the download side finishes, so a late control
/// response (or its induced error) cannot lose the count.
async fn stream_query_attempt(
    core: &SessionCore,
    sql: &str,
    data: &mpsc::Sender<Vec<u8>>,
    stop: &mut mpsc::Receiver<()>,
    bytes_read: &AtomicU64,
) -> Result<u64> {
    let (mut proxy, receiver) = init_proxy(core, sql).await?;
    let result = {
        let download = async {
            let result = proxy.read(data.clone(), stop).await;
            if let Ok(total) = &result {
                bytes_read.store(*total, Ordering::SeqCst);
            }
            result
        };
        race_transfer(download, receiver.receive(), core.config.query_timeout).await
    };
    proxy.shutdown().await;
    result
}

/// Background driver for [`Connection::stream_query`]: bounded retry
/// around single attempts, terminal error into the slot, channel closed by
/// dropping the sender on the way out
async fn run_stream_query(
    core: SessionCore,
    sql: String,
    data: mpsc::Sender<Vec<u8>>,
    mut stop: mpsc::Receiver<()>,
    bytes_read: Arc<AtomicU64>,
    error: ErrorSlot,
) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match stream_query_attempt(&core, &sql, &data, &mut stop, &bytes_read).await {
            Ok(total) => {
                bytes_read.store(total, Ordering::SeqCst);
                return;
            }
            Err(err) => {
                if let Error::ProxyIo { bytes, .. } = &err {
                    bytes_read.store(*bytes, Ordering::SeqCst);
                }
                let nothing_received = bytes_read.load(Ordering::SeqCst) == 0;
                if err.is_retryable_proxy_connect() && nothing_received && attempt < READ_ATTEMPTS {
                    tracing::warn!(error = %err, "bulk export failed before any data moved, retrying");
                    continue;
                }
                log_bulk_error(&core, &sql, &err);
                *error.lock().expect("error slot poisoned") = Some(err);
                return;
            }
        }
    }
}

/// Race the data transfer against the control-channel response. The first
/// completer, when successful, adopts the other side's outcome; a timeout
/// abandons the transfer (the caller's proxy shutdown unblocks it).
async fn race_transfer<D, R>(data: D, response: R, timeout: Duration) -> Result<u64>
where
    D: Future<Output = Result<u64>>,
    R: Future<Output = Result<()>>,
{
    let timed = timeout > Duration::ZERO;
    let mut data = pin!(data);
    let mut response = pin!(response);
    let mut deadline = pin!(tokio::time::sleep(timeout));

    tokio::select! {
        transferred = &mut data => match transferred {
            Ok(total) => response.await.map(|_| total),
            Err(err) => Err(err),
        },
        resp = &mut response => match resp {
            Ok(()) => data.await,
            Err(err) => Err(err),
        },
        _ = &mut deadline, if timed => Err(Error::BulkTimeout),
    }
}

/// Bytes that had already moved when the error was raised
fn transferred_bytes(err: &Error) -> u64 {
    match err {
        Error::ProxyIo { bytes, .. } => *bytes,
        _ => 0,
    }
}

fn log_bulk_error(core: &SessionCore, sql: &str, err: &Error) {
    if !core.errors_suppressed() {
        tracing::error!(sql = sql, error = %err, "unable to bulk transfer data");
    }
}

fn validate_template(sql: &str) -> Result<()> {
    match sql.matches("%s").count() {
        1 => Ok(()),
        n => Err(Error::Config(format!(
            "bulk SQL must contain exactly one %s placeholder for the proxy URL, found {}",
            n
        ))),
    }
}

fn table_import_sql(schema: &str, table: &str) -> String {
    format!(
        "IMPORT INTO {}.{} FROM CSV AT '%s' FILE 'data.csv'",
        schema, table
    )
}

fn table_export_sql(schema: &str, table: &str) -> String {
    format!(
        "EXPORT {}.{} INTO CSV AT '%s' FILE 'data.csv'",
        schema, table
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_validation() {
        assert!(validate_template("IMPORT INTO t FROM CSV AT '%s' FILE 'data.csv'").is_ok());
        assert!(matches!(
            validate_template("IMPORT INTO t FROM CSV"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            validate_template("AT '%s' OR AT '%s'"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_table_templates() {
        assert_eq!(
            table_import_sql("[test]", "FOO"),
            "IMPORT INTO [test].FOO FROM CSV AT '%s' FILE 'data.csv'"
        );
        assert_eq!(
            table_export_sql("[test]", "FOO"),
            "EXPORT [test].FOO INTO CSV AT '%s' FILE 'data.csv'"
        );
    }

    #[tokio::test]
    async fn test_race_adopts_slower_response_error() {
        let data = async { Ok(42u64) };
        let response = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(Error::server("table not found", None))
        };
        let err = race_transfer(data, response, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Server { .. }));
    }

    #[tokio::test]
    async fn test_race_adopts_slower_data_result() {
        let data = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(7u64)
        };
        let response = async { Ok(()) };
        let total = race_transfer(data, response, Duration::ZERO).await.unwrap();
        assert_eq!(total, 7);
    }

    #[tokio::test]
    async fn test_race_times_out() {
        let data = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(0u64)
        };
        let response = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        };
        let started = std::time::Instant::now();
        let err = race_transfer(data, response, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BulkTimeout));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_race_without_timeout_waits() {
        let data = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(3u64)
        };
        let response = async { Ok(()) };
        // Zero timeout means no local deadline at all.
        let total = race_transfer(data, response, Duration::ZERO).await.unwrap();
        assert_eq!(total, 3);
    }
}
