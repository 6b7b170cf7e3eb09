#![warn(missing_docs)]

//! # exasol-rs
//!
//! A pure Rust driver for the Exasol analytical database. No ODBC, JDBC,
//! or vendor client libraries required.
//!
//! This crate speaks Exasol's native websocket API directly: JSON
//! request/response messages over one persistent duplex channel, plus the
//! binary side channel the server uses to stream CSV for bulk IMPORT and
//! EXPORT.
//!
//! ## Features
//!
//! - **Pure Rust** - native protocol implementation on Tokio
//! - **Async/await** - every operation is a future
//! - **Statement caching** - prepared statements reused by SQL text with
//!   LRU eviction
//! - **Streamed results** - large result sets are paged from the server
//!   and delivered through a bounded channel
//! - **Bulk IMPORT/EXPORT** - the CSV side channel, by buffer or by
//!   stream, with timeout and bounded retry
//! - **TLS** - `wss://` control channels via rustls
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use exasol_rs::{Config, Connection};
//!
//! #[tokio::main]
//! async fn main() -> exasol_rs::Result<()> {
//!     let config = Config::new("localhost", 8563, "sys", "exasol");
//!     let conn = Connection::connect(config).await?;
//!
//!     conn.execute("CREATE TABLE people (id INT, name VARCHAR(64))").await?;
//!
//!     let rows = conn.fetch_all("SELECT id, name FROM people ORDER BY id").await?;
//!     for row in &rows {
//!         println!("{:?}", row);
//!     }
//!
//!     conn.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Bind Parameters
//!
//! Binds go through a server-side prepared statement. The bind matrix is
//! row-major by default:
//!
//! ```rust,no_run
//! use exasol_rs::{Connection, ExecOptions};
//! use serde_json::json;
//!
//! # async fn example(conn: Connection) -> exasol_rs::Result<()> {
//! let inserted = conn
//!     .execute_with(
//!         "INSERT INTO people VALUES (?, ?)",
//!         ExecOptions {
//!             binds: vec![
//!                 vec![json!(1), json!("Alice")],
//!                 vec![json!(2), json!("Bob")],
//!             ],
//!             ..ExecOptions::default()
//!         },
//!     )
//!     .await?;
//! assert_eq!(inserted, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Bulk IMPORT/EXPORT
//!
//! For large datasets the CSV side channel is far faster than row binds:
//!
//! ```rust,no_run
//! # use exasol_rs::Connection;
//! # async fn example(conn: Connection) -> exasol_rs::Result<()> {
//! conn.bulk_insert("my_schema", "people", b"1,Alice\n2,Bob\n").await?;
//!
//! let mut rows = conn.stream_select("my_schema", "people")?;
//! while let Some(chunk) = rows.recv().await {
//!     // chunk is a CSV byte slice
//!     rows.recycle(chunk);
//! }
//! rows.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Host Ranges
//!
//! Cluster nodes are commonly addressed as an IPv4 range; the driver
//! expands `10.0.2.11..14` and tries the nodes in random order until one
//! answers.

pub mod bulk;
pub mod config;
pub mod connection;
pub mod error;
pub mod messages;
pub mod pool;
mod proxy;
pub mod row;
pub mod statement_cache;
pub mod transport;

// Re-export commonly used types
pub use bulk::ExportStream;
pub use config::{Config, TransportFactory, DEFAULT_PORT};
pub use connection::{Connection, ExecOptions, FetchOptions, SessionStats, DRIVER_NAME};
pub use error::{Error, Result};
pub use messages::{Attributes, Column, DataType, SessionData};
pub use pool::{global_pool, reset_global_pool, BufferPool};
pub use row::{transpose, Row, RowStream};
pub use statement_cache::{PreparedStatement, StatementCache, MAX_CACHED_STATEMENTS};
pub use transport::{TlsPolicy, Transport, TransportError, WsTransport};

// Re-export serde_json; bind and row values are serde_json::Value
pub use serde_json;
