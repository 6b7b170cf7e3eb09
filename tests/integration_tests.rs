//! Integration tests against a real Exasol instance
//!
//! These tests require a running Exasol database (the docker-db image
//! works well). Set the following environment variables:
//! - EXASOL_HOST: Exasol host (default: 127.0.0.1)
//! - EXASOL_PORT: Exasol port (default: 8563)
//! - EXASOL_USER: username (default: SYS)
//! - EXASOL_PASSWORD: password (default: exasol)
//!
//! Run with: cargo test --test integration_tests -- --ignored

use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;

use exasol_rs::{Config, Connection, Error, ExecOptions, TlsPolicy};

const SCHEMA: &str = "[test]";

/// Get test configuration from environment or use defaults
fn get_test_config() -> Config {
    let host = std::env::var("EXASOL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("EXASOL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8563);
    let username = std::env::var("EXASOL_USER").unwrap_or_else(|_| "SYS".to_string());
    let password = std::env::var("EXASOL_PASSWORD").unwrap_or_else(|_| "exasol".to_string());

    Config::new(host, port, username, password)
        .tls(TlsPolicy::new().danger_accept_invalid_certs())
}

/// Connect and recreate an empty test schema
async fn connect_fresh() -> Connection {
    let conn = Connection::connect(get_test_config())
        .await
        .expect("Failed to connect");
    conn.execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", SCHEMA))
        .await
        .expect("drop schema");
    conn.execute(&format!("CREATE SCHEMA {}", SCHEMA))
        .await
        .expect("create schema");
    conn
}

mod session_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Exasol database"]
    async fn test_connect_fetch_disconnect() {
        let conn = connect_fresh().await;
        assert!(conn.session_id() > 0);
        assert_eq!(conn.session_data().product_name, "EXASolution");

        let rows = conn.fetch_all("SELECT 1 FROM dual").await.unwrap();
        assert_eq!(rows, vec![vec![json!(1.0)]]);

        conn.disconnect().await;
    }

    #[tokio::test]
    #[ignore = "requires Exasol database"]
    async fn test_autocommit_round_trip() {
        let conn = connect_fresh().await;

        let attrs = conn.get_session_attributes().await.unwrap();
        assert_eq!(attrs.autocommit, Some(true));

        conn.disable_autocommit().await.unwrap();
        conn.execute("CREATE TABLE foo (id INT)").await.unwrap();
        let attrs = conn.get_session_attributes().await.unwrap();
        assert_eq!(attrs.autocommit, Some(false));

        conn.enable_autocommit().await.unwrap();
        let attrs = conn.get_session_attributes().await.unwrap();
        assert_eq!(attrs.autocommit, Some(true));

        conn.disconnect().await;
    }

    #[tokio::test]
    #[ignore = "requires Exasol database"]
    async fn test_query_timeout_terminates_statement() {
        let conn = connect_fresh().await;
        conn.set_query_timeout(5).await.unwrap();

        let started = Instant::now();
        let err = conn
            .fetch_all("SELECT * FROM (SELECT SLEEP(10) FROM dual)")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Server terminated statement"));
        assert!(started.elapsed() < Duration::from_secs(8));

        conn.disconnect().await;
    }

    #[tokio::test]
    #[ignore = "requires Exasol database"]
    async fn test_prepared_insert_and_cache_stats() {
        let conn = connect_fresh().await;
        conn.execute("CREATE TABLE foo (id INT, val VARCHAR(16))")
            .await
            .unwrap();

        let opts = || ExecOptions {
            binds: vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]],
            ..ExecOptions::default()
        };
        let sql = "INSERT INTO foo VALUES (?, ?)";
        assert_eq!(conn.execute_with(sql, opts()).await.unwrap(), 2);
        assert_eq!(conn.execute_with(sql, opts()).await.unwrap(), 2);

        let stats = conn.stats().await;
        assert_eq!(stats.stmt_cache_miss, 1);
        assert_eq!(stats.stmt_cache_len, 1);

        let rows = conn
            .fetch_all("SELECT COUNT(*) FROM foo")
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![json!(4.0)]]);

        conn.disconnect().await;
    }
}

mod bulk_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Exasol database"]
    async fn test_bulk_insert_and_select_round_trip() {
        let conn = connect_fresh().await;
        conn.execute("CREATE TABLE foo ( id INT, val CHAR(1) )")
            .await
            .unwrap();

        conn.bulk_insert(SCHEMA, "FOO", b"1,a\n2,b\n3,c")
            .await
            .unwrap();

        let rows = conn
            .fetch_all("SELECT * FROM foo ORDER BY id")
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![json!(1.0), json!("a")],
                vec![json!(2.0), json!("b")],
                vec![json!(3.0), json!("c")],
            ]
        );

        let csv = conn.bulk_select(SCHEMA, "FOO").await.unwrap();
        assert_eq!(csv, b"1,a\n2,b\n3,c\n");

        conn.disconnect().await;
    }

    #[tokio::test]
    #[ignore = "requires Exasol database"]
    async fn test_stream_insert_thousand_rows() {
        let conn = connect_fresh().await;
        conn.execute("CREATE TABLE foo ( id INT, val VARCHAR(10) )")
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel(1000);
        for i in 1..=1000 {
            tx.send(format!("{},'{}'\n", i, i + 10).into_bytes())
                .await
                .unwrap();
        }
        drop(tx);
        conn.stream_insert(SCHEMA, "FOO", rx).await.unwrap();

        let rows = conn
            .fetch_all("SELECT COUNT(*), MIN(id), MAX(id) FROM foo")
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![json!(1000.0), json!(1.0), json!(1000.0)]]);

        conn.disconnect().await;
    }

    #[tokio::test]
    #[ignore = "requires Exasol database"]
    async fn test_stream_query_large_export() {
        let conn = connect_fresh().await;
        conn.execute("CREATE TABLE foo ( id INT, val INT )")
            .await
            .unwrap();
        conn.execute(
            "INSERT INTO foo SELECT row_number() over() c, local.c FROM dual CONNECT BY LEVEL <= 3e5",
        )
        .await
        .unwrap();

        let mut rows = conn
            .stream_query(&format!(
                "EXPORT ( SELECT t.id, t.val, NULL FROM {}.foo AS t ORDER BY t.id DESC NULLS LAST) \
                 INTO CSV AT '%s' FILE 'data.csv' DELIMIT = NEVER COLUMN SEPARATOR = '0x00'",
                SCHEMA
            ))
            .unwrap();

        let mut csv = Vec::new();
        while let Some(chunk) = rows.recv().await {
            csv.extend_from_slice(&chunk);
            rows.recycle(chunk);
        }
        rows.close().await;
        assert!(rows.take_error().is_none());

        assert_eq!(&csv[..20], b"300000\x00300000\x00\n29999");
        assert_eq!(&csv[csv.len() - 10..], b"2\x002\x00\n1\x001\x00\n");
        assert_eq!(rows.bytes_read(), 4_277_790);

        conn.disconnect().await;
    }

    #[tokio::test]
    #[ignore = "requires Exasol database"]
    async fn test_close_before_draining_large_export() {
        let conn = connect_fresh().await;
        conn.execute("CREATE TABLE foo ( id INT )").await.unwrap();
        conn.execute("INSERT INTO foo SELECT row_number() over() FROM dual CONNECT BY LEVEL <= 3e5")
            .await
            .unwrap();

        let mut rows = conn.stream_select(SCHEMA, "FOO").unwrap();
        let _first = rows.recv().await;

        let started = Instant::now();
        rows.close().await;
        assert!(started.elapsed() < Duration::from_secs(10));

        conn.disconnect().await;
    }

    #[tokio::test]
    #[ignore = "requires Exasol database"]
    async fn test_bulk_error_is_returned() {
        let conn = connect_fresh().await;

        let err = conn.bulk_insert(SCHEMA, "NO_SUCH_TABLE", b"1\n").await.unwrap_err();
        assert!(matches!(err, Error::Server { .. }));

        conn.disconnect().await;
    }
}
