//! Rows, matrix transposition, and the streaming row handle
//!
//! The wire format is column-major (an array of columns, each an array of
//! values); callers want row-major. [`transpose`] converts in either
//! direction. [`RowStream`] is the lazy row sequence returned by
//! [`Connection::fetch`](crate::Connection::fetch): a bounded channel fed
//! by a background producer, with an error slot the producer fills when a
//! fetch fails mid-stream.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// One row of query results
pub type Row = Vec<Value>;

/// Channel capacity between the paging producer and the consumer
pub(crate) const ROW_CHANNEL_CAPACITY: usize = 1000;

/// Transpose a rectangular matrix. Converts row-major bind data to the
/// column-major wire form and column-major result chunks back to rows.
/// An empty matrix (or one with empty inner vectors) transposes to empty.
pub fn transpose<T>(matrix: Vec<Vec<T>>) -> Vec<Vec<T>> {
    let num_cols = matrix.first().map_or(0, Vec::len);
    let mut out: Vec<Vec<T>> = (0..num_cols)
        .map(|_| Vec::with_capacity(matrix.len()))
        .collect();
    for row in matrix {
        for (col, value) in out.iter_mut().zip(row) {
            col.push(value);
        }
    }
    out
}

type ErrorSlot = Arc<Mutex<Option<Error>>>;

/// Producer half of a row stream, held by the background paging task
pub(crate) struct RowProducer {
    tx: mpsc::Sender<Row>,
    error: ErrorSlot,
}

impl RowProducer {
    /// Emit one row. Returns false when the consumer is gone.
    pub(crate) async fn send(&self, row: Row) -> bool {
        self.tx.send(row).await.is_ok()
    }

    /// Emit every row of a column-major chunk. Returns false when the
    /// consumer is gone.
    pub(crate) async fn send_columnar(&self, columns: Vec<Vec<Value>>) -> bool {
        for row in transpose(columns) {
            if !self.send(row).await {
                return false;
            }
        }
        true
    }

    /// Record a terminal error for the consumer. Dropping the producer
    /// afterwards closes the channel.
    pub(crate) fn fail(&self, err: Error) {
        *self.error.lock().expect("error slot poisoned") = Some(err);
    }
}

/// Lazy sequence of rows produced in the background.
///
/// Rows arrive through [`recv`](RowStream::recv) until the stream is
/// exhausted. A mid-stream failure terminates the sequence; the error is
/// then available from [`take_error`](RowStream::take_error). Dropping
/// the stream early stops the producer.
pub struct RowStream {
    rx: mpsc::Receiver<Row>,
    error: ErrorSlot,
}

impl RowStream {
    /// Create a connected producer/stream pair
    pub(crate) fn channel() -> (RowProducer, RowStream) {
        let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let error: ErrorSlot = Arc::new(Mutex::new(None));
        (
            RowProducer {
                tx,
                error: Arc::clone(&error),
            },
            RowStream { rx, error },
        )
    }

    /// Receive the next row; `None` when the stream is exhausted or the
    /// producer failed (check [`take_error`](RowStream::take_error))
    pub async fn recv(&mut self) -> Option<Row> {
        self.rx.recv().await
    }

    /// Take the terminal error, if the producer hit one
    pub fn take_error(&self) -> Option<Error> {
        self.error.lock().expect("error slot poisoned").take()
    }

    /// Drain the remaining rows into a vector, surfacing a producer
    /// failure as an error. Buffers everything; intended for small results.
    pub async fn collect(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.recv().await {
            rows.push(row);
        }
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(rows),
        }
    }
}
