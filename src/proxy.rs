//! Bulk transfer proxy
//!
//! For IMPORT/EXPORT the server streams CSV over a side channel instead of
//! the websocket: the client opens a TCP connection to the server, asks it
//! (via a small binary handshake) to set up a reverse proxy, and embeds
//! the address the server announces into the bulk SQL. The server then
//! speaks HTTP/1.1 chunked transfer over that same socket, with this end
//! playing the part of a very small HTTP peer.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::pool::BufferPool;

/// Magic number opening the proxy handshake
const HANDSHAKE_MAGIC: u32 = 0x0221_2102;

/// A proxy session bound to one bulk call
pub(crate) struct Proxy {
    stream: TcpStream,
    /// Host the server announced for reaching this proxy
    pub host: String,
    /// Port the server announced for reaching this proxy
    pub port: u32,
    running: bool,
    pool: Arc<BufferPool>,
}

impl Proxy {
    /// Connect to the server and perform the proxy handshake: 12 bytes
    /// out (magic, version, count), 24 bytes back carrying the announced
    /// port (LE u32 at offset 4) and NUL-padded hostname (offset 8..24).
    pub(crate) async fn open(host: &str, port: u16, pool: Arc<BufferPool>) -> Result<Proxy> {
        let mut stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::ProxyHandshake(format!("dial {}:{}: {}", host, port, e)))?;

        let mut request = [0u8; 12];
        request[0..4].copy_from_slice(&HANDSHAKE_MAGIC.to_le_bytes());
        request[4..8].copy_from_slice(&1u32.to_le_bytes());
        request[8..12].copy_from_slice(&1u32.to_le_bytes());
        stream
            .write_all(&request)
            .await
            .map_err(|e| Error::ProxyHandshake(format!("handshake send: {}", e)))?;

        let mut response = [0u8; 24];
        stream
            .read_exact(&mut response)
            .await
            .map_err(|e| Error::ProxyHandshake(format!("handshake recv: {}", e)))?;

        let announced_port = u32::from_le_bytes(response[4..8].try_into().expect("4 bytes"));
        let host_bytes = &response[8..24];
        let host_end = host_bytes
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        let announced_host = String::from_utf8_lossy(&host_bytes[..host_end]).into_owned();

        tracing::debug!(host = announced_host.as_str(), port = announced_port, "proxy ready");
        Ok(Proxy {
            stream,
            host: announced_host,
            port: announced_port,
            running: true,
            pool,
        })
    }

    /// URL the server will use to reach back into this proxy
    pub(crate) fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Receive the server's chunked upload (EXPORT direction), publishing
    /// each chunk to `data`. Every publish races the `stop` signal; when
    /// stop wins the proxy shuts down immediately. Returns the byte count.
    pub(crate) async fn read(
        &mut self,
        data: mpsc::Sender<Vec<u8>>,
        stop: &mut mpsc::Receiver<()>,
    ) -> Result<u64> {
        self.read_headers().await.map_err(|e| io_error(0, e))?;
        self.send_headers(&[
            "HTTP/1.1 100 Continue",
            "Content-Length: 0",
            "Connection: close",
        ])
        .await
        .map_err(|e| io_error(0, e))?;

        let mut total: u64 = 0;
        loop {
            let size_line = self.read_line().await.map_err(|e| io_error(total, e))?;
            let size_text = String::from_utf8_lossy(&size_line).into_owned();
            let chunk_len = u64::from_str_radix(size_text.trim(), 16).map_err(|_| {
                Error::ProxyFraming(format!("unparsable chunk size {:?}", size_text))
            })?;

            let mut chunk = self.pool.get();
            if chunk_len as usize > chunk.capacity() {
                tracing::warn!(
                    chunk_len = chunk_len,
                    buffer_capacity = chunk.capacity(),
                    "chunk exceeds pooled buffer capacity"
                );
                chunk = Vec::with_capacity(chunk_len as usize);
            }
            chunk.resize(chunk_len as usize, 0);
            self.stream
                .read_exact(&mut chunk)
                .await
                .map_err(|e| io_error(total, e))?;

            let terminator = self.read_line().await.map_err(|e| io_error(total, e))?;
            if !terminator.is_empty() {
                return Err(Error::ProxyFraming("chunk not terminated by CRLF".to_string()));
            }

            if chunk_len == 0 {
                // Last chunk; acknowledge and wrap up.
                self.send_headers(&[
                    "HTTP/1.1 200 OK",
                    "Content-Length: 0",
                    "Connection: close",
                ])
                .await
                .map_err(|e| io_error(total, e))?;
                break;
            }

            total += chunk_len;
            tokio::select! {
                _ = stop.recv() => {
                    self.shutdown().await;
                    break;
                }
                sent = data.send(chunk) => {
                    if sent.is_err() {
                        // Consumer is gone; nothing left to deliver to.
                        self.shutdown().await;
                        break;
                    }
                }
            }
        }

        Ok(total)
    }

    /// Send the client's chunked upload (IMPORT direction), framing each
    /// byte-slice received on `data` as one chunk. Returns the byte count.
    pub(crate) async fn write(&mut self, data: &mut mpsc::Receiver<Vec<u8>>) -> Result<u64> {
        self.read_headers().await.map_err(|e| io_error(0, e))?;
        self.send_headers(&[
            "HTTP/1.1 200 OK",
            "Content-Type: application/octet-stream",
            "Content-Disposition: attachment; filename=data.csv",
            "Transfer-Encoding: chunked",
            "Connection: close",
        ])
        .await
        .map_err(|e| io_error(0, e))?;

        let mut written: u64 = 0;
        let mut failure = None;
        while let Some(chunk) = data.recv().await {
            written += chunk.len() as u64;
            if let Err(e) = self.write_chunk(&chunk).await {
                failure = Some(io_error(written, e));
                break;
            }
        }

        // The terminating zero chunk goes out even after a failed chunk
        // write; its own result no longer matters.
        let _ = self.stream.write_all(b"0\r\n\r\n").await;

        match failure {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }

    /// Frame and send one chunk: `<hexlen>\r\n<bytes>\r\n`
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        let frame = format!("{:x}\r\n", chunk.len());
        self.stream.write_all(frame.as_bytes()).await?;
        self.stream.write_all(chunk).await?;
        self.stream.write_all(b"\r\n").await
    }

    /// Close the socket. Safe to call more than once.
    pub(crate) async fn shutdown(&mut self) {
        if self.running {
            let _ = self.stream.shutdown().await;
            self.running = false;
        }
    }

    /// Whether the proxy socket is still open
    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    /// Read one CR-LF-delimited line, byte at a time. A lone CR not
    /// followed by LF is literal data; EOF ends the line.
    async fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.stream.read(&mut byte).await? == 0 {
                break;
            }
            if byte[0] == b'\r' {
                if self.stream.read(&mut byte).await? == 0 || byte[0] == b'\n' {
                    break;
                }
                line.push(b'\r');
            }
            line.push(byte[0]);
        }
        Ok(line)
    }

    /// Read header lines until the blank separator
    async fn read_headers(&mut self) -> io::Result<Vec<String>> {
        let mut headers = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                break;
            }
            let header = String::from_utf8_lossy(&line).into_owned();
            tracing::trace!(header = header.as_str(), "got header");
            headers.push(header);
        }
        Ok(headers)
    }

    /// Send header lines plus the blank terminator
    async fn send_headers(&mut self, headers: &[&str]) -> io::Result<()> {
        for header in headers.iter().copied().chain(std::iter::once("")) {
            tracing::trace!(header = header, "sent header");
            self.stream
                .write_all(format!("{}\r\n", header).as_bytes())
                .await?;
        }
        Ok(())
    }
}

fn io_error(bytes: u64, source: io::Error) -> Error {
    Error::ProxyIo { bytes, source }
}
