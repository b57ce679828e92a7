//! Mock TCP server for testing the sensor RPC client.
//!
//! [`MockTcpServer`] provides a lightweight TCP listener pre-loaded with
//! scripted exchanges. The RPC client opens one connection per call, so the
//! server accepts a fresh connection for every expectation.
//!
//! # Example
//!
//! ```
//! use loranode_test_harness::MockTcpServer;
//!
//! # async fn example() -> loranode_core::Result<()> {
//! let mut server = MockTcpServer::new().await?;
//! server.expect(b"request bytes", b"response bytes");
//! let addr = server.addr().to_string();
//! server.start();
//! // ... connect to `addr` and test ...
//! # Ok(())
//! # }
//! ```

use loranode_core::error::{Error, Result};
use std::collections::VecDeque;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A scripted exchange on one connection.
#[derive(Debug, Clone)]
struct TcpExpectation {
    /// The exact bytes we expect the client to send.
    request: Vec<u8>,
    /// The bytes to send back, or `None` to stay silent until the client
    /// hangs up.
    response: Option<Vec<u8>>,
}

/// A mock TCP server listening on a random localhost port.
///
/// Once [`start`](MockTcpServer::start) is called it processes expectations
/// in order, one accepted connection per expectation. A request that does
/// not match ends the server task with an error, reported by
/// [`wait`](MockTcpServer::wait).
pub struct MockTcpServer {
    /// The address the server is listening on (e.g., "127.0.0.1:54321").
    addr: String,
    listener: Option<TcpListener>,
    expectations: VecDeque<TcpExpectation>,
    server_handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockTcpServer {
    /// Bind a new mock server on a random port.
    ///
    /// Connections queue in the listener's backlog until
    /// [`start`](MockTcpServer::start) is called.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock TCP server: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?.to_string();

        Ok(Self {
            addr,
            listener: Some(listener),
            expectations: VecDeque::new(),
            server_handle: None,
        })
    }

    /// Expect a connection carrying `request`, answered with `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: Some(response.to_vec()),
        });
    }

    /// Expect a connection carrying `request` that is never answered.
    pub fn expect_no_reply(&mut self, request: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: None,
        });
    }

    /// The address the server is listening on.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Start processing expectations in a background task.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let expectations: Vec<TcpExpectation> = self.expectations.drain(..).collect();

        let handle = tokio::spawn(async move {
            for (i, expectation) in expectations.iter().enumerate() {
                let (mut stream, _) = listener
                    .accept()
                    .await
                    .map_err(|e| format!("expectation {}: accept failed: {}", i, e))?;
                serve_one(i, &mut stream, expectation).await?;
            }
            Ok(())
        });

        self.server_handle = Some(handle);
    }

    /// Wait for the server task to complete and return any errors.
    pub async fn wait(self) -> std::result::Result<(), String> {
        if let Some(handle) = self.server_handle {
            handle
                .await
                .map_err(|e| format!("server task panicked: {}", e))?
        } else {
            Ok(())
        }
    }
}

async fn serve_one(
    i: usize,
    stream: &mut TcpStream,
    expectation: &TcpExpectation,
) -> std::result::Result<(), String> {
    let mut buf = vec![0u8; expectation.request.len()];
    let mut total_read = 0;

    while total_read < expectation.request.len() {
        let n = stream
            .read(&mut buf[total_read..])
            .await
            .map_err(|e| format!("expectation {}: read error: {}", i, e))?;
        if n == 0 {
            return Err(format!(
                "expectation {}: client disconnected after {} bytes (expected {})",
                i,
                total_read,
                expectation.request.len()
            ));
        }
        total_read += n;
    }

    if buf != expectation.request {
        warn!(expectation = i, "mock TCP server: request mismatch");
        return Err(format!(
            "expectation {}: request mismatch: expected {:02X?}, got {:02X?}",
            i, expectation.request, buf
        ));
    }

    match &expectation.response {
        Some(response) => {
            stream
                .write_all(response)
                .await
                .map_err(|e| format!("expectation {}: write error: {}", i, e))?;
            stream
                .flush()
                .await
                .map_err(|e| format!("expectation {}: flush error: {}", i, e))?;
        }
        None => {
            debug!(expectation = i, "mock TCP server: holding connection without reply");
            // Hold the connection open until the client gives up.
            let mut sink = [0u8; 64];
            while stream.read(&mut sink).await.map_err(|e| e.to_string())? > 0 {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_each_connection() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect(b"ping", b"pong");
        server.expect(b"again", b"done");
        let addr = server.addr().to_string();
        server.start();

        let exchanges: [(&[u8], &[u8]); 2] = [(b"ping", b"pong"), (b"again", b"done")];
        for (request, expected) in exchanges {
            let mut stream = TcpStream::connect(&addr).await.unwrap();
            stream.write_all(request).await.unwrap();
            let mut reply = vec![0u8; expected.len()];
            stream.read_exact(&mut reply).await.unwrap();
            assert_eq!(reply, expected);
        }

        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn mismatch_is_reported() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect(b"ping", b"pong");
        let addr = server.addr().to_string();
        server.start();

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        stream.write_all(b"pong").await.unwrap();

        let err = server.wait().await.unwrap_err();
        assert!(err.contains("request mismatch"));
    }

    #[tokio::test]
    async fn silent_expectation_ends_on_hangup() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect_no_reply(b"ping");
        let addr = server.addr().to_string();
        server.start();

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        drop(stream);

        server.wait().await.unwrap();
    }
}
