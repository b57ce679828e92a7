//! MessagePack-RPC client for the sensor sketch on the M4 core.
//!
//! The sketch exposes zero-argument methods (`temperature`, `humidity`)
//! through the board's M4 proxy. Each call opens its own TCP connection,
//! sends `[0, msgid, method, []]` and reads back `[1, msgid, error, result]`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use loranode_core::error::{Error, Result};

use crate::sensor::SensorSource;

/// Address of the M4 proxy inside the board's container network.
pub const DEFAULT_M4_PROXY_ADDR: &str = "m4-proxy:5001";
/// Per-call timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

const REQUEST: u8 = 0;
const RESPONSE: u8 = 1;

/// Encode a request with no parameters.
pub fn encode_request(msgid: u32, method: &str) -> Result<Vec<u8>> {
    let params: [u8; 0] = [];
    rmp_serde::to_vec(&(REQUEST, msgid, method, params))
        .map_err(|e| Error::InvalidParameter(format!("cannot encode RPC request: {e}")))
}

/// Wire shape of a response: type, msgid, error, result.
type Response = (u8, u32, Option<String>, Option<f64>);

/// Client for the M4 proxy.
#[derive(Debug)]
pub struct M4ProxyClient {
    addr: String,
    timeout: Duration,
    next_msgid: AtomicU32,
}

impl M4ProxyClient {
    /// Create a client for `addr` (`host:port`). No connection is made until
    /// the first call.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            next_msgid: AtomicU32::new(0),
        }
    }

    /// The proxy address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Call a zero-argument method returning a number.
    ///
    /// Every failure (connect, timeout, remote error, malformed reply) is
    /// reported as [`Error::RpcUnavailable`].
    pub async fn call(&self, method: &str) -> Result<f64> {
        let msgid = self.next_msgid.fetch_add(1, Ordering::Relaxed);
        let request = encode_request(msgid, method)?;
        debug!(addr = %self.addr, method, msgid, "RPC call");

        let response = tokio::time::timeout(self.timeout, self.exchange(&request))
            .await
            .map_err(|_| {
                Error::RpcUnavailable(format!("{method}: no reply within {:?}", self.timeout))
            })??;

        let (kind, reply_id, error, result) = response;
        if kind != RESPONSE || reply_id != msgid {
            return Err(Error::RpcUnavailable(format!(
                "{method}: unexpected reply (type {kind}, msgid {reply_id}, expected {msgid})"
            )));
        }
        if let Some(error) = error {
            return Err(Error::RpcUnavailable(format!("{method}: {error}")));
        }
        result.ok_or_else(|| Error::RpcUnavailable(format!("{method}: reply carries no value")))
    }

    async fn exchange(&self, request: &[u8]) -> Result<Response> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::RpcUnavailable(format!("connect to {}: {}", self.addr, e)))?;
        stream
            .write_all(request)
            .await
            .map_err(|e| Error::RpcUnavailable(format!("send to {}: {}", self.addr, e)))?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| Error::RpcUnavailable(format!("read from {}: {}", self.addr, e)))?;
            buf.extend_from_slice(&chunk[..n]);
            trace!(bytes = buf.len(), "RPC reply bytes");

            match rmp_serde::from_slice::<Response>(&buf) {
                Ok(response) => return Ok(response),
                Err(e) if n == 0 => {
                    return Err(Error::RpcUnavailable(format!(
                        "malformed reply from {}: {}",
                        self.addr, e
                    )));
                }
                // Incomplete so far; keep reading.
                Err(_) => {}
            }
        }
    }
}

impl Default for M4ProxyClient {
    fn default() -> Self {
        Self::new(DEFAULT_M4_PROXY_ADDR, DEFAULT_RPC_TIMEOUT)
    }
}

#[async_trait]
impl SensorSource for M4ProxyClient {
    async fn temperature(&self) -> Result<f64> {
        self.call("temperature").await
    }

    async fn humidity(&self) -> Result<f64> {
        self.call("humidity").await
    }
}
