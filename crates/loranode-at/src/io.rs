//! IO task and command correlator for the AT protocol.
//!
//! One tokio task owns the transport exclusively. It performs writes on
//! behalf of callers and otherwise reads continuously, framing `\r` lines
//! and classifying each one against the command currently awaiting a reply.
//!
//! Callers go through [`ModemIo`], which serializes round-trips: the lock on
//! the reply channel is held across the whole write-then-wait sequence of a
//! command, so at most one command is ever pending. The pending command is
//! registered before its bytes are written and cleared when the reply is
//! delivered, the wait times out, or the caller's future is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use loranode_core::error::{Error, Result};
use loranode_core::events::ModemEvent;
use loranode_core::transport::Transport;

use crate::classify::{self, Classified, Rule};
use crate::protocol::{self, DecodeResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for the AT IO task.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// How long a single transport read may block before the loop checks
    /// for requests again.
    pub read_timeout: Duration,
    /// Classification table for inbound lines.
    pub rules: &'static [Rule],
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            rules: classify::RULES,
        }
    }
}

/// A request sent from [`ModemIo`] to the IO task.
enum Request {
    /// Write each chunk with its own transport send.
    Write {
        chunks: Vec<Vec<u8>>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Graceful shutdown; returns the transport for recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// The command awaiting a reply.
#[derive(Debug, Clone)]
struct PendingCommand {
    id: u64,
    command: String,
}

/// A reply routed from the IO task to the waiting caller.
#[derive(Debug)]
struct Reply {
    /// Id of the pending command the line was classified against.
    id: u64,
    outcome: Result<Vec<u8>>,
}

/// The single pending-command slot shared by callers and the IO task.
#[derive(Debug, Default)]
struct PendingSlot {
    current: Mutex<Option<PendingCommand>>,
    next_id: AtomicU64,
}

impl PendingSlot {
    fn lock(&self) -> MutexGuard<'_, Option<PendingCommand>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self) -> Option<PendingCommand> {
        self.lock().clone()
    }

    /// Clear the slot if it still holds command `id`.
    fn clear(&self, id: u64) {
        let mut current = self.lock();
        if current.as_ref().is_some_and(|pending| pending.id == id) {
            *current = None;
        }
    }
}

/// Registers a pending command and clears it on drop, including when the
/// caller's future is dropped mid-wait.
struct PendingGuard<'a> {
    slot: &'a PendingSlot,
    id: u64,
}

impl<'a> PendingGuard<'a> {
    fn register(slot: &'a PendingSlot, command: &str) -> Self {
        let id = slot.next_id.fetch_add(1, Ordering::Relaxed);
        *slot.lock() = Some(PendingCommand {
            id,
            command: command.to_string(),
        });
        PendingGuard { slot, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.slot.clear(self.id);
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to the IO task. Stored inside the modem session.
pub struct ModemIo {
    requests: mpsc::Sender<Request>,
    /// Holding this lock is what serializes command round-trips.
    replies: tokio::sync::Mutex<mpsc::Receiver<Reply>>,
    pending: Arc<PendingSlot>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ModemIo {
    /// Send a command line and wait up to `timeout` for its reply payload.
    ///
    /// Returns [`Error::Timeout`] if no matching line arrives in time and
    /// [`Error::Modem`] if the modem answers `+ERR`.
    pub async fn command(&self, text: &str, timeout: Duration) -> Result<Vec<u8>> {
        self.exchange(text, vec![protocol::encode_command(text)], timeout)
            .await
    }

    /// Like [`command`](Self::command), but writes `payload` verbatim right
    /// after the command line, before waiting.
    pub async fn command_with_binary(
        &self,
        text: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.exchange(
            text,
            vec![protocol::encode_command(text), payload.to_vec()],
            timeout,
        )
        .await
    }

    /// The command currently awaiting a reply, if any.
    pub fn pending_command(&self) -> Option<String> {
        self.pending.snapshot().map(|pending| pending.command)
    }

    /// Whether the IO task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Shut down the IO task and recover the transport.
    pub async fn shutdown(mut self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .requests
            .send(Request::Shutdown { reply: reply_tx })
            .await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = (&mut self.task).await;
        Ok(transport)
    }

    async fn exchange(&self, text: &str, chunks: Vec<Vec<u8>>, timeout: Duration) -> Result<Vec<u8>> {
        let mut replies = self.replies.lock().await;
        let deadline = Instant::now() + timeout;

        while let Ok(stale) = replies.try_recv() {
            warn!(id = stale.id, "discarding stale reply");
        }

        let pending = PendingGuard::register(&self.pending, text);
        debug!(command = text, id = pending.id, "sending command");

        let (write_tx, write_rx) = oneshot::channel();
        self.requests
            .send(Request::Write {
                chunks,
                reply: write_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        match tokio::time::timeout_at(deadline, write_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(Error::ConnectionLost),
            Err(_) => {
                warn!(command = text, "timed out writing command");
                return Err(Error::Timeout);
            }
        }

        loop {
            match tokio::time::timeout_at(deadline, replies.recv()).await {
                Ok(Some(reply)) if reply.id == pending.id => {
                    debug!(command = text, ok = reply.outcome.is_ok(), "command resolved");
                    return reply.outcome;
                }
                Ok(Some(reply)) => {
                    warn!(id = reply.id, expected = pending.id, "discarding reply for another command");
                }
                Ok(None) => return Err(Error::ConnectionLost),
                Err(_) => {
                    debug!(command = text, ?timeout, "command timed out");
                    return Err(Error::Timeout);
                }
            }
        }
    }
}

impl Drop for ModemIo {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the IO task. Returns the handle for sending commands.
///
/// The IO task owns the transport exclusively until
/// [`ModemIo::shutdown`] hands it back.
pub fn spawn_io_task(
    transport: Box<dyn Transport>,
    config: IoConfig,
    event_tx: broadcast::Sender<ModemEvent>,
) -> ModemIo {
    let (request_tx, request_rx) = mpsc::channel::<Request>(8);
    // At most one command is pending, so one slot is enough.
    let (reply_tx, reply_rx) = mpsc::channel::<Reply>(1);
    let pending = Arc::new(PendingSlot::default());
    let cancel = CancellationToken::new();

    let task = tokio::spawn(io_loop(
        transport,
        config,
        event_tx,
        pending.clone(),
        reply_tx,
        request_rx,
        cancel.clone(),
    ));

    ModemIo {
        requests: request_tx,
        replies: tokio::sync::Mutex::new(reply_rx),
        pending,
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// Maximum line buffer size before reset to prevent unbounded growth.
const MAX_BUF: usize = 8192;

/// The main IO loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Write and shutdown requests
/// 3. Reading inbound lines
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    event_tx: broadcast::Sender<ModemEvent>,
    pending: Arc<PendingSlot>,
    reply_tx: mpsc::Sender<Reply>,
    mut requests: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    let mut line_buf = Vec::new();
    let mut recv_buf = [0u8; 256];

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("modem IO task cancelled");
                break;
            }

            req = requests.recv() => {
                match req {
                    Some(Request::Write { chunks, reply }) => {
                        let result = write_chunks(&mut *transport, &chunks).await;
                        if let Err(ref e) = result {
                            error!(error = %e, "failed to write to modem");
                        }
                        let _ = reply.send(result);
                    }
                    Some(Request::Shutdown { reply }) => {
                        debug!("IO task shutdown requested");
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!("request channel closed, exiting IO task");
                        break;
                    }
                }
            }

            received = transport.receive(&mut recv_buf, config.read_timeout) => {
                match received {
                    Ok(n) => {
                        line_buf.extend_from_slice(&recv_buf[..n]);
                        if line_buf.len() > MAX_BUF {
                            warn!(len = line_buf.len(), "line buffer overflow, resetting");
                            line_buf.clear();
                            continue;
                        }
                        dispatch_lines(&mut line_buf, config.rules, &pending, &reply_tx, &event_tx);
                    }
                    Err(Error::Timeout) => {}
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "modem link lost");
                        let _ = event_tx.send(ModemEvent::Disconnected);
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "modem read failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }
    }

    if let Err(e) = transport.close().await {
        debug!(error = %e, "error closing transport");
    }
}

async fn write_chunks(transport: &mut dyn Transport, chunks: &[Vec<u8>]) -> Result<()> {
    for chunk in chunks {
        trace!(bytes = chunk.len(), "writing chunk");
        transport.send(chunk).await?;
    }
    Ok(())
}

/// Decode and handle every complete line in `buf`.
fn dispatch_lines(
    buf: &mut Vec<u8>,
    rules: &[Rule],
    pending: &PendingSlot,
    reply_tx: &mpsc::Sender<Reply>,
    event_tx: &broadcast::Sender<ModemEvent>,
) {
    loop {
        match protocol::decode_line(buf) {
            DecodeResult::Line { text, consumed } => {
                buf.drain(..consumed);
                handle_line(&text, rules, pending, reply_tx, event_tx);
            }
            DecodeResult::Blank(consumed) => {
                buf.drain(..consumed);
            }
            DecodeResult::Incomplete => break,
        }
    }
}

fn handle_line(
    line: &str,
    rules: &[Rule],
    pending: &PendingSlot,
    reply_tx: &mpsc::Sender<Reply>,
    event_tx: &broadcast::Sender<ModemEvent>,
) {
    let snapshot = pending.snapshot();
    let awaiting = snapshot.as_ref().map(|p| p.command.as_str());
    debug!(line, awaiting, "received line");

    let classified = classify::classify_with(rules, line, awaiting);
    let (pending_cmd, outcome) = match (snapshot, classified) {
        (_, Classified::Unhandled) => {
            warn!(line, "unhandled event");
            let _ = event_tx.send(ModemEvent::Unhandled {
                line: line.to_string(),
            });
            return;
        }
        (Some(cmd), Classified::Acknowledged) => {
            debug!(line, command = %cmd.command, "command acknowledged");
            return;
        }
        (Some(cmd), Classified::Matched(payload)) => (cmd, Ok(payload)),
        (Some(cmd), Classified::ModemError(response)) => {
            error!(command = %cmd.command, %response, "modem error");
            let _ = event_tx.send(ModemEvent::ModemError {
                command: cmd.command.clone(),
                response: response.clone(),
            });
            let err = Error::Modem {
                command: cmd.command.clone(),
                response,
            };
            (cmd, Err(err))
        }
        (Some(cmd), Classified::Invalid(reason)) => {
            warn!(command = %cmd.command, %reason, "malformed reply");
            (cmd, Err(Error::Protocol(reason)))
        }
        // Only Unhandled is produced without a pending command.
        (None, _) => return,
    };

    pending.clear(pending_cmd.id);
    match reply_tx.try_send(Reply {
        id: pending_cmd.id,
        outcome,
    }) {
        Ok(()) => {}
        Err(TrySendError::Full(reply)) => {
            warn!(
                id = reply.id,
                command = %pending_cmd.command,
                "reply slot already occupied, dropping reply (protocol violation)"
            );
        }
        Err(TrySendError::Closed(_)) => {
            debug!("no correlator listening, dropping reply");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
