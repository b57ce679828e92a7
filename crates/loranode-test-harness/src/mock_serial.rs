//! Mock transport for deterministic testing of the AT engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/reply scripts. Replies can be delayed, so timeouts and
//! unsolicited lines arriving mid-command can be tested under paused tokio
//! time without a modem attached.
//!
//! The transport is normally boxed and moved into the engine's I/O task, so
//! all inspection happens through a cloneable [`MockHandle`] taken before
//! the move.
//!
//! # Example
//!
//! ```
//! use loranode_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the engine sends "AT\r", the modem answers "+OK".
//! mock.expect(b"AT\r", b"+OK\r");
//! let handle = mock.handle();
//! assert_eq!(handle.remaining_expectations(), 1);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use loranode_core::error::{Error, Result};
use loranode_core::transport::Transport;

use crate::mock_reset::MockResetLine;

/// One entry in the mock's activity journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// Bytes passed to `send()`.
    Sent(Vec<u8>),
    /// Bytes handed out by `receive()`.
    Received(Vec<u8>),
    /// `clear_input()` was called.
    InputCleared,
    /// The reset line obtained from [`MockTransport::reset_line`] was driven.
    Reset(bool),
}

/// A scripted request and the replies it triggers.
#[derive(Debug)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// Reply chunks, each delivered after its delay (measured from the send).
    replies: Vec<(Duration, Vec<u8>)>,
}

/// Bytes that become readable at `ready_at`.
#[derive(Debug)]
struct Inbound {
    ready_at: Instant,
    bytes: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct MockState {
    expectations: VecDeque<Expectation>,
    /// Ordered by `ready_at`.
    inbound: VecDeque<Inbound>,
    pub(crate) journal: Vec<MockEvent>,
    connected: bool,
}

impl MockState {
    fn schedule(&mut self, ready_at: Instant, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let pos = self
            .inbound
            .iter()
            .position(|item| item.ready_at > ready_at)
            .unwrap_or(self.inbound.len());
        self.inbound.insert(pos, Inbound { ready_at, bytes });
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<MockState>,
    notify: Notify,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable view of a [`MockTransport`] for scripting and inspection after
/// the transport itself has been handed to the engine.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockHandle {
    /// Add an expected request with an immediate reply.
    ///
    /// An empty `response` means the request is accepted silently.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.expect_replies(request, &[(Duration::ZERO, response)]);
    }

    /// Add an expected request whose reply arrives after `delay`.
    pub fn expect_delayed(&self, request: &[u8], delay: Duration, response: &[u8]) {
        self.expect_replies(request, &[(delay, response)]);
    }

    /// Add an expected request that triggers several replies, each after its
    /// own delay measured from the moment the request is sent.
    pub fn expect_replies(&self, request: &[u8], replies: &[(Duration, &[u8])]) {
        self.shared.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            replies: replies
                .iter()
                .map(|(delay, bytes)| (*delay, bytes.to_vec()))
                .collect(),
        });
    }

    /// Make `bytes` readable right away, as if the modem sent them unprompted.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.push_inbound_after(Duration::ZERO, bytes);
    }

    /// Make `bytes` readable after `delay`.
    pub fn push_inbound_after(&self, delay: Duration, bytes: &[u8]) {
        self.shared
            .lock()
            .schedule(Instant::now() + delay, bytes.to_vec());
        self.shared.notify.notify_one();
    }

    /// All data sent through the transport, one element per `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .journal
            .iter()
            .filter_map(|event| match event {
                MockEvent::Sent(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Everything that happened on the transport, in order.
    pub fn journal(&self) -> Vec<MockEvent> {
        self.shared.lock().journal.clone()
    }

    /// Number of expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.shared.lock().expectations.len()
    }

    /// Set the connected state.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls return
    /// [`Error::NotConnected`], including a `receive()` already waiting.
    pub fn set_connected(&self, connected: bool) {
        self.shared.lock().connected = connected;
        self.shared.notify.notify_one();
    }
}

/// A mock [`Transport`] for testing the AT engine without hardware.
///
/// Expectations are consumed in order. When `send()` is called the data is
/// journaled and matched against the next expectation; the expectation's
/// replies are then scheduled for `receive()`. A mismatch, or a send with
/// no expectation left, fails with [`Error::Protocol`].
#[derive(Debug)]
pub struct MockTransport {
    handle: MockHandle,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            handle: MockHandle {
                shared: Arc::new(Shared {
                    state: Mutex::new(MockState {
                        expectations: VecDeque::new(),
                        inbound: VecDeque::new(),
                        journal: Vec::new(),
                        connected: true,
                    }),
                    notify: Notify::new(),
                }),
            },
        }
    }

    /// A handle that stays usable after the transport is moved.
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    /// A reset line that records its transitions in this transport's journal.
    pub fn reset_line(&self) -> MockResetLine {
        MockResetLine::new(self.handle.shared.clone())
    }

    /// See [`MockHandle::expect`].
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.handle.expect(request, response);
    }

    /// See [`MockHandle::expect_delayed`].
    pub fn expect_delayed(&mut self, request: &[u8], delay: Duration, response: &[u8]) {
        self.handle.expect_delayed(request, delay, response);
    }

    /// See [`MockHandle::expect_replies`].
    pub fn expect_replies(&mut self, request: &[u8], replies: &[(Duration, &[u8])]) {
        self.handle.expect_replies(request, replies);
    }

    /// See [`MockHandle::push_inbound`].
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.handle.push_inbound(bytes);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let shared = &self.handle.shared;
        let mut guard = shared.lock();
        let state = &mut *guard;
        if !state.connected {
            return Err(Error::NotConnected);
        }

        state.journal.push(MockEvent::Sent(data.to_vec()));

        match state.expectations.pop_front() {
            Some(expectation) if expectation.request == data => {
                let now = Instant::now();
                for (delay, bytes) in expectation.replies {
                    state.schedule(now + delay, bytes);
                }
                drop(guard);
                shared.notify.notify_one();
                Ok(())
            }
            Some(expectation) => {
                let expected = String::from_utf8_lossy(&expectation.request).into_owned();
                let got = String::from_utf8_lossy(data).into_owned();
                warn!(%expected, %got, "mock transport: unexpected send");
                Err(Error::Protocol(format!(
                    "unexpected send data: expected {expected:?}, got {got:?}"
                )))
            }
            None => {
                let got = String::from_utf8_lossy(data).into_owned();
                warn!(%got, "mock transport: send with no expectation left");
                Err(Error::Protocol(format!(
                    "no more expectations in mock transport (sent {got:?})"
                )))
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let shared = &self.handle.shared;
        let deadline = Instant::now() + timeout;

        loop {
            let wake = {
                let mut guard = shared.lock();
                let state = &mut *guard;
                if !state.connected {
                    return Err(Error::NotConnected);
                }

                let now = Instant::now();
                match state.inbound.front_mut() {
                    Some(item) if item.ready_at <= now => {
                        let n = item.bytes.len().min(buf.len());
                        buf[..n].copy_from_slice(&item.bytes[..n]);
                        let chunk: Vec<u8> = item.bytes.drain(..n).collect();
                        if item.bytes.is_empty() {
                            state.inbound.pop_front();
                        }
                        trace!(bytes = n, "mock transport: delivering inbound");
                        state.journal.push(MockEvent::Received(chunk));
                        return Ok(n);
                    }
                    Some(item) => item.ready_at.min(deadline),
                    None => deadline,
                }
            };

            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }

            tokio::select! {
                _ = shared.notify.notified() => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn clear_input(&mut self) -> Result<()> {
        let mut guard = self.handle.shared.lock();
        let state = &mut *guard;
        if !state.connected {
            return Err(Error::NotConnected);
        }
        let now = Instant::now();
        let before = state.inbound.len();
        state.inbound.retain(|item| item.ready_at > now);
        debug!(
            dropped = before - state.inbound.len(),
            "mock transport: input cleared"
        );
        state.journal.push(MockEvent::InputCleared);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.handle.shared.lock();
        state.connected = false;
        state.inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.shared.lock().connected
    }
}
