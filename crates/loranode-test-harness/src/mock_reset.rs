//! Mock reset line.

use std::sync::Arc;

use async_trait::async_trait;
use loranode_core::error::Result;
use loranode_core::reset::ResetLine;

use crate::mock_serial::{MockEvent, Shared};

/// A [`ResetLine`] that journals every transition next to the traffic of the
/// [`MockTransport`](crate::MockTransport) it was created from, so tests can
/// check that the reset happened before the input was cleared and the first
/// command was sent.
#[derive(Debug)]
pub struct MockResetLine {
    shared: Arc<Shared>,
}

impl MockResetLine {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl ResetLine for MockResetLine {
    async fn set(&mut self, asserted: bool) -> Result<()> {
        self.shared.lock().journal.push(MockEvent::Reset(asserted));
        Ok(())
    }
}
