//! Outbound request buffering
//!
//! Requests issued before their handshake precondition holds wait here
//! in arrival order.

use std::collections::VecDeque;

use crate::protocol::ClientRequest;

/// FIFO of outbound requests awaiting dispatch
#[derive(Debug, Default)]
pub struct PendingQueue {
    requests: VecDeque<ClientRequest>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self {
            requests: VecDeque::new(),
        }
    }

    /// Append a request; order is preserved across flushes
    pub fn push(&mut self, request: ClientRequest) {
        self.requests.push_back(request);
    }

    /// Drain every queued request in arrival order
    pub fn take_all(&mut self) -> Vec<ClientRequest> {
        self.requests.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }
}
