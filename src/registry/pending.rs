//! Bounded-lifetime queue for out-of-order administrative events
//!
//! Event delivery order between a registration and other events about the
//! same client is not guaranteed. An operation targeting an unknown client
//! ID is parked here and replayed the moment the ID becomes known; entries
//! are dropped when the client unregisters first or when they outlive the
//! expiry window without a matching registration.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::models::Message;

/// One parked operation waiting for its client to register
#[derive(Debug, Clone)]
pub struct PendingOp {
    /// The client the operation targets
    pub client_id: String,
    /// Who sent the original event
    pub sender_id: String,
    /// The event message, replayed verbatim
    pub message: Message,
    queued_at: Instant,
}

/// Queue of parked operations with a fixed expiry window
pub struct PendingPool {
    ops: Mutex<Vec<PendingOp>>,
    max_age: Duration,
}

impl PendingPool {
    /// Create a pool whose entries expire after `max_age`
    pub fn new(max_age: Duration) -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            max_age,
        }
    }

    /// The configured expiry window
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Park an operation until its client ID becomes known
    pub fn push(&self, client_id: impl Into<String>, sender_id: impl Into<String>, message: Message) {
        let op = PendingOp {
            client_id: client_id.into(),
            sender_id: sender_id.into(),
            message,
            queued_at: Instant::now(),
        };
        self.ops.lock().push(op);
    }

    /// Remove and return all operations parked for the given client,
    /// oldest first
    pub fn take_for(&self, client_id: &str) -> Vec<PendingOp> {
        let mut ops = self.ops.lock();
        let mut matched = Vec::new();
        let mut i = 0;
        while i < ops.len() {
            if ops[i].client_id == client_id {
                matched.push(ops.remove(i));
            } else {
                i += 1;
            }
        }
        matched
    }

    /// Drop all operations parked for the given client; returns the count
    pub fn discard_for(&self, client_id: &str) -> usize {
        let mut ops = self.ops.lock();
        let before = ops.len();
        ops.retain(|op| op.client_id != client_id);
        before - ops.len()
    }

    /// Drop operations older than the expiry window; returns the count
    pub fn sweep_expired(&self) -> usize {
        let mut ops = self.ops.lock();
        let before = ops.len();
        let max_age = self.max_age;
        ops.retain(|op| op.queued_at.elapsed() <= max_age);
        before - ops.len()
    }

    /// Number of parked operations
    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }
}
