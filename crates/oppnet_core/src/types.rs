//! Core identifiers and the per-run id sequence.

use serde::{Deserialize, Serialize};

/// Node identifier, always in `[0, N)` for a run with `N` nodes.
pub type NodeId = usize;

/// Simulated time in milliseconds.
pub type Timestamp = u64;

/// Milliseconds in one simulated hour.
pub const HOUR_MS: u64 = 60 * 60 * 1000;

/// Milliseconds in one simulated day.
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// Identity of an application message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Monotonic id generator owned by one simulation run.
///
/// Application messages and protocol messages (heartbeats, community
/// messages) draw from separate counters so that enabling an election
/// protocol never shifts application message ids.
#[derive(Debug, Clone, Default)]
pub struct IdSequence {
    next_message: u64,
    next_protocol: u64,
}

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next application message id.
    pub fn next_message_id(&mut self) -> MessageId {
        let id = MessageId(self.next_message);
        self.next_message += 1;
        id
    }

    /// Next heartbeat / community message id.
    pub fn next_protocol_id(&mut self) -> u64 {
        let id = self.next_protocol;
        self.next_protocol += 1;
        id
    }

    /// Number of application message ids handed out so far.
    pub fn messages_issued(&self) -> u64 {
        self.next_message
    }
}

/// Per-call context threaded through every exchange.
#[derive(Debug)]
pub struct ExchangeContext<'a> {
    /// Current tick.
    pub now: Timestamp,
    /// Time elapsed since the trace start.
    pub elapsed: u64,
    /// Id generator of the run.
    pub ids: &'a mut IdSequence,
}

impl<'a> ExchangeContext<'a> {
    pub fn new(now: Timestamp, elapsed: u64, ids: &'a mut IdSequence) -> Self {
        Self { now, elapsed, ids }
    }
}
