//! Response sequence numbering and client acknowledgment echo

/// Assigns server sequence numbers and tracks the last client sequence seen
///
/// The server counter is independent of the client's: gaps or repeats in
/// client sequence numbers are echoed as-is and never affect the server
/// counter.
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    response_sequence: u64,
    last_acked: Option<u64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the next response sequence number (first is 1)
    pub fn next_response_seq(&mut self) -> u64 {
        self.response_sequence += 1;
        self.response_sequence
    }

    /// Record and echo a client sequence number
    pub fn ack(&mut self, client_seq: u64) -> u64 {
        self.last_acked = Some(client_seq);
        client_seq
    }

    /// Number of responses emitted so far
    pub fn response_sequence(&self) -> u64 {
        self.response_sequence
    }

    pub fn last_acked(&self) -> Option<u64> {
        self.last_acked
    }
}
