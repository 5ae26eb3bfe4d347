//! # request
//!
//! why: order competing critical section requests the same way on every voter
//! relations: created and owned by voter.rs from inbound REQUEST stamps
//! what: RequestKey, PendingRequest

use std::cmp::Ordering;

use crate::message::Stamp;
use crate::ProcessId;

/// Total order over requests: scalar clock first, process id breaks ties
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    pub scalar: u64,
    pub source: ProcessId,
}

/// A REQUEST this node has received but not finished voting on
#[derive(Debug, Clone)]
pub struct PendingRequest {
    stamp: Stamp,
    /// a FAILED has gone out for this request since it was last granted
    pub sent_failed: bool,
    /// an INQUIRE has gone out for this request since it was last granted
    pub sent_inquire: bool,
}

impl PendingRequest {
    pub fn new(stamp: Stamp) -> Self {
        Self {
            stamp,
            sent_failed: false,
            sent_inquire: false,
        }
    }

    pub fn process_id(&self) -> ProcessId {
        self.stamp.source
    }

    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    pub fn key(&self) -> RequestKey {
        RequestKey {
            scalar: self.stamp.clock.scalar_value(),
            source: self.stamp.source,
        }
    }

    /// Clear the voter flags; each grant starts a fresh vote
    pub fn reset_flags(&mut self) {
        self.sent_failed = false;
        self.sent_inquire = false;
    }
}

impl PartialEq for PendingRequest {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PendingRequest {}

impl PartialOrd for PendingRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
