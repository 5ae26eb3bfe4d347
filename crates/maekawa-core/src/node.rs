//! # node
//!
//! why: hold the per-node facts every protocol role needs, passed explicitly instead of globals
//! relations: shared by messenger.rs, voter.rs and requester.rs through an Arc
//! what: AddressBook, NodeContext, CsPhase

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::clock::{SharedClock, VectorClock};
use crate::error::ClockError;
use crate::ProcessId;

/// Where each process listens, keyed by process id
pub type AddressBook = BTreeMap<ProcessId, SocketAddr>;

/// Where this node is in its own request cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CsPhase {
    /// not asking for the critical section
    Idle,
    /// request broadcast, collecting grants
    Requesting,
    /// every quorum member has granted, inside the critical section
    InCriticalSection,
    /// release broadcast in progress
    Releasing,
}

impl Default for CsPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl CsPhase {
    fn to_u8(self) -> u8 {
        match self {
            CsPhase::Idle => 0,
            CsPhase::Requesting => 1,
            CsPhase::InCriticalSection => 2,
            CsPhase::Releasing => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CsPhase::Requesting,
            2 => CsPhase::InCriticalSection,
            3 => CsPhase::Releasing,
            _ => CsPhase::Idle,
        }
    }
}

/// Everything a node knows about itself and its peers
///
/// The address book and quorum never change after construction. The clock and
/// the phase are the only mutable parts and both are safe to share.
#[derive(Debug)]
pub struct NodeContext {
    pub id: ProcessId,
    pub addresses: AddressBook,
    pub quorum: BTreeSet<ProcessId>,
    /// node that runs the auditor and receives DEBUG reports
    pub collector: ProcessId,
    pub clock: SharedClock,
    phase: AtomicU8,
}

impl NodeContext {
    /// Create a context with the startup clock sized to the address book
    pub fn new(
        id: ProcessId,
        addresses: AddressBook,
        quorum: BTreeSet<ProcessId>,
        collector: ProcessId,
    ) -> Result<Self, ClockError> {
        let width = addresses.keys().next_back().map_or(0, |max| max + 1);
        let clock = VectorClock::new(width, id)?;
        Ok(Self {
            id,
            addresses,
            quorum,
            collector,
            clock: SharedClock::new(clock),
            phase: AtomicU8::new(CsPhase::Idle.to_u8()),
        })
    }

    pub fn node_count(&self) -> usize {
        self.addresses.len()
    }

    pub fn address_of(&self, pid: ProcessId) -> Option<SocketAddr> {
        self.addresses.get(&pid).copied()
    }

    /// Addresses of every quorum member we know how to reach
    pub fn quorum_addresses(&self) -> Vec<SocketAddr> {
        self.quorum
            .iter()
            .filter_map(|pid| self.address_of(*pid))
            .collect()
    }

    pub fn is_quorum_member(&self, pid: ProcessId) -> bool {
        self.quorum.contains(&pid)
    }

    pub fn phase(&self) -> CsPhase {
        CsPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: CsPhase) {
        self.phase.store(phase.to_u8(), Ordering::SeqCst);
    }

    /// Entered and not yet done releasing
    pub fn in_critical_section(&self) -> bool {
        matches!(self.phase(), CsPhase::InCriticalSection | CsPhase::Releasing)
    }
}
