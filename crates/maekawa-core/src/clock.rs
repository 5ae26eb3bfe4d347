//! # clock
//!
//! why: order concurrent critical section requests deterministically across nodes
//! relations: stamped by messenger.rs on every send, merged by voter.rs on every receive
//! what: VectorClock, SharedClock, text encoding `owner[v0:v1:...]`

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{ClockError, ParseError};
use crate::ProcessId;

/// A vector of per-process event counters owned by one process
///
/// The owner's own slot only ever grows: every stamp and every merge bumps it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorClock {
    owner: ProcessId,
    slots: Vec<u64>,
}

impl VectorClock {
    /// Create the startup clock for `owner`: all zero except the owner's slot = 1
    pub fn new(width: usize, owner: ProcessId) -> Result<Self, ClockError> {
        if width == 0 {
            return Err(ClockError::ZeroWidth);
        }
        if owner >= width {
            return Err(ClockError::OwnerOutOfRange { owner, width });
        }
        let mut slots = vec![0; width];
        slots[owner] = 1;
        Ok(Self { owner, slots })
    }

    /// Build a clock from raw slot values
    pub fn from_slots(slots: Vec<u64>, owner: ProcessId) -> Result<Self, ClockError> {
        if slots.is_empty() {
            return Err(ClockError::ZeroWidth);
        }
        if owner >= slots.len() {
            return Err(ClockError::OwnerOutOfRange { owner, width: slots.len() });
        }
        Ok(Self { owner, slots })
    }

    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    pub fn width(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[u64] {
        &self.slots
    }

    /// Record a send event and return the snapshot to embed in the message
    pub fn stamp_for_send(&mut self) -> VectorClock {
        self.slots[self.owner] += 1;
        self.clone()
    }

    /// Record a receive event: take the component-wise max, then bump our own slot
    pub fn merge(&mut self, received: &VectorClock) -> Result<(), ClockError> {
        if received.width() != self.width() {
            return Err(ClockError::WidthMismatch {
                local: self.width(),
                received: received.width(),
            });
        }
        for (mine, theirs) in self.slots.iter_mut().zip(&received.slots) {
            *mine = (*mine).max(*theirs);
        }
        self.slots[self.owner] += 1;
        Ok(())
    }

    /// Sum of all slots. Only an ordering key, never a causal comparison.
    pub fn scalar_value(&self) -> u64 {
        self.slots.iter().sum()
    }

    /// True when every slot is <= the other's and at least one is strictly less
    pub fn happened_before(&self, other: &VectorClock) -> bool {
        if self.width() != other.width() {
            return false;
        }
        let mut strictly_less = false;
        for (mine, theirs) in self.slots.iter().zip(&other.slots) {
            match mine.cmp(theirs) {
                Ordering::Greater => return false,
                Ordering::Less => strictly_less = true,
                Ordering::Equal => {}
            }
        }
        strictly_less
    }

    /// Neither clock happened before the other and they differ
    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        self.slots != other.slots && !self.happened_before(other) && !other.happened_before(self)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.owner)?;
        for (i, value) in self.slots.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("]")
    }
}

impl FromStr for VectorClock {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ParseError::Empty);
        }
        let (owner, rest) = text.split_once('[').ok_or(ParseError::MissingDelimiter('['))?;
        let body = rest.strip_suffix(']').ok_or(ParseError::MissingDelimiter(']'))?;

        let owner = parse_int::<ProcessId>(owner)?;
        let slots = body
            .split(':')
            .map(parse_int::<u64>)
            .collect::<Result<Vec<_>, _>>()?;

        if owner >= slots.len() {
            return Err(ParseError::OwnerOutOfRange { owner, width: slots.len() });
        }
        Ok(Self { owner, slots })
    }
}

pub(crate) fn parse_int<T: FromStr>(token: &str) -> Result<T, ParseError> {
    let token = token.trim();
    token
        .parse()
        .map_err(|_| ParseError::InvalidInteger(token.to_string()))
}

// -- shared clock --

/// The node's one clock, shared by the voter and requester roles
///
/// Every read-modify-write happens under a single lock acquisition.
#[derive(Debug, Clone)]
pub struct SharedClock {
    inner: Arc<Mutex<VectorClock>>,
}

impl SharedClock {
    pub fn new(clock: VectorClock) -> Self {
        Self { inner: Arc::new(Mutex::new(clock)) }
    }

    pub fn stamp_for_send(&self) -> VectorClock {
        self.inner.lock().stamp_for_send()
    }

    pub fn merge(&self, received: &VectorClock) -> Result<(), ClockError> {
        self.inner.lock().merge(received)
    }

    pub fn scalar_value(&self) -> u64 {
        self.inner.lock().scalar_value()
    }

    /// stamp once and read the resulting scalar without letting anyone in between
    pub fn stamp_and_read(&self) -> u64 {
        let mut clock = self.inner.lock();
        clock.stamp_for_send();
        clock.scalar_value()
    }

    pub fn snapshot(&self) -> VectorClock {
        self.inner.lock().clone()
    }
}
