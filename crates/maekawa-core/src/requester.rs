//! # requester
//!
//! why: win every quorum member's vote before entering the critical section, and give them back after
//! relations: consumes the events voter.rs forwards, sends through messenger.rs
//! what: VoteTally, Requester (enter_cs / leave_cs)

use std::collections::BTreeSet;

use crossbeam_channel::{never, select, Receiver};
use tracing::{debug, trace};

use crate::error::RequesterError;
use crate::message::{Message, VoteKind};
use crate::messenger::Messenger;
use crate::node::CsPhase;
use crate::ProcessId;

/// Grants currently held from quorum members for one outstanding request
#[derive(Debug, Clone)]
pub struct VoteTally {
    quorum: BTreeSet<ProcessId>,
    confirmed: BTreeSet<ProcessId>,
}

impl VoteTally {
    pub fn new(quorum: BTreeSet<ProcessId>) -> Self {
        Self {
            quorum,
            confirmed: BTreeSet::new(),
        }
    }

    /// Fold one event into the tally
    ///
    /// Returns the member to send YIELD to when the event was an INQUIRE for
    /// a grant we currently hold. An INQUIRE from a member we hold no grant
    /// from concerns an earlier request: links are FIFO, so a grant for this
    /// request always arrives before any INQUIRE about it.
    /// Events from processes outside the quorum change nothing.
    pub fn apply(&mut self, event: &Message) -> Option<ProcessId> {
        let (kind, stamp) = event.vote()?;
        let from = stamp.source;
        if !self.quorum.contains(&from) {
            return None;
        }
        match kind {
            VoteKind::Grant => {
                self.confirmed.insert(from);
                None
            }
            VoteKind::Failed => {
                self.confirmed.remove(&from);
                None
            }
            VoteKind::Inquire => self.confirmed.remove(&from).then_some(from),
            VoteKind::Request | VoteKind::Yield | VoteKind::Release => None,
        }
    }

    pub fn confirmed(&self) -> &BTreeSet<ProcessId> {
        &self.confirmed
    }

    /// Every quorum member has granted
    pub fn is_complete(&self) -> bool {
        self.confirmed.len() == self.quorum.len()
    }
}

/// This node's side of asking for the critical section
pub struct Requester {
    messenger: Messenger,
    events: Receiver<Message>,
    shutdown: Receiver<()>,
}

impl Requester {
    pub fn new(messenger: Messenger, events: Receiver<Message>) -> Self {
        Self {
            messenger,
            events,
            shutdown: never(),
        }
    }

    /// Abort a pending `enter_cs` when this channel fires or disconnects
    pub fn with_shutdown(mut self, shutdown: Receiver<()>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Broadcast REQUEST to the quorum and block until every member has granted
    ///
    /// Returns the scalar clock at the moment of entry.
    pub fn enter_cs(&mut self) -> Result<u64, RequesterError> {
        let ctx = self.messenger.context().clone();
        ctx.set_phase(CsPhase::Requesting);
        let request = self.messenger.broadcast_to_quorum(VoteKind::Request);
        debug!(node = ctx.id, %request, "requesting critical section");

        let mut tally = VoteTally::new(ctx.quorum.clone());
        while !tally.is_complete() {
            let event = select! {
                recv(self.events) -> event => match event {
                    Ok(event) => event,
                    Err(_) => {
                        ctx.set_phase(CsPhase::Idle);
                        return Err(RequesterError::Disconnected);
                    }
                },
                recv(self.shutdown) -> _ => {
                    ctx.set_phase(CsPhase::Idle);
                    return Err(RequesterError::Cancelled);
                }
            };
            trace!(node = ctx.id, %event, "requester event");
            if let Some(member) = tally.apply(&event) {
                debug!(node = ctx.id, to = member, "yielding vote");
                self.messenger.send_to(VoteKind::Yield, member);
            }
        }

        ctx.set_phase(CsPhase::InCriticalSection);
        let stray = self.events.try_iter().count();
        if stray > 0 {
            trace!(node = ctx.id, stray, "discarded stray events on entry");
        }
        let enter = ctx.clock.scalar_value();
        debug!(node = ctx.id, enter, "entered critical section");
        Ok(enter)
    }

    /// Release every quorum member's vote; returns the exit scalar clock
    pub fn leave_cs(&mut self) -> u64 {
        let ctx = self.messenger.context().clone();
        ctx.set_phase(CsPhase::Releasing);
        let exit = ctx.clock.stamp_and_read();
        self.messenger.broadcast_to_quorum(VoteKind::Release);
        ctx.set_phase(CsPhase::Idle);
        debug!(node = ctx.id, exit, "left critical section");
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VectorClock;
    use crate::message::Stamp;

    fn from(kind: VoteKind, pid: ProcessId) -> Message {
        kind.with(Stamp::new(pid, VectorClock::new(3, pid).unwrap()))
    }

    #[test]
    fn grants_from_all_members_complete_tally() {
        let mut tally = VoteTally::new(BTreeSet::from([0, 2]));
        assert_eq!(tally.apply(&from(VoteKind::Grant, 0)), None);
        assert!(!tally.is_complete());
        tally.apply(&from(VoteKind::Grant, 2));
        assert!(tally.is_complete());
    }

    #[test]
    fn failed_revokes_a_grant() {
        let mut tally = VoteTally::new(BTreeSet::from([0, 2]));
        tally.apply(&from(VoteKind::Grant, 0));
        tally.apply(&from(VoteKind::Failed, 0));
        assert!(tally.confirmed().is_empty());
    }

    #[test]
    fn inquire_yields_and_revokes() {
        let mut tally = VoteTally::new(BTreeSet::from([0, 2]));
        tally.apply(&from(VoteKind::Grant, 2));
        assert_eq!(tally.apply(&from(VoteKind::Inquire, 2)), Some(2));
        assert!(!tally.confirmed().contains(&2));
    }

    #[test]
    fn inquire_without_grant_is_stale() {
        let mut tally = VoteTally::new(BTreeSet::from([0, 2]));
        assert_eq!(tally.apply(&from(VoteKind::Inquire, 0)), None);
        tally.apply(&from(VoteKind::Grant, 0));
        assert!(tally.confirmed().contains(&0));
    }

    #[test]
    fn outsiders_are_ignored() {
        let mut tally = VoteTally::new(BTreeSet::from([0]));
        assert_eq!(tally.apply(&from(VoteKind::Inquire, 1)), None);
        tally.apply(&from(VoteKind::Grant, 1));
        assert!(tally.confirmed().is_empty());
    }
}
