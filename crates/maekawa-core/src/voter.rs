//! # voter
//!
//! why: arbitrate this node's single vote between competing critical section requests
//! relations: fed raw lines by the transport listener, replies through messenger.rs,
//!            forwards GRANT/FAILED/INQUIRE to requester.rs and DEBUG to the auditor
//! what: Voter state machine (grant, queue, fail, inquire, yield, release) and its run loop

use std::collections::BTreeMap;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, trace, warn};

use crate::message::{CsInterval, Message, Stamp, VoteKind};
use crate::messenger::Messenger;
use crate::request::{PendingRequest, RequestKey};
use crate::ProcessId;

/// The per-node arbiter of one vote
///
/// Handles exactly one message at a time. Owns the wait queue and the current
/// holder outright; the only state it shares is the clock inside the messenger
/// context.
pub struct Voter {
    messenger: Messenger,
    /// requests waiting for the vote, head = smallest key
    queue: BTreeMap<RequestKey, PendingRequest>,
    /// request currently holding our vote
    holder: Option<PendingRequest>,
    /// newest request key seen from each source; anything at or below is a redelivery
    latest: BTreeMap<ProcessId, RequestKey>,
    /// FINISHED has been received
    finished: bool,
    /// GRANT, FAILED and INQUIRE addressed to our own outstanding request
    events: Sender<Message>,
    /// collector node only
    audit: Option<Sender<CsInterval>>,
}

impl Voter {
    pub fn new(messenger: Messenger, events: Sender<Message>) -> Self {
        Self {
            messenger,
            queue: BTreeMap::new(),
            holder: None,
            latest: BTreeMap::new(),
            finished: false,
            events,
            audit: None,
        }
    }

    /// Forward DEBUG reports to an auditor
    pub fn with_audit(mut self, audit: Sender<CsInterval>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn id(&self) -> ProcessId {
        self.messenger.context().id
    }

    pub fn holder(&self) -> Option<&PendingRequest> {
        self.holder.as_ref()
    }

    /// Waiting requests in grant order
    pub fn queued(&self) -> impl Iterator<Item = &PendingRequest> {
        self.queue.values()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// No vote outstanding and nobody waiting
    pub fn is_idle(&self) -> bool {
        self.holder.is_none() && self.queue.is_empty()
    }

    /// Consume inbound lines until FINISHED has arrived and everything is settled
    ///
    /// The quiescence check runs after every message, so no polling is needed:
    /// only a message can change any part of the condition.
    pub fn run(mut self, inbound: Receiver<String>) {
        info!(node = self.id(), "voter started");
        loop {
            let line = match inbound.recv() {
                Ok(line) => line,
                Err(_) => {
                    debug!(node = self.id(), "inbound channel closed");
                    break;
                }
            };
            match Message::parse(&line) {
                Some(message) => self.handle(message),
                None => {
                    trace!(node = self.id(), line = %line.trim(), "dropping unrecognized message")
                }
            }
            if self.finished && inbound.is_empty() && self.is_idle() {
                break;
            }
        }
        info!(node = self.id(), "voter stopped");
    }

    /// Apply one inbound message
    pub fn handle(&mut self, message: Message) {
        let stamp = match message {
            Message::Finished => {
                debug!(node = self.id(), "finished");
                self.finished = true;
                return;
            }
            Message::Debug(interval) => {
                match &self.audit {
                    Some(audit) => {
                        if audit.send(interval).is_err() {
                            warn!(node = self.id(), ?interval, "auditor gone, report lost");
                        }
                    }
                    None => trace!(node = self.id(), "not the collector, ignoring DEBUG"),
                }
                return;
            }
            ref voting => match voting.stamp() {
                Some(stamp) => stamp.clone(),
                None => return,
            },
        };

        if let Err(err) = self.messenger.context().clock.merge(&stamp.clock) {
            warn!(node = self.id(), %err, "dropping message with foreign clock");
            return;
        }

        match message {
            Message::Request(stamp) => self.on_request(stamp),
            Message::Yield(stamp) => self.on_yield(stamp.source),
            Message::Release(stamp) => self.on_release(stamp.source),
            Message::Inquire(_) => {
                if self.messenger.context().in_critical_section() {
                    debug!(
                        node = self.id(),
                        from = stamp.source,
                        "in critical section, ignoring INQUIRE"
                    );
                    return;
                }
                self.forward(message);
            }
            Message::Grant(_) | Message::Failed(_) => self.forward(message),
            Message::Debug(_) | Message::Finished => {}
        }
    }

    fn forward(&self, message: Message) {
        trace!(node = self.id(), %message, "forwarding to requester");
        if self.events.send(message).is_err() {
            trace!(node = self.id(), "requester gone, dropping event");
        }
    }

    fn grant(&mut self, mut request: PendingRequest) {
        request.reset_flags();
        let pid = request.process_id();
        debug!(node = self.id(), to = pid, "granting vote");
        self.holder = Some(request);
        self.messenger.send_to(VoteKind::Grant, pid);
    }

    fn grant_head(&mut self) {
        self.holder = None;
        if let Some((_, next)) = self.queue.pop_first() {
            self.grant(next);
        }
    }

    fn on_request(&mut self, stamp: Stamp) {
        let incoming = PendingRequest::new(stamp);
        let key = incoming.key();

        // a source's requests carry strictly growing clocks
        if self.latest.get(&key.source).is_some_and(|seen| key <= *seen) {
            debug!(node = self.id(), from = key.source, "duplicate REQUEST ignored");
            return;
        }
        self.latest.insert(key.source, key);

        let holder_key = match &self.holder {
            None => {
                self.grant(incoming);
                return;
            }
            Some(holder) => holder.key(),
        };

        let changes_head = self
            .queue
            .first_key_value()
            .map_or(true, |(head, _)| key < *head);

        if changes_head {
            let mut to_fail = Vec::new();
            for queued in self.queue.values_mut().filter(|r| !r.sent_failed) {
                queued.sent_failed = true;
                to_fail.push(queued.process_id());
            }
            for pid in to_fail {
                debug!(node = self.id(), to = pid, "superseded, sending FAILED");
                self.messenger.send_to(VoteKind::Failed, pid);
            }

            let inquire = match self.holder.as_mut() {
                Some(holder) if key < holder_key && !holder.sent_inquire => {
                    holder.sent_inquire = true;
                    Some(holder.process_id())
                }
                _ => None,
            };
            if let Some(pid) = inquire {
                debug!(node = self.id(), to = pid, "earlier request waiting, sending INQUIRE");
                self.messenger.send_to(VoteKind::Inquire, pid);
            }
            self.queue.insert(key, incoming);
        } else {
            let mut incoming = incoming;
            incoming.sent_failed = true;
            debug!(node = self.id(), to = key.source, "not next in line, sending FAILED");
            self.messenger.send_to(VoteKind::Failed, key.source);
            self.queue.insert(key, incoming);
        }
    }

    fn on_yield(&mut self, source: ProcessId) {
        let yielded = match self.holder.take() {
            Some(holder) if holder.process_id() == source => holder,
            other => {
                debug!(node = self.id(), from = source, "YIELD from non-holder ignored");
                self.holder = other;
                return;
            }
        };
        debug!(node = self.id(), from = source, "vote yielded");
        self.queue.insert(yielded.key(), yielded);
        self.grant_head();
    }

    fn on_release(&mut self, source: ProcessId) {
        match &self.holder {
            Some(holder) if holder.process_id() == source => {
                debug!(node = self.id(), from = source, "vote released");
                self.grant_head();
            }
            _ => debug!(node = self.id(), from = source, "RELEASE from non-holder ignored"),
        }
    }
}
