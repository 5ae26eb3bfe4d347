//! # messenger
//!
//! why: stamp outgoing protocol messages with the node clock and hand them to a transport
//! relations: used by voter.rs and requester.rs; maekawa-node supplies the tcp and channel transports
//! what: Transport trait, Messenger send primitives, MemoryTransport for tests

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::message::{Message, Stamp, VoteKind};
use crate::node::NodeContext;
use crate::ProcessId;

/// Fire-and-forget delivery of one encoded line to one address
///
/// Implementations own retries and connection lifecycle; callers never wait
/// for, or learn about, delivery.
pub trait Transport: Send + Sync {
    fn deliver(&self, addr: SocketAddr, line: String);
}

/// Send primitives bound to one node's context
#[derive(Clone)]
pub struct Messenger {
    ctx: Arc<NodeContext>,
    transport: Arc<dyn Transport>,
}

impl Messenger {
    pub fn new(ctx: Arc<NodeContext>, transport: Arc<dyn Transport>) -> Self {
        Self { ctx, transport }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    fn stamped(&self, kind: VoteKind) -> Message {
        kind.with(Stamp::new(self.ctx.id, self.ctx.clock.stamp_for_send()))
    }

    /// Send a voting message to a process by id. Unknown ids are dropped.
    pub fn send_to(&self, kind: VoteKind, pid: ProcessId) {
        match self.ctx.address_of(pid) {
            Some(addr) => self.send_to_addr(kind, addr),
            None => warn!(node = self.ctx.id, %kind, pid, "no address for process, dropping"),
        }
    }

    pub fn send_to_addr(&self, kind: VoteKind, addr: SocketAddr) {
        let message = self.stamped(kind);
        trace!(node = self.ctx.id, %addr, %message, "send");
        self.transport.deliver(addr, message.to_string());
    }

    /// Stamp once and send the same line to every address
    ///
    /// All receivers observe one logical send event.
    pub fn broadcast<I>(&self, kind: VoteKind, addrs: I) -> Message
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        let message = self.stamped(kind);
        let line = message.to_string();
        for addr in addrs {
            trace!(node = self.ctx.id, %addr, line = %line, "broadcast");
            self.transport.deliver(addr, line.clone());
        }
        message
    }

    /// Broadcast to every quorum member of this node
    pub fn broadcast_to_quorum(&self, kind: VoteKind) -> Message {
        self.broadcast(kind, self.ctx.quorum_addresses())
    }

    /// Deliver an unstamped message (DEBUG, FINISHED) as-is
    pub fn send_message(&self, message: &Message, addr: SocketAddr) {
        trace!(node = self.ctx.id, %addr, %message, "send unstamped");
        self.transport.deliver(addr, message.to_string());
    }
}

// -- in-memory transport --

/// Transport that records every delivery instead of sending it
///
/// Used by tests to inspect what a voter or requester emitted.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<(SocketAddr, String)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything delivered so far
    pub fn take(&self) -> Vec<(SocketAddr, String)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Drain and decode everything delivered so far
    pub fn take_messages(&self) -> Vec<(SocketAddr, Message)> {
        self.take()
            .into_iter()
            .filter_map(|(addr, line)| Message::parse(&line).map(|msg| (addr, msg)))
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn deliver(&self, addr: SocketAddr, line: String) {
        self.sent.lock().push((addr, line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::node::AddressBook;

    fn addr(pid: ProcessId) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9000 + pid as u16))
    }

    fn messenger(id: ProcessId) -> (Messenger, Arc<MemoryTransport>) {
        let book: AddressBook = (0..3).map(|pid| (pid, addr(pid))).collect();
        let ctx = NodeContext::new(id, book, BTreeSet::from([0, 1, 2]), 0).unwrap();
        let transport = Arc::new(MemoryTransport::new());
        (Messenger::new(Arc::new(ctx), transport.clone()), transport)
    }

    #[test]
    fn send_to_stamps_clock_once() {
        let (messenger, transport) = messenger(1);
        messenger.send_to(VoteKind::Grant, 2);

        let sent = transport.take();
        assert_eq!(sent, vec![(addr(2), "GRANT(1[0:2:0],1)".to_string())]);
        assert_eq!(messenger.context().clock.scalar_value(), 2);
    }

    #[test]
    fn broadcast_reuses_one_stamp() {
        let (messenger, transport) = messenger(0);
        messenger.broadcast_to_quorum(VoteKind::Request);

        let lines: Vec<String> = transport.take().into_iter().map(|(_, line)| line).collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line == "REQUEST(0[2:0:0],0)"));
        assert_eq!(messenger.context().clock.scalar_value(), 2);
    }

    #[test]
    fn unknown_process_is_dropped_without_stamping() {
        let (messenger, transport) = messenger(0);
        messenger.send_to(VoteKind::Failed, 42);
        assert!(transport.take().is_empty());
        assert_eq!(messenger.context().clock.scalar_value(), 1);
    }
}
