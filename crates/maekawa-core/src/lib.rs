//! # maekawa-core
//!
//! why: implement maekawa's quorum-based distributed mutual exclusion as portable, transport-agnostic rust
//! relations: driven by maekawa-node (threads, tcp, config); DEBUG intervals consumed by maekawa-audit
//! what: vector clocks, wire messages, voter state machine, requester protocol

pub mod clock;
pub mod error;
pub mod message;
pub mod messenger;
pub mod node;
pub mod request;
pub mod requester;
pub mod voter;

/// Index of a process in the cluster and in every vector clock
pub type ProcessId = usize;

pub use clock::{SharedClock, VectorClock};
pub use error::{ClockError, ParseError, RequesterError};
pub use message::{CsInterval, Message, Stamp, VoteKind};
pub use messenger::{MemoryTransport, Messenger, Transport};
pub use node::{AddressBook, CsPhase, NodeContext};
pub use request::{PendingRequest, RequestKey};
pub use requester::{Requester, VoteTally};
pub use voter::Voter;
