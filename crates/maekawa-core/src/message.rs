//! # message
//!
//! why: define every message exchanged between maekawa nodes and their wire text form
//! relations: built by messenger.rs, consumed by voter.rs and requester.rs, parsed off the transport
//! what: VoteKind, Stamp, CsInterval, Message, `TYPE(arg0,arg1,...)` encoding

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clock::{parse_int, VectorClock};
use crate::error::ParseError;
use crate::ProcessId;

/// The six message kinds that take part in voting and carry a clock stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteKind {
    /// ask a quorum member for its vote
    Request,
    /// hand a vote back to the voter after an inquire
    Yield,
    /// ask the current vote holder whether it would give the vote back
    Inquire,
    /// leave the critical section, freeing the vote
    Release,
    /// tell a requester it is not next in line
    Failed,
    /// give the vote to a requester
    Grant,
}

impl VoteKind {
    pub const ALL: [VoteKind; 6] = [
        VoteKind::Request,
        VoteKind::Yield,
        VoteKind::Inquire,
        VoteKind::Release,
        VoteKind::Failed,
        VoteKind::Grant,
    ];

    /// wire tag
    pub fn tag(self) -> &'static str {
        match self {
            VoteKind::Request => "REQUEST",
            VoteKind::Yield => "YIELD",
            VoteKind::Inquire => "INQUIRE",
            VoteKind::Release => "RELEASE",
            VoteKind::Failed => "FAILED",
            VoteKind::Grant => "GRANT",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Wrap a stamp into the message of this kind
    pub fn with(self, stamp: Stamp) -> Message {
        match self {
            VoteKind::Request => Message::Request(stamp),
            VoteKind::Yield => Message::Yield(stamp),
            VoteKind::Inquire => Message::Inquire(stamp),
            VoteKind::Release => Message::Release(stamp),
            VoteKind::Failed => Message::Failed(stamp),
            VoteKind::Grant => Message::Grant(stamp),
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Who sent a voting message and their clock at the moment of sending
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub source: ProcessId,
    pub clock: VectorClock,
}

impl Stamp {
    pub fn new(source: ProcessId, clock: VectorClock) -> Self {
        Self { source, clock }
    }
}

/// One finished critical section as reported to the auditor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CsInterval {
    /// node that held the critical section
    pub node: ProcessId,
    /// 1-based request number at that node
    pub request: u64,
    /// scalar clock when the section was entered
    pub enter: u64,
    /// scalar clock when the section was left
    pub exit: u64,
}

/// All messages a node can receive
///
/// Values are immutable; the clocks inside are snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Stamp),
    Yield(Stamp),
    Inquire(Stamp),
    Release(Stamp),
    Failed(Stamp),
    Grant(Stamp),
    /// critical section report for the auditor
    Debug(CsInterval),
    /// the auditor has everything, nodes may wind down
    Finished,
}

impl Message {
    /// Decode a wire line, returning None for anything unrecognized
    pub fn parse(text: &str) -> Option<Message> {
        text.parse().ok()
    }

    /// The voting kind and stamp, if this is a voting message
    pub fn vote(&self) -> Option<(VoteKind, &Stamp)> {
        match self {
            Message::Request(stamp) => Some((VoteKind::Request, stamp)),
            Message::Yield(stamp) => Some((VoteKind::Yield, stamp)),
            Message::Inquire(stamp) => Some((VoteKind::Inquire, stamp)),
            Message::Release(stamp) => Some((VoteKind::Release, stamp)),
            Message::Failed(stamp) => Some((VoteKind::Failed, stamp)),
            Message::Grant(stamp) => Some((VoteKind::Grant, stamp)),
            Message::Debug(_) | Message::Finished => None,
        }
    }

    pub fn stamp(&self) -> Option<&Stamp> {
        self.vote().map(|(_, stamp)| stamp)
    }

    pub fn source(&self) -> Option<ProcessId> {
        self.stamp().map(|stamp| stamp.source)
    }

    pub fn tag(&self) -> &'static str {
        match (self, self.vote()) {
            (_, Some((kind, _))) => kind.tag(),
            (Message::Debug(_), None) => "DEBUG",
            _ => "FINISHED",
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((kind, stamp)) = self.vote() {
            return write!(f, "{}({},{})", kind, stamp.clock, stamp.source);
        }
        match self {
            Message::Debug(interval) => write!(
                f,
                "DEBUG({},{},{},{})",
                interval.node, interval.request, interval.enter, interval.exit
            ),
            _ => f.write_str("FINISHED()"),
        }
    }
}

impl FromStr for Message {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ParseError::Empty);
        }
        let (tag, rest) = text.split_once('(').ok_or(ParseError::MissingDelimiter('('))?;
        let body = rest.strip_suffix(')').ok_or(ParseError::MissingDelimiter(')'))?;
        let args: Vec<&str> = body.split(',').collect();

        match tag.trim() {
            // arguments, if any, carry nothing
            "FINISHED" => Ok(Message::Finished),
            "DEBUG" => {
                expect_args(&args, 4)?;
                Ok(Message::Debug(CsInterval {
                    node: parse_int(args[0])?,
                    request: parse_int(args[1])?,
                    enter: parse_int(args[2])?,
                    exit: parse_int(args[3])?,
                }))
            }
            tag => {
                let kind = VoteKind::from_tag(tag)
                    .ok_or_else(|| ParseError::UnknownType(tag.to_string()))?;
                expect_args(&args, 2)?;
                let clock: VectorClock = args[0].parse()?;
                let source = parse_int(args[1])?;
                Ok(kind.with(Stamp::new(source, clock)))
            }
        }
    }
}

fn expect_args(args: &[&str], expected: usize) -> Result<(), ParseError> {
    if args.len() != expected {
        return Err(ParseError::ArgumentCount { expected, found: args.len() });
    }
    Ok(())
}
