//! # error
//!
//! why: give every fallible core operation a typed error instead of stringly failures
//! relations: returned by clock.rs, message.rs and requester.rs; wrapped by maekawa-node
//! what: ParseError, ClockError, RequesterError

use thiserror::Error;

use crate::ProcessId;

/// Failure to decode a clock or a wire message from text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty input")]
    Empty,

    #[error("missing '{0}' delimiter")]
    MissingDelimiter(char),

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("expected {expected} arguments, found {found}")]
    ArgumentCount { expected: usize, found: usize },

    #[error("invalid integer '{0}'")]
    InvalidInteger(String),

    #[error("clock owner {owner} outside vector of width {width}")]
    OwnerOutOfRange { owner: ProcessId, width: usize },
}

/// Misuse of a vector clock
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("a clock needs at least one slot")]
    ZeroWidth,

    #[error("owner {owner} outside vector of width {width}")]
    OwnerOutOfRange { owner: ProcessId, width: usize },

    #[error("cannot merge clock of width {received} into clock of width {local}")]
    WidthMismatch { local: usize, received: usize },
}

/// Reasons an attempt to enter the critical section can stop early
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequesterError {
    /// the voter side hung up, nothing will ever grant us again
    #[error("event channel disconnected before the quorum was won")]
    Disconnected,

    /// the node is shutting down
    #[error("critical section request cancelled")]
    Cancelled,
}
