//! # maekawa-node
//!
//! why: run maekawa-core as real cluster members, over TCP or all in one process
//! relations: drives maekawa-core, audits through maekawa-audit, used by the maekawa-node binary
//! what: cluster config, exponential delays, transports, collector, node runtime, telemetry

pub mod collector;
pub mod config;
pub mod delay;
pub mod runtime;
pub mod telemetry;
pub mod transport;

pub use collector::Collector;
pub use config::{ClusterConfig, ConfigError, NodeConfig};
pub use delay::ExponentialDelay;
pub use runtime::{
    warn_quorum_violations, BoxedReportStore, CsWork, Node, NodeOutcome, RuntimeError, Simulation,
    SimulationOutcome,
};
pub use transport::{
    ChannelTransport, Listener, TcpTransport, DEFAULT_DRAIN_DEADLINE, DEFAULT_RETRY_BACKOFF,
};
