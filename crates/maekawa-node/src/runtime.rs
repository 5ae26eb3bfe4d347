//! # runtime
//!
//! why: wire one node's threads together and drive its requests to completion
//! relations: uses maekawa-core's Voter and Requester, collector.rs at the collector node
//! what: Node, NodeOutcome, Simulation (whole cluster in one process), RuntimeError

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver};
use maekawa_audit::{AuditReport, InMemoryReportStore, ReportStore};
use maekawa_core::{
    ClockError, CsInterval, Message, Messenger, NodeContext, ProcessId, Requester, RequesterError,
    Transport, Voter,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::collector::Collector;
use crate::config::{ClusterConfig, ConfigError, NodeConfig};
use crate::delay::ExponentialDelay;
use crate::transport::ChannelTransport;

/// Called while the node holds the critical section, before the hold delay
pub type CsWork = Arc<dyn Fn(ProcessId, u64) + Send + Sync>;

pub type BoxedReportStore = Box<dyn ReportStore + Send>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot build node clock: {0}")]
    Clock(#[from] ClockError),

    #[error("collector node {0} has no address")]
    UnknownCollector(ProcessId),

    #[error("request {request} did not complete: {source}")]
    Request {
        request: u64,
        #[source]
        source: RequesterError,
    },

    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// What one node did during a run
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub id: ProcessId,
    pub intervals: Vec<CsInterval>,
    /// only set at the collector node
    pub report: Option<AuditReport>,
}

/// A single cluster member: voter thread, requester loop and, at the collector, the auditor
pub struct Node {
    config: NodeConfig,
    ctx: Arc<NodeContext>,
    messenger: Messenger,
    delays: ExponentialDelay,
    work: Option<CsWork>,
    store: Option<BoxedReportStore>,
}

impl Node {
    pub fn new(config: NodeConfig, transport: Arc<dyn Transport>) -> Result<Self, RuntimeError> {
        let ctx = Arc::new(config.context()?);
        let messenger = Messenger::new(ctx.clone(), transport);
        let delays = config.delays();
        Ok(Self {
            config,
            ctx,
            messenger,
            delays,
            work: None,
            store: None,
        })
    }

    pub fn with_delays(mut self, delays: ExponentialDelay) -> Self {
        self.delays = delays;
        self
    }

    pub fn with_work(mut self, work: CsWork) -> Self {
        self.work = Some(work);
        self
    }

    /// Where the collector keeps its report; ignored at other nodes
    pub fn with_report_store(mut self, store: BoxedReportStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Run every request, then wait until the voter has seen FINISHED and settled
    pub fn run(mut self, inbound: Receiver<String>) -> Result<NodeOutcome, RuntimeError> {
        let id = self.ctx.id;
        let collector_addr = self
            .ctx
            .address_of(self.config.collector)
            .ok_or(RuntimeError::UnknownCollector(self.config.collector))?;

        let (events_tx, events_rx) = unbounded();
        let mut voter = Voter::new(self.messenger.clone(), events_tx);
        let collector = if self.config.is_collector() {
            let (audit_tx, audit_rx) = unbounded();
            voter = voter.with_audit(audit_tx);
            let store: BoxedReportStore = match self.store.take() {
                Some(store) => store,
                None => Box::new(InMemoryReportStore::new()),
            };
            let collector =
                Collector::new(self.config.expected_intervals, store, self.messenger.clone());
            Some(spawn("collector".to_string(), move || collector.run(audit_rx).0)?)
        } else {
            None
        };
        let voter = spawn(format!("voter-{id}"), move || voter.run(inbound))?;

        info!(node = id, requests = self.config.requests, "node started");
        let mut requester = Requester::new(self.messenger.clone(), events_rx);
        let mut intervals = Vec::with_capacity(self.config.requests as usize);
        for request in 1..=self.config.requests {
            let enter = requester
                .enter_cs()
                .map_err(|source| RuntimeError::Request { request, source })?;
            if let Some(work) = &self.work {
                work(id, request);
            }
            thread::sleep(self.delays.critical_section());
            let exit = requester.leave_cs();

            let interval = CsInterval { node: id, request, enter, exit };
            info!(node = id, request, enter, exit, "critical section done");
            self.messenger.send_message(&Message::Debug(interval), collector_addr);
            intervals.push(interval);

            thread::sleep(self.delays.inter_request());
        }

        info!(node = id, "requests done, waiting for FINISHED");
        voter.join().map_err(|_| RuntimeError::Panicked("voter"))?;
        let report = match collector {
            Some(handle) => Some(handle.join().map_err(|_| RuntimeError::Panicked("collector"))?),
            None => None,
        };
        info!(node = id, "node stopped");

        Ok(NodeOutcome { id, intervals, report })
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Node Id: {}", self.ctx.id)?;
        writeln!(f, "Requests: {}", self.config.requests)?;
        writeln!(f, "Delays: {}", self.delays)?;
        writeln!(f, "Initial Vector Clock: {}", self.ctx.clock.snapshot())?;
        writeln!(f, "Neighboring Nodes:")?;
        for (pid, addr) in &self.ctx.addresses {
            let marker = if self.ctx.is_quorum_member(*pid) { "Q" } else { "-" };
            writeln!(f, " >> [{marker}] Node({pid}) at {addr}")?;
        }
        Ok(())
    }
}

fn spawn<T, F>(name: String, f: F) -> Result<JoinHandle<T>, RuntimeError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new().name(name).spawn(f).map_err(RuntimeError::Spawn)
}

/// Log each pair of nodes that could enter the critical section together
pub fn warn_quorum_violations(cluster: &ClusterConfig) {
    for (a, b) in cluster.quorum_violations() {
        warn!(a, b, "quorums of nodes do not intersect, mutual exclusion is not guaranteed");
    }
}

/// Result of running a whole cluster in one process
#[derive(Debug)]
pub struct SimulationOutcome {
    /// in node id order
    pub nodes: Vec<NodeOutcome>,
    pub report: Option<AuditReport>,
}

/// Every node of a cluster as threads in this process, connected by channels
pub struct Simulation {
    cluster: ClusterConfig,
    seed: Option<u64>,
    work: Option<CsWork>,
    store: Option<BoxedReportStore>,
}

impl Simulation {
    pub fn new(cluster: ClusterConfig) -> Self {
        Self {
            cluster,
            seed: None,
            work: None,
            store: None,
        }
    }

    /// Seed every node's delays; node `i` uses `seed + i`
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn work(mut self, work: CsWork) -> Self {
        self.work = Some(work);
        self
    }

    pub fn report_store(mut self, store: BoxedReportStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn run(mut self) -> Result<SimulationOutcome, RuntimeError> {
        warn_quorum_violations(&self.cluster);

        let mut transport = ChannelTransport::new();
        let mut inboxes = Vec::with_capacity(self.cluster.node_count());
        for (id, addr) in &self.cluster.addresses {
            let (tx, rx) = unbounded();
            transport.route(*addr, tx);
            inboxes.push((*id, rx));
        }
        let transport: Arc<dyn Transport> = Arc::new(transport);

        let mut handles = Vec::with_capacity(inboxes.len());
        for (id, inbound) in inboxes {
            let mut node = Node::new(self.cluster.node(id)?, transport.clone())?;
            if let Some(seed) = self.seed {
                node = node.with_delays(ExponentialDelay::seeded(
                    self.cluster.mean_inter_request_ms,
                    self.cluster.mean_cs_ms,
                    seed.wrapping_add(id as u64),
                ));
            }
            if let Some(work) = &self.work {
                node = node.with_work(work.clone());
            }
            if node.config().is_collector() {
                if let Some(store) = self.store.take() {
                    node = node.with_report_store(store);
                }
            }
            handles.push(spawn(format!("node-{id}"), move || node.run(inbound))?);
        }
        drop(transport);

        let mut nodes = Vec::with_capacity(handles.len());
        for handle in handles {
            nodes.push(handle.join().map_err(|_| RuntimeError::Panicked("node"))??);
        }
        let report = nodes.iter().find_map(|node| node.report.clone());
        Ok(SimulationOutcome { nodes, report })
    }
}
