//! # config
//!
//! why: every node of a run reads the same cluster file and picks out its own view
//! relations: produces NodeConfig for runtime.rs, NodeContext for maekawa-core
//! what: ClusterConfig (text and json formats), NodeConfig, ConfigError

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use maekawa_core::{AddressBook, ClockError, NodeContext, ProcessId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delay::ExponentialDelay;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("missing {0}")]
    Missing(String),

    #[error("cluster must have at least one node")]
    Empty,

    #[error("node id {id} out of range for {count} nodes")]
    NodeOutOfRange { id: ProcessId, count: usize },

    #[error("node id {0} listed twice")]
    DuplicateNode(ProcessId),

    #[error("quorum of node {node} names unknown member {member}")]
    UnknownMember { node: ProcessId, member: ProcessId },

    #[error("cannot resolve {host}:{port}: {reason}")]
    Resolve { host: String, port: u16, reason: String },
}

/// One entry of the address list as written in the file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeEntry {
    id: ProcessId,
    host: String,
    port: u16,
    #[serde(skip)]
    line: Option<usize>,
}

/// Cluster file before addresses are resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawCluster {
    mean_inter_request_ms: u64,
    mean_cs_ms: u64,
    requests_per_node: u64,
    #[serde(default)]
    collector: ProcessId,
    nodes: Vec<NodeEntry>,
    quorums: Vec<Vec<ProcessId>>,
}

/// Shared description of a whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub addresses: AddressBook,
    /// indexed by node id
    pub quorums: Vec<BTreeSet<ProcessId>>,
    pub mean_inter_request_ms: u64,
    pub mean_cs_ms: u64,
    pub requests_per_node: u64,
    pub collector: ProcessId,
}

impl ClusterConfig {
    /// Load from disk; `.json` files are read as json, anything else as the text format
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_text(&contents),
        }
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawCluster = serde_json::from_str(contents)?;
        Self::resolve(raw)
    }

    /// Parse the whitespace separated text format
    ///
    /// ```text
    /// <N> <meanInterRequestMs> <meanCsMs> <requestsPerNode>
    /// <id> <host> <port>          (N lines)
    /// <member ids...>             (N lines, line i is the quorum of node i)
    /// ```
    /// Blank lines and anything after `#` are ignored.
    pub fn from_text(contents: &str) -> Result<Self, ConfigError> {
        let mut lines = contents
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, strip_comment(line)))
            .filter(|(_, line)| !line.is_empty())
            .map(|(number, line)| (number, line.split_whitespace().collect::<Vec<_>>()));

        let (header_line, header) = lines
            .next()
            .ok_or_else(|| ConfigError::Missing("header line".to_string()))?;
        if header.len() != 4 {
            return Err(ConfigError::Syntax {
                line: header_line,
                message: format!("expected 4 header fields, found {}", header.len()),
            });
        }
        let count: usize = number(header[0], header_line)?;
        let mean_inter_request_ms = number(header[1], header_line)?;
        let mean_cs_ms = number(header[2], header_line)?;
        let requests_per_node = number(header[3], header_line)?;

        let mut nodes = Vec::with_capacity(count);
        for idx in 0..count {
            let (line, tokens) = lines
                .next()
                .ok_or_else(|| ConfigError::Missing(format!("address line for node {idx}")))?;
            if tokens.len() != 3 {
                return Err(ConfigError::Syntax {
                    line,
                    message: format!(
                        "expected `<id> <host> <port>`, found {} fields",
                        tokens.len()
                    ),
                });
            }
            nodes.push(NodeEntry {
                id: number(tokens[0], line)?,
                host: tokens[1].to_string(),
                port: number(tokens[2], line)?,
                line: Some(line),
            });
        }

        let mut quorums = Vec::with_capacity(count);
        for idx in 0..count {
            let (line, tokens) = lines
                .next()
                .ok_or_else(|| ConfigError::Missing(format!("quorum line for node {idx}")))?;
            let members = tokens
                .iter()
                .map(|token| number(token, line))
                .collect::<Result<Vec<ProcessId>, _>>()?;
            quorums.push(members);
        }

        if let Some((line, _)) = lines.next() {
            return Err(ConfigError::Syntax {
                line,
                message: "unexpected trailing line".to_string(),
            });
        }

        Self::resolve(RawCluster {
            mean_inter_request_ms,
            mean_cs_ms,
            requests_per_node,
            collector: 0,
            nodes,
            quorums,
        })
    }

    fn resolve(raw: RawCluster) -> Result<Self, ConfigError> {
        let count = raw.nodes.len();
        if count == 0 {
            return Err(ConfigError::Empty);
        }
        if raw.quorums.len() != count {
            return Err(ConfigError::Missing(format!(
                "quorums: {} nodes but {} quorum lines",
                count,
                raw.quorums.len()
            )));
        }
        if raw.collector >= count {
            return Err(ConfigError::NodeOutOfRange { id: raw.collector, count });
        }

        let mut addresses = BTreeMap::new();
        for entry in &raw.nodes {
            if entry.id >= count {
                let err = ConfigError::NodeOutOfRange { id: entry.id, count };
                return Err(located(err, entry.line));
            }
            if addresses.contains_key(&entry.id) {
                return Err(located(ConfigError::DuplicateNode(entry.id), entry.line));
            }
            addresses.insert(entry.id, resolve_address(&entry.host, entry.port)?);
        }

        let mut quorums = Vec::with_capacity(count);
        for (node, members) in raw.quorums.into_iter().enumerate() {
            let members: BTreeSet<ProcessId> = members.into_iter().collect();
            if let Some(&member) = members.iter().find(|m| **m >= count) {
                return Err(ConfigError::UnknownMember { node, member });
            }
            quorums.push(members);
        }

        Ok(Self {
            addresses,
            quorums,
            mean_inter_request_ms: raw.mean_inter_request_ms,
            mean_cs_ms: raw.mean_cs_ms,
            requests_per_node: raw.requests_per_node,
            collector: raw.collector,
        })
    }

    pub fn node_count(&self) -> usize {
        self.addresses.len()
    }

    /// Intervals the collector waits for before finishing the run
    pub fn expected_intervals(&self) -> usize {
        self.node_count() * self.requests_per_node as usize
    }

    /// Pairs of nodes whose quorums share no member
    ///
    /// Any such pair could be in the critical section together.
    pub fn quorum_violations(&self) -> Vec<(ProcessId, ProcessId)> {
        let mut violations = Vec::new();
        for (a, qa) in self.quorums.iter().enumerate() {
            for (b, qb) in self.quorums.iter().enumerate().skip(a + 1) {
                if qa.is_disjoint(qb) {
                    violations.push((a, b));
                }
            }
        }
        violations
    }

    /// This node's view of the cluster
    pub fn node(&self, id: ProcessId) -> Result<NodeConfig, ConfigError> {
        let count = self.node_count();
        let listen = self
            .addresses
            .get(&id)
            .copied()
            .ok_or(ConfigError::NodeOutOfRange { id, count })?;
        let quorum = self
            .quorums
            .get(id)
            .cloned()
            .ok_or(ConfigError::NodeOutOfRange { id, count })?;
        Ok(NodeConfig {
            id,
            listen,
            addresses: self.addresses.clone(),
            quorum,
            mean_inter_request_ms: self.mean_inter_request_ms,
            mean_cs_ms: self.mean_cs_ms,
            requests: self.requests_per_node,
            collector: self.collector,
            expected_intervals: self.expected_intervals(),
        })
    }
}

/// Everything a single node needs to take part in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub id: ProcessId,
    pub listen: SocketAddr,
    pub addresses: AddressBook,
    pub quorum: BTreeSet<ProcessId>,
    pub mean_inter_request_ms: u64,
    pub mean_cs_ms: u64,
    pub requests: u64,
    pub collector: ProcessId,
    pub expected_intervals: usize,
}

impl NodeConfig {
    pub fn is_collector(&self) -> bool {
        self.id == self.collector
    }

    pub fn delays(&self) -> ExponentialDelay {
        ExponentialDelay::new(self.mean_inter_request_ms, self.mean_cs_ms)
    }

    pub fn context(&self) -> Result<NodeContext, ClockError> {
        NodeContext::new(self.id, self.addresses.clone(), self.quorum.clone(), self.collector)
    }
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or("").trim()
}

fn number<T: std::str::FromStr>(token: &str, line: usize) -> Result<T, ConfigError> {
    token.parse().map_err(|_| ConfigError::Syntax {
        line,
        message: format!("`{token}` is not a valid number"),
    })
}

fn located(err: ConfigError, line: Option<usize>) -> ConfigError {
    match line {
        Some(line) => ConfigError::Syntax {
            line,
            message: err.to_string(),
        },
        None => err,
    }
}

fn resolve_address(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let resolve_err = |reason: String| ConfigError::Resolve {
        host: host.to_string(),
        port,
        reason,
    };
    let mut candidates = (host, port)
        .to_socket_addrs()
        .map_err(|e| resolve_err(e.to_string()))?;
    candidates
        .next()
        .ok_or_else(|| resolve_err("no addresses".to_string()))
}
