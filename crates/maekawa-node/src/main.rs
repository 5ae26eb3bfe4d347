//! maekawa-node - quorum mutual exclusion cluster member.
//!
//! Usage:
//!   maekawa-node run <NODE_ID> <CONFIG> [--verbose] [--report-dir DIR]
//!   maekawa-node simulate <CONFIG> [--seed N] [--report-dir DIR]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::unbounded;
use maekawa_audit::{AuditReport, FileReportStore};
use maekawa_core::ProcessId;
use maekawa_node::{
    telemetry, warn_quorum_violations, ClusterConfig, Listener, Node, Simulation, TcpTransport,
};
use tracing::info;

/// Maekawa quorum-based distributed mutual exclusion.
#[derive(Parser, Debug)]
#[command(name = "maekawa-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug logging, and print the node summary at startup.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one cluster member over TCP.
    Run(RunArgs),
    /// Run every cluster member in this process over channels.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Id of this node in the config file.
    node_id: ProcessId,

    /// Cluster config file (text format, or json with a .json extension).
    config: PathBuf,

    /// Where the collector node writes its audit report.
    #[arg(long, default_value = ".")]
    report_dir: PathBuf,

    /// Wait between attempts to reach an unavailable peer.
    #[arg(long, default_value_t = 1000)]
    retry_ms: u64,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Cluster config file.
    config: PathBuf,

    /// Where the audit report is written.
    #[arg(long, default_value = ".")]
    report_dir: PathBuf,

    /// Seed for reproducible delays.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    match cli.command {
        Commands::Run(args) => run_node(args, cli.verbose),
        Commands::Simulate(args) => run_simulation(args),
    }
}

fn load_cluster(path: &Path) -> Result<ClusterConfig> {
    let cluster = ClusterConfig::load(path)
        .with_context(|| format!("failed to load config from {:?}", path))?;
    warn_quorum_violations(&cluster);
    Ok(cluster)
}

fn report_store(dir: &Path) -> Result<Box<FileReportStore>> {
    let store = FileReportStore::new(dir)
        .with_context(|| format!("cannot create report directory {:?}", dir))?;
    Ok(Box::new(store))
}

fn check_report(report: Option<AuditReport>) -> Result<()> {
    let Some(report) = report else {
        return Ok(());
    };
    println!("{}", report.summary());
    if !report.is_clean() {
        bail!("audit found {} overlapping critical sections", report.conflicts.len());
    }
    Ok(())
}

fn run_node(args: RunArgs, verbose: bool) -> Result<()> {
    let cluster = load_cluster(&args.config)?;
    let config = cluster.node(args.node_id)?;
    let listen = config.listen;
    let is_collector = config.is_collector();

    let (inbound_tx, inbound_rx) = unbounded();
    let listener =
        Listener::bind(listen, inbound_tx).with_context(|| format!("failed to bind {listen}"))?;
    let transport = Arc::new(TcpTransport::new(Duration::from_millis(args.retry_ms)));

    let mut node = Node::new(config, transport.clone())?;
    if is_collector {
        node = node.with_report_store(report_store(&args.report_dir)?);
    }
    if verbose {
        println!("{node}");
    }

    let outcome = node.run(inbound_rx);
    // queued FINISHED or RELEASE lines still go out after the voter settles
    transport.shutdown();
    transport.wait_drained();
    listener.shutdown();
    let outcome = outcome?;

    info!(node = outcome.id, completed = outcome.intervals.len(), "run complete");
    check_report(outcome.report)
}

fn run_simulation(args: SimulateArgs) -> Result<()> {
    let cluster = load_cluster(&args.config)?;
    let nodes = cluster.node_count();

    let mut simulation = Simulation::new(cluster).report_store(report_store(&args.report_dir)?);
    if let Some(seed) = args.seed {
        simulation = simulation.seed(seed);
    }
    let outcome = simulation.run()?;

    info!(nodes, "simulation complete");
    check_report(outcome.report)
}
