//! # cluster tests
//!
//! why: run whole clusters and prove no two nodes ever hold the critical section together
//! relations: tests maekawa-node end to end over maekawa-core and maekawa-audit
//! what: in-process clusters, tcp cluster on loopback, config files on disk

use std::fs;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded};
use maekawa_audit::{FileReportStore, ReportStore};
use maekawa_node::{
    ClusterConfig, ConfigError, CsWork, Listener, Node, Simulation, SimulationOutcome, TcpTransport,
};
use tempfile::tempdir;

const TIMEOUT: Duration = Duration::from_secs(60);

/// Run `f` on its own thread and fail the test instead of hanging
fn within_timeout<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(TIMEOUT).expect("cluster did not finish in time")
}

/// Fails loudly if two nodes are ever inside the hook at once
#[derive(Default)]
struct OccupancyGuard {
    occupied: AtomicBool,
    entries: AtomicUsize,
    overlaps: AtomicUsize,
}

fn guarded_work(guard: &Arc<OccupancyGuard>) -> CsWork {
    let guard = guard.clone();
    Arc::new(move |_node, _request| {
        if guard.occupied.swap(true, Ordering::SeqCst) {
            guard.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        guard.entries.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1));
        guard.occupied.store(false, Ordering::SeqCst);
    })
}

fn cluster_text(ports: &[u16], quorums: &[&str], requests: u64) -> String {
    let mut text = format!("{} 2 1 {}\n", ports.len(), requests);
    for (id, port) in ports.iter().enumerate() {
        text.push_str(&format!("{id} 127.0.0.1 {port}\n"));
    }
    for quorum in quorums {
        text.push_str(quorum);
        text.push('\n');
    }
    text
}

fn simulate(
    quorums: &[&str],
    requests: u64,
    seed: u64,
) -> (SimulationOutcome, Arc<OccupancyGuard>) {
    let ports: Vec<u16> = (0..quorums.len() as u16).map(|i| 7400 + i).collect();
    let cluster = ClusterConfig::from_text(&cluster_text(&ports, quorums, requests)).unwrap();
    let guard = Arc::new(OccupancyGuard::default());
    let work = guarded_work(&guard);
    let outcome =
        within_timeout(move || Simulation::new(cluster).seed(seed).work(work).run().unwrap());
    (outcome, guard)
}

fn free_ports(count: usize) -> Vec<u16> {
    let listeners: Vec<TcpListener> = (0..count)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect()
}

// =============================================================================
// SECTION 1: IN-PROCESS CLUSTER TESTS
// =============================================================================

mod in_process {
    use super::*;

    #[test]
    fn three_nodes_pairwise_quorums() {
        let (outcome, guard) = simulate(&["0 1", "1 2", "0 2"], 5, 11);

        assert_eq!(guard.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(guard.entries.load(Ordering::SeqCst), 15);
        for node in &outcome.nodes {
            assert_eq!(node.intervals.len(), 5);
        }
        let report = outcome.report.unwrap();
        assert_eq!(report.completed(), 15);
        assert!(report.is_clean(), "{:?}", report.conflicts);
    }

    #[test]
    fn four_nodes_majority_quorums_contend() {
        let (outcome, guard) = simulate(&["0 1 2", "1 2 3", "2 3 0", "3 0 1"], 6, 3);

        assert_eq!(guard.overlaps.load(Ordering::SeqCst), 0);
        let report = outcome.report.unwrap();
        assert_eq!(report.completed(), 24);
        assert!(report.is_clean(), "{:?}", report.conflicts);
    }

    #[test]
    fn shared_arbiter_quorums() {
        // every quorum contains node 0, so it arbitrates everything
        let (outcome, guard) = simulate(&["0", "0 1", "0 2", "0 3", "0 4"], 4, 5);

        assert_eq!(guard.overlaps.load(Ordering::SeqCst), 0);
        assert!(outcome.report.unwrap().is_clean());
    }

    #[test]
    fn request_numbers_count_up_per_node() {
        let (outcome, _guard) = simulate(&["0 1", "1 2", "0 2"], 3, 2);
        for node in &outcome.nodes {
            let requests: Vec<u64> = node.intervals.iter().map(|i| i.request).collect();
            assert_eq!(requests, vec![1, 2, 3]);
            assert!(node.intervals.windows(2).all(|w| w[0].exit < w[1].enter));
        }
    }

    #[test]
    fn zero_requests_finish_immediately() {
        let (outcome, guard) = simulate(&["0 1", "1 2", "0 2"], 0, 1);
        assert_eq!(guard.entries.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.report.unwrap().completed(), 0);
    }

    #[test]
    fn report_is_written_to_disk() {
        let dir = tempdir().unwrap();
        let store = FileReportStore::new(dir.path()).unwrap();
        let cluster =
            ClusterConfig::from_text(&cluster_text(&[7500, 7501, 7502], &["0 1", "1 2", "0 2"], 2))
                .unwrap();

        let outcome = within_timeout(move || {
            Simulation::new(cluster)
                .seed(9)
                .report_store(Box::new(store))
                .run()
                .unwrap()
        });

        let saved = FileReportStore::new(dir.path()).unwrap().load().unwrap();
        assert_eq!(saved, outcome.report);
        let html = fs::read_to_string(dir.path().join("verification-table.html")).unwrap();
        assert!(html.starts_with("<h3>6 of 6 Requests (100%)</h3>"));
    }
}

// =============================================================================
// SECTION 2: TCP CLUSTER TESTS
// =============================================================================

mod tcp {
    use super::*;

    #[test]
    fn three_nodes_over_loopback() {
        let ports = free_ports(3);
        let cluster =
            ClusterConfig::from_text(&cluster_text(&ports, &["0 1", "1 2", "0 2"], 3)).unwrap();
        let guard = Arc::new(OccupancyGuard::default());

        let mut handles = Vec::new();
        for id in 0..3 {
            let config = cluster.node(id).unwrap();
            let (tx, rx) = unbounded();
            let listener = Listener::bind(config.listen, tx).unwrap();
            let transport = Arc::new(
                TcpTransport::new(Duration::from_millis(20))
                    .with_drain_deadline(Duration::from_secs(10)),
            );
            let node = Node::new(config, transport.clone())
                .unwrap()
                .with_work(guarded_work(&guard));
            handles.push(thread::spawn(move || {
                let outcome = node.run(rx).unwrap();
                transport.shutdown();
                transport.wait_drained();
                listener.shutdown();
                outcome
            }));
        }

        let outcomes = within_timeout(move || {
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        assert_eq!(guard.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(guard.entries.load(Ordering::SeqCst), 9);
        let report = outcomes[0].report.clone().unwrap();
        assert_eq!(report.completed(), 9);
        assert!(report.is_clean(), "{:?}", report.conflicts);
        assert!(outcomes[1].report.is_none());
    }
}

// =============================================================================
// SECTION 3: CONFIG FILE TESTS
// =============================================================================

mod config_files {
    use super::*;

    #[test]
    fn loads_text_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cluster.txt");
        fs::write(&path, cluster_text(&[7600, 7601], &["0 1", "0 1"], 7)).unwrap();

        let cluster = ClusterConfig::load(&path).unwrap();
        assert_eq!(cluster.node_count(), 2);
        assert_eq!(cluster.requests_per_node, 7);
    }

    #[test]
    fn loads_json_file_with_collector() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        fs::write(
            &path,
            r#"{
                "mean_inter_request_ms": 2,
                "mean_cs_ms": 1,
                "requests_per_node": 3,
                "collector": 1,
                "nodes": [
                    {"id": 0, "host": "localhost", "port": 7700},
                    {"id": 1, "host": "localhost", "port": 7701}
                ],
                "quorums": [[0, 1], [1]]
            }"#,
        )
        .unwrap();

        let cluster = ClusterConfig::load(&path).unwrap();
        assert_eq!(cluster.collector, 1);
        assert!(cluster.node(1).unwrap().is_collector());
        assert_eq!(cluster.addresses[&0].port(), 7700);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = ClusterConfig::load(dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn empty_file_has_no_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        fs::write(&path, "# nothing here\n\n").unwrap();
        assert!(matches!(ClusterConfig::load(&path), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn collector_out_of_range_in_json() {
        let json = r#"{"mean_inter_request_ms": 1, "mean_cs_ms": 1, "requests_per_node": 1,
            "collector": 4, "quorums": [[0]],
            "nodes": [{"id": 0, "host": "127.0.0.1", "port": 7800}]}"#;
        assert!(matches!(
            ClusterConfig::from_json(json),
            Err(ConfigError::NodeOutOfRange { id: 4, count: 1 })
        ));
    }
}
