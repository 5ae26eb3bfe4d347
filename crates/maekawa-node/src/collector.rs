//! # collector
//!
//! why: the collector node gathers every critical section report and ends the run
//! relations: fed DEBUG intervals by the voter, persists through maekawa-audit, broadcasts FINISHED
//! what: Collector

use crossbeam_channel::Receiver;
use maekawa_audit::{AuditLedger, AuditReport, ReportStore};
use maekawa_core::{CsInterval, Message, Messenger};
use tracing::{debug, error, info, warn};

pub struct Collector<S: ReportStore> {
    ledger: AuditLedger,
    store: S,
    messenger: Messenger,
}

impl<S: ReportStore> Collector<S> {
    pub fn new(expected: usize, store: S, messenger: Messenger) -> Self {
        Self {
            ledger: AuditLedger::new(expected),
            store,
            messenger,
        }
    }

    /// Consume reports until all expected intervals arrived, then finish the run
    ///
    /// A closed report channel ends collection early; the partial report is
    /// still saved but FINISHED is not sent.
    pub fn run(mut self, reports: Receiver<CsInterval>) -> (AuditReport, S) {
        info!(expected = self.ledger.expected(), "collector started");
        let mut complete = self.ledger.is_complete();
        while !complete {
            match reports.recv() {
                Ok(interval) => {
                    debug!(
                        node = interval.node,
                        request = interval.request,
                        enter = interval.enter,
                        exit = interval.exit,
                        "critical section reported"
                    );
                    complete = self.ledger.record(interval);
                }
                Err(_) => {
                    warn!(
                        received = self.ledger.len(),
                        "report channel closed before the run completed"
                    );
                    break;
                }
            }
        }

        let report = AuditReport::from_ledger(&self.ledger);
        if let Err(e) = self.store.save(&report) {
            error!(error = %e, "failed to save audit report");
        }
        if report.is_clean() {
            info!(summary = %report.summary(), "audit complete");
        } else {
            for conflict in &report.conflicts {
                error!(
                    first_node = conflict.first.node,
                    first_request = conflict.first.request,
                    second_node = conflict.second.node,
                    second_request = conflict.second.request,
                    "critical sections overlapped"
                );
            }
            warn!(summary = %report.summary(), "audit found conflicts");
        }

        if complete {
            self.finish_run();
        }
        (report, self.store)
    }

    fn finish_run(&self) {
        let ctx = self.messenger.context();
        info!(nodes = ctx.node_count(), "sending FINISHED");
        for addr in ctx.addresses.values() {
            self.messenger.send_message(&Message::Finished, *addr);
        }
    }
}
