//! # report
//!
//! why: turn a ledger into something a person can read after a run
//! relations: built from ledger.rs, persisted through the ReportStore in lib.rs
//! what: AuditReport, html conflict table, one-line summary

use std::collections::BTreeMap;
use std::fmt::Write as _;

use maekawa_core::{CsInterval, ProcessId};
use serde::{Deserialize, Serialize};

use crate::ledger::{AuditLedger, Conflict};

/// Snapshot of a finished (or partial) audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub expected: usize,
    /// sorted by node, then request
    pub intervals: Vec<CsInterval>,
    pub conflicts: Vec<Conflict>,
}

impl AuditReport {
    pub fn from_ledger(ledger: &AuditLedger) -> Self {
        let mut intervals = ledger.intervals().to_vec();
        intervals.sort_by_key(|i| (i.node, i.request));
        Self {
            expected: ledger.expected(),
            intervals,
            conflicts: ledger.conflicts(),
        }
    }

    pub fn completed(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    fn percent_complete(&self) -> usize {
        if self.expected == 0 {
            return 100;
        }
        self.completed() * 100 / self.expected
    }

    /// First interval each interval was found overlapping with
    fn conflict_partners(&self) -> BTreeMap<(ProcessId, u64), CsInterval> {
        let mut partners = BTreeMap::new();
        for conflict in &self.conflicts {
            partners
                .entry((conflict.first.node, conflict.first.request))
                .or_insert(conflict.second);
            partners
                .entry((conflict.second.node, conflict.second.request))
                .or_insert(conflict.first);
        }
        partners
    }

    pub fn summary(&self) -> String {
        format!(
            "{} of {} requests ({}%), {} conflicts",
            self.completed(),
            self.expected,
            self.percent_complete(),
            self.conflicts.len()
        )
    }

    /// One column per node, one row per request number; conflicting cells are red
    pub fn render_html(&self) -> String {
        let partners = self.conflict_partners();
        let mut by_node: BTreeMap<ProcessId, BTreeMap<u64, CsInterval>> = BTreeMap::new();
        for interval in &self.intervals {
            by_node.entry(interval.node).or_default().insert(interval.request, *interval);
        }
        let max_request = self.intervals.iter().map(|i| i.request).max().unwrap_or(0);

        let mut html = String::new();
        let _ = write!(
            html,
            "<h3>{} of {} Requests ({}%)</h3><hr />",
            self.completed(),
            self.expected,
            self.percent_complete()
        );
        html.push_str("<table cellpadding=\"5\"><thead><tr><th></th>");
        for node in by_node.keys() {
            let _ = write!(html, "<th>Node {node}</th>");
        }
        html.push_str("</tr></thead><tbody>");

        for request in 1..=max_request {
            let _ = write!(html, "<tr><td><strong>Request {request}</strong></td>");
            for (node, requests) in &by_node {
                match requests.get(&request) {
                    Some(interval) => {
                        let partner = partners.get(&(*node, request));
                        html.push_str("<td>");
                        html.push_str(&render_cell(interval, partner));
                        html.push_str("</td>");
                    }
                    None => html.push_str("<td></td>"),
                }
            }
            html.push_str("</tr>");
        }
        html.push_str("</tbody></table>");
        html
    }
}

fn render_cell(interval: &CsInterval, partner: Option<&CsInterval>) -> String {
    let (colour, note) = match partner {
        Some(other) => ("red", format!("R({}) @ Node({})", other.request, other.node)),
        None => ("green", String::new()),
    };
    format!(
        "<table cellpadding=\"2\" bgcolor=\"{colour}\"><tr><td>{}</td><td>{}</td></tr>\
         <tr><td colspan=\"2\">{note}</td></tr></table>",
        interval.enter, interval.exit
    )
}
