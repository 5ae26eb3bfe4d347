//! # ledger
//!
//! why: collect every node's critical section intervals and find any two that overlap
//! relations: fed by the collector thread in maekawa-node, summarized by report.rs
//! what: AuditLedger, Conflict, overlap detection

use maekawa_core::CsInterval;
use serde::{Deserialize, Serialize};

/// Two intervals from different nodes whose open ranges intersect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub first: CsInterval,
    pub second: CsInterval,
}

/// Open-range overlap between sections held by different nodes
///
/// Touching endpoints are not a conflict: the next holder's entry is always
/// causally after the previous holder's exit.
pub fn overlaps(a: &CsInterval, b: &CsInterval) -> bool {
    a.node != b.node && a.enter < b.exit && b.enter < a.exit
}

/// All intervals reported so far, and how many are expected in total
#[derive(Debug, Clone, Default)]
pub struct AuditLedger {
    expected: usize,
    intervals: Vec<CsInterval>,
}

impl AuditLedger {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            intervals: Vec::with_capacity(expected),
        }
    }

    /// Record one interval; returns true once the expected total is reached
    pub fn record(&mut self, interval: CsInterval) -> bool {
        self.intervals.push(interval);
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.intervals.len() >= self.expected
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[CsInterval] {
        &self.intervals
    }

    /// Every overlapping pair, earliest entry first
    pub fn conflicts(&self) -> Vec<Conflict> {
        let mut sorted = self.intervals.clone();
        sorted.sort_by_key(|i| (i.enter, i.node, i.request));

        let mut found = Vec::new();
        for (idx, first) in sorted.iter().enumerate() {
            for second in &sorted[idx + 1..] {
                // sorted by entry, nothing further along can start inside `first`
                if second.enter >= first.exit {
                    break;
                }
                if overlaps(first, second) {
                    found.push(Conflict { first: *first, second: *second });
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maekawa_core::ProcessId;

    fn cs(node: ProcessId, request: u64, enter: u64, exit: u64) -> CsInterval {
        CsInterval { node, request, enter, exit }
    }

    #[test]
    fn ledger_completes_at_expected_count() {
        let mut ledger = AuditLedger::new(2);
        assert!(!ledger.record(cs(0, 1, 1, 3)));
        assert!(ledger.record(cs(1, 1, 5, 8)));
    }

    #[test]
    fn disjoint_intervals_do_not_conflict() {
        let mut ledger = AuditLedger::new(3);
        ledger.record(cs(0, 1, 1, 4));
        ledger.record(cs(1, 1, 4, 9));
        ledger.record(cs(2, 1, 12, 15));
        assert!(ledger.conflicts().is_empty());
    }

    #[test]
    fn nested_interval_is_a_conflict() {
        let mut ledger = AuditLedger::new(2);
        ledger.record(cs(0, 1, 10, 30));
        ledger.record(cs(1, 1, 12, 14));
        let conflicts = ledger.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].first.node, 0);
        assert_eq!(conflicts[0].second.node, 1);
    }

    #[test]
    fn same_node_never_conflicts_with_itself() {
        assert!(!overlaps(&cs(2, 1, 1, 10), &cs(2, 2, 5, 12)));
    }
}
