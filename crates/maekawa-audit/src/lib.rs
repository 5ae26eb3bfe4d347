//! # maekawa-audit
//!
//! why: check after the fact that no two nodes were ever in the critical section together
//! relations: consumes maekawa-core CsInterval reports, driven by the collector in maekawa-node
//! what: AuditLedger, AuditReport, ReportStore trait, FileReportStore, InMemoryReportStore

pub mod ledger;
pub mod report;

pub use ledger::{overlaps, AuditLedger, Conflict};
pub use report::AuditReport;

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// trait for keeping audit reports around after a run
///
/// this abstraction allows the same collector code to work with:
/// - a report directory on disk (the node binary)
/// - memory (testing)
pub trait ReportStore {
    /// persist the report, replacing any earlier one
    fn save(&mut self, report: &AuditReport) -> io::Result<()>;

    /// load the last saved report, if any
    fn load(&self) -> io::Result<Option<AuditReport>>;
}

impl<S: ReportStore + ?Sized> ReportStore for Box<S> {
    fn save(&mut self, report: &AuditReport) -> io::Result<()> {
        (**self).save(report)
    }

    fn load(&self) -> io::Result<Option<AuditReport>> {
        (**self).load()
    }
}

// -- file store implementation --

/// file-based report store
///
/// writes into a directory:
/// - verification-table.html: the conflict table
/// - audit.json: the full report, reloadable
pub struct FileReportStore {
    dir: PathBuf,
}

impl FileReportStore {
    /// create a store at the given directory, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn html_path(&self) -> PathBuf {
        self.dir.join("verification-table.html")
    }

    pub fn json_path(&self) -> PathBuf {
        self.dir.join("audit.json")
    }

    /// atomic write: temp file in the same directory, then rename
    fn write_atomic(&self, target: &Path, contents: &[u8]) -> io::Result<()> {
        let mut temp_name = target.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp_path = self.dir.join(temp_name);

        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, target)
    }
}

impl ReportStore for FileReportStore {
    fn save(&mut self, report: &AuditReport) -> io::Result<()> {
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.write_atomic(&self.json_path(), json.as_bytes())?;
        self.write_atomic(&self.html_path(), report.render_html().as_bytes())?;
        tracing::debug!(dir = %self.dir.display(), "audit report written");
        Ok(())
    }

    fn load(&self) -> io::Result<Option<AuditReport>> {
        let path = self.json_path();
        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let report = serde_json::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(report))
    }
}

// -- in-memory store implementation --

/// in-memory report store for testing
#[derive(Default)]
pub struct InMemoryReportStore {
    report: Option<AuditReport>,
    saves: usize,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// how many times save has been called
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl ReportStore for InMemoryReportStore {
    fn save(&mut self, report: &AuditReport) -> io::Result<()> {
        self.report = Some(report.clone());
        self.saves += 1;
        Ok(())
    }

    fn load(&self) -> io::Result<Option<AuditReport>> {
        Ok(self.report.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maekawa_core::CsInterval;
    use tempfile::tempdir;

    fn report() -> AuditReport {
        let mut ledger = AuditLedger::new(2);
        ledger.record(CsInterval { node: 0, request: 1, enter: 2, exit: 5 });
        ledger.record(CsInterval { node: 1, request: 1, enter: 7, exit: 9 });
        AuditReport::from_ledger(&ledger)
    }

    #[test]
    fn in_memory_store_keeps_last_report() {
        let mut store = InMemoryReportStore::new();
        assert_eq!(store.load().unwrap(), None);

        store.save(&report()).unwrap();
        assert_eq!(store.load().unwrap(), Some(report()));
        assert_eq!(store.saves(), 1);
    }

    #[test]
    fn file_store_writes_html_and_json() {
        let dir = tempdir().unwrap();
        let mut store = FileReportStore::new(dir.path()).unwrap();

        store.save(&report()).unwrap();

        assert!(store.html_path().exists());
        assert_eq!(store.load().unwrap(), Some(report()));
        let html = fs::read_to_string(store.html_path()).unwrap();
        assert!(html.starts_with("<h3>2 of 2 Requests (100%)</h3>"));
    }

    #[test]
    fn file_store_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let mut store = FileReportStore::new(dir.path()).unwrap();
        store.save(&report()).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().map_or(false, |ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
