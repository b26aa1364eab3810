//! Run registry: observable status of in-flight and finished runs.
//!
//! Entries live until purged or process exit. Each entry has exactly one
//! writer, the [`RunHandle`] returned by [`RunRegistry::create`]; any number of
//! readers take consistent snapshots through [`RunRegistry::get`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::report::{MigrationReport, RunStatus};

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    /// Percentage of tables fully processed, 0..=100.
    pub progress: u8,
    pub logs: Vec<String>,
    pub updated_at: DateTime<Utc>,
    /// Final report, present once the run has finished.
    pub report: Option<MigrationReport>,
}

impl RunSnapshot {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Pending,
            progress: 0,
            logs: Vec::new(),
            updated_at: Utc::now(),
            report: None,
        }
    }
}

type Entry = Arc<RwLock<RunSnapshot>>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Registry of runs keyed by run id.
#[derive(Debug, Default, Clone)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<String, Entry>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run and return its only writer.
    pub fn create(&self, run_id: &str) -> Result<RunHandle> {
        let mut runs = write(&self.runs);
        if runs.contains_key(run_id) {
            return Err(MigrateError::Config(format!("run {} already exists", run_id)));
        }
        let entry = Arc::new(RwLock::new(RunSnapshot::new(run_id)));
        runs.insert(run_id.to_string(), Arc::clone(&entry));
        Ok(RunHandle {
            run_id: run_id.to_string(),
            entry,
        })
    }

    /// Snapshot of a run, if known.
    pub fn get(&self, run_id: &str) -> Option<RunSnapshot> {
        let entry = read(&self.runs).get(run_id).cloned()?;
        let snapshot = read(&entry).clone();
        Some(snapshot)
    }

    /// Forget a run. Returns whether it existed.
    pub fn purge(&self, run_id: &str) -> bool {
        write(&self.runs).remove(run_id).is_some()
    }

    /// Known run ids, sorted.
    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read(&self.runs).keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Write access to one run's entry. Not `Clone`.
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    entry: Entry,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn set_status(&self, status: RunStatus) {
        let mut snap = write(&self.entry);
        snap.status = status;
        snap.updated_at = Utc::now();
    }

    /// Set progress, clamped to 100.
    pub fn set_progress(&self, percent: u8) {
        let mut snap = write(&self.entry);
        snap.progress = percent.min(100);
        snap.updated_at = Utc::now();
    }

    /// Append a human-readable log line.
    pub fn log(&self, line: impl Into<String>) {
        let mut snap = write(&self.entry);
        snap.logs.push(line.into());
        snap.updated_at = Utc::now();
    }

    /// Store the final report and its terminal status.
    pub fn finish(&self, report: &MigrationReport) {
        let mut snap = write(&self.entry);
        snap.status = report.status;
        if report.status == RunStatus::Completed {
            snap.progress = 100;
        }
        snap.report = Some(report.clone());
        snap.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> RunSnapshot {
        read(&self.entry).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get() {
        let registry = RunRegistry::new();
        let handle = registry.create("run-1").unwrap();
        handle.set_status(RunStatus::Migrating);
        handle.set_progress(40);
        handle.log("Migrating user");

        let snap = registry.get("run-1").unwrap();
        assert_eq!(snap.status, RunStatus::Migrating);
        assert_eq!(snap.progress, 40);
        assert_eq!(snap.logs, vec!["Migrating user"]);
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_duplicate_run_id_rejected() {
        let registry = RunRegistry::new();
        let _handle = registry.create("run-1").unwrap();
        assert!(registry.create("run-1").is_err());
    }

    #[test]
    fn test_progress_clamped() {
        let registry = RunRegistry::new();
        let handle = registry.create("r").unwrap();
        handle.set_progress(250);
        assert_eq!(handle.snapshot().progress, 100);
    }

    #[test]
    fn test_finish_stores_report() {
        let registry = RunRegistry::new();
        let handle = registry.create("r").unwrap();
        let mut report = MigrationReport::new("r");
        report.finish(RunStatus::Completed);
        handle.finish(&report);

        let snap = registry.get("r").unwrap();
        assert_eq!(snap.status, RunStatus::Completed);
        assert_eq!(snap.progress, 100);
        assert_eq!(snap.report.unwrap().run_id, "r");
    }

    #[test]
    fn test_purge() {
        let registry = RunRegistry::new();
        let _a = registry.create("b").unwrap();
        let _b = registry.create("a").unwrap();
        assert_eq!(registry.run_ids(), vec!["a", "b"]);
        assert!(registry.purge("a"));
        assert!(!registry.purge("a"));
        assert_eq!(registry.run_ids(), vec!["b"]);
    }

    #[test]
    fn test_concurrent_readers_during_writes() {
        let registry = RunRegistry::new();
        let handle = registry.create("run").unwrap();
        let other = registry.create("other").unwrap();
        other.set_status(RunStatus::Completed);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snap = registry.get("run").unwrap();
                        assert!(snap.progress <= 100);
                        assert_eq!(registry.get("other").unwrap().status, RunStatus::Completed);
                    }
                })
            })
            .collect();

        for i in 0..=100u8 {
            handle.set_progress(i);
        }
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(registry.get("run").unwrap().progress, 100);
    }
}
