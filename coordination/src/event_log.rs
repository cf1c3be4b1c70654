//! Event Log — append-only JSONL audit trail plus a final run summary.
//!
//! Every notable occurrence during a run is appended to
//! `.claude-swarm/logs/<run_id>/events.jsonl` as one JSON object per line.
//! The file is opened once in append mode and kept open for the run's
//! lifetime; a single writer means no interleaved writes to reason about. A
//! running cost/outcome tally is kept in memory and flushed to
//! `metadata.json` once, at the end of the run.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;

use crate::error::StoreError;

/// The kind of event recorded, mirroring the run pipeline's stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PlanStart,
    PlanComplete,
    WorkerStart,
    WorkerComplete,
    WorkerError,
    WorkerRetry,
    ConflictResolution,
    IntegrationStart,
    MergeResult,
    TestResult,
    PrCreated,
}

#[derive(Default)]
struct Totals {
    worker_costs: HashMap<String, f64>,
    total_cost: f64,
    worker_count: usize,
    success_count: usize,
    failure_count: usize,
}

pub struct SessionRecorder {
    run_id: String,
    events_path: PathBuf,
    metadata_path: PathBuf,
    writer: Mutex<File>,
    totals: Mutex<Totals>,
    start: Instant,
    elapsed_floor_ms: AtomicU64,
}

impl SessionRecorder {
    pub fn new(repo_path: impl AsRef<Path>, run_id: &str) -> Result<Self, StoreError> {
        let dir = repo_path
            .as_ref()
            .join(".claude-swarm")
            .join("logs")
            .join(run_id);
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let events_path = dir.join("events.jsonl");
        let metadata_path = dir.join("metadata.json");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)
            .map_err(|source| StoreError::Io {
                path: events_path.clone(),
                source,
            })?;
        Ok(Self {
            run_id: run_id.to_string(),
            events_path,
            metadata_path,
            writer: Mutex::new(file),
            totals: Mutex::new(Totals::default()),
            start: Instant::now(),
            elapsed_floor_ms: AtomicU64::new(0),
        })
    }

    /// Milliseconds elapsed since this recorder was created. Monotonic:
    /// never returns a value smaller than the previous call, even if the
    /// underlying clock is coarse.
    pub fn elapsed_ms(&self) -> u64 {
        let observed = self.start.elapsed().as_millis() as u64;
        self.elapsed_floor_ms.fetch_max(observed, Ordering::SeqCst);
        self.elapsed_floor_ms.load(Ordering::SeqCst)
    }

    /// Append one event. `timestamp` is the caller-supplied wall-clock time
    /// (callers own time sourcing so tests can inject deterministic values).
    pub fn record(
        &self,
        kind: EventKind,
        timestamp: &str,
        detail: serde_json::Value,
    ) -> Result<(), StoreError> {
        let line = json!({
            "run_id": self.run_id,
            "timestamp": timestamp,
            "elapsed_ms": self.elapsed_ms(),
            "event": kind,
            "detail": detail,
        });
        let mut serialized =
            serde_json::to_vec(&line).map_err(|source| StoreError::Json {
                path: self.events_path.clone(),
                source,
            })?;
        serialized.push(b'\n');
        let mut writer = self.writer.lock().expect("event log writer lock poisoned");
        writer
            .write_all(&serialized)
            .map_err(|source| StoreError::Io {
                path: self.events_path.clone(),
                source,
            })
    }

    pub fn record_worker_complete(
        &self,
        worker_id: &str,
        timestamp: &str,
        cost_usd: f64,
        success: bool,
        detail: serde_json::Value,
    ) -> Result<(), StoreError> {
        {
            let mut totals = self.totals.lock().expect("totals lock poisoned");
            *totals.worker_costs.entry(worker_id.to_string()).or_insert(0.0) += cost_usd;
            totals.total_cost += cost_usd;
            totals.worker_count += 1;
            if success {
                totals.success_count += 1;
            } else {
                totals.failure_count += 1;
            }
        }
        self.record(EventKind::WorkerComplete, timestamp, detail)
    }

    /// Write the final `metadata.json` summary. Callers should call this
    /// exactly once, at run end.
    pub fn write_metadata(&self, finished_at: &str, extra: serde_json::Value) -> Result<(), StoreError> {
        let totals = self.totals.lock().expect("totals lock poisoned");
        let summary = json!({
            "run_id": self.run_id,
            "finished_at": finished_at,
            "total_cost_usd": totals.total_cost,
            "worker_count": totals.worker_count,
            "success_count": totals.success_count,
            "failure_count": totals.failure_count,
            "worker_costs": totals.worker_costs,
            "extra": extra,
        });
        let json = serde_json::to_string_pretty(&summary).map_err(|source| StoreError::Json {
            path: self.metadata_path.clone(),
            source,
        })?;
        std::fs::write(&self.metadata_path, json).map_err(|source| StoreError::Io {
            path: self.metadata_path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = SessionRecorder::new(dir.path(), "run-1").unwrap();
        recorder
            .record(EventKind::PlanStart, "t0", json!({"task": "x"}))
            .unwrap();
        recorder
            .record(EventKind::PlanComplete, "t1", json!({"tasks": 3}))
            .unwrap();

        let contents = std::fs::read_to_string(
            dir.path().join(".claude-swarm/logs/run-1/events.jsonl"),
        )
        .unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "plan_start");
    }

    #[test]
    fn metadata_reflects_recorded_worker_costs() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = SessionRecorder::new(dir.path(), "run-1").unwrap();
        recorder
            .record_worker_complete("worker-1", "t0", 1.5, true, json!({}))
            .unwrap();
        recorder
            .record_worker_complete("worker-2", "t1", 2.0, false, json!({}))
            .unwrap();
        recorder.write_metadata("t2", json!({})).unwrap();

        let contents = std::fs::read_to_string(
            dir.path().join(".claude-swarm/logs/run-1/metadata.json"),
        )
        .unwrap();
        let metadata: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(metadata["total_cost_usd"], 3.5);
        assert_eq!(metadata["success_count"], 1);
        assert_eq!(metadata["failure_count"], 1);
    }
}
