//! Per-run context and counters
//!
//! Everything a run mutates lives here and is passed explicitly to the
//! components that need it, so overlapping runs in one process never share
//! state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::audit::AuditHandle;
use crate::config::Config;
use crate::sink::WriteOutcome;

/// Write outcome counts for one sink
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkTally {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl SinkTally {
    /// Outcomes recorded so far
    pub fn total(&self) -> u64 {
        self.created + self.updated + self.skipped + self.failed
    }

    fn record(&mut self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.created += 1,
            WriteOutcome::Updated => self.updated += 1,
            WriteOutcome::Skipped => self.skipped += 1,
            WriteOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Final counts of a run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,

    /// Rows read inside the window, including unreadable ones
    pub processed: u64,
    pub valid: u64,
    pub invalid: u64,

    /// Records the source could not parse
    pub unreadable: u64,

    /// Outcomes per active sink
    pub sinks: BTreeMap<String, SinkTally>,
}

impl RunSummary {
    /// Every sink reported exactly one outcome per valid entity
    pub fn is_balanced(&self) -> bool {
        self.sinks.values().all(|tally| tally.total() == self.valid)
    }
}

/// Run counters, updated by out-of-order sink tasks
///
/// One lock guards every counter, so a snapshot is always consistent.
#[derive(Debug, Default)]
pub struct RunCounters {
    inner: Mutex<RunSummary>,
}

impl RunCounters {
    pub fn new(sinks: &[String]) -> Self {
        let summary = RunSummary {
            sinks: sinks.iter().map(|s| (s.clone(), SinkTally::default())).collect(),
            ..Default::default()
        };
        Self {
            inner: Mutex::new(summary),
        }
    }

    pub async fn row_valid(&self) {
        let mut inner = self.inner.lock().await;
        inner.processed += 1;
        inner.valid += 1;
    }

    pub async fn row_invalid(&self) {
        let mut inner = self.inner.lock().await;
        inner.processed += 1;
        inner.invalid += 1;
    }

    pub async fn row_unreadable(&self) {
        let mut inner = self.inner.lock().await;
        inner.processed += 1;
        inner.unreadable += 1;
    }

    pub async fn record_outcome(&self, sink: &str, outcome: &WriteOutcome) {
        debug!(%sink, ?outcome, "RunCounters::record_outcome");
        self.inner
            .lock()
            .await
            .sinks
            .entry(sink.to_string())
            .or_default()
            .record(outcome);
    }

    pub async fn snapshot(&self) -> RunSummary {
        self.inner.lock().await.clone()
    }
}

/// Everything scoped to one run
#[derive(Clone, Debug)]
pub struct RunContext {
    pub run_id: String,
    pub config: Arc<Config>,
    pub counters: Arc<RunCounters>,
    pub audit: AuditHandle,
}

impl RunContext {
    /// Fresh context with a new time-ordered run id and no audit stream
    pub fn new(config: Config) -> Self {
        let run_id = new_run_id();
        let sinks: Vec<String> = config.writers.iter().map(|w| w.to_string()).collect();
        Self {
            audit: AuditHandle::disabled(&run_id),
            counters: Arc::new(RunCounters::new(&sinks)),
            config: Arc::new(config),
            run_id,
        }
    }

    /// Attach an audit stream for this run
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = audit;
        self
    }

    pub async fn summary(&self) -> RunSummary {
        let mut summary = self.counters.snapshot().await;
        summary.run_id = self.run_id.clone();
        summary
    }
}

/// UUIDv7 run id
pub fn new_run_id() -> String {
    Uuid::now_v7().to_string()
}
