//! Audit log task - persists audit events to a JSONL report
//!
//! Components send events through a cloneable [`AuditHandle`]. A single
//! [`AuditLog`] task owns the file and appends one JSON line per event, so
//! concurrent writers never interleave.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::types::{AuditEntry, AuditEvent};

/// Buffered events before senders wait
pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

/// Report file name inside a run directory
pub const REPORT_FILE: &str = "report.jsonl";

/// Cloneable sender side of the audit stream
#[derive(Clone, Debug)]
pub struct AuditHandle {
    run_id: String,
    tx: Option<mpsc::Sender<AuditEntry>>,
}

impl AuditHandle {
    /// A handle that discards every event
    pub fn disabled(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            tx: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an event; waits while the buffer is full
    pub async fn record(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event_type = event.event_type();
        if tx.send(AuditEntry::new(&self.run_id, event)).await.is_err() {
            debug!(event_type, "AuditHandle::record: audit log closed, event discarded");
        }
    }
}

/// Owner of one run's report file
pub struct AuditLog {
    path: PathBuf,
    writer: BufWriter<File>,
    rx: mpsc::Receiver<AuditEntry>,
}

impl AuditLog {
    /// Create `<report_dir>/<run_id>/report.jsonl` and the handle feeding it
    pub fn open(report_dir: impl AsRef<Path>, run_id: &str, capacity: usize) -> std::io::Result<(AuditHandle, Self)> {
        let run_dir = report_dir.as_ref().join(run_id);
        fs::create_dir_all(&run_dir)?;
        let path = run_dir.join(REPORT_FILE);
        debug!(?path, "AuditLog::open: creating report");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = AuditHandle {
            run_id: run_id.to_string(),
            tx: Some(tx),
        };
        Ok((
            handle,
            Self {
                path,
                writer: BufWriter::new(file),
                rx,
            },
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_entry(&mut self, entry: &AuditEntry) -> eyre::Result<()> {
        let json = serde_json::to_string(entry)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Append events until `RunCompleted` or until every handle is dropped
    ///
    /// Returns the number of entries written.
    pub async fn run(mut self) -> usize {
        debug!(path = ?self.path, "AuditLog::run: starting");
        let mut written = 0;

        while let Some(entry) = self.rx.recv().await {
            let is_run_completed = matches!(entry.event, AuditEvent::RunCompleted { .. });
            match self.write_entry(&entry) {
                Ok(()) => written += 1,
                Err(e) => error!(path = ?self.path, error = %e, "AuditLog: failed to write entry"),
            }
            if is_run_completed {
                break;
            }
        }

        self.rx.close();
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "AuditLog: final flush failed");
        }
        debug!(written, "AuditLog::run: stopped");
        written
    }
}

/// Open the report for a run and spawn its writer task
pub fn spawn_audit_log(report_dir: impl AsRef<Path>, run_id: &str) -> std::io::Result<(AuditHandle, JoinHandle<usize>)> {
    let (handle, log) = AuditLog::open(report_dir, run_id, DEFAULT_AUDIT_CAPACITY)?;
    Ok((handle, tokio::spawn(log.run())))
}

/// Read a run's report back
pub fn read_report(report_dir: impl AsRef<Path>, run_id: &str) -> eyre::Result<Vec<AuditEntry>> {
    let path = report_dir.as_ref().join(run_id).join(REPORT_FILE);
    debug!(?path, "read_report: reading report");

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&path)?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_report: failed to parse line"),
        }
    }

    debug!(count = entries.len(), "read_report: loaded entries");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunSummary;
    use tempfile::tempdir;

    fn dropped(row: u64) -> AuditEvent {
        AuditEvent::FieldDropped {
            row,
            field: "speed".into(),
            reason: "not a number".into(),
        }
    }

    #[tokio::test]
    async fn test_events_written_in_order() {
        let temp = tempdir().unwrap();
        let (handle, task) = spawn_audit_log(temp.path(), "run-a").unwrap();

        handle.record(dropped(1)).await;
        handle.record(dropped(2)).await;
        drop(handle);
        assert_eq!(task.await.unwrap(), 2);

        let entries = read_report(temp.path(), "run-a").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.run_id == "run-a"));
        assert!(matches!(entries[1].event, AuditEvent::FieldDropped { row: 2, .. }));
    }

    #[tokio::test]
    async fn test_run_completed_stops_log() {
        let temp = tempdir().unwrap();
        let (handle, task) = spawn_audit_log(temp.path(), "run-b").unwrap();
        let keep_alive = handle.clone();

        handle.record(dropped(1)).await;
        handle
            .record(AuditEvent::RunCompleted {
                summary: RunSummary::default(),
            })
            .await;
        assert_eq!(task.await.unwrap(), 2);

        // The log is gone; later events are discarded without error
        keep_alive.record(dropped(3)).await;
        assert_eq!(read_report(temp.path(), "run-b").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_handle_discards() {
        let handle = AuditHandle::disabled("run-c");
        assert!(!handle.is_enabled());
        handle.record(dropped(1)).await;
    }

    #[test]
    fn test_read_missing_report() {
        let temp = tempdir().unwrap();
        assert!(read_report(temp.path(), "nope").unwrap().is_empty());
    }

    #[test]
    fn test_read_skips_bad_lines() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("run-d");
        fs::create_dir_all(&dir).unwrap();
        let good = serde_json::to_string(&AuditEntry::new("run-d", dropped(1))).unwrap();
        fs::write(dir.join(REPORT_FILE), format!("{}\nnot json\n\n{}\n", good, good)).unwrap();

        assert_eq!(read_report(temp.path(), "run-d").unwrap().len(), 2);
    }
}
