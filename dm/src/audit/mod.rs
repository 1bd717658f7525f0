//! Append-only audit stream for a mapping run
//!
//! Per-row and per-write details (dropped fields, rejected rows, every
//! remote call with its status and body) go here rather than to the
//! primary log:
//!
//! ```text
//!  Projector ──┐
//!  UpsertWriter┼──▶ AuditHandle (mpsc) ──▶ AuditLog task ──▶ <report-dir>/<run-id>/report.jsonl
//!  Runner ─────┘
//! ```

mod logger;
mod types;

pub use logger::{AuditHandle, AuditLog, DEFAULT_AUDIT_CAPACITY, REPORT_FILE, read_report, spawn_audit_log};
pub use types::{AuditEntry, AuditEvent, WriteOperation};
