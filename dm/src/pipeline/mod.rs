//! The mapping run
//!
//! ```text
//! setup (fatal on error)            per row (never fatal)                end
//! ─────────────────────             ─────────────────────                ───
//! config.validate()                 RawRow ─▶ Projector ─▶ Rejection     join every sink task
//! FieldMap::load                                 │                       Sink::finalize
//! schema load + normalize                        ▼                       RunSummary + RunCompleted
//! compile                           ValidatedEntity ─▶ one task per sink
//! open source, build sinks
//! ```
//!
//! Rows are consumed strictly in ordinal order; sink tasks complete in any
//! order and record their own outcome, so every (entity, sink) pair is
//! counted exactly once.

mod runner;

use std::path::PathBuf;

pub use runner::{Runner, build_sinks, resolve_schema_location, run_mapping};

/// Inputs of one mapping run
#[derive(Debug, Clone)]
pub struct MapRequest {
    /// CSV, JSON or GeoJSON rows
    pub source: PathBuf,

    /// Field-map document
    pub map: PathBuf,

    /// Schema path or URL; falls back to the map's `targetDataModel`
    pub schema: Option<String>,
}
