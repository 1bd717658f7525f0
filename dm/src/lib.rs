//! DataMapper - schema-driven record mapper
//!
//! DataMapper reads flat or lightly nested records (CSV, JSON, GeoJSON),
//! projects each of them onto a target data model described by a JSON
//! Schema, and writes the validated entities to one or more sinks: an
//! Orion Context Broker (NGSI v2 create-or-update) and/or a local JSON file.
//!
//! # Core Concepts
//!
//! - **Compile once, project many**: a field map is compiled against the
//!   normalized schema before any row is read
//! - **Drop, don't fail**: a field that cannot be extracted or validated is
//!   dropped; a row is rejected only when the whole entity is invalid
//! - **Stable identities**: ids are synthesized from run-scoped segments and
//!   a sanitized per-row value
//! - **Every write accounted for**: each (entity, sink) pair ends in exactly
//!   one counted and audited outcome
//!
//! # Modules
//!
//! - [`schema`] - schema loading, `$ref` resolution, normalization, validation
//! - [`mapping`] - field maps, compiler, extractors, row projection
//! - [`identity`] - entity id synthesis
//! - [`sink`] - upsert writer, Orion client, file sink
//! - [`source`] - CSV / JSON / GeoJSON row sources
//! - [`pipeline`] - the mapping run
//! - [`audit`] - JSONL audit report
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod audit;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod mapping;
pub mod pipeline;
pub mod schema;
pub mod sink;
pub mod source;

// Re-export commonly used types
pub use audit::{AuditEntry, AuditEvent, AuditHandle, AuditLog, read_report, spawn_audit_log};
pub use config::{Config, Overrides, UpdateMode, WriterKind};
pub use context::{RunContext, RunCounters, RunSummary, SinkTally};
pub use error::MapperError;
pub use identity::IdentityScope;
pub use mapping::{CompiledMap, FieldMap, Projector, ValidatedEntity, compile};
pub use pipeline::{MapRequest, Runner, run_mapping};
pub use schema::{NormalizedSchema, SchemaError, load_normalized};
pub use sink::{EntityStore, FileSink, OrionClient, Sink, SinkError, UpsertWriter, WriteOutcome};
pub use source::{RowSource, RowWindow, SourceError, SourceRow, open_source};
