//! Field maps, extractors and row projection
//!
//! ```text
//! map.json ──parse──▶ FieldMap ──compile(schema)──▶ CompiledMap
//!                   (SourceExpression tree)       (Extractor per field)
//!
//! RawRow ──Projector::project──▶ ValidatedEntity | Rejection
//! ```
//!
//! Compilation dispatches on (schema type, source expression kind); every
//! key that cannot be compiled is dropped with a reason instead of failing
//! the run.

mod compiler;
mod entity;
mod expr;
mod extract;
mod projector;
mod row;
mod sanitize;

pub use compiler::{CompiledMap, DroppedKey, IdentitySource, compile};
pub use entity::{Attribute, ValidatedEntity};
pub use expr::{FieldMap, STATIC_PREFIX, SourceExpression, TARGET_DATA_MODEL_KEY};
pub use extract::{ConcatToken, ExtractionError, Extractor, coerce_boolean, coerce_date_time, coerce_number};
pub use projector::{FieldDrop, Projector, Rejection, RowProjection};
pub use row::{FieldPath, RawRow};
pub use sanitize::{normalize_text, sanitize_identity, strip_unsafe};
