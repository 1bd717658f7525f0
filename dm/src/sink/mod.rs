//! Entity sinks
//!
//! Every active sink receives every validated entity and reports exactly
//! one [`WriteOutcome`] for it. Sink failures are never fatal to the run.
//!
//! - [`UpsertWriter`] - create-or-update-or-skip against an [`EntityStore`]
//!   (the Orion Context Broker in production), with retries and a bound on
//!   in-flight writes
//! - [`FileSink`] - one JSON array in a local file

mod file;
mod orion;
mod upsert;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mapping::ValidatedEntity;

pub use file::FileSink;
#[cfg(test)]
pub use orion::mock::MockEntityStore;
pub use orion::{EntityStore, OrionClient, StoreResponse};
pub use upsert::{UpsertSettings, UpsertWriter};

/// Terminal result of writing one entity to one sink
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOutcome {
    Created,
    Updated,
    Skipped,
    Failed(String),
}

impl WriteOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            WriteOutcome::Created => "created",
            WriteOutcome::Updated => "updated",
            WriteOutcome::Skipped => "skipped",
            WriteOutcome::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            WriteOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Errors raised by a sink (SinkWriteError)
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid sink configuration: {0}")]
    Config(String),
}

impl SinkError {
    /// Orion's "entity already exists" answer to a create
    pub fn is_conflict(&self) -> bool {
        match self {
            SinkError::Http { status, body } => StoreResponse::new(*status, body.clone()).is_conflict(),
            _ => false,
        }
    }
}

/// A consumer of validated entities
#[async_trait]
pub trait Sink: Send + Sync {
    /// Name used in counters, logs and the audit report
    fn name(&self) -> &str;

    /// Write one entity; failures are reported as [`WriteOutcome::Failed`]
    async fn write(&self, ordinal: u64, entity: &ValidatedEntity) -> WriteOutcome;

    /// Called once, after every write of the run has completed
    async fn finalize(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
