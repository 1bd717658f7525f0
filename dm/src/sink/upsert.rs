//! Create-or-update-or-skip writer with bounded retries

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::orion::{EntityStore, StoreResponse};
use super::{Sink, SinkError, WriteOutcome};
use crate::audit::{AuditEvent, AuditHandle, WriteOperation};
use crate::config::{OrionConfig, UpdateMode};
use crate::mapping::ValidatedEntity;

/// Retry delays stop growing after this many doublings
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// Upsert protocol settings
#[derive(Clone, Debug)]
pub struct UpsertSettings {
    pub skip_existing: bool,
    pub update_mode: UpdateMode,

    /// Retries after the first attempt, per call
    pub max_retry: u32,

    /// In-flight writes; excess writes queue
    pub parallel_requests: usize,

    /// First retry delay, doubled on every further retry
    pub backoff: Duration,
}

impl UpsertSettings {
    pub fn from_config(config: &OrionConfig) -> Self {
        Self {
            skip_existing: config.skip_existing,
            update_mode: config.update_mode,
            max_retry: config.max_retry,
            parallel_requests: config.parallel_requests,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl Default for UpsertSettings {
    fn default() -> Self {
        Self::from_config(&OrionConfig::default())
    }
}

/// How one retried call ended
enum CallResult {
    /// A response the protocol acts on
    Accepted(StoreResponse),
    /// Retries exhausted; the reason of the last failure
    Exhausted(String),
}

/// Writes entities to an [`EntityStore`]
///
/// 1. create; `201` is Created
/// 2. "Already Exists" is Skipped with `skip_existing`, otherwise update
///    (append or replace); success is Updated
/// 3. any other answer is retried up to the cap, then Failed
///
/// Create and update each get their own retry budget.
pub struct UpsertWriter {
    name: String,
    store: Arc<dyn EntityStore>,
    settings: UpsertSettings,
    semaphore: Arc<Semaphore>,
    audit: AuditHandle,
}

impl UpsertWriter {
    pub fn new(name: impl Into<String>, store: Arc<dyn EntityStore>, settings: UpsertSettings, audit: AuditHandle) -> Self {
        let name = name.into();
        debug!(%name, ?settings, "UpsertWriter::new: called");
        Self {
            semaphore: Arc::new(Semaphore::new(settings.parallel_requests.max(1))),
            name,
            store,
            settings,
            audit,
        }
    }

    async fn send(&self, operation: WriteOperation, entity: &ValidatedEntity, body: &Value) -> Result<StoreResponse, SinkError> {
        match operation {
            WriteOperation::Create => self.store.create(body).await,
            WriteOperation::Update => self.store.update(&entity.id, body, self.settings.update_mode).await,
        }
    }

    /// Run one call with retries, auditing every attempt
    async fn call(
        &self,
        ordinal: u64,
        entity: &ValidatedEntity,
        operation: WriteOperation,
        body: &Value,
        accept: fn(&StoreResponse) -> bool,
    ) -> CallResult {
        let mut last_failure = String::new();

        for attempt in 1..=self.settings.max_retry + 1 {
            if attempt > 1 {
                let backoff = self.settings.backoff * 2u32.pow((attempt - 2).min(MAX_BACKOFF_DOUBLINGS));
                warn!(
                    sink = %self.name,
                    id = %entity.id,
                    %operation,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "UpsertWriter: retrying"
                );
                tokio::time::sleep(backoff).await;
            }

            let result = self.send(operation, entity, body).await;
            let (status, response_body) = match &result {
                Ok(response) => (Some(response.status), response.body.clone()),
                Err(e) => (None, e.to_string()),
            };
            self.audit
                .record(AuditEvent::WriteAttempt {
                    sink: self.name.clone(),
                    row: ordinal,
                    entity_id: entity.id.clone(),
                    operation,
                    attempt,
                    status,
                    body: response_body,
                })
                .await;

            match result {
                Ok(response) if accept(&response) => return CallResult::Accepted(response),
                Ok(response) => {
                    debug!(id = %entity.id, %operation, attempt, status = response.status, "UpsertWriter: rejected");
                    last_failure = SinkError::Http {
                        status: response.status,
                        body: response.body,
                    }
                    .to_string();
                }
                Err(e) => {
                    debug!(id = %entity.id, %operation, attempt, error = %e, "UpsertWriter: transport error");
                    last_failure = e.to_string();
                }
            }
        }

        CallResult::Exhausted(format!("{} failed: {}", operation, last_failure))
    }
}

fn created_or_conflict(response: &StoreResponse) -> bool {
    response.is_created() || response.is_conflict()
}

fn updated(response: &StoreResponse) -> bool {
    response.is_success()
}

#[async_trait]
impl Sink for UpsertWriter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, ordinal: u64, entity: &ValidatedEntity) -> WriteOutcome {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return WriteOutcome::Failed("writer closed".to_string());
        };
        debug!(sink = %self.name, ordinal, id = %entity.id, "UpsertWriter::write: called");

        let body = match serde_json::to_value(entity) {
            Ok(body) => body,
            Err(e) => return WriteOutcome::Failed(e.to_string()),
        };

        let created = match self
            .call(ordinal, entity, WriteOperation::Create, &body, created_or_conflict)
            .await
        {
            CallResult::Exhausted(reason) => return WriteOutcome::Failed(reason),
            CallResult::Accepted(response) => response,
        };
        if !created.is_conflict() {
            return WriteOutcome::Created;
        }
        if self.settings.skip_existing {
            debug!(id = %entity.id, "UpsertWriter::write: exists, skipping");
            return WriteOutcome::Skipped;
        }

        let attrs = entity.attrs_body();
        match self.call(ordinal, entity, WriteOperation::Update, &attrs, updated).await {
            CallResult::Accepted(_) => WriteOutcome::Updated,
            CallResult::Exhausted(reason) => WriteOutcome::Failed(reason),
        }
    }
}
