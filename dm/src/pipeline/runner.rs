//! Run setup, row loop, fan-out and join

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::MapRequest;
use crate::audit::{AuditEvent, AuditHandle, spawn_audit_log};
use crate::config::{Config, WriterKind};
use crate::context::{RunContext, RunSummary};
use crate::error::MapperError;
use crate::identity::IdentityScope;
use crate::mapping::{CompiledMap, FieldMap, Projector, ValidatedEntity, compile};
use crate::schema::load_normalized;
use crate::sink::{FileSink, OrionClient, Sink, UpsertSettings, UpsertWriter, WriteOutcome};
use crate::source::{RowSource, RowWindow, SourceError, SourceRow, open_source};

/// Rows buffered between the reader thread and the row loop
const ROW_CHANNEL_CAPACITY: usize = 256;

/// A sink task and what it is writing
struct PendingWrite {
    sink: String,
    ordinal: u64,
    entity_id: String,
    handle: JoinHandle<()>,
}

/// One prepared mapping run
pub struct Runner {
    ctx: RunContext,
    source: RowSource,
    source_label: String,
    schema_label: String,
    projector: Projector,
    compiled: Arc<CompiledMap>,
    sinks: Vec<Arc<dyn Sink>>,
}

impl Runner {
    /// Everything that can fail fatally happens here, before any row is read
    pub async fn prepare(ctx: RunContext, request: &MapRequest) -> Result<Self, MapperError> {
        debug!(run_id = %ctx.run_id, ?request, "Runner::prepare: called");
        ctx.config.validate()?;
        let mapping = &ctx.config.mapping;

        let field_map = FieldMap::load(&request.map, &mapping.entity_name_field)?;
        let schema_label = resolve_schema_location(request.schema.as_deref(), &field_map, &mapping.schema_folder)?;
        let timeout = Duration::from_millis(ctx.config.orion.timeout_ms);
        let schema = Arc::new(load_normalized(&schema_label, timeout).await?);
        let compiled = Arc::new(compile(&field_map, &schema));

        let scope = IdentityScope::new(
            field_map.id_site.clone().unwrap_or_else(|| mapping.site.clone()),
            field_map.id_service.clone().unwrap_or_else(|| mapping.service.clone()),
            field_map.id_group.clone().or_else(|| mapping.group.clone()),
        )
        .with_source(&request.source);
        let projector = Projector::new(schema, compiled.clone(), scope);

        let window = RowWindow::new(mapping.row_start, mapping.row_end);
        let source = open_source(&request.source, mapping.csv_delimiter, window)?;
        let sinks = build_sinks(&ctx.config, &ctx.audit)?;

        info!(
            run_id = %ctx.run_id,
            source = %request.source.display(),
            schema = %schema_label,
            fields = compiled.fields.len(),
            sinks = sinks.len(),
            "Run prepared"
        );
        Ok(Self {
            source_label: request.source.display().to_string(),
            ctx,
            source,
            schema_label,
            projector,
            compiled,
            sinks,
        })
    }

    /// Replace the configured sinks
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn Sink>>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Process every row, wait for every write, finalize sinks
    pub async fn run(self) -> Result<RunSummary, MapperError> {
        let Self {
            ctx,
            source,
            source_label,
            schema_label,
            projector,
            compiled,
            sinks,
        } = self;
        debug!(run_id = %ctx.run_id, "Runner::run: called");

        ctx.audit
            .record(AuditEvent::RunStarted {
                source: source_label,
                schema: schema_label,
                entity_type: projector.schema().entity_type().to_string(),
                sinks: sinks.iter().map(|s| s.name().to_string()).collect(),
            })
            .await;
        for dropped in &compiled.dropped {
            warn!(field = %dropped.name, reason = %dropped.reason, "Map key dropped");
            ctx.audit
                .record(AuditEvent::KeyDropped {
                    field: dropped.name.clone(),
                    reason: dropped.reason.clone(),
                })
                .await;
        }

        let (mut rows, reader) = spawn_reader(source);
        let mut pending = Vec::new();
        while let Some(item) = rows.recv().await {
            let source_row = match item {
                Ok(source_row) => source_row,
                Err(e) => {
                    warn!(error = %e, "Unreadable row");
                    ctx.counters.row_unreadable().await;
                    ctx.audit
                        .record(AuditEvent::RowUnreadable {
                            row: e.ordinal(),
                            reason: e.to_string(),
                        })
                        .await;
                    continue;
                }
            };
            let ordinal = source_row.ordinal;

            let projection = projector.project(ordinal, &source_row.row);
            for drop in projection.dropped {
                ctx.audit
                    .record(AuditEvent::FieldDropped {
                        row: ordinal,
                        field: drop.field,
                        reason: drop.reason,
                    })
                    .await;
            }

            match projection.result {
                Ok(entity) => {
                    ctx.counters.row_valid().await;
                    let entity = Arc::new(entity);
                    for sink in &sinks {
                        pending.push(spawn_write(&ctx, sink.clone(), ordinal, entity.clone()));
                    }
                }
                Err(rejection) => {
                    ctx.counters.row_invalid().await;
                    ctx.audit
                        .record(AuditEvent::RowRejected {
                            row: rejection.row_ordinal,
                            reason: rejection.reason,
                            partial_object: rejection.partial_object,
                        })
                        .await;
                }
            }
        }

        if let Err(e) = reader.await {
            error!(error = %e, "Source reader failed");
        }

        debug!(pending = pending.len(), "Runner::run: all rows read, joining writes");
        let joined = join_all(pending.iter_mut().map(|write| &mut write.handle)).await;
        for (write, result) in pending.iter().zip(joined) {
            if let Err(e) = result {
                error!(sink = %write.sink, id = %write.entity_id, error = %e, "Sink task failed");
                let outcome = WriteOutcome::Failed(format!("sink task failed: {}", e));
                record_outcome(&ctx, &write.sink, write.ordinal, &write.entity_id, &outcome).await;
            }
        }

        for sink in &sinks {
            if let Err(e) = sink.finalize().await {
                error!(sink = %sink.name(), error = %e, "Failed to finalize sink");
            }
        }

        let summary = ctx.summary().await;
        if !summary.is_balanced() {
            error!(?summary, "Sink outcomes do not match the valid row count");
        }
        info!(
            run_id = %summary.run_id,
            processed = summary.processed,
            valid = summary.valid,
            invalid = summary.invalid,
            unreadable = summary.unreadable,
            "Run completed"
        );
        ctx.audit
            .record(AuditEvent::RunCompleted {
                summary: summary.clone(),
            })
            .await;
        Ok(summary)
    }
}

/// Drain the source on a blocking thread into a bounded channel
///
/// The reader stops early once the receiver is dropped.
fn spawn_reader(source: RowSource) -> (mpsc::Receiver<Result<SourceRow, SourceError>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
    let handle = tokio::task::spawn_blocking(move || {
        for item in source {
            if tx.blocking_send(item).is_err() {
                debug!("spawn_reader: receiver dropped, stopping");
                break;
            }
        }
    });
    (rx, handle)
}

fn spawn_write(ctx: &RunContext, sink: Arc<dyn Sink>, ordinal: u64, entity: Arc<ValidatedEntity>) -> PendingWrite {
    let sink_name = sink.name().to_string();
    let entity_id = entity.id.clone();
    let task_ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        let outcome = sink.write(ordinal, &entity).await;
        record_outcome(&task_ctx, sink.name(), ordinal, &entity.id, &outcome).await;
    });
    PendingWrite {
        sink: sink_name,
        ordinal,
        entity_id,
        handle,
    }
}

async fn record_outcome(ctx: &RunContext, sink: &str, ordinal: u64, entity_id: &str, outcome: &WriteOutcome) {
    match outcome {
        WriteOutcome::Failed(reason) => warn!(%sink, ordinal, %entity_id, %reason, "Write failed"),
        _ => debug!(%sink, ordinal, %entity_id, outcome = outcome.label(), "Write completed"),
    }
    ctx.counters.record_outcome(sink, outcome).await;
    ctx.audit
        .record(AuditEvent::WriteCompleted {
            sink: sink.to_string(),
            row: ordinal,
            entity_id: entity_id.to_string(),
            outcome: outcome.label().to_string(),
            reason: outcome.reason().map(String::from),
        })
        .await;
}

/// Sinks for the configured writers
pub fn build_sinks(config: &Config, audit: &AuditHandle) -> Result<Vec<Arc<dyn Sink>>, MapperError> {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
    for writer in &config.writers {
        match writer {
            WriterKind::Orion => {
                let client = OrionClient::from_config(&config.orion).map_err(|e| MapperError::config(e.to_string()))?;
                sinks.push(Arc::new(UpsertWriter::new(
                    writer.to_string(),
                    Arc::new(client),
                    UpsertSettings::from_config(&config.orion),
                    audit.clone(),
                )));
            }
            WriterKind::File => sinks.push(Arc::new(FileSink::from_config(&config.file))),
        }
    }
    Ok(sinks)
}

/// Explicit schema location, else `<schema-folder>/<targetDataModel>.json`
pub fn resolve_schema_location(
    explicit: Option<&str>,
    map: &FieldMap,
    schema_folder: &Path,
) -> Result<String, MapperError> {
    if let Some(location) = explicit.filter(|l| !l.trim().is_empty()) {
        return Ok(location.to_string());
    }
    let Some(name) = &map.target_data_model else {
        return Err(MapperError::config(
            "No target schema: pass --schema or set targetDataModel in the map",
        ));
    };
    let path = schema_folder.join(format!("{}.json", name));
    if !path.exists() {
        return Err(MapperError::config(format!(
            "Unknown data model '{}': {} does not exist",
            name,
            path.display()
        )));
    }
    Ok(path.display().to_string())
}

/// Prepare and run a mapping with its own audit report
///
/// The report goes to `<report-dir>/<run-id>/report.jsonl` unless `report`
/// is false.
pub async fn run_mapping(config: Config, request: &MapRequest, report: bool) -> Result<RunSummary, MapperError> {
    let ctx = RunContext::new(config);
    let (ctx, audit_task) = if report {
        let (handle, task) = spawn_audit_log(&ctx.config.log.report_dir, &ctx.run_id)?;
        info!(run_id = %ctx.run_id, report_dir = %ctx.config.log.report_dir.display(), "Audit report enabled");
        (ctx.with_audit(handle), Some(task))
    } else {
        (ctx, None)
    };

    let result = match Runner::prepare(ctx, request).await {
        Ok(runner) => runner.run().await,
        Err(e) => Err(e),
    };

    if let Some(task) = audit_task {
        if result.is_err() {
            // RunCompleted never came; the task ends once every handle is gone
            debug!("run_mapping: setup failed, waiting for audit log to close");
        }
        if let Err(e) = task.await {
            warn!(error = %e, "Audit log task failed");
        }
    }
    result
}
