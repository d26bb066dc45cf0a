//! Batch runner: bounded-concurrency ingestion of all pending documents,
//! with mapping decoupled onto a follow-up queue.
//!
//! Each document that reaches NEEDS_REVIEW is enqueued for mapping; a
//! single worker drains the queue so mapping failures and instance-merge
//! contention never affect ingestion throughput or document state.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::ingest::{self, PipelineContext};
use crate::mapper;
use crate::models::{DocumentState, MappingOutcome};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Documents that reached NEEDS_REVIEW this run.
    pub ingested: usize,
    /// Documents that failed or could not be claimed.
    pub failed: usize,
    pub instances_created: usize,
    pub instances_merged: usize,
    /// Framework mappings that were skipped or errored.
    pub mapping_failures: usize,
}

/// Ingest every PENDING document (and, with `force`, every FAILED one),
/// mapping each success as it lands.
pub async fn run_pending(ctx: Arc<PipelineContext>, force: bool) -> Result<RunSummary> {
    let mut ids = ctx.store.documents_in_state(DocumentState::Pending).await?;
    if force {
        ids.extend(ctx.store.documents_in_state(DocumentState::Failed).await?);
    }
    if ids.is_empty() {
        info!("nothing to ingest");
        return Ok(RunSummary::default());
    }
    info!(count = ids.len(), "starting batch ingestion");

    let (map_tx, mut map_rx) = mpsc::unbounded_channel::<String>();

    let mapper_ctx = ctx.clone();
    let mapper_task = tokio::spawn(async move {
        let mut created = 0usize;
        let mut merged = 0usize;
        let mut failures = 0usize;
        while let Some(id) = map_rx.recv().await {
            match mapper::map_document(&mapper_ctx, &id).await {
                Ok(MappingOutcome::Completed(report)) => {
                    created += report.created.len();
                    merged += report.merged.len();
                    failures += report.skipped.len();
                }
                Ok(MappingOutcome::NotReady) => {}
                Err(err) => {
                    warn!(document = %id, error = %err, "mapping failed");
                    failures += 1;
                }
            }
        }
        (created, merged, failures)
    });

    let semaphore = Arc::new(Semaphore::new(ctx.config.pipeline.max_concurrent));
    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
        let ctx = ctx.clone();
        let map_tx = map_tx.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return false;
            };
            match ingest::ingest_document(&ctx, &id, force).await {
                Ok(DocumentState::NeedsReview) => {
                    // Mapping queue receiver outlives all senders, so a send
                    // only fails if the worker panicked.
                    let _ = map_tx.send(id);
                    true
                }
                Ok(state) => {
                    warn!(document = %id, state = %state, "document did not reach review");
                    false
                }
                Err(err) => {
                    warn!(document = %id, error = %err, "ingestion error");
                    false
                }
            }
        }));
    }
    drop(map_tx);

    let mut summary = RunSummary::default();
    for handle in handles {
        match handle.await {
            Ok(true) => summary.ingested += 1,
            Ok(false) => summary.failed += 1,
            Err(err) => {
                warn!(error = %err, "ingestion task panicked");
                summary.failed += 1;
            }
        }
    }

    let (created, merged, failures) = mapper_task.await?;
    summary.instances_created = created;
    summary.instances_merged = merged;
    summary.mapping_failures = failures;

    info!(
        ingested = summary.ingested,
        failed = summary.failed,
        created = summary.instances_created,
        merged = summary.instances_merged,
        "batch run complete"
    );
    Ok(summary)
}
