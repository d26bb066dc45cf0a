//! Ingestion orchestrator.
//!
//! Drives one document through the pipeline: acquire bytes from blob
//! storage, register them with the model, transcribe to Markdown, extract
//! governance metadata, embed, then persist everything in a single
//! finalizing update that lands the document in NEEDS_REVIEW.
//!
//! Failure semantics differ per stage:
//! - acquire/upload/transcribe failures are fatal for the run; the document
//!   transitions to FAILED with the stage and message recorded;
//! - a metadata answer that is not valid JSON degrades to a raw-text
//!   payload instead of failing;
//! - embedding failure is non-blocking and leaves the embedding NULL;
//! - the whole run is bounded by a wall-clock deadline.
//!
//! A run never partially publishes: the transcript is only visible once the
//! finalizing update commits. The remote file handle is the one exception,
//! persisted right after upload so an interrupted run can resume without
//! re-acquiring or re-uploading.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::blob::BlobStore;
use crate::config::Config;
use crate::model::{ModelClient, RemoteRef};
use crate::models::{Document, DocumentState, Stage};
use crate::prompts;
use crate::retry::with_retry;
use crate::schema::{self, DocumentMetadata};
use crate::store::RecordStore;

/// Shared handles for the pipeline, cheap to clone behind `Arc`.
pub struct PipelineContext {
    pub config: Config,
    pub store: RecordStore,
    pub blob: Arc<dyn BlobStore>,
    pub model: Arc<dyn ModelClient>,
}

/// A stage that failed and should mark the document FAILED.
struct StageFailure {
    stage: Stage,
    message: String,
}

impl StageFailure {
    fn new(stage: Stage, err: impl std::fmt::Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
        }
    }
}

/// Everything a successful run writes back in the finalizing update.
struct StageOutput {
    transcript: String,
    metadata_json: Option<String>,
    embedding: Option<Vec<f32>>,
    tags: Vec<(String, String)>,
}

/// Run the full pipeline for one document. Returns the document's terminal
/// state for this run (`NeedsReview` on success, `Failed` otherwise); an
/// `Err` means the run could not start or could not record its outcome.
pub async fn ingest_document(
    ctx: &PipelineContext,
    id: &str,
    force: bool,
) -> Result<DocumentState> {
    let Some(doc) = ctx.store.get_document(id).await? else {
        bail!("document not found: {id}");
    };

    // Idempotent entry: a document already in a terminal state is returned
    // as-is, with zero side effects. Force is the explicit re-trigger.
    if doc.state.is_terminal() && !force {
        info!(document = %id, state = %doc.state, "already terminal, nothing to do");
        return Ok(doc.state);
    }

    if !ctx.store.claim_for_processing(id, force).await? {
        bail!("document {id} already has a pipeline run in progress");
    }
    info!(document = %id, filename = %doc.filename, "processing lease acquired");

    let deadline = std::time::Duration::from_secs(ctx.config.pipeline.deadline_secs);
    let outcome = match tokio::time::timeout(deadline, run_stages(ctx, &doc)).await {
        Ok(result) => result,
        Err(_) => Err(StageFailure::new(
            Stage::Deadline,
            format!("pipeline deadline of {}s exceeded", deadline.as_secs()),
        )),
    };

    match outcome {
        Ok(output) => {
            if let Err(err) = ctx
                .store
                .finalize_ingestion(
                    id,
                    &output.transcript,
                    output.metadata_json.as_deref(),
                    output.embedding.as_deref(),
                    &output.tags,
                )
                .await
            {
                warn!(document = %id, error = %err, "finalizing update failed");
                ctx.store
                    .set_failed(id, Stage::Persist, &err.to_string())
                    .await
                    .context("recording persist failure")?;
                return Ok(DocumentState::Failed);
            }
            info!(document = %id, "ingestion complete, awaiting review");
            Ok(DocumentState::NeedsReview)
        }
        Err(failure) => {
            warn!(
                document = %id,
                stage = failure.stage.as_str(),
                error = %failure.message,
                "ingestion failed"
            );
            ctx.store
                .set_failed(id, failure.stage, &failure.message)
                .await
                .context("recording ingestion failure")?;
            Ok(DocumentState::Failed)
        }
    }
}

async fn run_stages(ctx: &PipelineContext, doc: &Document) -> Result<StageOutput, StageFailure> {
    let policy = ctx.config.model.retry_policy();

    // Acquire and upload are skipped when a previous run already registered
    // the bytes with the model.
    let remote = match &doc.remote_file_ref {
        Some(uri) => {
            info!(document = %doc.id, "reusing remote file handle");
            RemoteRef::new(uri.clone())
        }
        None => {
            let bytes = ctx
                .blob
                .get(&doc.storage_key)
                .await
                .map_err(|e| StageFailure::new(Stage::Acquire, e))?;
            info!(document = %doc.id, size = bytes.len(), "acquired bytes from blob store");

            let remote = with_retry(&policy, || {
                ctx.model
                    .upload_file(&bytes, &doc.mime_type, &doc.filename)
            })
            .await
            .map_err(|e| StageFailure::new(Stage::Upload, e))?;

            ctx.store
                .set_remote_ref(&doc.id, &remote.uri)
                .await
                .map_err(|e| StageFailure::new(Stage::Upload, e))?;

            // The remote side needs a moment before the file is queryable.
            tokio::time::sleep(ctx.config.model.settling_delay()).await;
            remote
        }
    };

    info!(document = %doc.id, "transcribing");
    let transcript = with_retry(&policy, || {
        ctx.model.generate_text(
            prompts::TRANSCRIPTION_PROMPT,
            Some((&remote, doc.mime_type.as_str())),
        )
    })
    .await
    .map_err(|e| StageFailure::new(Stage::Transcribe, e))?;

    info!(document = %doc.id, "extracting metadata");
    let categories = ctx
        .store
        .list_categories()
        .await
        .map_err(|e| StageFailure::new(Stage::Classify, e))?;
    let metadata_prompt = prompts::render_metadata(&categories);

    let raw_metadata = with_retry(&policy, || {
        ctx.model
            .generate_text(&metadata_prompt, Some((&remote, doc.mime_type.as_str())))
    })
    .await
    .map_err(|e| StageFailure::new(Stage::Classify, e))?;

    // A malformed metadata answer is kept verbatim rather than discarded:
    // the transcript is still valuable and a reviewer can classify by hand.
    let (metadata_json, tags) = match schema::parse_model_json::<DocumentMetadata>(&raw_metadata) {
        Ok(metadata) => {
            let tags: Vec<(String, String)> = metadata
                .tags
                .iter()
                .map(|t| ("topic".to_string(), t.clone()))
                .collect();
            let json = serde_json::json!({
                "suggested_filename": metadata.suggested_filename,
                "title": metadata.title,
                "summary": metadata.summary,
                "tags": metadata.tags,
                "topics": metadata.topics,
                "document_type": metadata.document_type,
                "department_suggestion": metadata.department_suggestion,
                "category_suggestion": metadata.category_suggestion,
            });
            (Some(json.to_string()), tags)
        }
        Err(err) => {
            warn!(document = %doc.id, error = %err, "metadata was not valid JSON, keeping raw text");
            let fallback =
                serde_json::json!({ "raw_analysis": schema::strip_code_fences(&raw_metadata) });
            (Some(fallback.to_string()), Vec::new())
        }
    };

    info!(document = %doc.id, "embedding transcript");
    let embed_input = clip_chars(&transcript, ctx.config.model.embed_input_chars);
    let embedding = match with_retry(&policy, || ctx.model.embed(&embed_input)).await {
        Ok(vector) => Some(vector),
        Err(err) => {
            // Semantic search degrades; review and mapping do not.
            warn!(document = %doc.id, error = %err, "embedding failed, continuing without");
            None
        }
    };

    Ok(StageOutput {
        transcript,
        metadata_json,
        embedding,
        tags,
    })
}

/// Prefix of `s` bounded by character count, safe on multibyte input.
pub fn clip_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
