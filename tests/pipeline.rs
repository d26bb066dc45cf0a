//! Integration tests for the ingestion orchestrator: stage ordering,
//! failure capture, degradation policies, and crash resume, all against an
//! in-memory database with mock adapters.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{test_context, MockBlob, MockModel};
use galaxy_ingest::ingest::{self, PipelineContext};
use galaxy_ingest::models::{DocumentState, NewDocument};

const KEY: &str = "documents/x/plan.pdf";

fn new_doc() -> NewDocument {
    NewDocument {
        filename: "plan.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        size_bytes: 4,
        storage_key: KEY.to_string(),
        owner_scope: None,
    }
}

async fn registered(ctx: &PipelineContext) -> String {
    ctx.store.create_document(&new_doc()).await.unwrap()
}

#[tokio::test]
async fn happy_path_reaches_needs_review() {
    let blob = MockBlob::with_object(KEY, b"%PDF");
    let model = Arc::new(MockModel::default());
    let ctx = test_context(blob.clone(), model.clone()).await;
    let id = registered(&ctx).await;

    let state = ingest::ingest_document(&ctx, &id, false).await.unwrap();
    assert_eq!(state, DocumentState::NeedsReview);

    let doc = ctx.store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.state, DocumentState::NeedsReview);
    assert_eq!(doc.transcript.as_deref(), Some(model.transcript.as_str()));
    assert!(doc.remote_file_ref.is_some());
    assert!(doc.embedding.is_some());
    assert!(doc.error.is_none());

    let metadata: serde_json::Value =
        serde_json::from_str(doc.metadata_json.as_deref().unwrap()).unwrap();
    assert_eq!(metadata["title"], "Mock Document");

    // One topic tag per metadata tag entry.
    let tags = ctx.store.document_tags(&id).await.unwrap();
    assert_eq!(
        tags,
        vec![
            ("topic".to_string(), "q3".to_string()),
            ("topic".to_string(), "strategy".to_string()),
        ]
    );

    assert_eq!(blob.get_calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.upload_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        model.uploaded.lock().unwrap().front(),
        Some(&("plan.pdf".to_string(), "application/pdf".to_string()))
    );
    // Transcription + metadata, no retries needed.
    assert_eq!(model.generate_calls.load(Ordering::SeqCst), 2);
    assert_eq!(model.embed_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reingestion_of_terminal_document_is_idempotent() {
    let blob = MockBlob::with_object(KEY, b"%PDF");
    let model = Arc::new(MockModel::default());
    let ctx = test_context(blob.clone(), model.clone()).await;
    let id = registered(&ctx).await;

    let first = ingest::ingest_document(&ctx, &id, false).await.unwrap();
    let calls_after_first = model.generate_calls.load(Ordering::SeqCst);

    // Second run without force returns the same state with zero extra
    // adapter calls.
    let second = ingest::ingest_document(&ctx, &id, false).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(model.generate_calls.load(Ordering::SeqCst), calls_after_first);
    assert_eq!(model.upload_calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.embed_calls.load(Ordering::SeqCst), 1);
    assert_eq!(blob.get_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_run_is_rejected() {
    let blob = MockBlob::with_object(KEY, b"%PDF");
    let model = Arc::new(MockModel::default());
    let ctx = test_context(blob, model.clone()).await;
    let id = registered(&ctx).await;

    // Another run holds the lease.
    assert!(ctx.store.claim_for_processing(&id, false).await.unwrap());

    let err = ingest::ingest_document(&ctx, &id, false).await.unwrap_err();
    assert!(err.to_string().contains("in progress"));
    assert_eq!(model.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_blob_fails_at_acquire() {
    let blob = MockBlob::empty();
    let model = Arc::new(MockModel::default());
    let ctx = test_context(blob, model.clone()).await;
    let id = registered(&ctx).await;

    let state = ingest::ingest_document(&ctx, &id, false).await.unwrap();
    assert_eq!(state, DocumentState::Failed);

    let doc = ctx.store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.state, DocumentState::Failed);
    let error = doc.error.unwrap();
    assert_eq!(error.stage, "acquire");
    assert!(error.message.contains(KEY));
    // Nothing reached the model.
    assert_eq!(model.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_transcription_failures_are_retried() {
    let blob = MockBlob::with_object(KEY, b"%PDF");
    let model = Arc::new(MockModel {
        transcribe_failures: AtomicUsize::new(2),
        ..MockModel::default()
    });
    let ctx = test_context(blob, model.clone()).await;
    let id = registered(&ctx).await;

    let state = ingest::ingest_document(&ctx, &id, false).await.unwrap();
    assert_eq!(state, DocumentState::NeedsReview);
    // Two failures plus the success.
    assert_eq!(model.transcribe_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_exhaustion_marks_document_failed() {
    let blob = MockBlob::with_object(KEY, b"%PDF");
    let model = Arc::new(MockModel {
        transcribe_failures: AtomicUsize::new(100),
        ..MockModel::default()
    });
    let ctx = test_context(blob, model.clone()).await;
    let max_attempts = ctx.config.model.max_attempts as usize;
    let id = registered(&ctx).await;

    let state = ingest::ingest_document(&ctx, &id, false).await.unwrap();
    assert_eq!(state, DocumentState::Failed);

    let doc = ctx.store.get_document(&id).await.unwrap().unwrap();
    let error = doc.error.unwrap();
    assert_eq!(error.stage, "transcribe");
    assert_eq!(model.transcribe_calls.load(Ordering::SeqCst), max_attempts);
    // Transcript never becomes visible on a failed run.
    assert!(doc.transcript.is_none());
}

#[tokio::test]
async fn unparseable_metadata_degrades_to_raw_analysis() {
    let blob = MockBlob::with_object(KEY, b"%PDF");
    let model = Arc::new(MockModel {
        metadata: "Sorry, I cannot produce JSON today.".to_string(),
        ..MockModel::default()
    });
    let ctx = test_context(blob, model).await;
    let id = registered(&ctx).await;

    let state = ingest::ingest_document(&ctx, &id, false).await.unwrap();
    assert_eq!(state, DocumentState::NeedsReview);

    let doc = ctx.store.get_document(&id).await.unwrap().unwrap();
    let metadata: serde_json::Value =
        serde_json::from_str(doc.metadata_json.as_deref().unwrap()).unwrap();
    assert_eq!(
        metadata["raw_analysis"],
        "Sorry, I cannot produce JSON today."
    );
    // No tags can be derived from unparseable metadata.
    assert!(ctx.store.document_tags(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn embedding_failure_is_non_blocking() {
    let blob = MockBlob::with_object(KEY, b"%PDF");
    let model = Arc::new(MockModel {
        embed_fails: true,
        ..MockModel::default()
    });
    let ctx = test_context(blob, model.clone()).await;
    let max_attempts = ctx.config.model.max_attempts as usize;
    let id = registered(&ctx).await;

    let state = ingest::ingest_document(&ctx, &id, false).await.unwrap();
    assert_eq!(state, DocumentState::NeedsReview);

    let doc = ctx.store.get_document(&id).await.unwrap().unwrap();
    assert!(doc.embedding.is_none());
    assert!(doc.transcript.is_some());
    // Embedding gets its own retry budget before giving up.
    assert_eq!(model.embed_calls.load(Ordering::SeqCst), max_attempts);
}

#[tokio::test]
async fn embedding_input_is_truncated_to_char_budget() {
    let blob = MockBlob::with_object(KEY, b"%PDF");
    let model = Arc::new(MockModel {
        transcript: "x".repeat(10_000),
        ..MockModel::default()
    });
    let mut ctx = test_context(blob, model.clone()).await;
    ctx.config.model.embed_input_chars = 100;
    let id = registered(&ctx).await;

    ingest::ingest_document(&ctx, &id, false).await.unwrap();

    let inputs = model.embed_inputs.lock().unwrap();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].chars().count(), 100);
}

#[tokio::test]
async fn resume_with_remote_ref_skips_acquire_and_upload() {
    let blob = MockBlob::empty();
    let model = Arc::new(MockModel::default());
    let ctx = test_context(blob.clone(), model.clone()).await;
    let id = registered(&ctx).await;

    // Simulate a run that crashed after upload: lease held, remote ref set.
    assert!(ctx.store.claim_for_processing(&id, false).await.unwrap());
    ctx.store
        .set_remote_ref(&id, "https://model.test/v1beta/files/previous")
        .await
        .unwrap();

    let state = ingest::ingest_document(&ctx, &id, true).await.unwrap();
    assert_eq!(state, DocumentState::NeedsReview);

    // The blob store was never touched and no second upload happened.
    assert_eq!(blob.get_calls.load(Ordering::SeqCst), 0);
    assert_eq!(model.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn batch_run_ingests_and_maps_pending_documents() {
    let blob = MockBlob::empty();
    blob.objects
        .lock()
        .unwrap()
        .insert("documents/a".to_string(), b"%PDF".to_vec());
    blob.objects
        .lock()
        .unwrap()
        .insert("documents/b".to_string(), b"%PDF".to_vec());

    let model = Arc::new(MockModel {
        selection: serde_json::json!({
            "selected_frameworks": [{"code": "swot", "confidence": 0.9, "reasoning": "fits"}]
        })
        .to_string(),
        ..MockModel::default()
    });
    let ctx = Arc::new(test_context(blob, model).await);

    ctx.store
        .create_framework("swot", "SWOT Analysis", "strategy snapshot", "{}")
        .await
        .unwrap();
    for key in ["documents/a", "documents/b", "documents/missing"] {
        ctx.store
            .create_document(&NewDocument {
                filename: "doc.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                size_bytes: 4,
                storage_key: key.to_string(),
                owner_scope: None,
            })
            .await
            .unwrap();
    }

    let summary = galaxy_ingest::runner::run_pending(ctx.clone(), false)
        .await
        .unwrap();
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.failed, 1);
    // Both ingested documents mapped onto the SWOT framework.
    assert_eq!(
        summary.instances_created + summary.instances_merged,
        2,
        "every successful document produced a mapping"
    );
    assert_eq!(summary.mapping_failures, 0);

    // No document is left holding the processing lease.
    assert!(ctx
        .store
        .documents_in_state(DocumentState::Processing)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn deadline_overrun_fails_the_run() {
    let blob = MockBlob::with_object(KEY, b"%PDF");
    let model = Arc::new(MockModel::default());
    let mut ctx = test_context(blob, model).await;
    // Settling sleep alone blows the budget.
    ctx.config.model.settling_delay_secs = 2;
    ctx.config.pipeline.deadline_secs = 1;
    let id = registered(&ctx).await;

    let state = ingest::ingest_document(&ctx, &id, false).await.unwrap();
    assert_eq!(state, DocumentState::Failed);

    let doc = ctx.store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.error.unwrap().stage, "deadline");
}
