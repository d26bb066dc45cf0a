//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, frameworks, and knowledge instances
//! that flow through ingestion and mapping.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a document.
///
/// Transitions are driven solely by the ingestion orchestrator:
///
/// ```text
/// PENDING ──▶ PROCESSING ──▶ NEEDS_REVIEW ──▶ SYNCED (external confirm)
///                 │
///                 └──▶ FAILED ──(manual re-trigger)──▶ PROCESSING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Pending,
    Processing,
    NeedsReview,
    Synced,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Pending => "PENDING",
            DocumentState::Processing => "PROCESSING",
            DocumentState::NeedsReview => "NEEDS_REVIEW",
            DocumentState::Synced => "SYNCED",
            DocumentState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DocumentState::Pending),
            "PROCESSING" => Some(DocumentState::Processing),
            "NEEDS_REVIEW" => Some(DocumentState::NeedsReview),
            "SYNCED" => Some(DocumentState::Synced),
            "FAILED" => Some(DocumentState::Failed),
            _ => None,
        }
    }

    /// Terminal states never re-enter the pipeline without a force flag.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentState::NeedsReview | DocumentState::Synced | DocumentState::Failed
        )
    }
}

impl std::fmt::Display for DocumentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage identifiers, recorded on failure so a re-trigger can
/// diagnose where the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquire,
    Upload,
    Transcribe,
    Classify,
    Embed,
    Persist,
    Deadline,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Acquire => "acquire",
            Stage::Upload => "upload",
            Stage::Transcribe => "transcribe",
            Stage::Classify => "classify",
            Stage::Embed => "embed",
            Stage::Persist => "persist",
            Stage::Deadline => "deadline",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last failure captured on a document, exposed for diagnosis and re-trigger.
#[derive(Debug, Clone)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}

/// One ingestible file and its derived pipeline state.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub state: DocumentState,
    /// Handle returned by the model adapter after registering the bytes.
    /// Set before any transcription/extraction call is attempted.
    pub remote_file_ref: Option<String>,
    /// Raw model output of the transcription stage, stored verbatim.
    pub transcript: Option<String>,
    /// Structured governance/classification object (JSON text). Falls back
    /// to `{"raw_analysis": ...}` when the model returned unparseable JSON.
    pub metadata_json: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub owner_scope: Option<String>,
    pub error: Option<StageError>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields required to create a new document row (state starts at PENDING).
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub owner_scope: Option<String>,
}

/// A named structured schema representing an analytical template
/// (e.g. SWOT, Persona). Read-only to the pipeline.
#[derive(Debug, Clone)]
pub struct KnowledgeFramework {
    pub id: String,
    pub code: String,
    pub name: String,
    pub description: String,
    /// JSON schema of the framework's fields.
    pub schema_json: String,
}

/// One concrete filled-in instance of a framework, possibly fed by
/// multiple source documents over time.
#[derive(Debug, Clone)]
pub struct KnowledgeInstance {
    pub id: String,
    pub framework_id: String,
    pub title: String,
    pub summary: Option<String>,
    /// Object conforming to the framework schema (JSON text).
    pub data_json: String,
    pub completeness: f64,
    pub confidence: f64,
    pub source_document_ids: Vec<String>,
    pub owner_scope: Option<String>,
    /// Optimistic-concurrency version, bumped on every update.
    pub version: i64,
}

/// Result of running the framework mapper for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MappingOutcome {
    /// The document has no transcript yet; nothing to map.
    NotReady,
    /// Mapping ran to completion (possibly selecting zero frameworks).
    Completed(MappingReport),
}

/// Per-framework results of a completed mapping run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingReport {
    /// Instance ids created by CREATE decisions.
    pub created: Vec<String>,
    /// Instance ids extended by MERGE decisions.
    pub merged: Vec<String>,
    /// Frameworks that were selected but could not be mapped.
    pub skipped: Vec<FrameworkSkip>,
}

/// A selected framework that was skipped, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkSkip {
    pub code: String,
    pub reason: String,
}

/// Consolidation decision: extend an existing instance or create a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidationDecision {
    Merge { target_instance_id: String },
    Create,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_strings() {
        for state in [
            DocumentState::Pending,
            DocumentState::Processing,
            DocumentState::NeedsReview,
            DocumentState::Synced,
            DocumentState::Failed,
        ] {
            assert_eq!(DocumentState::parse(state.as_str()), Some(state));
        }
        assert_eq!(DocumentState::parse("bogus"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!DocumentState::Pending.is_terminal());
        assert!(!DocumentState::Processing.is_terminal());
        assert!(DocumentState::NeedsReview.is_terminal());
        assert!(DocumentState::Synced.is_terminal());
        assert!(DocumentState::Failed.is_terminal());
    }
}
