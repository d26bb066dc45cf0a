//! Parsing of model JSON outputs.
//!
//! Models are instructed to return bare JSON but routinely wrap it in
//! Markdown code fences; [`strip_code_fences`] undoes that before parsing.
//! The structs here mirror the shapes requested by [`crate::prompts`] and
//! are deliberately lenient: missing optional fields default rather than
//! fail, since a partially useful answer beats a rejected one.

use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
#[error("model returned invalid JSON: {reason} (in: {snippet})")]
pub struct ParseError {
    pub reason: String,
    pub snippet: String,
}

/// Remove Markdown code fences the model may have wrapped around JSON.
pub fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Strip fences and deserialize into `T`.
pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(&cleaned).map_err(|e| ParseError {
        reason: e.to_string(),
        snippet: cleaned.chars().take(200).collect(),
    })
}

/// Classification and governance metadata for one document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub suggested_filename: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub department_suggestion: Option<String>,
    #[serde(default)]
    pub category_suggestion: Option<String>,
}

/// One framework picked by the selection prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameworkSelection {
    pub code: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Raw selection answer. Older model behavior sometimes returns a single
/// `selected_framework_code` instead of the array; `into_selections`
/// normalizes both shapes.
#[derive(Debug, Default, Deserialize)]
pub struct SelectionResult {
    #[serde(default)]
    pub selected_frameworks: Vec<FrameworkSelection>,
    #[serde(default)]
    pub selected_framework_code: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl SelectionResult {
    pub fn into_selections(self) -> Vec<FrameworkSelection> {
        if !self.selected_frameworks.is_empty() {
            return self.selected_frameworks;
        }
        if let Some(code) = self.selected_framework_code {
            return vec![FrameworkSelection {
                code,
                confidence: self.confidence.unwrap_or(0.8),
                reasoning: self.reasoning.unwrap_or_default(),
            }];
        }
        Vec::new()
    }
}

/// Filled-in framework returned by the extraction prompt. `ai_summary` is
/// accepted as an alias for `summary`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "ai_summary")]
    pub summary: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub completeness: f64,
    #[serde(default)]
    pub confidence: f64,
}

/// Consolidation judge answer.
#[derive(Debug, Deserialize)]
pub struct JudgeVerdict {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub target_instance_id: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}
