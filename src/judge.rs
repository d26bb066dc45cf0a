//! Consolidation judge.
//!
//! Given a freshly extracted analysis and the existing instances under the
//! same framework, asks the model whether the new analysis is about the
//! same subject as one of them. The judge is deliberately infallible: any
//! model error, parse error, or nonsensical answer falls back to CREATE,
//! because a wrong merge destroys information while a duplicate is merely
//! untidy.

use tracing::{info, warn};

use crate::model::ModelClient;
use crate::models::{ConsolidationDecision, KnowledgeInstance};
use crate::prompts;
use crate::retry::{with_retry, RetryPolicy};
use crate::schema::{self, JudgeVerdict};

pub async fn decide(
    model: &dyn ModelClient,
    policy: &RetryPolicy,
    framework_name: &str,
    new_title: &str,
    filename: &str,
    candidates: &[KnowledgeInstance],
) -> ConsolidationDecision {
    if candidates.is_empty() {
        return ConsolidationDecision::Create;
    }

    let candidate_list = candidates
        .iter()
        .map(|c| format!("- ID: {}, Title: \"{}\"", c.id, c.title))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt =
        prompts::render_consolidation(framework_name, new_title, filename, &candidate_list);

    let raw = match with_retry(policy, || model.generate_text(&prompt, None)).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "consolidation judge unavailable, creating new instance");
            return ConsolidationDecision::Create;
        }
    };

    let verdict: JudgeVerdict = match schema::parse_model_json(&raw) {
        Ok(verdict) => verdict,
        Err(err) => {
            warn!(error = %err, "consolidation judge returned invalid JSON, creating new instance");
            return ConsolidationDecision::Create;
        }
    };

    if verdict.action == "MERGE" {
        if let Some(target_id) = verdict.target_instance_id {
            // The target must be one of the offered candidates; anything
            // else is a hallucinated ID.
            if candidates.iter().any(|c| c.id == target_id) {
                info!(target = %target_id, reason = %verdict.reasoning, "judge chose merge");
                return ConsolidationDecision::Merge {
                    target_instance_id: target_id,
                };
            }
            warn!(target = %target_id, "judge named an unknown instance, creating new instance");
            return ConsolidationDecision::Create;
        }
    }

    info!(reason = %verdict.reasoning, "judge chose create");
    ConsolidationDecision::Create
}
