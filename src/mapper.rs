//! Framework mapper.
//!
//! Maps one transcribed document onto the registered analytical frameworks
//! in three model-driven steps:
//!
//! 1. selection: which frameworks fit this document (confidence-gated);
//! 2. extraction: fill each selected framework's schema from the content;
//! 3. consolidation: per extraction, the judge decides whether to merge
//!    into an existing instance or create a new one.
//!
//! Mapping never mutates document state. A failure in one framework is
//! isolated: it is reported in the outcome and the remaining frameworks
//! still run. Instance updates are optimistic; on a version conflict the
//! merge is retried once against the refreshed instance.

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::ingest::{clip_chars, PipelineContext};
use crate::judge;
use crate::models::{
    ConsolidationDecision, FrameworkSkip, KnowledgeFramework, KnowledgeInstance, MappingOutcome,
    MappingReport,
};
use crate::prompts;
use crate::retry::with_retry;
use crate::schema::{self, ExtractionResult, SelectionResult};

/// Map a document to zero or more knowledge instances.
pub async fn map_document(ctx: &PipelineContext, id: &str) -> Result<MappingOutcome> {
    let Some(doc) = ctx.store.get_document(id).await? else {
        bail!("document not found: {id}");
    };

    let Some(transcript) = &doc.transcript else {
        info!(document = %id, "document has no transcript yet, skipping mapping");
        return Ok(MappingOutcome::NotReady);
    };

    let frameworks = ctx.store.list_frameworks().await?;
    if frameworks.is_empty() {
        bail!("no knowledge frameworks registered");
    }

    let content = clip_chars(transcript, ctx.config.mapping.transcript_prefix_chars);
    let policy = ctx.config.model.retry_policy();

    // Selection step.
    let framework_list = frameworks
        .iter()
        .map(|f| format!("- {} ({}): {}", f.name, f.code, f.description))
        .collect::<Vec<_>>()
        .join("\n");
    let selection_prompt = prompts::render_selection(&framework_list, &content);

    let raw_selection = with_retry(&policy, || {
        ctx.model.generate_text(&selection_prompt, None)
    })
    .await?;
    let selection: SelectionResult = schema::parse_model_json(&raw_selection)?;

    let threshold = ctx.config.mapping.confidence_threshold;
    let mut selections: Vec<_> = selection
        .into_selections()
        .into_iter()
        .filter(|s| s.confidence >= threshold)
        .collect();
    selections.truncate(ctx.config.mapping.max_selections);

    if selections.is_empty() {
        info!(document = %id, "no frameworks met the confidence threshold");
        return Ok(MappingOutcome::Completed(MappingReport::default()));
    }
    info!(
        document = %id,
        codes = ?selections.iter().map(|s| s.code.as_str()).collect::<Vec<_>>(),
        "frameworks selected"
    );

    let mut report = MappingReport::default();

    for selection in selections {
        let code = resolve_code(&selection.code);
        let Some(framework) = frameworks.iter().find(|f| f.code.to_lowercase() == code) else {
            warn!(document = %id, code = %selection.code, "selection named an unknown framework");
            report.skipped.push(FrameworkSkip {
                code: selection.code.clone(),
                reason: "unknown framework code".to_string(),
            });
            continue;
        };

        match map_to_framework(ctx, &doc.id, &doc.filename, doc.owner_scope.as_deref(), framework, &content)
            .await
        {
            Ok(MappedInstance::Created(instance_id)) => report.created.push(instance_id),
            Ok(MappedInstance::Merged(instance_id)) => report.merged.push(instance_id),
            Err(err) => {
                warn!(
                    document = %id,
                    framework = %framework.code,
                    error = %err,
                    "framework mapping failed"
                );
                report.skipped.push(FrameworkSkip {
                    code: framework.code.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(MappingOutcome::Completed(report))
}

enum MappedInstance {
    Created(String),
    Merged(String),
}

/// Extraction plus consolidation for a single framework.
async fn map_to_framework(
    ctx: &PipelineContext,
    document_id: &str,
    filename: &str,
    owner_scope: Option<&str>,
    framework: &KnowledgeFramework,
    content: &str,
) -> Result<MappedInstance> {
    let policy = ctx.config.model.retry_policy();

    info!(framework = %framework.code, "extracting structured data");
    let extraction_prompt =
        prompts::render_extraction(&framework.name, &framework.schema_json, content);
    let raw = with_retry(&policy, || ctx.model.generate_text(&extraction_prompt, None)).await?;
    let extraction: ExtractionResult = schema::parse_model_json(&raw)?;

    let data = filter_to_schema(&extraction.data, &framework.schema_json);
    let title = extraction
        .title
        .clone()
        .unwrap_or_else(|| format!("{} of {}", framework.name, filename));

    // Re-processing shortcut: an instance that already cites this document
    // is updated in place, no judge needed.
    let target = match ctx
        .store
        .instance_containing_document(&framework.id, document_id)
        .await?
    {
        Some(existing) => Some(existing),
        None => {
            let candidates = ctx
                .store
                .candidate_instances(
                    &framework.id,
                    owner_scope,
                    ctx.config.mapping.candidate_limit,
                )
                .await?;
            match judge::decide(
                ctx.model.as_ref(),
                &policy,
                &framework.name,
                &title,
                filename,
                &candidates,
            )
            .await
            {
                ConsolidationDecision::Merge { target_instance_id } => {
                    candidates.into_iter().find(|c| c.id == target_instance_id)
                }
                ConsolidationDecision::Create => None,
            }
        }
    };

    match target {
        Some(existing) => {
            let instance_id = existing.id.clone();
            if !merge_into(ctx, &existing, document_id, &title, &extraction, &data).await? {
                // One retry against the refreshed instance; a second
                // conflict means the instance is hot and this document
                // should be re-mapped later.
                let Some(refreshed) = ctx.store.get_instance(&instance_id).await? else {
                    bail!("merge target disappeared: {instance_id}");
                };
                if !merge_into(ctx, &refreshed, document_id, &title, &extraction, &data).await? {
                    bail!("concurrent update conflict on instance {instance_id}");
                }
            }
            Ok(MappedInstance::Merged(instance_id))
        }
        None => {
            let instance_id = ctx
                .store
                .create_instance(
                    &framework.id,
                    &title,
                    extraction.summary.as_deref(),
                    &serde_json::Value::Object(data).to_string(),
                    extraction.completeness,
                    extraction.confidence,
                    &[document_id.to_string()],
                    owner_scope,
                )
                .await?;
            info!(framework = %framework.code, instance = %instance_id, "instance created");
            Ok(MappedInstance::Created(instance_id))
        }
    }
}

/// One optimistic merge attempt. Returns false on a version conflict.
async fn merge_into(
    ctx: &PipelineContext,
    existing: &KnowledgeInstance,
    document_id: &str,
    title: &str,
    extraction: &ExtractionResult,
    new_data: &serde_json::Map<String, serde_json::Value>,
) -> Result<bool> {
    let old_data: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&existing.data_json).unwrap_or_default();
    let merged = merge_last_write_wins(&old_data, new_data);

    let mut sources = existing.source_document_ids.clone();
    if !sources.iter().any(|s| s == document_id) {
        sources.push(document_id.to_string());
    }

    let updated = ctx
        .store
        .update_instance(
            &existing.id,
            existing.version,
            title,
            extraction.summary.as_deref().or(existing.summary.as_deref()),
            &serde_json::Value::Object(merged).to_string(),
            extraction.completeness,
            extraction.confidence,
            &sources,
        )
        .await?;
    if updated {
        info!(instance = %existing.id, "instance merged");
    }
    Ok(updated)
}

/// Field-level merge: new non-null values win, old values survive where the
/// new extraction has nothing to say.
pub fn merge_last_write_wins(
    old: &serde_json::Map<String, serde_json::Value>,
    new: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut merged = old.clone();
    for (key, value) in new {
        if !value.is_null() {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Drop extracted keys the framework schema does not define. An empty or
/// non-object schema places no restriction.
pub fn filter_to_schema(
    data: &serde_json::Map<String, serde_json::Value>,
    schema_json: &str,
) -> serde_json::Map<String, serde_json::Value> {
    let schema: serde_json::Value = match serde_json::from_str(schema_json) {
        Ok(value) => value,
        Err(_) => return data.clone(),
    };
    let Some(allowed) = schema.as_object() else {
        return data.clone();
    };
    if allowed.is_empty() {
        return data.clone();
    }
    data.iter()
        .filter(|(key, _)| allowed.contains_key(*key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Normalize a framework code, resolving legacy aliases the model still
/// occasionally emits.
pub fn resolve_code(code: &str) -> String {
    let lower = code.to_lowercase();
    match lower.as_str() {
        "marketing_strategy" => "swot",
        "external_environment" | "pest" => "pestle",
        "customer_persona" | "user_profile" | "audience_analysis" => "persona",
        "customer_journey" | "cj" | "cjm" => "customer_experience_map",
        other => other,
    }
    .to_string()
}
