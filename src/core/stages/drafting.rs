//! Drafting stage: plan a draft from the profile and render it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::core::error::StageError;
use crate::core::limits::PipelineLimits;
use crate::core::stages::{require_profile, StageHandler, StageOutcome};
use crate::domain::{RunState, Stage, StageUpdate};
use crate::services::{
    call_with_retry, request_key, ContentService, KnowledgeService, RetryPolicy, RevisionNotes,
};

pub struct DraftingHandler {
    content: Arc<dyn ContentService>,
    knowledge: Arc<dyn KnowledgeService>,
    limits: PipelineLimits,
    retry: RetryPolicy,
}

impl DraftingHandler {
    pub fn new(
        content: Arc<dyn ContentService>,
        knowledge: Arc<dyn KnowledgeService>,
        limits: PipelineLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            content,
            knowledge,
            limits,
            retry,
        }
    }
}

/// Derive the knowledge query from the profile: target role plus skills,
/// falling back to the summary, then to the whole profile.
fn knowledge_query(profile: &Value) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(role) = profile.get("target_role").and_then(Value::as_str) {
        parts.push(role.to_string());
    }
    if let Some(skills) = profile.get("skills").and_then(Value::as_array) {
        parts.extend(skills.iter().filter_map(Value::as_str).map(str::to_string));
    }
    if parts.is_empty() {
        if let Some(summary) = profile.get("summary").and_then(Value::as_str) {
            parts.push(summary.to_string());
        }
    }
    if parts.is_empty() {
        return profile.to_string();
    }
    parts.join(" ")
}

/// Previous critique issues, if this is a revision pass.
fn revision_notes(state: &RunState) -> Option<RevisionNotes> {
    if state.flags.revision_count == 0 {
        return None;
    }
    let issues = state
        .artifact("critique_notes")
        .and_then(|notes| notes.get("issues"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(RevisionNotes {
        attempt: state.flags.revision_count,
        issues,
    })
}

#[async_trait]
impl StageHandler for DraftingHandler {
    fn stage(&self) -> Stage {
        Stage::Drafting
    }

    async fn execute(&self, state: &RunState) -> Result<StageOutcome, StageError> {
        let profile = require_profile(state)?;

        let query = knowledge_query(profile);
        let search_key = request_key(&state.id, Stage::Drafting, &query);
        let hits = call_with_retry(
            "knowledge",
            "similarity_search",
            &search_key,
            &self.retry,
            self.limits.call_timeout(),
            || async {
                self.knowledge
                    .similarity_search(&query, self.limits.knowledge_top_k)
                    .await
            },
        )
        .await?;

        let revision = revision_notes(state);
        let plan = call_with_retry(
            "content",
            "plan_draft",
            &search_key,
            &self.retry,
            self.limits.call_timeout(),
            || async {
                self.content
                    .plan_draft(profile, &hits, revision.as_ref())
                    .await
            },
        )
        .await?;

        let plan_payload = serde_json::to_string(&plan).unwrap_or_default();
        let render_key = request_key(&state.id, Stage::Drafting, &plan_payload);
        let text = call_with_retry(
            "content",
            "render_draft",
            &render_key,
            &self.retry,
            self.limits.call_timeout(),
            || async { self.content.render_draft(&plan, profile, &hits).await },
        )
        .await?;

        self.limits.validate_draft(&text)?;

        let drafts = state.metric("drafts") + 1;
        info!(
            drafts,
            revision = state.flags.revision_count,
            hits = hits.len(),
            "draft rendered"
        );

        let next = if state.flags.skip_critique {
            Stage::Compliance
        } else {
            Stage::Critique
        };

        Ok(StageOutcome::Advance(
            StageUpdate::advance_to(next)
                .with_artifact("draft_plan", json!(plan))
                .with_artifact("draft_text", Value::String(text))
                .with_audit("drafting.outline_prepared")
                .with_audit("drafting.resume_rendered")
                .with_metric("drafts", drafts),
        ))
    }
}
