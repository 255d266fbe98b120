//! Critique stage: judge the draft and route the revision loop.
//!
//! This is the only place `revision_count` is incremented. The loop is
//! bounded: a reported `needs_revision` routes back to drafting only while
//! the count is under `max_revision_loops`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::core::error::StageError;
use crate::core::limits::PipelineLimits;
use crate::core::stages::{require_draft_text, require_profile, StageHandler, StageOutcome};
use crate::domain::{FlagPatch, RunState, Stage, StageUpdate};
use crate::services::{call_with_retry, request_key, ContentService, RetryPolicy};

pub struct CritiqueHandler {
    content: Arc<dyn ContentService>,
    limits: PipelineLimits,
    retry: RetryPolicy,
}

impl CritiqueHandler {
    pub fn new(
        content: Arc<dyn ContentService>,
        limits: PipelineLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            content,
            limits,
            retry,
        }
    }
}

#[async_trait]
impl StageHandler for CritiqueHandler {
    fn stage(&self) -> Stage {
        Stage::Critique
    }

    async fn execute(&self, state: &RunState) -> Result<StageOutcome, StageError> {
        let text = require_draft_text(state)?;
        let profile = require_profile(state)?;

        let key = request_key(&state.id, Stage::Critique, text);
        let verdict = call_with_retry(
            "content",
            "critique",
            &key,
            &self.retry,
            self.limits.call_timeout(),
            || async { self.content.critique(text, profile).await },
        )
        .await?;

        let revise =
            verdict.needs_revision && state.flags.revision_count < self.limits.max_revision_loops;

        info!(
            reported = verdict.needs_revision,
            revise,
            revision_count = state.flags.revision_count,
            "critique verdict"
        );

        let notes = json!({
            "needs_revision": verdict.needs_revision,
            "issues": verdict.issues,
        });

        let update = if revise {
            let next_count = state.flags.revision_count + 1;
            StageUpdate::advance_to(Stage::Drafting)
                .with_artifact("critique_notes", notes)
                .with_flags(FlagPatch {
                    revision_count: Some(next_count),
                    needs_revision: Some(true),
                    ..Default::default()
                })
                .with_metric("revisions", u64::from(next_count))
                .with_audit("critique.changes_requested")
        } else {
            StageUpdate::advance_to(Stage::Compliance)
                .with_artifact("critique_notes", notes)
                .with_flags(FlagPatch {
                    needs_revision: Some(false),
                    ..Default::default()
                })
                .with_audit("critique.approved")
        };

        Ok(StageOutcome::Advance(update))
    }
}
