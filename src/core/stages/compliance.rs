//! Compliance stage: review the draft against a static policy.
//!
//! Rejection is terminal with no retry; approval opens the human-approval
//! gate and hands off to publishing.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::core::error::StageError;
use crate::core::limits::PipelineLimits;
use crate::core::stages::{require_draft_text, require_profile, StageHandler, StageOutcome};
use crate::domain::{FlagPatch, RunState, RunStatus, Stage, StageUpdate};
use crate::services::{
    call_with_retry, request_key, CompliancePolicy, ComplianceStatus, ContentService, RetryPolicy,
};

pub struct ComplianceHandler {
    content: Arc<dyn ContentService>,
    blocklist: Vec<String>,
    limits: PipelineLimits,
    retry: RetryPolicy,
}

impl ComplianceHandler {
    pub fn new(
        content: Arc<dyn ContentService>,
        blocklist: Vec<String>,
        limits: PipelineLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            content,
            blocklist,
            limits,
            retry,
        }
    }
}

#[async_trait]
impl StageHandler for ComplianceHandler {
    fn stage(&self) -> Stage {
        Stage::Compliance
    }

    async fn execute(&self, state: &RunState) -> Result<StageOutcome, StageError> {
        let text = require_draft_text(state)?;
        let profile = require_profile(state)?;

        let policy = CompliancePolicy {
            blocklist: self.blocklist.clone(),
            profile: profile.clone(),
        };

        let key = request_key(&state.id, Stage::Compliance, text);
        let verdict = call_with_retry(
            "content",
            "review_compliance",
            &key,
            &self.retry,
            self.limits.call_timeout(),
            || async { self.content.review_compliance(text, &policy).await },
        )
        .await?;

        let report = json!({
            "status": verdict.status,
            "violations": verdict.violations,
        });

        let update = match verdict.status {
            ComplianceStatus::Rejected => {
                warn!(violations = ?verdict.violations, "compliance rejected");
                StageUpdate::advance_to(Stage::Done)
                    .with_status(RunStatus::Error)
                    .with_artifact("compliance_report", report)
                    .with_audit("compliance.rejected")
            }
            ComplianceStatus::Approved => {
                info!("compliance approved, awaiting human decision");
                StageUpdate::advance_to(Stage::Publishing)
                    .with_artifact("compliance_report", report)
                    .with_flags(FlagPatch {
                        awaiting_human: Some(true),
                        ..Default::default()
                    })
                    .with_audit("compliance.approved")
            }
        };

        Ok(StageOutcome::Advance(update))
    }
}
