//! Publishing stage: the human-approval gate, then persist and notify.
//!
//! Runs in two invocations. With no decision recorded yet it suspends the
//! run (phase A). Once the orchestrator records a delivered decision it is
//! re-entered: rejection terminates without persisting; approval computes
//! the content checksum, persists the artifact, and emits the notification
//! (phase B).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::core::error::StageError;
use crate::core::limits::PipelineLimits;
use crate::core::stages::{require_draft_text, StageHandler, StageOutcome};
use crate::domain::{FlagPatch, HumanDecision, RunState, RunStatus, Stage, StageUpdate};
use crate::services::{
    call_with_retry, request_key, Notification, PublishingSink, RetryPolicy,
};

pub struct PublishingHandler {
    sink: Arc<dyn PublishingSink>,
    recipient: String,
    limits: PipelineLimits,
    retry: RetryPolicy,
}

impl PublishingHandler {
    pub fn new(
        sink: Arc<dyn PublishingSink>,
        recipient: String,
        limits: PipelineLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sink,
            recipient,
            limits,
            retry,
        }
    }
}

/// SHA-256 of the published content, hex encoded.
pub fn content_checksum(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl StageHandler for PublishingHandler {
    fn stage(&self) -> Stage {
        Stage::Publishing
    }

    async fn execute(&self, state: &RunState) -> Result<StageOutcome, StageError> {
        let text = require_draft_text(state)?;

        let decision = match state.flags.human_decision {
            None => {
                // phase A: open the gate and park
                return Ok(StageOutcome::Suspend(
                    StageUpdate::advance_to(Stage::Publishing)
                        .with_flags(FlagPatch {
                            awaiting_human: Some(true),
                            ..Default::default()
                        })
                        .with_audit("publishing.awaiting_approval"),
                ));
            }
            Some(decision) => decision,
        };

        match decision {
            HumanDecision::Rejected => {
                warn!(
                    notes = state.flags.human_notes.as_deref().unwrap_or(""),
                    "rejected by human, nothing persisted"
                );
                Ok(StageOutcome::Advance(
                    StageUpdate::advance_to(Stage::Done)
                        .with_status(RunStatus::Error)
                        .with_flags(FlagPatch {
                            awaiting_human: Some(false),
                            ..Default::default()
                        })
                        .with_audit("publishing.rejected_by_human"),
                ))
            }
            HumanDecision::Approved => {
                // phase B: side effects happen only past this point
                let checksum = content_checksum(text);
                let key = request_key(&state.id, Stage::Publishing, text);

                let artifact = call_with_retry(
                    "publish",
                    "persist",
                    &key,
                    &self.retry,
                    self.limits.call_timeout(),
                    || async { self.sink.persist(&state.id, text, &checksum).await },
                )
                .await?;

                let notification = Notification {
                    status: "complete".to_string(),
                    recipient: self.recipient.clone(),
                    message: format!("run {} published ({})", state.id, artifact.location),
                };
                let ack = call_with_retry(
                    "publish",
                    "notify",
                    &key,
                    &self.retry,
                    self.limits.call_timeout(),
                    || async { self.sink.notify(&notification).await },
                )
                .await?;

                info!(
                    checksum = %checksum,
                    location = %artifact.location,
                    acked = ack.accepted,
                    "published"
                );

                Ok(StageOutcome::Advance(
                    StageUpdate::advance_to(Stage::Done)
                        .with_status(RunStatus::Complete)
                        .with_artifact(
                            "published_artifact",
                            json!({
                                "checksum": checksum,
                                "content": text,
                                "location": artifact.location,
                            }),
                        )
                        .with_flags(FlagPatch {
                            awaiting_human: Some(false),
                            ..Default::default()
                        })
                        .with_audit("publishing.approved_by_human")
                        .with_audit("publishing.stored")
                        .with_audit("publishing.notified"),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_sha256_hex() {
        let checksum = content_checksum("hello");
        assert_eq!(
            checksum,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
