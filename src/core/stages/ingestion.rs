//! Ingestion stage: normalize raw documents and index them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::core::error::StageError;
use crate::core::limits::PipelineLimits;
use crate::core::stages::{StageHandler, StageOutcome};
use crate::domain::{RunState, RunStatus, Stage, StageUpdate};
use crate::services::{call_with_retry, request_key, KnowledgeService, RetryPolicy};

pub struct IngestionHandler {
    knowledge: Arc<dyn KnowledgeService>,
    limits: PipelineLimits,
    retry: RetryPolicy,
}

impl IngestionHandler {
    pub fn new(
        knowledge: Arc<dyn KnowledgeService>,
        limits: PipelineLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            knowledge,
            limits,
            retry,
        }
    }
}

/// Collapse runs of whitespace to single spaces and trim the ends.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl StageHandler for IngestionHandler {
    fn stage(&self) -> Stage {
        Stage::Ingestion
    }

    async fn execute(&self, state: &RunState) -> Result<StageOutcome, StageError> {
        let raw = state
            .artifact_object("raw_documents")
            .filter(|map| !map.is_empty())
            .ok_or_else(|| StageError::Input("raw_documents".to_string()))?;

        let mut normalized: BTreeMap<String, String> = BTreeMap::new();
        for (id, value) in raw {
            let text = collapse_whitespace(value.as_str().unwrap_or_default());
            if text.is_empty() {
                continue;
            }
            self.limits.validate_document(id, &text)?;
            normalized.insert(id.clone(), text);
        }

        if normalized.is_empty() {
            return Err(StageError::Input(
                "raw_documents are empty or blank".to_string(),
            ));
        }

        let payload = serde_json::to_string(&normalized).unwrap_or_default();
        let key = request_key(&state.id, Stage::Ingestion, &payload);
        let receipt = call_with_retry(
            "knowledge",
            "upsert",
            &key,
            &self.retry,
            self.limits.call_timeout(),
            || async { self.knowledge.upsert(&normalized).await },
        )
        .await?;

        info!(
            documents = normalized.len(),
            indexed = receipt.count,
            "ingestion complete"
        );

        // keys are sorted already: normalized is an ordered map
        let sorted_keys = normalized.keys().cloned().collect::<Vec<_>>().join(",");

        let document_count = normalized.len() as u64;
        let normalized_value: Value = json!(normalized);

        let mut update = StageUpdate::advance_to(if state.task.implies_drafting() {
            Stage::Drafting
        } else {
            Stage::Done
        })
        .with_artifact("normalized_documents", normalized_value)
        .with_artifact(
            "vector_index",
            json!({"upserted": receipt.upserted, "count": receipt.count}),
        )
        .with_audit(format!("ingestion.normalized:{}", sorted_keys))
        .with_audit(format!("ingestion.indexed:{}", receipt.count))
        .with_metric("documents", document_count)
        .with_metric("indexed", receipt.count);

        if update.next_stage == Stage::Done {
            update = update.with_status(RunStatus::Complete);
        }

        Ok(StageOutcome::Advance(update))
    }
}
