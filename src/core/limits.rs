//! Pipeline limits and enforcement.
//!
//! Bounds the revision loop and the size of what the pipeline will accept
//! or produce. The revision bound is the one limit the orchestrator's own
//! control flow reads; the size caps are checked at stage boundaries.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits for one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineLimits {
    /// Maximum drafting/critique round trips (0 disables the loop)
    #[serde(default = "default_max_revision_loops")]
    pub max_revision_loops: u32,

    /// How many knowledge hits drafting retrieves
    #[serde(default = "default_knowledge_top_k")]
    pub knowledge_top_k: usize,

    /// Per-call timeout for external services, in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,

    /// Maximum size of one raw document in bytes
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,

    /// Maximum size of a rendered draft in bytes
    #[serde(default = "default_max_draft_bytes")]
    pub max_draft_bytes: u64,
}

fn default_max_revision_loops() -> u32 {
    2
}
fn default_knowledge_top_k() -> usize {
    5
}
fn default_call_timeout() -> u64 {
    60
}
fn default_max_document_bytes() -> u64 {
    1024 * 1024
} // 1MB
fn default_max_draft_bytes() -> u64 {
    512 * 1024
} // 512KB

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_revision_loops: default_max_revision_loops(),
            knowledge_top_k: default_knowledge_top_k(),
            call_timeout_seconds: default_call_timeout(),
            max_document_bytes: default_max_document_bytes(),
            max_draft_bytes: default_max_draft_bytes(),
        }
    }
}

impl PipelineLimits {
    /// Effective timeout for one external call.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    /// Validate a normalized source document.
    pub fn validate_document(&self, id: &str, text: &str) -> Result<(), LimitViolation> {
        let size = text.len() as u64;
        if size > self.max_document_bytes {
            return Err(LimitViolation::DocumentTooLarge {
                id: id.to_string(),
                actual: size,
                limit: self.max_document_bytes,
            });
        }
        Ok(())
    }

    /// Validate a rendered draft.
    pub fn validate_draft(&self, text: &str) -> Result<(), LimitViolation> {
        let size = text.len() as u64;
        if size > self.max_draft_bytes {
            return Err(LimitViolation::DraftTooLarge {
                actual: size,
                limit: self.max_draft_bytes,
            });
        }
        Ok(())
    }
}

/// Limit violation errors.
#[derive(Debug, Clone, Error)]
pub enum LimitViolation {
    #[error("document '{id}' too large: {actual} > {limit} bytes")]
    DocumentTooLarge { id: String, actual: u64, limit: u64 },

    #[error("rendered draft too large: {actual} > {limit} bytes")]
    DraftTooLarge { actual: u64, limit: u64 },
}
