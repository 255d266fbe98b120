//! Partial write-sets returned by stage handlers.
//!
//! A handler never mutates [`RunState`](super::run::RunState) in place; it
//! describes its writes as a `StageUpdate` and the orchestrator merges the
//! whole set in one step, so a concurrent query can never observe a stage
//! pointer that moved without its audit entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::run::{RunStatus, Stage};

/// One stage's partial update: artifacts and flags merge per key,
/// metrics are set per key, audit entries append in order.
#[derive(Debug, Clone)]
pub struct StageUpdate {
    /// Stage to move to once the update is merged
    pub next_stage: Stage,

    /// New run status, if the stage changes it
    pub status: Option<RunStatus>,

    /// Artifact writes in order; a later pair wins over an earlier one
    pub artifacts: Vec<(String, Value)>,

    /// Flag writes
    pub flags: FlagPatch,

    /// Cumulative counter values to set
    pub metrics: Vec<(String, u64)>,

    /// Audit entries to append
    pub audit: Vec<String>,
}

impl StageUpdate {
    /// An update that only moves the stage pointer.
    pub fn advance_to(next_stage: Stage) -> Self {
        Self {
            next_stage,
            status: None,
            artifacts: Vec::new(),
            flags: FlagPatch::default(),
            metrics: Vec::new(),
            audit: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_artifact(mut self, key: impl Into<String>, value: Value) -> Self {
        self.artifacts.push((key.into(), value));
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: u64) -> Self {
        self.metrics.push((key.into(), value));
        self
    }

    pub fn with_audit(mut self, entry: impl Into<String>) -> Self {
        self.audit.push(entry.into());
        self
    }

    pub fn with_flags(mut self, flags: FlagPatch) -> Self {
        self.flags = flags;
        self
    }
}

/// Partial flag write-set. `None` leaves the flag untouched.
#[derive(Debug, Clone, Default)]
pub struct FlagPatch {
    pub revision_count: Option<u32>,
    pub needs_revision: Option<bool>,
    pub awaiting_human: Option<bool>,
    pub human_notes: Option<String>,
    pub extra: Vec<(String, Value)>,
}

/// The two outcomes a human reviewer can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanDecision {
    Approved,
    Rejected,
}

/// A decision plus optional reviewer notes, delivered to a suspended run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanSignal {
    pub decision: HumanDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl HumanSignal {
    pub fn new(decision: HumanDecision, notes: Option<String>) -> Self {
        Self { decision, notes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_builder_preserves_write_order() {
        let update = StageUpdate::advance_to(Stage::Critique)
            .with_artifact("draft_plan", json!({"summary": "s"}))
            .with_artifact("draft_text", json!("text"))
            .with_audit("drafting.outline_prepared")
            .with_audit("drafting.resume_rendered")
            .with_metric("drafts", 1);

        assert_eq!(update.artifacts[0].0, "draft_plan");
        assert_eq!(update.artifacts[1].0, "draft_text");
        assert_eq!(
            update.audit,
            vec!["drafting.outline_prepared", "drafting.resume_rendered"]
        );
    }

    #[test]
    fn test_decision_serialization() {
        let signal = HumanSignal::new(HumanDecision::Rejected, Some("needs rework".into()));
        let json = serde_json::to_string(&signal).unwrap();
        assert_eq!(json, r#"{"decision":"rejected","notes":"needs rework"}"#);
    }
}
