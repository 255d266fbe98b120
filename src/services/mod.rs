//! Service interfaces for external capabilities.
//!
//! The orchestrator treats text generation, similarity search, and artifact
//! publication as opaque collaborators behind these traits. Production
//! implementations live in [`http`]; deterministic offline implementations
//! for tests and dry runs live in [`memory`].

pub mod http;
pub mod memory;
pub mod retry;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use http::{HttpContentService, HttpKnowledgeService, HttpPublishingSink};
pub use memory::{MemoryKnowledgeService, MemoryPublishingSink, StaticContentService};
pub use retry::{call_with_retry, request_key, CallError, RetryPolicy};

/// Structured plan for a draft, produced before rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPlan {
    pub summary: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience_items: Vec<ExperienceItem>,
}

/// One experience entry in a draft plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceItem {
    pub title: String,
    pub organization: String,
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// Context handed to the planner on a revision pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionNotes {
    /// Which revision this is (1-based)
    pub attempt: u32,
    /// Issues raised by the previous critique
    pub issues: Vec<String>,
}

/// Critique verdict over a rendered draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueVerdict {
    pub needs_revision: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Compliance verdict over a rendered draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceVerdict {
    pub status: ComplianceStatus,
    #[serde(default)]
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Approved,
    Rejected,
}

/// Static policy a compliance review runs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompliancePolicy {
    pub blocklist: Vec<String>,
    pub profile: Value,
}

/// One similarity-search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub id: String,
    pub content: String,
    pub score: f64,
}

/// Result of indexing a normalized document set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReceipt {
    pub upserted: u64,
    pub count: u64,
}

/// Reference to a persisted artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub location: String,
}

/// Outbound completion notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub status: String,
    pub recipient: String,
    pub message: String,
}

/// Acknowledgement from the publishing sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub accepted: bool,
}

/// Draft planning, rendering, critique, and compliance review.
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Produce a structured plan from the profile and knowledge hits.
    /// On revision passes the previous critique issues come along.
    async fn plan_draft(
        &self,
        profile: &Value,
        hits: &[KnowledgeHit],
        revision: Option<&RevisionNotes>,
    ) -> Result<DraftPlan>;

    /// Render final text from a plan. Fails rather than return blank output.
    async fn render_draft(
        &self,
        plan: &DraftPlan,
        profile: &Value,
        hits: &[KnowledgeHit],
    ) -> Result<String>;

    /// Judge a rendered draft.
    async fn critique(&self, text: &str, profile: &Value) -> Result<CritiqueVerdict>;

    /// Review a rendered draft against a static policy.
    async fn review_compliance(
        &self,
        text: &str,
        policy: &CompliancePolicy,
    ) -> Result<ComplianceVerdict>;
}

/// Document indexing and similarity lookup.
#[async_trait]
pub trait KnowledgeService: Send + Sync {
    /// Index a normalized document set, replacing documents with the same id.
    async fn upsert(&self, documents: &BTreeMap<String, String>) -> Result<UpsertReceipt>;

    /// Return up to `top_k` hits for a query, best first.
    async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<KnowledgeHit>>;
}

/// Persistence of the final artifact and outbound notification.
#[async_trait]
pub trait PublishingSink: Send + Sync {
    async fn persist(&self, run_id: &str, content: &str, checksum: &str) -> Result<ArtifactRef>;

    async fn notify(&self, event: &Notification) -> Result<Ack>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compliance_verdict_wire_shape() {
        let verdict: ComplianceVerdict =
            serde_json::from_str(r#"{"status":"rejected","violations":["x"]}"#).unwrap();
        assert_eq!(verdict.status, ComplianceStatus::Rejected);
        assert_eq!(verdict.violations, vec!["x"]);
    }

    #[test]
    fn test_critique_verdict_defaults_issues() {
        let verdict: CritiqueVerdict =
            serde_json::from_str(r#"{"needs_revision":false}"#).unwrap();
        assert!(!verdict.needs_revision);
        assert!(verdict.issues.is_empty());
    }

    #[test]
    fn test_draft_plan_roundtrip() {
        let plan = DraftPlan {
            summary: "Backend engineer with platform focus".into(),
            skills: vec!["rust".into(), "kubernetes".into()],
            experience_items: vec![ExperienceItem {
                title: "Staff Engineer".into(),
                organization: "Acme".into(),
                highlights: vec!["Led the storage migration".into()],
            }],
        };
        let json = serde_json::to_string(&plan).unwrap();
        let parsed: DraftPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, plan);
    }
}
