//! Pipeline Integration Tests
//!
//! End-to-end stage sequencing: ingestion-only runs, compliance rejection,
//! input failures, external-call exhaustion, and audit ordering.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use tailor::core::{Engine, PipelineConfig, ServiceSet};
use tailor::domain::{Flags, RunStatus, Stage, Task};
use tailor::services::{
    ComplianceStatus, ComplianceVerdict, KnowledgeHit, KnowledgeService, MemoryKnowledgeService,
    MemoryPublishingSink, RetryPolicy, StaticContentService, UpsertReceipt,
};

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn engine_with_content(content: StaticContentService) -> (Engine, Arc<MemoryPublishingSink>) {
    let sink = Arc::new(MemoryPublishingSink::new());
    let services = ServiceSet {
        content: Arc::new(content),
        knowledge: Arc::new(MemoryKnowledgeService::new()),
        sink: sink.clone(),
    };
    (Engine::new(services, fast_config()), sink)
}

fn profile() -> Value {
    json!({
        "name": "Dana",
        "target_role": "Platform Engineer",
        "summary": "Backend engineer with storage focus",
        "skills": ["rust", "tokio"],
        "experience": [
            {"title": "Engineer", "organization": "Acme", "highlights": ["shipped v1"]}
        ]
    })
}

fn full_artifacts() -> BTreeMap<String, Value> {
    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        "raw_documents".to_string(),
        json!({"r1": "built a rust scheduler", "r2": "ran tokio services"}),
    );
    artifacts.insert("profile".to_string(), profile());
    artifacts
}

#[tokio::test]
async fn test_ingest_only_run() {
    // Scenario A: ingest normalizes whitespace and stops after indexing
    let (engine, _sink) = engine_with_content(StaticContentService::new());

    let mut artifacts = BTreeMap::new();
    artifacts.insert("raw_documents".to_string(), json!({"r1": "  a  b "}));

    let state = engine
        .execute(Task::Ingest, artifacts, Flags::default())
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Complete);
    assert_eq!(state.stage, Stage::Done);
    assert_eq!(
        state.artifact("normalized_documents"),
        Some(&json!({"r1": "a b"}))
    );
    assert_eq!(state.metric("documents"), 1);
    assert_eq!(state.metric("indexed"), 1);

    assert!(state
        .audit_trail
        .contains(&"ingestion.normalized:r1".to_string()));
    assert!(!state
        .audit_trail
        .iter()
        .any(|entry| entry.starts_with("drafting.") || entry.starts_with("compliance.")));
}

#[tokio::test]
async fn test_compliance_rejection_is_terminal() {
    // Scenario C: a rejected compliance verdict ends the run without publishing
    let content = StaticContentService::new().with_compliance([ComplianceVerdict {
        status: ComplianceStatus::Rejected,
        violations: vec!["x".to_string()],
    }]);
    let (engine, sink) = engine_with_content(content);

    let state = engine
        .execute(Task::ResumePipeline, full_artifacts(), Flags::default())
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Error);
    assert_eq!(state.stage, Stage::Done);
    assert_eq!(
        state.artifact("compliance_report"),
        Some(&json!({"status": "rejected", "violations": ["x"]}))
    );
    assert!(state
        .audit_trail
        .contains(&"compliance.rejected".to_string()));
    assert!(!state
        .audit_trail
        .iter()
        .any(|entry| entry.starts_with("publishing.")));
    assert!(sink.artifacts().is_empty());
    assert!(sink.notifications().is_empty());
}

#[tokio::test]
async fn test_compliance_always_precedes_publishing() {
    let (engine, _sink) = engine_with_content(StaticContentService::new());

    let state = engine
        .execute(Task::ResumePipeline, full_artifacts(), Flags::default())
        .await
        .unwrap();

    // run parks at the approval gate in one-shot mode
    assert!(state.is_awaiting_human());

    let compliance_at = state
        .audit_trail
        .iter()
        .position(|entry| entry == "compliance.approved")
        .expect("compliance entry present");
    let publishing_at = state
        .audit_trail
        .iter()
        .position(|entry| entry.starts_with("publishing."))
        .expect("publishing entry present");
    assert!(compliance_at < publishing_at);
}

#[tokio::test]
async fn test_skip_critique_flag() {
    let (engine, _sink) = engine_with_content(StaticContentService::new());

    let flags = Flags {
        skip_critique: true,
        ..Default::default()
    };
    let state = engine
        .execute(Task::ResumePipeline, full_artifacts(), flags)
        .await
        .unwrap();

    assert!(!state
        .audit_trail
        .iter()
        .any(|entry| entry.starts_with("critique.")));
    assert!(state
        .audit_trail
        .contains(&"compliance.approved".to_string()));
}

#[tokio::test]
async fn test_missing_documents_is_input_error() {
    let (engine, _sink) = engine_with_content(StaticContentService::new());

    let state = engine
        .execute(Task::Ingest, BTreeMap::new(), Flags::default())
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Error);
    assert_eq!(state.stage, Stage::Done);
    assert!(state
        .audit_trail
        .iter()
        .any(|entry| entry.starts_with("ingestion.failed:")));
}

#[tokio::test]
async fn test_blank_documents_are_input_error() {
    let (engine, _sink) = engine_with_content(StaticContentService::new());

    let mut artifacts = BTreeMap::new();
    artifacts.insert("raw_documents".to_string(), json!({"r1": "   ", "r2": "\n\t"}));

    let state = engine
        .execute(Task::Ingest, artifacts, Flags::default())
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Error);
}

#[tokio::test]
async fn test_missing_profile_fails_drafting() {
    let (engine, _sink) = engine_with_content(StaticContentService::new());

    let state = engine
        .execute(Task::Draft, BTreeMap::new(), Flags::default())
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Error);
    assert!(state
        .audit_trail
        .iter()
        .any(|entry| entry.starts_with("drafting.failed:")));
}

struct FailingKnowledge;

#[async_trait::async_trait]
impl KnowledgeService for FailingKnowledge {
    async fn upsert(&self, _documents: &BTreeMap<String, String>) -> anyhow::Result<UpsertReceipt> {
        anyhow::bail!("knowledge service offline")
    }

    async fn similarity_search(
        &self,
        _query: &str,
        _top_k: usize,
    ) -> anyhow::Result<Vec<KnowledgeHit>> {
        anyhow::bail!("knowledge service offline")
    }
}

#[tokio::test]
async fn test_exhausted_external_call_fails_run() {
    let sink = Arc::new(MemoryPublishingSink::new());
    let services = ServiceSet {
        content: Arc::new(StaticContentService::new()),
        knowledge: Arc::new(FailingKnowledge),
        sink,
    };
    let engine = Engine::new(services, fast_config());

    let mut artifacts = BTreeMap::new();
    artifacts.insert("raw_documents".to_string(), json!({"r1": "text"}));

    let state = engine
        .execute(Task::Ingest, artifacts, Flags::default())
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Error);
    assert!(state
        .audit_trail
        .iter()
        .any(|entry| entry.starts_with("ingestion.failed:") && entry.contains("knowledge.upsert")));
}

#[tokio::test]
async fn test_route_entry_opens_every_audit_trail() {
    let (engine, _sink) = engine_with_content(StaticContentService::new());

    let mut artifacts = BTreeMap::new();
    artifacts.insert("raw_documents".to_string(), json!({"r1": "text"}));

    let state = engine
        .execute(Task::Ingest, artifacts, Flags::default())
        .await
        .unwrap();

    assert_eq!(state.audit_trail[0], "route.dispatched:ingestion");
}
