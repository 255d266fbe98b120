//! Revision Loop Integration Tests
//!
//! The drafting/critique cycle is bounded by `max_revision_loops`; the
//! count of change requests never exceeds the bound, and a bound of zero
//! disables the loop entirely.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use tailor::core::{Engine, PipelineConfig, PipelineLimits, ServiceSet};
use tailor::domain::{Flags, Task};
use tailor::services::{
    CritiqueVerdict, MemoryKnowledgeService, MemoryPublishingSink, RetryPolicy,
    StaticContentService,
};

fn engine_with(max_revision_loops: u32, content: StaticContentService) -> Engine {
    let services = ServiceSet {
        content: Arc::new(content),
        knowledge: Arc::new(MemoryKnowledgeService::new()),
        sink: Arc::new(MemoryPublishingSink::new()),
    };
    let config = PipelineConfig {
        limits: PipelineLimits {
            max_revision_loops,
            ..Default::default()
        },
        retry: RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    Engine::new(services, config)
}

fn needs_revision(issues: &[&str]) -> CritiqueVerdict {
    CritiqueVerdict {
        needs_revision: true,
        issues: issues.iter().map(|issue| issue.to_string()).collect(),
    }
}

fn artifacts() -> BTreeMap<String, Value> {
    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        "raw_documents".to_string(),
        json!({"r1": "built a rust scheduler"}),
    );
    artifacts.insert(
        "profile".to_string(),
        json!({
            "name": "Dana",
            "target_role": "Platform Engineer",
            "skills": ["rust"]
        }),
    );
    artifacts
}

#[tokio::test]
async fn test_zero_bound_disables_the_loop() {
    // Scenario B: with max_revision_loops == 0 a reported needs_revision
    // still routes straight to compliance after exactly one draft
    let content =
        StaticContentService::new().with_critiques([needs_revision(&["tighten summary"])]);
    let engine = engine_with(0, content);

    let state = engine
        .execute(Task::ResumePipeline, artifacts(), Flags::default())
        .await
        .unwrap();

    assert_eq!(state.metric("drafts"), 1);
    assert_eq!(state.metric("revisions"), 0);
    assert_eq!(state.flags.revision_count, 0);
    assert!(state.audit_trail.contains(&"critique.approved".to_string()));
    assert!(!state
        .audit_trail
        .contains(&"critique.changes_requested".to_string()));
    assert!(state
        .audit_trail
        .iter()
        .any(|entry| entry.starts_with("compliance.")));
}

#[tokio::test]
async fn test_loop_is_bounded_by_max_revisions() {
    // critique keeps demanding changes; the loop stops at the bound
    let content = StaticContentService::new().with_critiques([
        needs_revision(&["too terse"]),
        needs_revision(&["still too terse"]),
        needs_revision(&["never satisfied"]),
    ]);
    let engine = engine_with(2, content);

    let state = engine
        .execute(Task::ResumePipeline, artifacts(), Flags::default())
        .await
        .unwrap();

    let change_requests = state
        .audit_trail
        .iter()
        .filter(|entry| *entry == "critique.changes_requested")
        .count();

    assert_eq!(change_requests, 2);
    assert_eq!(state.metric("revisions"), 2);
    assert_eq!(state.metric("drafts"), 3);
    assert_eq!(state.flags.revision_count, 2);
    assert!(state.metric("revisions") <= 2);

    // the bounded exit still records the final verdict and moves on
    assert!(state.audit_trail.contains(&"critique.approved".to_string()));
    assert_eq!(
        state.artifact("critique_notes"),
        Some(&json!({"needs_revision": true, "issues": ["never satisfied"]}))
    );
}

#[tokio::test]
async fn test_single_revision_then_approval() {
    let content = StaticContentService::new().with_critiques([
        needs_revision(&["add metrics to highlights"]),
        CritiqueVerdict {
            needs_revision: false,
            issues: Vec::new(),
        },
    ]);
    let engine = engine_with(3, content);

    let state = engine
        .execute(Task::ResumePipeline, artifacts(), Flags::default())
        .await
        .unwrap();

    assert_eq!(state.metric("drafts"), 2);
    assert_eq!(state.metric("revisions"), 1);
    assert_eq!(state.flags.revision_count, 1);
    assert!(!state.flags.needs_revision);

    // the redraft saw the critique issues
    let redraft = state.artifact_str("draft_text").unwrap();
    assert!(redraft.contains("revision 1"));
}

#[tokio::test]
async fn test_draft_order_in_audit_trail() {
    let content = StaticContentService::new().with_critiques([needs_revision(&["issue"])]);
    let engine = engine_with(1, content);

    let state = engine
        .execute(Task::ResumePipeline, artifacts(), Flags::default())
        .await
        .unwrap();

    let drafting_entries: Vec<&str> = state
        .audit_trail
        .iter()
        .filter(|entry| entry.starts_with("drafting.") || entry.starts_with("critique."))
        .map(String::as_str)
        .collect();

    assert_eq!(
        drafting_entries,
        vec![
            "drafting.outline_prepared",
            "drafting.resume_rendered",
            "critique.changes_requested",
            "drafting.outline_prepared",
            "drafting.resume_rendered",
            "critique.approved",
        ]
    );
}
