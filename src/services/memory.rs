//! Deterministic in-memory service implementations.
//!
//! Used by the CLI `--offline` mode and the test suites. Behavior is fully
//! deterministic: templated planning/rendering, substring blocklist
//! compliance, term-overlap similarity scoring. Critique and compliance
//! verdicts can be scripted per call for driving the revision loop.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{
    Ack, ArtifactRef, CompliancePolicy, ComplianceStatus, ComplianceVerdict, ContentService,
    CritiqueVerdict, DraftPlan, ExperienceItem, KnowledgeHit, KnowledgeService, Notification,
    PublishingSink, RevisionNotes, UpsertReceipt,
};

/// Content service with templated output and scriptable verdicts.
#[derive(Default)]
pub struct StaticContentService {
    critiques: Mutex<VecDeque<CritiqueVerdict>>,
    compliance: Mutex<VecDeque<ComplianceVerdict>>,
}

impl StaticContentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue critique verdicts; once drained, critiques approve.
    pub fn with_critiques(self, verdicts: impl IntoIterator<Item = CritiqueVerdict>) -> Self {
        self.critiques.lock().unwrap().extend(verdicts);
        self
    }

    /// Queue compliance verdicts; once drained, the blocklist decides.
    pub fn with_compliance(self, verdicts: impl IntoIterator<Item = ComplianceVerdict>) -> Self {
        self.compliance.lock().unwrap().extend(verdicts);
        self
    }
}

fn profile_strings(profile: &Value, key: &str) -> Vec<String> {
    profile
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ContentService for StaticContentService {
    async fn plan_draft(
        &self,
        profile: &Value,
        hits: &[KnowledgeHit],
        revision: Option<&RevisionNotes>,
    ) -> Result<DraftPlan> {
        let role = profile
            .get("target_role")
            .and_then(Value::as_str)
            .unwrap_or("the target role");

        let mut summary = profile
            .get("summary")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Candidate profile tailored for {}", role));

        if let Some(revision) = revision {
            summary = format!("{} (revision {})", summary, revision.attempt);
        }
        if !hits.is_empty() {
            summary = format!("{} [{} supporting documents]", summary, hits.len());
        }

        let experience_items = profile
            .get("experience")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| ExperienceItem {
                        title: item
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or("Engineer")
                            .to_string(),
                        organization: item
                            .get("organization")
                            .and_then(Value::as_str)
                            .unwrap_or("Unknown")
                            .to_string(),
                        highlights: profile_strings(item, "highlights"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(DraftPlan {
            summary,
            skills: profile_strings(profile, "skills"),
            experience_items,
        })
    }

    async fn render_draft(
        &self,
        plan: &DraftPlan,
        profile: &Value,
        _hits: &[KnowledgeHit],
    ) -> Result<String> {
        let name = profile
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Candidate");

        let mut text = format!("# {}\n\n{}\n", name, plan.summary);

        if !plan.skills.is_empty() {
            text.push_str("\n## Skills\n");
            for skill in &plan.skills {
                text.push_str(&format!("- {}\n", skill));
            }
        }

        if !plan.experience_items.is_empty() {
            text.push_str("\n## Experience\n");
            for item in &plan.experience_items {
                text.push_str(&format!("\n### {} at {}\n", item.title, item.organization));
                for highlight in &item.highlights {
                    text.push_str(&format!("- {}\n", highlight));
                }
            }
        }

        if text.trim().is_empty() {
            anyhow::bail!("render returned empty output");
        }
        Ok(text)
    }

    async fn critique(&self, _text: &str, _profile: &Value) -> Result<CritiqueVerdict> {
        Ok(self
            .critiques
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CritiqueVerdict {
                needs_revision: false,
                issues: Vec::new(),
            }))
    }

    async fn review_compliance(
        &self,
        text: &str,
        policy: &CompliancePolicy,
    ) -> Result<ComplianceVerdict> {
        if let Some(scripted) = self.compliance.lock().unwrap().pop_front() {
            return Ok(scripted);
        }

        let haystack = text.to_lowercase();
        let violations: Vec<String> = policy
            .blocklist
            .iter()
            .filter(|term| haystack.contains(&term.to_lowercase()))
            .cloned()
            .collect();

        Ok(ComplianceVerdict {
            status: if violations.is_empty() {
                ComplianceStatus::Approved
            } else {
                ComplianceStatus::Rejected
            },
            violations,
        })
    }
}

/// Knowledge service over an in-memory document table.
#[derive(Default)]
pub struct MemoryKnowledgeService {
    documents: Mutex<BTreeMap<String, String>>,
}

impl MemoryKnowledgeService {
    pub fn new() -> Self {
        Self::default()
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl KnowledgeService for MemoryKnowledgeService {
    async fn upsert(&self, documents: &BTreeMap<String, String>) -> Result<UpsertReceipt> {
        let mut store = self.documents.lock().unwrap();
        for (id, text) in documents {
            store.insert(id.clone(), text.clone());
        }
        Ok(UpsertReceipt {
            upserted: documents.len() as u64,
            count: store.len() as u64,
        })
    }

    async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<KnowledgeHit>> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let store = self.documents.lock().unwrap();
        let mut hits: Vec<KnowledgeHit> = store
            .iter()
            .filter_map(|(id, content)| {
                let doc_terms = terms(content);
                let matched = query_terms
                    .iter()
                    .filter(|t| doc_terms.contains(t))
                    .count();
                if matched == 0 {
                    return None;
                }
                Some(KnowledgeHit {
                    id: id.clone(),
                    content: content.clone(),
                    score: matched as f64 / query_terms.len() as f64,
                })
            })
            .collect();

        // best score first; id breaks ties so results are stable
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// A persisted artifact recorded by [`MemoryPublishingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub run_id: String,
    pub content: String,
    pub checksum: String,
    pub location: String,
}

/// Publishing sink that records persists and notifications in memory.
#[derive(Default)]
pub struct MemoryPublishingSink {
    artifacts: Mutex<Vec<StoredArtifact>>,
    notifications: Mutex<Vec<Notification>>,
}

impl MemoryPublishingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<StoredArtifact> {
        self.artifacts.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl PublishingSink for MemoryPublishingSink {
    async fn persist(&self, run_id: &str, content: &str, checksum: &str) -> Result<ArtifactRef> {
        let location = format!("memory://artifacts/{}", run_id);
        self.artifacts.lock().unwrap().push(StoredArtifact {
            run_id: run_id.to_string(),
            content: content.to_string(),
            checksum: checksum.to_string(),
            location: location.clone(),
        });
        Ok(ArtifactRef { location })
    }

    async fn notify(&self, event: &Notification) -> Result<Ack> {
        self.notifications.lock().unwrap().push(event.clone());
        Ok(Ack { accepted: true })
    }
}
