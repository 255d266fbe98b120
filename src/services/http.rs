//! HTTP clients for the content, knowledge, and publishing services.
//!
//! Each client posts typed JSON payloads to one base URL with optional
//! bearer auth. Endpoint layout:
//!
//! - content:   POST /v1/plan, /v1/render, /v1/critique, /v1/compliance
//! - knowledge: POST /v1/documents, /v1/search
//! - publish:   POST /v1/artifacts, /v1/notifications

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    Ack, ArtifactRef, CompliancePolicy, ComplianceVerdict, ContentService, CritiqueVerdict,
    DraftPlan, KnowledgeHit, KnowledgeService, Notification, PublishingSink, RevisionNotes,
    UpsertReceipt,
};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
    client: &reqwest::Client,
    base_url: &str,
    path: &str,
    token: Option<&str>,
    payload: &Req,
) -> Result<Resp> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);

    let mut request = client.post(&url).json(payload);
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("request to {} failed", url))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{} returned {}: {}", url, status, body.trim());
    }

    response
        .json::<Resp>()
        .await
        .with_context(|| format!("invalid response body from {}", url))
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

/// Content service client (planning, rendering, critique, compliance).
pub struct HttpContentService {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct PlanRequest<'a> {
    profile: &'a Value,
    knowledge_hits: &'a [KnowledgeHit],
    #[serde(skip_serializing_if = "Option::is_none")]
    revision: Option<&'a RevisionNotes>,
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    plan: &'a DraftPlan,
    profile: &'a Value,
    knowledge_hits: &'a [KnowledgeHit],
}

#[derive(Deserialize)]
struct RenderResponse {
    text: String,
}

#[derive(Serialize)]
struct CritiqueRequest<'a> {
    text: &'a str,
    profile: &'a Value,
}

#[derive(Serialize)]
struct ComplianceRequest<'a> {
    text: &'a str,
    policy: &'a CompliancePolicy,
}

impl HttpContentService {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            token,
            client: build_client(Duration::from_secs(DEFAULT_TIMEOUT_SECS))?,
        })
    }

    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;
        anyhow::ensure!(response.status().is_success(), "content service unhealthy");
        Ok(())
    }
}

#[async_trait]
impl ContentService for HttpContentService {
    async fn plan_draft(
        &self,
        profile: &Value,
        hits: &[KnowledgeHit],
        revision: Option<&RevisionNotes>,
    ) -> Result<DraftPlan> {
        post_json(
            &self.client,
            &self.base_url,
            "/v1/plan",
            self.token.as_deref(),
            &PlanRequest {
                profile,
                knowledge_hits: hits,
                revision,
            },
        )
        .await
    }

    async fn render_draft(
        &self,
        plan: &DraftPlan,
        profile: &Value,
        hits: &[KnowledgeHit],
    ) -> Result<String> {
        let response: RenderResponse = post_json(
            &self.client,
            &self.base_url,
            "/v1/render",
            self.token.as_deref(),
            &RenderRequest {
                plan,
                profile,
                knowledge_hits: hits,
            },
        )
        .await?;

        if response.text.trim().is_empty() {
            anyhow::bail!("render returned empty output");
        }
        Ok(response.text)
    }

    async fn critique(&self, text: &str, profile: &Value) -> Result<CritiqueVerdict> {
        post_json(
            &self.client,
            &self.base_url,
            "/v1/critique",
            self.token.as_deref(),
            &CritiqueRequest { text, profile },
        )
        .await
    }

    async fn review_compliance(
        &self,
        text: &str,
        policy: &CompliancePolicy,
    ) -> Result<ComplianceVerdict> {
        post_json(
            &self.client,
            &self.base_url,
            "/v1/compliance",
            self.token.as_deref(),
            &ComplianceRequest { text, policy },
        )
        .await
    }
}

/// Knowledge service client (document indexing and similarity search).
pub struct HttpKnowledgeService {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    documents: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Vec<KnowledgeHit>,
}

impl HttpKnowledgeService {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            token,
            client: build_client(Duration::from_secs(DEFAULT_TIMEOUT_SECS))?,
        })
    }
}

#[async_trait]
impl KnowledgeService for HttpKnowledgeService {
    async fn upsert(&self, documents: &BTreeMap<String, String>) -> Result<UpsertReceipt> {
        post_json(
            &self.client,
            &self.base_url,
            "/v1/documents",
            self.token.as_deref(),
            &UpsertRequest { documents },
        )
        .await
    }

    async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<KnowledgeHit>> {
        let response: SearchResponse = post_json(
            &self.client,
            &self.base_url,
            "/v1/search",
            self.token.as_deref(),
            &SearchRequest { query, top_k },
        )
        .await?;
        Ok(response.hits)
    }
}

/// Publishing sink client (artifact persistence and notification).
pub struct HttpPublishingSink {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct PersistRequest<'a> {
    run_id: &'a str,
    content: &'a str,
    checksum: &'a str,
}

impl HttpPublishingSink {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            token,
            client: build_client(Duration::from_secs(DEFAULT_TIMEOUT_SECS))?,
        })
    }
}

#[async_trait]
impl PublishingSink for HttpPublishingSink {
    async fn persist(&self, run_id: &str, content: &str, checksum: &str) -> Result<ArtifactRef> {
        post_json(
            &self.client,
            &self.base_url,
            "/v1/artifacts",
            self.token.as_deref(),
            &PersistRequest {
                run_id,
                content,
                checksum,
            },
        )
        .await
    }

    async fn notify(&self, event: &Notification) -> Result<Ack> {
        post_json(
            &self.client,
            &self.base_url,
            "/v1/notifications",
            self.token.as_deref(),
            event,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_request_shape() {
        let profile = json!({"name": "Dana"});
        let hits = vec![KnowledgeHit {
            id: "r1".into(),
            content: "shipped a scheduler".into(),
            score: 0.9,
        }];
        let request = PlanRequest {
            profile: &profile,
            knowledge_hits: &hits,
            revision: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["profile"]["name"], "Dana");
        assert_eq!(value["knowledge_hits"][0]["id"], "r1");
        assert!(value.get("revision").is_none());
    }

    #[test]
    fn test_persist_request_shape() {
        let request = PersistRequest {
            run_id: "run-1",
            content: "text",
            checksum: "abc",
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["run_id"], "run-1");
        assert_eq!(value["checksum"], "abc");
    }
}
