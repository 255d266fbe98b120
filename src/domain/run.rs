//! Durable state for one pipeline execution.
//!
//! A `RunState` is the single record the orchestrator reads and mutates.
//! Stage handlers never touch it directly; they return a [`StageUpdate`]
//! which is merged in by [`RunState::apply`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::update::{HumanDecision, StageUpdate};

/// The durable record of one pipeline execution.
///
/// Serializes as a flat JSON record so it can cross the run-store boundary
/// unchanged. Maps are ordered so identical runs produce byte-identical
/// snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Opaque correlation id, stable for the lifetime of the run
    pub id: String,

    /// Task selected at creation; fixes the bootstrap stage
    pub task: Task,

    /// Current pipeline position
    pub stage: Stage,

    /// Current run status
    pub status: RunStatus,

    /// Named payloads produced by stages (grow-only, last writer per key wins)
    #[serde(default)]
    pub artifacts: BTreeMap<String, Value>,

    /// Control signals the orchestrator inspects
    #[serde(default)]
    pub flags: Flags,

    /// Numeric counters; each stage writes its own cumulative value
    #[serde(default)]
    pub metrics: BTreeMap<String, u64>,

    /// Append-only ordered event labels, one or more per transition
    #[serde(default)]
    pub audit_trail: Vec<String>,

    /// When the run was created
    pub started_at: DateTime<Utc>,

    /// When the run reached `Done` (if it has)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Create a fresh run at the `Route` bootstrap stage.
    pub fn new(task: Task, artifacts: BTreeMap<String, Value>, flags: Flags) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task,
            stage: Stage::Route,
            status: RunStatus::Pending,
            artifacts,
            flags,
            metrics: BTreeMap::new(),
            audit_trail: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Merge a stage's partial update into the run.
    ///
    /// Artifacts and flags merge per key (last writer wins); metrics are
    /// set, not summed; audit entries are appended in order. The stage
    /// pointer moves last so a snapshot never shows an advanced stage
    /// without its audit entries.
    pub fn apply(&mut self, update: StageUpdate) {
        debug_assert!(self.stage != Stage::Done, "terminal run state is immutable");

        for (key, value) in update.artifacts {
            self.artifacts.insert(key, value);
        }
        self.flags.apply(update.flags);
        for (key, value) in update.metrics {
            self.metrics.insert(key, value);
        }
        self.audit_trail.extend(update.audit);

        if let Some(status) = update.status {
            self.status = status;
        }
        self.stage = update.next_stage;
        if self.stage == Stage::Done {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Terminate the run with `status = Error` and a descriptive audit entry.
    pub fn fail(&mut self, stage: Stage, reason: &str) {
        self.audit_trail
            .push(format!("{}.failed:{}", stage.label(), reason));
        self.status = RunStatus::Error;
        self.stage = Stage::Done;
        self.completed_at = Some(Utc::now());
    }

    /// Record the human decision delivered while suspended.
    pub fn record_decision(&mut self, decision: HumanDecision, notes: Option<String>) {
        self.flags.human_decision = Some(decision);
        if notes.is_some() {
            self.flags.human_notes = notes;
        }
        self.flags.awaiting_human = false;
    }

    /// Whether the run has reached its terminal stage.
    pub fn is_terminal(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Whether the run is parked on the human-approval gate.
    pub fn is_awaiting_human(&self) -> bool {
        self.flags.awaiting_human && !self.is_terminal()
    }

    /// Look up an artifact by key.
    pub fn artifact(&self, key: &str) -> Option<&Value> {
        self.artifacts.get(key)
    }

    /// Look up a string artifact by key.
    pub fn artifact_str(&self, key: &str) -> Option<&str> {
        self.artifacts.get(key).and_then(Value::as_str)
    }

    /// Look up an object artifact by key.
    pub fn artifact_object(&self, key: &str) -> Option<&serde_json::Map<String, Value>> {
        self.artifacts.get(key).and_then(Value::as_object)
    }

    /// Current value of a metric (0 if never reported).
    pub fn metric(&self, key: &str) -> u64 {
        self.metrics.get(key).copied().unwrap_or(0)
    }
}

/// Pipeline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Bootstrap stage; resolved from the task before any handler runs
    Route,
    Ingestion,
    Drafting,
    Critique,
    Compliance,
    Publishing,
    /// Terminal
    Done,
}

impl Stage {
    /// Lowercase label used as the audit-entry prefix.
    pub fn label(self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::Ingestion => "ingestion",
            Self::Drafting => "drafting",
            Self::Critique => "critique",
            Self::Compliance => "compliance",
            Self::Publishing => "publishing",
            Self::Done => "done",
        }
    }

    /// Transition table. `Route` moves anywhere the task map allows;
    /// `Publishing -> Publishing` is the suspension re-entry.
    pub fn may_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        match self {
            Route => matches!(next, Ingestion | Drafting | Compliance | Publishing),
            Ingestion => matches!(next, Drafting | Done),
            Drafting => matches!(next, Critique | Compliance),
            Critique => matches!(next, Drafting | Compliance),
            Compliance => matches!(next, Publishing | Done),
            Publishing => matches!(next, Publishing | Done),
            Done => false,
        }
    }
}

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Complete,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Task chosen at creation; immutable for the lifetime of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Normalize and index source documents, then stop
    Ingest,
    /// Draft without a fresh ingestion pass
    Draft,
    /// Redraft against prior critique notes
    Revise,
    /// The full pipeline: ingest through publish
    ResumePipeline,
    /// Compliance review of an existing draft only
    ComplianceOnly,
    /// Approval gate and publication of an existing draft
    Publish,
}

impl Task {
    /// Fixed task-to-stage bootstrap map.
    pub fn initial_stage(self) -> Stage {
        match self {
            Self::Ingest | Self::ResumePipeline => Stage::Ingestion,
            Self::Draft | Self::Revise => Stage::Drafting,
            Self::ComplianceOnly => Stage::Compliance,
            Self::Publish => Stage::Publishing,
        }
    }

    /// Whether ingestion should hand off to drafting rather than finish.
    pub fn implies_drafting(self) -> bool {
        matches!(self, Self::ResumePipeline)
    }
}

/// Typed control flags plus an open side-map for per-stage extras.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Flags {
    /// How many critique-driven redrafts have run; never decreases
    #[serde(default)]
    pub revision_count: u32,

    /// Whether critique demanded another revision pass
    #[serde(default)]
    pub needs_revision: bool,

    /// Set while the run is parked on the approval gate
    #[serde(default)]
    pub awaiting_human: bool,

    /// Route drafting output straight to compliance
    #[serde(default)]
    pub skip_critique: bool,

    /// Notes attached to the human decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_notes: Option<String>,

    /// The delivered human decision, once one arrives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_decision: Option<HumanDecision>,

    /// Dynamic per-stage scalars not inspected by the orchestrator
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Flags {
    /// Merge a partial flag patch, last writer wins per key.
    /// `revision_count` is monotone: a lower value never overwrites.
    pub fn apply(&mut self, patch: super::update::FlagPatch) {
        if let Some(count) = patch.revision_count {
            self.revision_count = self.revision_count.max(count);
        }
        if let Some(needs) = patch.needs_revision {
            self.needs_revision = needs;
        }
        if let Some(awaiting) = patch.awaiting_human {
            self.awaiting_human = awaiting;
        }
        if patch.human_notes.is_some() {
            self.human_notes = patch.human_notes;
        }
        for (key, value) in patch.extra {
            self.extra.insert(key, value);
        }
    }
}
