//! Stage handlers.
//!
//! One handler per pipeline stage. A handler reads the current
//! [`RunState`], calls zero or more external services, and returns either
//! `Advance` (merge this update and move on) or `Suspend` (merge this
//! update, then park until a human signal arrives). Handlers never mutate
//! run state directly.

pub mod compliance;
pub mod critique;
pub mod drafting;
pub mod ingestion;
pub mod publishing;

use async_trait::async_trait;

use super::error::StageError;
use crate::domain::{RunState, Stage, StageUpdate};

pub use compliance::ComplianceHandler;
pub use critique::CritiqueHandler;
pub use drafting::DraftingHandler;
pub use ingestion::IngestionHandler;
pub use publishing::PublishingHandler;

/// What a stage handler asks the orchestrator to do next.
#[derive(Debug)]
pub enum StageOutcome {
    /// Merge the update and continue with the next stage
    Advance(StageUpdate),

    /// Merge the update, then wait for a human signal before re-entering
    /// the same stage
    Suspend(StageUpdate),
}

/// A single pipeline stage.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// The stage this handler owns.
    fn stage(&self) -> Stage;

    /// Execute the stage against a snapshot of the run.
    async fn execute(&self, state: &RunState) -> Result<StageOutcome, StageError>;
}

/// Fetch the profile artifact, rejecting empty ones.
pub(crate) fn require_profile<'a>(
    state: &'a RunState,
) -> Result<&'a serde_json::Value, StageError> {
    let profile = state
        .artifact("profile")
        .ok_or_else(|| StageError::Input("profile".to_string()))?;

    let empty = match profile {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    };
    if empty {
        return Err(StageError::Input("profile is empty".to_string()));
    }
    Ok(profile)
}

/// Fetch the rendered draft, rejecting blank ones.
pub(crate) fn require_draft_text(state: &RunState) -> Result<&str, StageError> {
    state
        .artifact_str("draft_text")
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| StageError::Input("draft_text".to_string()))
}
