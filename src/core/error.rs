//! Error taxonomy for the orchestrator core.
//!
//! Two kinds of failure exist here and neither covers business rejections:
//! a [`StageError`] is a stage that cannot proceed (missing input, exhausted
//! external call, size limit); an [`EngineError`] is a caller-facing
//! precondition failure at the engine boundary. A compliance rejection or a
//! human rejection is NOT an error — it is a normal terminal transition
//! carried in the run state itself.

use thiserror::Error;

use super::limits::LimitViolation;
use crate::services::CallError;

/// A stage handler could not complete. Always fatal to the run.
#[derive(Debug, Error)]
pub enum StageError {
    /// Required artifact missing or empty at a stage boundary
    #[error("missing or empty input: {0}")]
    Input(String),

    /// External call failed after exhausting its retries
    #[error(transparent)]
    ExternalCall(#[from] CallError),

    /// A configured size limit was exceeded
    #[error(transparent)]
    Limit(#[from] LimitViolation),
}

/// Caller-facing failures at the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run {0} not found")]
    NotFound(String),

    /// Signal delivered outside the awaiting-human window; state unchanged
    #[error("run {0} is not awaiting a human signal")]
    NotAwaitingSignal(String),

    /// A signal was already delivered and is still being consumed
    #[error("run {0} already has a pending signal")]
    SignalPending(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
