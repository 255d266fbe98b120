//! tailor - durable resume-tailoring pipeline orchestrator
//!
//! Tailors a resume to a job posting through a multi-stage pipeline:
//! ingest -> draft <-> critique -> compliance -> human approval -> publish.
//! The hard part is the orchestration, not the content generation: every
//! transition is merged and committed before the next stage runs, the
//! revision loop is bounded, and the run can park indefinitely on a human
//! decision and resume exactly where it left off.
//!
//! # Architecture
//!
//! - One `RunState` per execution, serialized as a flat JSON record
//! - Stage handlers return partial updates; the orchestrator merges them
//! - Snapshots are appended to a JSONL log after every transition
//! - Suspension is a registered wait on a signal channel, not a blocked
//!   thread; completed stages are never re-executed on resume
//!
//! # Modules
//!
//! - `core`: orchestration logic (Engine, Orchestrator, RunStore, stages)
//! - `domain`: data structures (RunState, StageUpdate, signals)
//! - `services`: external-service traits plus HTTP and in-memory clients
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the full pipeline
//! tailor run resume-pipeline --documents docs.json --profile profile.json
//!
//! # Check run status
//! tailor status <run-id>
//!
//! # Deliver the human decision to a suspended run
//! tailor approve <run-id>
//! tailor reject <run-id> --notes "needs rework"
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod services;

// Re-export main types at crate root for convenience
pub use core::{Engine, EngineError, Orchestrator, PipelineConfig, ServiceSet, StageError};
pub use domain::{Flags, HumanDecision, HumanSignal, RunState, RunStatus, Stage, StageUpdate, Task};
