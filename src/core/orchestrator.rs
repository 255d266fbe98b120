//! The pipeline control loop.
//!
//! Deterministically sequences stage handlers against one `RunState`:
//! route bootstrap, per-stage dispatch, transition-table enforcement, the
//! publishing suspension, and the terminal-status decision. Every merged
//! update is committed (persisted and published to watchers) before the
//! next stage runs, so a concurrent query always sees a consistent record
//! and a resumed run never re-executes a completed stage.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument, warn};

use super::run_store::RunStore;
use super::stages::{
    ComplianceHandler, CritiqueHandler, DraftingHandler, IngestionHandler, PublishingHandler,
    StageHandler, StageOutcome,
};
use crate::core::limits::PipelineLimits;
use crate::domain::{HumanSignal, RunState, RunStatus, Stage, StageUpdate};
use crate::services::{ContentService, KnowledgeService, PublishingSink, RetryPolicy};

/// The three external collaborators, behind their interface traits.
#[derive(Clone)]
pub struct ServiceSet {
    pub content: Arc<dyn ContentService>,
    pub knowledge: Arc<dyn KnowledgeService>,
    pub sink: Arc<dyn PublishingSink>,
}

/// Everything the pipeline needs beyond its services.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub limits: PipelineLimits,
    pub retry: RetryPolicy,
    /// Terms the compliance policy forbids
    pub blocklist: Vec<String>,
    /// Recipient of the completion notification
    pub notify_recipient: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            limits: PipelineLimits::default(),
            retry: RetryPolicy::default(),
            blocklist: vec![
                "confidential".to_string(),
                "proprietary".to_string(),
                "internal use only".to_string(),
            ],
            notify_recipient: "pipeline-owner".to_string(),
        }
    }
}

/// Channels wired to one in-process run: a signal receiver the loop parks
/// on and a watch sender it publishes snapshots through.
pub struct RunChannels {
    pub signals: mpsc::Receiver<HumanSignal>,
    pub snapshots: watch::Sender<RunState>,
}

/// Main pipeline orchestrator.
pub struct Orchestrator {
    ingestion: IngestionHandler,
    drafting: DraftingHandler,
    critique: CritiqueHandler,
    compliance: ComplianceHandler,
    publishing: PublishingHandler,
}

impl Orchestrator {
    pub fn new(services: ServiceSet, config: PipelineConfig) -> Self {
        let limits = config.limits;
        let retry = config.retry;
        Self {
            ingestion: IngestionHandler::new(
                Arc::clone(&services.knowledge),
                limits.clone(),
                retry.clone(),
            ),
            drafting: DraftingHandler::new(
                Arc::clone(&services.content),
                Arc::clone(&services.knowledge),
                limits.clone(),
                retry.clone(),
            ),
            critique: CritiqueHandler::new(
                Arc::clone(&services.content),
                limits.clone(),
                retry.clone(),
            ),
            compliance: ComplianceHandler::new(
                Arc::clone(&services.content),
                config.blocklist,
                limits.clone(),
                retry.clone(),
            ),
            publishing: PublishingHandler::new(
                Arc::clone(&services.sink),
                config.notify_recipient,
                limits,
                retry,
            ),
        }
    }

    /// Drive a run until it is terminal, or until it suspends when no
    /// signal channel was provided.
    ///
    /// With `channels`, the loop parks on the signal receiver at the
    /// approval gate and returns only once `stage == Done`. Without
    /// channels the suspended state is returned to the caller, who can
    /// later record a decision and call `run` again; completed stages are
    /// never re-executed because their effects are already in the state.
    #[instrument(skip_all, fields(run_id = %state.id, task = ?state.task))]
    pub async fn run(
        &self,
        mut state: RunState,
        mut channels: Option<RunChannels>,
        store: Option<&RunStore>,
    ) -> RunState {
        if state.stage == Stage::Route {
            let initial = state.task.initial_stage();
            info!(stage = initial.label(), "routing run");
            state.apply(
                StageUpdate::advance_to(initial)
                    .with_status(RunStatus::InProgress)
                    .with_audit(format!("route.dispatched:{}", initial.label())),
            );
            self.commit(&mut state, store, channels.as_ref()).await;
        }

        while !state.is_terminal() {
            let stage = state.stage;
            let result = match stage {
                Stage::Ingestion => self.ingestion.execute(&state).await,
                Stage::Drafting => self.drafting.execute(&state).await,
                Stage::Critique => self.critique.execute(&state).await,
                Stage::Compliance => self.compliance.execute(&state).await,
                Stage::Publishing => self.publishing.execute(&state).await,
                // Route is resolved above; Done is the loop guard
                Stage::Route | Stage::Done => break,
            };

            match result {
                Ok(StageOutcome::Advance(update)) => {
                    if !stage.may_advance_to(update.next_stage) {
                        error!(
                            from = stage.label(),
                            to = update.next_stage.label(),
                            "illegal stage transition"
                        );
                        state.fail(stage, "illegal stage transition");
                        self.commit(&mut state, store, channels.as_ref()).await;
                        break;
                    }
                    state.apply(update);
                    self.commit(&mut state, store, channels.as_ref()).await;
                }
                Ok(StageOutcome::Suspend(update)) => {
                    state.apply(update);
                    self.commit(&mut state, store, channels.as_ref()).await;
                    if state.is_terminal() {
                        break;
                    }

                    let Some(active) = channels.as_mut() else {
                        info!("suspended awaiting human decision");
                        return state;
                    };

                    info!("awaiting human decision");
                    match active.signals.recv().await {
                        Some(signal) => {
                            info!(decision = ?signal.decision, "signal received");
                            // the gate accepts exactly one decision
                            active.signals.close();
                            state.record_decision(signal.decision, signal.notes);
                            self.commit(&mut state, store, channels.as_ref()).await;
                        }
                        None => {
                            state.fail(stage, "signal channel closed");
                            self.commit(&mut state, store, channels.as_ref()).await;
                            break;
                        }
                    }
                }
                Err(stage_error) => {
                    error!(stage = stage.label(), error = %stage_error, "stage failed");
                    state.fail(stage, &stage_error.to_string());
                    self.commit(&mut state, store, channels.as_ref()).await;
                    break;
                }
            }
        }

        info!(status = ?state.status, "run finished");
        state
    }

    /// Persist the state and publish it to watchers.
    ///
    /// A persistence failure turns the run into an error rather than
    /// silently continuing without durability.
    async fn commit(
        &self,
        state: &mut RunState,
        store: Option<&RunStore>,
        channels: Option<&RunChannels>,
    ) {
        if let Some(store) = store {
            if let Err(store_error) = store.append_snapshot(state).await {
                warn!(error = %store_error, "snapshot persistence failed");
                if !state.is_terminal() {
                    let stage = state.stage;
                    state.fail(stage, &format!("state persistence failed: {}", store_error));
                }
            }
        }
        if let Some(channels) = channels {
            channels.snapshots.send_replace(state.clone());
        }
    }
}
