//! The caller-facing boundary of the orchestrator.
//!
//! `Engine` owns the run registry and exposes the contract external
//! surfaces (CLI, API) call: `start`, `query`, `signal`, `await_run`. A
//! started run executes on its own task; queries read a watch channel so
//! a caller never observes a torn snapshot, and signals go through a
//! capacity-one channel so a delivered decision is never silently dropped.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use super::error::EngineError;
use super::orchestrator::{Orchestrator, PipelineConfig, RunChannels, ServiceSet};
use super::run_store::RunStore;
use crate::domain::{Flags, HumanDecision, HumanSignal, RunState, Task};

struct RunHandle {
    snapshots: watch::Receiver<RunState>,
    signals: mpsc::Sender<HumanSignal>,
}

/// Orchestrator boundary: one engine drives many independent runs.
pub struct Engine {
    orchestrator: Arc<Orchestrator>,
    store_root: Option<PathBuf>,
    runs: Mutex<HashMap<String, RunHandle>>,
}

impl Engine {
    pub fn new(services: ServiceSet, config: PipelineConfig) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::new(services, config)),
            store_root: None,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Persist run snapshots under `root` (one directory per run).
    pub fn with_store(mut self, root: PathBuf) -> Self {
        self.store_root = Some(root);
        self
    }

    /// Start a run on its own task and return its id immediately.
    ///
    /// The run executes through to terminal, parking in-process at the
    /// approval gate until [`Engine::signal`] delivers a decision.
    pub fn start(
        &self,
        task: Task,
        artifacts: BTreeMap<String, Value>,
        flags: Flags,
    ) -> Result<String, EngineError> {
        self.start_with_id(task, artifacts, flags, None)
    }

    /// Start a run under a caller-supplied correlation id.
    pub fn start_with_id(
        &self,
        task: Task,
        artifacts: BTreeMap<String, Value>,
        flags: Flags,
        request_id: Option<String>,
    ) -> Result<String, EngineError> {
        let mut state = RunState::new(task, artifacts, flags);
        if let Some(request_id) = request_id {
            state.id = request_id;
        }
        let run_id = state.id.clone();

        let (signal_tx, signal_rx) = mpsc::channel(1);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.clone());

        self.runs.lock().unwrap().insert(
            run_id.clone(),
            RunHandle {
                snapshots: snapshot_rx,
                signals: signal_tx,
            },
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let store_root = self.store_root.clone();
        let spawned_id = run_id.clone();
        tokio::spawn(async move {
            let store = match store_root {
                Some(root) => match RunStore::open(&root, &spawned_id).await {
                    Ok(store) => Some(store),
                    Err(open_error) => {
                        error!(run_id = %spawned_id, error = %open_error, "run store unavailable");
                        let mut failed = state;
                        let stage = failed.stage;
                        failed.fail(stage, &format!("run store unavailable: {}", open_error));
                        snapshot_tx.send_replace(failed);
                        return;
                    }
                },
                None => None,
            };

            let channels = RunChannels {
                signals: signal_rx,
                snapshots: snapshot_tx,
            };
            orchestrator.run(state, Some(channels), store.as_ref()).await;
        });

        info!(%run_id, "run started");
        Ok(run_id)
    }

    /// Read-only snapshot of a run; falls back to the run store for runs
    /// not registered in this process.
    pub async fn query(&self, run_id: &str) -> Result<RunState, EngineError> {
        if let Some(snapshot) = self.registered_snapshot(run_id) {
            return Ok(snapshot);
        }
        self.load(run_id).await
    }

    /// Deliver a human decision to a suspended run.
    ///
    /// Valid only while the run is awaiting one: anything earlier or later
    /// is a precondition failure that leaves run state untouched.
    pub fn signal(
        &self,
        run_id: &str,
        decision: HumanDecision,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        let (snapshot, sender) = {
            let runs = self.runs.lock().unwrap();
            let handle = runs
                .get(run_id)
                .ok_or_else(|| EngineError::NotFound(run_id.to_string()))?;
            let snapshot = handle.snapshots.borrow().clone();
            (snapshot, handle.signals.clone())
        };

        if !snapshot.is_awaiting_human() {
            return Err(EngineError::NotAwaitingSignal(run_id.to_string()));
        }

        sender
            .try_send(HumanSignal::new(decision, notes))
            .map_err(|send_error| match send_error {
                mpsc::error::TrySendError::Full(_) => {
                    EngineError::SignalPending(run_id.to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    EngineError::NotAwaitingSignal(run_id.to_string())
                }
            })
    }

    /// Block until the run is terminal, then return its final state.
    pub async fn await_run(&self, run_id: &str) -> Result<RunState, EngineError> {
        let mut snapshots = self.subscribe(run_id)?;
        let state = snapshots
            .wait_for(RunState::is_terminal)
            .await
            .map_err(|_| EngineError::NotFound(run_id.to_string()))?
            .clone();
        Ok(state)
    }

    /// Block until the run either parks on the approval gate or finishes.
    pub async fn await_suspended(&self, run_id: &str) -> Result<RunState, EngineError> {
        let mut snapshots = self.subscribe(run_id)?;
        let state = snapshots
            .wait_for(|state| state.is_awaiting_human() || state.is_terminal())
            .await
            .map_err(|_| EngineError::NotFound(run_id.to_string()))?
            .clone();
        Ok(state)
    }

    /// One-shot execution: drive a fresh run until it is terminal or
    /// suspends at the approval gate, then return it. Used by callers that
    /// do not stay resident (the CLI).
    pub async fn execute(
        &self,
        task: Task,
        artifacts: BTreeMap<String, Value>,
        flags: Flags,
    ) -> Result<RunState, EngineError> {
        let state = RunState::new(task, artifacts, flags);
        let store = self.open_store(&state.id).await?;
        Ok(self.orchestrator.run(state, None, store.as_ref()).await)
    }

    /// Resume a persisted, suspended run with a human decision and drive
    /// it to terminal. Completed stages are not re-executed; their effects
    /// are already in the loaded state.
    pub async fn resume_with_signal(
        &self,
        run_id: &str,
        decision: HumanDecision,
        notes: Option<String>,
    ) -> Result<RunState, EngineError> {
        let root = self
            .store_root
            .as_ref()
            .ok_or_else(|| EngineError::Other(anyhow::anyhow!("no run store configured")))?;

        let store = RunStore::open(root, run_id).await?;
        let mut state = store
            .load_latest()
            .await?
            .ok_or_else(|| EngineError::NotFound(run_id.to_string()))?;

        if !state.is_awaiting_human() {
            return Err(EngineError::NotAwaitingSignal(run_id.to_string()));
        }

        state.record_decision(decision, notes);
        Ok(self.orchestrator.run(state, None, Some(&store)).await)
    }

    /// Load the persisted state of a run.
    pub async fn load(&self, run_id: &str) -> Result<RunState, EngineError> {
        let root = self
            .store_root
            .as_ref()
            .ok_or_else(|| EngineError::NotFound(run_id.to_string()))?;
        RunStore::read_latest(root, run_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(run_id.to_string()))
    }

    /// List persisted run ids.
    pub async fn list_runs(&self) -> Result<Vec<String>, EngineError> {
        match &self.store_root {
            Some(root) => Ok(RunStore::list_runs(root).await?),
            None => Ok(Vec::new()),
        }
    }

    fn registered_snapshot(&self, run_id: &str) -> Option<RunState> {
        self.runs
            .lock()
            .unwrap()
            .get(run_id)
            .map(|handle| handle.snapshots.borrow().clone())
    }

    fn subscribe(&self, run_id: &str) -> Result<watch::Receiver<RunState>, EngineError> {
        self.runs
            .lock()
            .unwrap()
            .get(run_id)
            .map(|handle| handle.snapshots.clone())
            .ok_or_else(|| EngineError::NotFound(run_id.to_string()))
    }

    async fn open_store(&self, run_id: &str) -> Result<Option<RunStore>, EngineError> {
        match &self.store_root {
            Some(root) => Ok(Some(RunStore::open(root, run_id).await?)),
            None => Ok(None),
        }
    }
}
