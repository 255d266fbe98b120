//! Command-line interface for tailor.
//!
//! Provides commands for starting pipeline runs, checking status, listing
//! runs, and delivering the human approval decision to a suspended run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use crate::config;
use crate::core::{Engine, ServiceSet};
use crate::domain::{Flags, HumanDecision, RunState, Task};
use crate::services::{
    HttpContentService, HttpKnowledgeService, HttpPublishingSink, MemoryKnowledgeService,
    MemoryPublishingSink, StaticContentService,
};

/// tailor - durable resume-tailoring pipeline orchestrator
#[derive(Parser, Debug)]
#[command(name = "tailor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a pipeline run
    Run {
        /// Task to execute
        #[arg(value_enum)]
        task: TaskArg,

        /// JSON file mapping document id to raw text
        #[arg(short, long)]
        documents: Option<PathBuf>,

        /// JSON file with the candidate profile
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// Existing draft text file (for compliance-only / publish tasks)
        #[arg(long)]
        draft: Option<PathBuf>,

        /// Skip the critique loop
        #[arg(long)]
        skip_critique: bool,

        /// Use deterministic in-memory services instead of HTTP endpoints
        #[arg(long)]
        offline: bool,
    },

    /// Check the status of a run
    Status {
        /// Run ID
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Approve a run waiting on the publication gate
    Approve {
        /// Run ID
        run_id: String,

        /// Reviewer notes
        #[arg(short, long)]
        notes: Option<String>,

        /// Use in-memory services (must match how the run was started)
        #[arg(long)]
        offline: bool,
    },

    /// Reject a run waiting on the publication gate
    Reject {
        /// Run ID
        run_id: String,

        /// Reviewer notes
        #[arg(short, long)]
        notes: Option<String>,

        /// Use in-memory services (must match how the run was started)
        #[arg(long)]
        offline: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Task selector for the CLI (maps to [`Task`]).
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TaskArg {
    Ingest,
    Draft,
    Revise,
    ResumePipeline,
    ComplianceOnly,
    Publish,
}

impl From<TaskArg> for Task {
    fn from(arg: TaskArg) -> Self {
        match arg {
            TaskArg::Ingest => Task::Ingest,
            TaskArg::Draft => Task::Draft,
            TaskArg::Revise => Task::Revise,
            TaskArg::ResumePipeline => Task::ResumePipeline,
            TaskArg::ComplianceOnly => Task::ComplianceOnly,
            TaskArg::Publish => Task::Publish,
        }
    }
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                task,
                documents,
                profile,
                draft,
                skip_critique,
                offline,
            } => run(task, documents, profile, draft, skip_critique, offline).await,
            Commands::Status { run_id } => status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Approve {
                run_id,
                notes,
                offline,
            } => decide(&run_id, HumanDecision::Approved, notes, offline).await,
            Commands::Reject {
                run_id,
                notes,
                offline,
            } => decide(&run_id, HumanDecision::Rejected, notes, offline).await,
            Commands::Config => show_config(),
        }
    }
}

fn build_engine(offline: bool) -> Result<Engine> {
    let config = config::get()?;

    let services = if offline {
        ServiceSet {
            content: Arc::new(StaticContentService::new()),
            knowledge: Arc::new(MemoryKnowledgeService::new()),
            sink: Arc::new(MemoryPublishingSink::new()),
        }
    } else {
        let endpoints = &config.services;
        let (content_url, knowledge_url, publish_url) = match (
            &endpoints.content_url,
            &endpoints.knowledge_url,
            &endpoints.publish_url,
        ) {
            (Some(c), Some(k), Some(p)) => (c.clone(), k.clone(), p.clone()),
            _ => anyhow::bail!(
                "service endpoints not configured; set services.* in .tailor/config.yaml \
                 or pass --offline"
            ),
        };
        let token = endpoints.token.clone();
        ServiceSet {
            content: Arc::new(HttpContentService::new(content_url, token.clone())?),
            knowledge: Arc::new(HttpKnowledgeService::new(knowledge_url, token.clone())?),
            sink: Arc::new(HttpPublishingSink::new(publish_url, token)?),
        }
    };

    Ok(Engine::new(services, config.pipeline.clone()).with_store(config::runs_dir()?))
}

fn read_json_file(path: &PathBuf) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

async fn run(
    task: TaskArg,
    documents: Option<PathBuf>,
    profile: Option<PathBuf>,
    draft: Option<PathBuf>,
    skip_critique: bool,
    offline: bool,
) -> Result<()> {
    let engine = build_engine(offline)?;

    let mut artifacts: BTreeMap<String, Value> = BTreeMap::new();
    if let Some(path) = documents {
        artifacts.insert("raw_documents".to_string(), read_json_file(&path)?);
    }
    if let Some(path) = profile {
        artifacts.insert("profile".to_string(), read_json_file(&path)?);
    }
    if let Some(path) = draft {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        artifacts.insert("draft_text".to_string(), Value::String(text));
    }

    let flags = Flags {
        skip_critique,
        ..Default::default()
    };

    let state = engine.execute(task.into(), artifacts, flags).await?;
    print_run(&state);

    if state.is_awaiting_human() {
        println!();
        println!("Run is awaiting approval. Decide with:");
        println!("  tailor approve {}", state.id);
        println!("  tailor reject {} --notes \"...\"", state.id);
    }
    Ok(())
}

async fn status(run_id: &str) -> Result<()> {
    let engine = build_engine(true)?;
    let state = engine.load(run_id).await?;
    print_run(&state);
    Ok(())
}

async fn list_runs(limit: usize) -> Result<()> {
    let engine = build_engine(true)?;
    let runs = engine.list_runs().await?;

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }
    for run_id in runs.iter().take(limit) {
        match engine.load(run_id).await {
            Ok(state) => println!(
                "{}  {:?}/{:?}  task={:?}",
                state.id, state.stage, state.status, state.task
            ),
            Err(_) => println!("{}  <unreadable>", run_id),
        }
    }
    Ok(())
}

async fn decide(
    run_id: &str,
    decision: HumanDecision,
    notes: Option<String>,
    offline: bool,
) -> Result<()> {
    let engine = build_engine(offline)?;
    let state = engine.resume_with_signal(run_id, decision, notes).await?;
    print_run(&state);
    Ok(())
}

fn show_config() -> Result<()> {
    let config = config::get()?;
    println!("home: {}", config.home.display());
    match &config.config_file {
        Some(path) => println!("config file: {}", path.display()),
        None => println!("config file: <none, using defaults>"),
    }
    println!(
        "max_revision_loops: {}",
        config.pipeline.limits.max_revision_loops
    );
    println!("blocklist: {:?}", config.pipeline.blocklist);
    println!("notify recipient: {}", config.pipeline.notify_recipient);
    Ok(())
}

fn print_run(state: &RunState) {
    println!("run:    {}", state.id);
    println!("task:   {:?}", state.task);
    println!("stage:  {:?}", state.stage);
    println!("status: {:?}", state.status);

    if !state.metrics.is_empty() {
        let metrics: Vec<String> = state
            .metrics
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        println!("metrics: {}", metrics.join(" "));
    }

    if !state.audit_trail.is_empty() {
        println!("audit:");
        for entry in &state.audit_trail {
            println!("  - {}", entry);
        }
    }
}
