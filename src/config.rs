//! Configuration for tailor paths and pipeline settings.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TAILOR_HOME)
//! 2. Config file (.tailor/config.yaml)
//! 3. Defaults (~/.tailor)
//!
//! Config file discovery:
//! - Searches current directory and parents for .tailor/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::orchestrator::PipelineConfig;
use crate::core::PipelineLimits;
use crate::services::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: Option<PipelineLimits>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub compliance: Option<ComplianceConfig>,
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
    #[serde(default)]
    pub services: Option<ServiceEndpoints>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to config file)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComplianceConfig {
    #[serde(default)]
    pub blocklist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub recipient: Option<String>,
}

/// Base URLs for the three external services.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceEndpoints {
    pub content_url: Option<String>,
    pub knowledge_url: Option<String>,
    pub publish_url: Option<String>,
    pub token: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to tailor home (engine state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Pipeline settings handed to the orchestrator
    pub pipeline: PipelineConfig,
    /// External service endpoints
    pub services: ServiceEndpoints,
}

/// Get the resolved configuration, loading it on first use.
pub fn get() -> Result<&'static ResolvedConfig> {
    let cached = CONFIG.get_or_init(|| resolve().map_err(|e| e.to_string()));
    match cached {
        Ok(config) => Ok(config),
        Err(message) => anyhow::bail!("configuration error: {}", message),
    }
}

/// Directory where run state lives.
pub fn runs_dir() -> Result<PathBuf> {
    Ok(get()?.home.join("runs"))
}

fn resolve() -> Result<ResolvedConfig> {
    let config_file = find_config_file();
    let parsed = match &config_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            Some(parse(&content)?)
        }
        None => None,
    };

    let home = resolve_home(config_file.as_deref(), parsed.as_ref())?;

    let defaults = PipelineConfig::default();
    let pipeline = match &parsed {
        Some(file) => PipelineConfig {
            limits: file.pipeline.clone().unwrap_or(defaults.limits),
            retry: file.retry.clone().unwrap_or(defaults.retry),
            blocklist: file
                .compliance
                .as_ref()
                .map(|c| c.blocklist.clone())
                .unwrap_or(defaults.blocklist),
            notify_recipient: file
                .notify
                .as_ref()
                .and_then(|n| n.recipient.clone())
                .unwrap_or(defaults.notify_recipient),
        },
        None => defaults,
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        pipeline,
        services: parsed.and_then(|file| file.services).unwrap_or_default(),
    })
}

fn parse(content: &str) -> Result<ConfigFile> {
    serde_yaml::from_str(content).context("failed to parse config YAML")
}

fn resolve_home(config_file: Option<&Path>, parsed: Option<&ConfigFile>) -> Result<PathBuf> {
    if let Ok(home) = std::env::var("TAILOR_HOME") {
        if !home.trim().is_empty() {
            return Ok(PathBuf::from(home));
        }
    }

    if let (Some(path), Some(file)) = (config_file, parsed) {
        if let Some(home) = &file.paths.home {
            // relative to the directory containing .tailor/
            let base = path
                .parent()
                .and_then(Path::parent)
                .unwrap_or_else(|| Path::new("."));
            return Ok(base.join(home));
        }
    }

    dirs::home_dir()
        .map(|home| home.join(".tailor"))
        .context("could not determine home directory")
}

fn find_config_file() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let candidate = dir.join(".tailor").join("config.yaml");
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CONFIG_YAML: &str = r#"
version: "1"

paths:
  home: .tailor-state

pipeline:
  max_revision_loops: 3
  knowledge_top_k: 8

retry:
  max_attempts: 2

compliance:
  blocklist: [confidential, embargoed]

notify:
  recipient: hiring-team

services:
  content_url: http://localhost:9100
  knowledge_url: http://localhost:9200
  publish_url: http://localhost:9300
"#;

    #[test]
    fn test_config_parsing() {
        let file = parse(TEST_CONFIG_YAML).unwrap();

        assert_eq!(file.version, "1");
        assert_eq!(file.paths.home.as_deref(), Some(".tailor-state"));
        assert_eq!(file.pipeline.as_ref().unwrap().max_revision_loops, 3);
        assert_eq!(file.pipeline.as_ref().unwrap().knowledge_top_k, 8);
        assert_eq!(file.retry.as_ref().unwrap().max_attempts, 2);
        assert_eq!(
            file.compliance.as_ref().unwrap().blocklist,
            vec!["confidential", "embargoed"]
        );
        assert_eq!(
            file.notify.as_ref().unwrap().recipient.as_deref(),
            Some("hiring-team")
        );
        assert_eq!(
            file.services.as_ref().unwrap().content_url.as_deref(),
            Some("http://localhost:9100")
        );
    }

    #[test]
    fn test_pipeline_section_uses_serde_defaults() {
        let file = parse("version: \"1\"\npipeline:\n  max_revision_loops: 0\n").unwrap();
        let limits = file.pipeline.unwrap();
        assert_eq!(limits.max_revision_loops, 0);
        // unspecified fields fall back to their defaults
        assert_eq!(limits.knowledge_top_k, 5);
    }
}
