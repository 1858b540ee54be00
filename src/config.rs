//! Configuration file support for conclave front-ends

use crate::orchestration::{Agent, OrchestratorConfig, Roster};
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name looked up in the working directory and the user config dir
pub const CONFIG_FILE: &str = "conclave.toml";

/// Roles of the roster built when none is configured
pub const DEFAULT_ROLES: &[&str] = &["Host", "Coding", "Math"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub agents: Vec<Agent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,

    /// Per streamed call; 0 disables the deadline
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default = "default_context_limit")]
    pub context_limit: usize,

    #[serde(default = "default_end_chat_command")]
    pub end_chat_command: String,
}

// Defaults

fn default_ollama_host() -> String {
    ollama::DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    OrchestratorConfig::default().request_timeout_secs
}

fn default_confidence_threshold() -> f64 {
    OrchestratorConfig::default().confidence_threshold
}

fn default_context_limit() -> usize {
    OrchestratorConfig::default().context_limit
}

fn default_end_chat_command() -> String {
    OrchestratorConfig::default().end_chat_command
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            context_limit: default_context_limit(),
            end_chat_command: default_end_chat_command(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load the first configuration found.
    ///
    /// An explicit path must exist. Otherwise `./conclave.toml` is tried,
    /// then `<config dir>/conclave/conclave.toml`, then built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        let candidates = [
            Some(PathBuf::from(CONFIG_FILE)),
            dirs::config_dir().map(|dir| dir.join("conclave").join(CONFIG_FILE)),
        ];
        Self::first_existing(candidates.into_iter().flatten())
    }

    fn first_existing(
        candidates: impl IntoIterator<Item = PathBuf>,
    ) -> anyhow::Result<(Self, Option<PathBuf>)> {
        for path in candidates {
            if path.is_file() {
                debug!(path = %path.display(), "Loading configuration");
                return Ok((Self::from_file(&path)?, Some(path)));
            }
        }
        debug!("No configuration file found, using defaults");
        Ok((Self::default(), None))
    }

    /// Starter configuration with the default roster on `model`
    pub fn starter(model: &str) -> Self {
        Self {
            agents: default_agents(model),
            ..Self::default()
        }
    }

    /// Replace the agent with the same role, or add a new one
    pub fn apply_agent_override(&mut self, agent: Agent) {
        match self.agents.iter_mut().find(|a| a.has_role(&agent.role)) {
            Some(existing) => existing.model = agent.model,
            None => self.agents.push(agent),
        }
    }

    /// Settings for the orchestrator core
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            confidence_threshold: self.orchestrator.confidence_threshold,
            context_limit: self.orchestrator.context_limit,
            request_timeout_secs: self.ollama.request_timeout_secs,
            end_chat_command: self.orchestrator.end_chat_command.clone(),
        }
    }

    /// The configured roster, or the default one on the first installed
    /// model when no agents are configured.
    pub fn roster(&self, installed_models: &[String]) -> anyhow::Result<Roster> {
        let agents = if self.agents.is_empty() {
            let Some(model) = installed_models.first() else {
                bail!("No agents configured and no installed models found");
            };
            default_agents(model)
        } else {
            self.agents.clone()
        };

        Ok(Roster::new(agents)?)
    }
}

/// Command-line flags shared by the front-ends
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Overrides {
    /// Configuration file (default: ./conclave.toml, then the user config dir)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Ollama base URL
    #[arg(long, value_name = "URL")]
    pub ollama_host: Option<String>,

    /// Bind a role to a model; repeatable
    #[arg(long = "agent", value_name = "ROLE=MODEL", value_parser = parse_agent_override)]
    pub agents: Vec<Agent>,

    /// Per-call timeout in seconds; 0 disables it
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Log orchestration details to stderr
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Discover the configuration file and apply command-line overrides
    pub fn load(overrides: &Overrides) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let (mut config, path) = Self::discover(overrides.config.as_deref())?;

        if let Some(host) = &overrides.ollama_host {
            config.ollama.host = host.clone();
        }
        if let Some(timeout) = overrides.timeout {
            config.ollama.request_timeout_secs = timeout;
        }
        for agent in &overrides.agents {
            config.apply_agent_override(agent.clone());
        }

        Ok((config, path))
    }
}

/// Host, Coding and Math, all on `model`
pub fn default_agents(model: &str) -> Vec<Agent> {
    DEFAULT_ROLES
        .iter()
        .map(|role| Agent::new(*role, model))
        .collect()
}

/// Parse a `Role=model` command-line override
pub fn parse_agent_override(arg: &str) -> anyhow::Result<Agent> {
    let Some((role, model)) = arg.split_once('=') else {
        bail!("Expected Role=model, got \"{arg}\"");
    };
    let (role, model) = (role.trim(), model.trim());
    if role.is_empty() || model.is_empty() {
        bail!("Expected Role=model, got \"{arg}\"");
    }
    Ok(Agent::new(role, model))
}
