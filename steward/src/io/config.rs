//! Engine configuration stored in `steward.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Role;

/// Placeholder in a model command that is replaced by the model id.
pub const MODEL_PLACEHOLDER: &str = "{model}";

/// Engine configuration (TOML).
///
/// Meant to be edited by hand. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StewardConfig {
    /// Ask a human to approve the plan before executing it.
    pub enable_hitl: bool,

    /// Let the router model answer trivial goals directly, skipping planning.
    pub enable_simple_task_check: bool,

    /// Records kept in full when the execution history is compacted.
    pub keep_last_n: usize,

    /// Compact the execution history after this many completed steps.
    pub compress_every: usize,

    /// Recovery replans allowed per run before giving up.
    pub max_replans: u32,

    pub planner_max_attempts: u32,
    pub code_max_attempts: u32,

    /// Ledger records buffered before the file is rewritten.
    pub ledger_batch_size: usize,

    /// Wall-clock limit for one model invocation.
    pub model_timeout_secs: u64,

    /// Wall-clock limit for one generated-code execution.
    pub exec_timeout_secs: u64,

    /// Truncate captured child stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Byte budget for a rendered prompt before sections are dropped.
    pub prompt_budget_bytes: usize,

    /// How often a blocked human-input wait re-checks the stop signal.
    pub input_poll_millis: u64,

    /// Interpreter argv used to run generated code; the script path is appended.
    pub python: Vec<String>,

    pub models: ModelsConfig,
}

/// Model settings per role. `memory` and `reporter` reuse `research` when unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelsConfig {
    pub planner: RoleModels,
    pub router: RoleModels,
    pub code: RoleModels,
    pub research: RoleModels,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<RoleModels>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter: Option<RoleModels>,
}

/// How to reach the models for one role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoleModels {
    /// Command argv; the prompt is written to stdin and the answer read from
    /// stdout. `{model}` is replaced by the model id.
    pub command: Vec<String>,
    /// Default model id.
    pub model_id: String,
    /// Alternatives the router may pick; an entry without a command reuses
    /// the role command.
    pub available_models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelEntry {
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

impl Default for RoleModels {
    fn default() -> Self {
        Self {
            command: vec![
                "ollama".to_string(),
                "run".to_string(),
                MODEL_PLACEHOLDER.to_string(),
            ],
            model_id: "qwen2.5:7b".to_string(),
            available_models: Vec::new(),
        }
    }
}

impl RoleModels {
    /// Every model id the router may name for this role, default first.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids = vec![self.model_id.clone()];
        for entry in &self.available_models {
            if !ids.contains(&entry.model_id) {
                ids.push(entry.model_id.clone());
            }
        }
        ids
    }

    /// Command argv for `model_id`, or `None` when the model is not configured.
    pub fn command_for(&self, model_id: &str) -> Option<Vec<String>> {
        if model_id == self.model_id {
            return Some(self.command.clone());
        }
        let entry = self
            .available_models
            .iter()
            .find(|e| e.model_id == model_id)?;
        if entry.command.is_empty() {
            Some(self.command.clone())
        } else {
            Some(entry.command.clone())
        }
    }

    fn validate(&self, role: &str) -> Result<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(anyhow!("models.{role}.command must be a non-empty array"));
        }
        if self.model_id.trim().is_empty() {
            return Err(anyhow!("models.{role}.model_id must not be empty"));
        }
        if self
            .available_models
            .iter()
            .any(|e| e.model_id.trim().is_empty())
        {
            return Err(anyhow!("models.{role}.available_models entries need a model_id"));
        }
        Ok(())
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            planner: RoleModels::default(),
            router: RoleModels::default(),
            code: RoleModels::default(),
            research: RoleModels::default(),
            memory: None,
            reporter: None,
        }
    }
}

impl ModelsConfig {
    pub fn for_role(&self, role: Role) -> &RoleModels {
        match role {
            Role::Planner => &self.planner,
            Role::Router => &self.router,
            Role::Code => &self.code,
            Role::Research => &self.research,
            Role::Memory => self.memory.as_ref().unwrap_or(&self.research),
            Role::Reporter => self.reporter.as_ref().unwrap_or(&self.research),
        }
    }
}

impl Default for StewardConfig {
    fn default() -> Self {
        Self {
            enable_hitl: false,
            enable_simple_task_check: false,
            keep_last_n: 10,
            compress_every: 5,
            max_replans: 10,
            planner_max_attempts: 4,
            code_max_attempts: 3,
            ledger_batch_size: 5,
            model_timeout_secs: 10 * 60,
            exec_timeout_secs: 60,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 60_000,
            input_poll_millis: 250,
            python: vec!["python3".to_string()],
            models: ModelsConfig::default(),
        }
    }
}

impl StewardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.keep_last_n == 0 {
            return Err(anyhow!("keep_last_n must be > 0"));
        }
        if self.compress_every == 0 {
            return Err(anyhow!("compress_every must be > 0"));
        }
        if self.planner_max_attempts == 0 {
            return Err(anyhow!("planner_max_attempts must be > 0"));
        }
        if self.code_max_attempts == 0 {
            return Err(anyhow!("code_max_attempts must be > 0"));
        }
        if self.ledger_batch_size == 0 {
            return Err(anyhow!("ledger_batch_size must be > 0"));
        }
        if self.model_timeout_secs == 0 {
            return Err(anyhow!("model_timeout_secs must be > 0"));
        }
        if self.exec_timeout_secs == 0 {
            return Err(anyhow!("exec_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.input_poll_millis == 0 {
            return Err(anyhow!("input_poll_millis must be > 0"));
        }
        if self.python.is_empty() || self.python[0].trim().is_empty() {
            return Err(anyhow!("python must be a non-empty array"));
        }
        self.models.planner.validate("planner")?;
        self.models.router.validate("router")?;
        self.models.code.validate("code")?;
        self.models.research.validate("research")?;
        if let Some(memory) = &self.models.memory {
            memory.validate("memory")?;
        }
        if let Some(reporter) = &self.models.reporter {
            reporter.validate("reporter")?;
        }
        Ok(())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn input_poll(&self) -> Duration {
        Duration::from_millis(self.input_poll_millis)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `StewardConfig::default()`.
pub fn load_config(path: &Path) -> Result<StewardConfig> {
    if !path.exists() {
        let cfg = StewardConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StewardConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &StewardConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::fs_util::write_atomic(path, &buf)
}
