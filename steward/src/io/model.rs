//! Language-model boundary.
//!
//! The engine only ever sees [`Model::invoke`]. [`CommandModel`] shells out to
//! a configured CLI; tests substitute scripted models through
//! [`ModelProvider`].

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tracing::{debug, instrument};

use crate::core::types::Role;
use crate::io::config::{MODEL_PLACEHOLDER, ModelsConfig};
use crate::io::process::run_command_with_timeout;

/// An opaque text-in, text-out model.
pub trait Model {
    fn id(&self) -> &str;
    fn invoke(&self, prompt: &str) -> Result<String>;
}

/// Builds models for a role, optionally a specific configured model id.
pub trait ModelProvider {
    /// `model_id == None` selects the role default. Unknown ids are an error
    /// so the caller can fall back to the default.
    fn model(&self, role: Role, model_id: Option<&str>) -> Result<Box<dyn Model>>;

    /// Model ids the router may choose for `role`, default first.
    fn available_models(&self, role: Role) -> Vec<String>;

    fn default_model_id(&self, role: Role) -> String {
        self.available_models(role).into_iter().next().unwrap_or_default()
    }
}

/// Model backed by an external command: prompt on stdin, answer on stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    model_id: String,
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModel {
    /// `argv` may contain `{model}`, which is replaced by `model_id`.
    pub fn new(
        model_id: impl Into<String>,
        argv: Vec<String>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<Self> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            bail!("model command must be a non-empty array");
        }
        Ok(Self {
            model_id: model_id.into(),
            argv,
            timeout,
            output_limit_bytes,
        })
    }

    fn command(&self) -> Command {
        let mut args = self
            .argv
            .iter()
            .map(|a| a.replace(MODEL_PLACEHOLDER, &self.model_id));
        // argv is validated non-empty in `new`.
        let program = args.next().unwrap_or_default();
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd
    }
}

impl Model for CommandModel {
    fn id(&self) -> &str {
        &self.model_id
    }

    #[instrument(skip_all, fields(model = %self.model_id, prompt_bytes = prompt.len()))]
    fn invoke(&self, prompt: &str) -> Result<String> {
        let output = run_command_with_timeout(
            self.command(),
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )?;
        if output.timed_out {
            bail!(
                "model {} timed out after {}s",
                self.model_id,
                self.timeout.as_secs()
            );
        }
        if !output.status.success() {
            return Err(anyhow!(
                "model {} exited with {}: {}",
                self.model_id,
                output.status,
                output.stderr_text().trim()
            ));
        }
        let answer = output.stdout_text().trim().to_string();
        debug!(answer_bytes = answer.len(), "model answered");
        Ok(answer)
    }
}

/// Provider reading role settings from `steward.toml`.
#[derive(Debug, Clone)]
pub struct ConfiguredModels {
    models: ModelsConfig,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ConfiguredModels {
    pub fn new(models: ModelsConfig, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            models,
            timeout,
            output_limit_bytes,
        }
    }
}

impl ModelProvider for ConfiguredModels {
    fn model(&self, role: Role, model_id: Option<&str>) -> Result<Box<dyn Model>> {
        let settings = self.models.for_role(role);
        let model_id = model_id.unwrap_or(&settings.model_id);
        let argv = settings
            .command_for(model_id)
            .ok_or_else(|| anyhow!("model '{model_id}' is not configured for {role}"))?;
        let model = CommandModel::new(model_id, argv, self.timeout, self.output_limit_bytes)?;
        Ok(Box::new(model))
    }

    fn available_models(&self, role: Role) -> Vec<String> {
        self.models.for_role(role).model_ids()
    }
}
