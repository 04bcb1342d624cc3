//! Executor that asks a model for Python, runs it, and retries on failure.

use tracing::{debug, info, instrument, warn};

use crate::agents::StepExecutor;
use crate::core::memory::SharedContext;
use crate::core::outcome::output_error_marker;
use crate::core::parse::extract_code_block;
use crate::core::types::{ExecutionRecord, ExecutorKind, Step};
use crate::io::model::Model;
use crate::io::prompt::{CodeRetry, PromptBuilder, StepView};
use crate::io::workspace::Workspace;
use crate::stop::StopSignal;

const NO_CODE_ERROR: &str = "No ```python code block found in the model response.";

/// Result of one generate-and-run attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptOutcome {
    Succeeded,
    /// Try again with feedback about what went wrong.
    Retry(RetryFeedback),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct RetryFeedback {
    code: String,
    output: String,
    hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CodeExecutor {
    workspace: Workspace,
    prompts: PromptBuilder,
    max_attempts: u32,
}

impl CodeExecutor {
    pub fn new(workspace: Workspace, prompts: PromptBuilder, max_attempts: u32) -> Self {
        Self {
            workspace,
            prompts,
            max_attempts: max_attempts.max(1),
        }
    }

    fn attempt(
        &self,
        step: &Step,
        attempt: u32,
        prompt: &str,
        model: &dyn Model,
        record: &mut ExecutionRecord,
    ) -> AttemptOutcome {
        let response = match model.invoke(prompt) {
            Ok(text) => text,
            Err(err) => {
                warn!(err = %format!("{err:#}"), attempt, "code model failed");
                record.error = Some(format!("Model invocation failed: {err:#}"));
                return AttemptOutcome::Retry(RetryFeedback::default());
            }
        };
        record.content = response;

        let Some(code) = extract_code_block(&record.content) else {
            record.error = Some(NO_CODE_ERROR.to_string());
            return AttemptOutcome::Retry(RetryFeedback {
                output: NO_CODE_ERROR.to_string(),
                ..RetryFeedback::default()
            });
        };

        let script = format!("tmp/step_{}_attempt_{}.py", step.id, attempt);
        let output = match self.workspace.execute_python(&code, &script) {
            Ok(output) => output,
            Err(err) => format!("Error: failed to run generated code: {err:#}"),
        };
        record.code = Some(code.clone());
        record.output = Some(output.clone());
        record.artifacts.push(script);

        match output_error_marker(&output) {
            None => {
                record.error = None;
                AttemptOutcome::Succeeded
            }
            Some(marker) => {
                debug!(marker, attempt, "generated code failed");
                record.error = Some(output.clone());
                let hint = output
                    .contains("FileNotFoundError")
                    .then(|| self.file_hint());
                AttemptOutcome::Retry(RetryFeedback { code, output, hint })
            }
        }
    }

    fn file_hint(&self) -> String {
        match self.workspace.list_files() {
            Ok(files) if !files.is_empty() => format!(
                "Use one of the existing files: {}",
                files.join(", ")
            ),
            Ok(_) => "The workspace has no files yet; create the data you need.".to_string(),
            Err(err) => format!("Could not list workspace files: {err:#}"),
        }
    }
}

impl StepExecutor for CodeExecutor {
    #[instrument(skip_all, fields(step_id = step.id, model = %model.id()))]
    fn run(
        &self,
        step: &Step,
        ctx: &SharedContext,
        model: &dyn Model,
        stop: &StopSignal,
    ) -> ExecutionRecord {
        let mut record = ExecutionRecord::new(step.id, ExecutorKind::Code.name());
        let previews = self.workspace.csv_previews().unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "csv previews unavailable");
            String::new()
        });
        let view = StepView {
            step,
            context: ctx,
            files: &ctx.workspace_files,
            previews: &previews,
        };

        let mut feedback: Option<RetryFeedback> = None;
        for attempt in 0..self.max_attempts {
            if stop.is_stopped() {
                record.error = Some("Execution stopped by user.".to_string());
                return record;
            }
            let retry = feedback.as_ref().filter(|f| !f.output.is_empty());
            let retry = retry.map(|f| CodeRetry {
                code: &f.code,
                output: &f.output,
                hint: f.hint.as_deref(),
            });
            let prompt = match self.prompts.code(&view, retry.as_ref()) {
                Ok(prompt) => prompt,
                Err(err) => {
                    record.error = Some(format!("Failed to render code prompt: {err:#}"));
                    return record;
                }
            };
            match self.attempt(step, attempt, &prompt, model, &mut record) {
                AttemptOutcome::Succeeded => {
                    info!(attempt, "code step succeeded");
                    return record;
                }
                AttemptOutcome::Retry(next) => feedback = Some(next),
            }
        }
        warn!(attempts = self.max_attempts, "code step exhausted its attempts");
        record
    }
}
