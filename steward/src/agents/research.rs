//! Executor that answers a step in prose from the history and workspace.

use tracing::{instrument, warn};

use crate::agents::StepExecutor;
use crate::core::memory::SharedContext;
use crate::core::types::{ExecutionRecord, ExecutorKind, Step};
use crate::io::model::Model;
use crate::io::prompt::{PromptBuilder, StepView};
use crate::io::workspace::Workspace;
use crate::stop::StopSignal;

#[derive(Debug, Clone)]
pub struct ResearchExecutor {
    workspace: Workspace,
    prompts: PromptBuilder,
}

impl ResearchExecutor {
    pub fn new(workspace: Workspace, prompts: PromptBuilder) -> Self {
        Self { workspace, prompts }
    }
}

impl StepExecutor for ResearchExecutor {
    #[instrument(skip_all, fields(step_id = step.id, model = %model.id()))]
    fn run(
        &self,
        step: &Step,
        ctx: &SharedContext,
        model: &dyn Model,
        stop: &StopSignal,
    ) -> ExecutionRecord {
        let record = ExecutionRecord::new(step.id, ExecutorKind::Research.name());
        if stop.is_stopped() {
            return record.with_error("Execution stopped by user.");
        }
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
        let prompt = match self.prompts.research(&view) {
            Ok(prompt) => prompt,
            Err(err) => {
                return record.with_error(format!("Failed to render research prompt: {err:#}"));
            }
        };
        match model.invoke(&prompt) {
            Ok(answer) => record.with_content(answer),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "research model failed");
                record.with_error(format!("Model invocation failed: {err:#}"))
            }
        }
    }
}
