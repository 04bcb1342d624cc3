//! Final report: classify the run, then fill the matching outline.

use tracing::{info, instrument, warn};

use crate::core::memory::SharedContext;
use crate::core::report::{Report, TaskType};
use crate::io::model::Model;
use crate::io::prompt::PromptBuilder;

#[derive(Debug, Clone)]
pub struct Reporter {
    prompts: PromptBuilder,
}

impl Reporter {
    pub fn new(prompts: PromptBuilder) -> Self {
        Self { prompts }
    }

    /// Classification failures fall back to [`TaskType::General`].
    pub fn classify(&self, history: &str, model: &dyn Model) -> TaskType {
        let answer = self
            .prompts
            .classify(history)
            .and_then(|prompt| model.invoke(&prompt));
        match answer {
            Ok(answer) => TaskType::from_label(&answer),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "task classification failed");
                TaskType::General
            }
        }
    }

    /// Never fails: a generation error becomes the report body.
    #[instrument(skip_all, fields(model = %model.id()))]
    pub fn generate(&self, ctx: &SharedContext, model: &dyn Model) -> Report {
        let history = ctx.project_history();
        let task_type = self.classify(&history, model);
        info!(task_type = %task_type, "writing final report");
        let body = self
            .prompts
            .report(ctx, task_type.label(), task_type.outline(), &history)
            .and_then(|prompt| model.invoke(&prompt))
            .unwrap_or_else(|err| {
                warn!(err = %format!("{err:#}"), "report generation failed");
                format!("Error generating report: {err:#}")
            });
        Report { task_type, body }
    }
}
