//! Model-backed planner with schema-validated output and bounded retries.

use tracing::{info, instrument, warn};

use crate::agents::{PlanAttempt, PlanDebugInfo, PlanResult, Planner};
use crate::core::parse::parse_plan_response;
use crate::io::model::Model;
use crate::io::prompt::PromptBuilder;
use crate::io::workspace::Workspace;
use crate::stop::StopSignal;

#[derive(Debug, Clone)]
pub struct LlmPlanner {
    workspace: Workspace,
    prompts: PromptBuilder,
    max_attempts: u32,
}

impl LlmPlanner {
    pub fn new(workspace: Workspace, prompts: PromptBuilder, max_attempts: u32) -> Self {
        Self {
            workspace,
            prompts,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Planner for LlmPlanner {
    #[instrument(skip_all, fields(model = %model.id(), max_attempts = self.max_attempts))]
    fn create_plan(&self, goal: &str, model: &dyn Model, stop: &StopSignal) -> PlanResult {
        let mut debug_info = PlanDebugInfo::default();
        let files = self.workspace.list_files().unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "could not list workspace files");
            Vec::new()
        });
        let previews = self.workspace.csv_previews().unwrap_or_default();

        let mut feedback: Option<String> = None;
        for attempt in 1..=self.max_attempts {
            if stop.is_stopped() {
                debug_info.final_error = Some("Planning stopped by user.".to_string());
                return PlanResult::empty(debug_info);
            }
            let prompt = match self
                .prompts
                .planner(goal, &files, &previews, feedback.as_deref())
            {
                Ok(prompt) => prompt,
                Err(err) => {
                    debug_info.final_error =
                        Some(format!("Failed to render planner prompt: {err:#}"));
                    return PlanResult::empty(debug_info);
                }
            };
            let error = match model.invoke(&prompt) {
                Ok(response) => match parse_plan_response(&response) {
                    Ok(plan) => {
                        info!(attempt, steps = plan.len(), "plan created");
                        return PlanResult { plan, debug_info };
                    }
                    Err(err) => format!("{err:#}"),
                },
                Err(err) => format!("Model invocation failed: {err:#}"),
            };
            warn!(attempt, error = %error, "planner attempt rejected");
            debug_info.attempts.push(PlanAttempt {
                attempt,
                error: error.clone(),
            });
            feedback = Some(error);
        }

        debug_info.final_error = Some(format!(
            "No valid plan after {} attempts: {}",
            self.max_attempts,
            feedback.unwrap_or_default()
        ));
        PlanResult::empty(debug_info)
    }
}
