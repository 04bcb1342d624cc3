//! Chooses the executor and model for each step.

use tracing::{debug, instrument, warn};

use crate::core::memory::SharedContext;
use crate::core::routing::{RouteDecision, avoid_recent_failure, classify_complexity, resolve_route};
use crate::core::types::{ExecutorKind, Step};
use crate::io::ledger::PerformanceLedger;
use crate::io::model::{Model, ModelProvider};
use crate::io::prompt::{PromptBuilder, RouterView};

/// Ledger records per executor shown to the router model.
const HISTORY_LIMIT: usize = 5;
/// Ledger records per executor searched for recent failures.
const FAILURE_WINDOW: usize = 10;

#[derive(Debug, Clone)]
pub struct Router {
    prompts: PromptBuilder,
}

/// Configured model ids per executor, default first.
struct Candidates {
    code: Vec<String>,
    research: Vec<String>,
}

impl Candidates {
    fn for_kind(&self, kind: ExecutorKind) -> &[String] {
        match kind {
            ExecutorKind::Code => &self.code,
            ExecutorKind::Research => &self.research,
        }
    }
}

impl Router {
    pub fn new(prompts: PromptBuilder) -> Self {
        Self { prompts }
    }

    /// Route `step`. With no router model, or when the model fails, the
    /// decision falls back to the code executor's default model.
    #[instrument(skip_all, fields(step_id = step.id))]
    pub fn select(
        &self,
        step: &Step,
        ctx: &SharedContext,
        model: Option<&dyn Model>,
        models: &dyn ModelProvider,
        ledger: &PerformanceLedger,
    ) -> RouteDecision {
        let candidates = Candidates {
            code: models.available_models(ExecutorKind::Code.role()),
            research: models.available_models(ExecutorKind::Research.role()),
        };
        let raw = model
            .map(|model| self.ask(step, ctx, model, &candidates, ledger))
            .unwrap_or_default();
        let decision = resolve_route(&raw, |kind| candidates.for_kind(kind).to_vec());

        let executor = decision.executor;
        let failed = ledger.recent_failed_models(&step.task, executor.name(), FAILURE_WINDOW);
        let routed = avoid_recent_failure(
            decision,
            &models.default_model_id(executor.role()),
            candidates.for_kind(executor),
            &failed,
        );
        debug!(route = %routed.label(), fallback = routed.fallback, "step routed");
        routed
    }

    fn ask(
        &self,
        step: &Step,
        ctx: &SharedContext,
        model: &dyn Model,
        candidates: &Candidates,
        ledger: &PerformanceLedger,
    ) -> String {
        let code_history = ledger.digest(ExecutorKind::Code.name(), HISTORY_LIMIT);
        let research_history = ledger.digest(ExecutorKind::Research.name(), HISTORY_LIMIT);
        let view = RouterView {
            step,
            goal: &ctx.goal,
            files: &ctx.workspace_files,
            complexity: classify_complexity(step),
            code_models: &candidates.code,
            research_models: &candidates.research,
            code_history: &code_history,
            research_history: &research_history,
        };
        match self.prompts.router(&view).and_then(|p| model.invoke(&p)) {
            Ok(answer) => answer,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "router model failed, using fallback");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::io::ledger::{PerformanceRecord, RecordStatus};
    use crate::test_support::{ScriptedModel, ScriptedModels};

    fn provider() -> ScriptedModels {
        ScriptedModels::new()
            .with_models(Role::Code, ["small-coder", "big-coder"])
            .with_models(Role::Research, ["reader"])
    }

    #[test]
    fn follows_a_well_formed_answer() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = PerformanceLedger::open(temp.path(), 5);
        let router = Router::new(PromptBuilder::new(50_000));
        let ctx = SharedContext::new("goal", Vec::new());
        let step = Step::new(1, "Explain results", "");
        let model = ScriptedModel::new("router", ["ResearchExecutor:reader"]);

        let decision = router.select(&step, &ctx, Some(&model), &provider(), &ledger);

        assert_eq!(decision.executor, ExecutorKind::Research);
        assert_eq!(decision.model_id.as_deref(), Some("reader"));
        assert!(model.prompts()[0].contains("Estimated complexity: simple"));
    }

    #[test]
    fn missing_router_model_falls_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = PerformanceLedger::open(temp.path(), 5);
        let router = Router::new(PromptBuilder::new(50_000));
        let ctx = SharedContext::new("goal", Vec::new());

        let decision = router.select(&Step::new(1, "x", ""), &ctx, None, &provider(), &ledger);

        assert_eq!(decision, RouteDecision::fallback());
    }

    #[test]
    fn steers_away_from_a_recently_failed_model() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ledger = PerformanceLedger::open(temp.path(), 100);
        ledger.append(PerformanceRecord::new(
            "Train model",
            "CodeExecutor",
            "big-coder",
            RecordStatus::Failed,
        ));
        let router = Router::new(PromptBuilder::new(50_000));
        let ctx = SharedContext::new("goal", Vec::new());
        let step = Step::new(2, "Train model", "");
        let model = ScriptedModel::new("router", ["CodeExecutor:big-coder"]);

        let decision = router.select(&step, &ctx, Some(&model), &provider(), &ledger);

        assert_eq!(decision.executor, ExecutorKind::Code);
        assert_eq!(decision.model_id, None, "default small-coder has no failure");
        assert!(model.prompts()[0].contains("Model: big-coder | Status: failed"));
    }
}
