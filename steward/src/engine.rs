//! Run orchestration: plan, optional review, the step loop with recovery,
//! and the final report.
//!
//! One [`Engine::run`] owns one [`SharedContext`]. Every model-facing
//! collaborator is reached through a trait object so tests can script the
//! whole run.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::agents::memory::MemoryExtractor;
use crate::agents::reporter::Reporter;
use crate::agents::router::Router;
use crate::agents::{Planner, StepExecutor};
use crate::core::memory::SharedContext;
use crate::core::outcome::{StepVerdict, classify_record, requires_code_escalation};
use crate::core::parse::is_simple_verdict;
use crate::core::plan::SpliceError;
use crate::core::report::{Report, TaskType};
use crate::core::routing::RouteDecision;
use crate::core::types::{ExecutionRecord, ExecutorKind, Role, RunStatus, Step, StepStatus};
use crate::io::config::StewardConfig;
use crate::io::input::{HumanInput, InputReply};
use crate::io::ledger::{CodeExecution, PerformanceLedger, PerformanceRecord, RecordStatus};
use crate::io::model::{Model, ModelProvider};
use crate::io::prompt::PromptBuilder;
use crate::io::workspace::Workspace;
use crate::stop::StopSignal;

/// Ledger attribution for engine-level records.
const SYSTEM: &str = "System";

const REVIEW_PROMPT: &str =
    "Review the plan above. Press Enter to approve, or describe the changes you want:";

/// The model-facing collaborators a run needs.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub models: &'a dyn ModelProvider,
    pub planner: &'a dyn Planner,
    pub code: &'a dyn StepExecutor,
    pub research: &'a dyn StepExecutor,
    pub input: &'a dyn HumanInput,
}

/// Everything a finished run hands back.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub context: SharedContext,
    pub report: Option<Report>,
}

impl RunOutcome {
    pub fn status_line(&self) -> String {
        let done = self.context.plan.completed_count();
        let total = self.context.plan.len();
        match &self.status {
            RunStatus::Completed if total == 0 => "Run completed: answered directly.".to_string(),
            RunStatus::Completed => format!("Run completed: {done}/{total} steps completed."),
            RunStatus::Failed { reason } => format!("Run failed: {reason}"),
            RunStatus::Stopped => format!("Run stopped by user after {done}/{total} steps."),
        }
    }
}

/// Why a run left its happy path early.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Halt {
    Stopped,
    Failed(String),
}

impl From<Halt> for RunStatus {
    fn from(halt: Halt) -> Self {
        match halt {
            Halt::Stopped => RunStatus::Stopped,
            Halt::Failed(reason) => RunStatus::Failed { reason },
        }
    }
}

/// One executor invocation together with the model that served it.
#[derive(Debug)]
struct Invocation {
    record: ExecutionRecord,
    model_id: String,
}

pub struct Engine<'a> {
    config: &'a StewardConfig,
    workspace: &'a Workspace,
    collab: Collaborators<'a>,
    stop: StopSignal,
    ledger: PerformanceLedger,
    prompts: PromptBuilder,
    router: Router,
    memory: MemoryExtractor,
    reporter: Reporter,
}

impl<'a> Engine<'a> {
    pub fn new(
        config: &'a StewardConfig,
        workspace: &'a Workspace,
        collab: Collaborators<'a>,
        stop: StopSignal,
    ) -> Self {
        let prompts = PromptBuilder::new(config.prompt_budget_bytes);
        Self {
            config,
            workspace,
            collab,
            stop,
            ledger: PerformanceLedger::open(workspace.root(), config.ledger_batch_size),
            router: Router::new(prompts.clone()),
            memory: MemoryExtractor::new(prompts.clone()),
            reporter: Reporter::new(prompts.clone()),
            prompts,
        }
    }

    pub fn ledger(&self) -> &PerformanceLedger {
        &self.ledger
    }

    /// Drive one goal to a terminal status. Only workspace plumbing errors
    /// surface as `Err`; everything model-related ends up in the outcome.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub fn run(&mut self, goal: &str) -> Result<RunOutcome> {
        let run_id = format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f"));
        tracing::Span::current().record("run_id", run_id.as_str());

        let mut ctx = SharedContext::new(goal, self.workspace.list_files()?);
        info!(files = ctx.workspace_files.len(), "run started");
        self.ledger.append(
            PerformanceRecord::new(goal, SYSTEM, "-", RecordStatus::Start)
                .input(json!({ "run_id": run_id, "files": ctx.workspace_files })),
        );

        let (status, report) = match self.drive(&mut ctx) {
            Ok(report) => (RunStatus::Completed, Some(report)),
            Err(halt) => (RunStatus::from(halt), None),
        };
        match &status {
            RunStatus::Completed => info!("run completed"),
            RunStatus::Stopped => info!("run stopped by user"),
            RunStatus::Failed { reason } => warn!(reason = %reason, "run failed"),
        }

        let ledger_status = if status.is_completed() {
            RecordStatus::Success
        } else {
            RecordStatus::Failed
        };
        self.ledger.append(
            PerformanceRecord::new(goal, SYSTEM, "-", ledger_status)
                .output(json!({ "run_id": run_id, "status": status })),
        );
        if let Err(err) = self.ledger.flush() {
            warn!(err = %format!("{err:#}"), "failed to flush performance ledger");
        }

        Ok(RunOutcome {
            run_id,
            status,
            context: ctx,
            report,
        })
    }

    fn drive(&mut self, ctx: &mut SharedContext) -> Result<Report, Halt> {
        self.checkpoint()?;
        if self.config.enable_simple_task_check
            && let Some(report) = self.answer_directly(ctx)
        {
            return Ok(report);
        }
        self.plan(ctx)?;
        if self.config.enable_hitl {
            self.review(ctx)?;
        }
        self.execute(ctx)?;
        self.checkpoint()?;
        Ok(self.report(ctx))
    }

    fn checkpoint(&self) -> Result<(), Halt> {
        if self.stop.is_stopped() {
            return Err(Halt::Stopped);
        }
        Ok(())
    }

    fn role_model(&self, role: Role) -> Result<Box<dyn Model>> {
        self.collab.models.model(role, None)
    }

    /// Short-circuit for goals the router model judges trivial.
    fn answer_directly(&mut self, ctx: &SharedContext) -> Option<Report> {
        let judge = self.role_model(Role::Router).ok()?;
        let verdict = self
            .prompts
            .simple_check(&ctx.goal)
            .and_then(|prompt| judge.invoke(&prompt));
        let simple = match verdict {
            Ok(answer) => is_simple_verdict(&answer),
            Err(err) => {
                debug!(err = %format!("{err:#}"), "simple-task check failed, planning instead");
                false
            }
        };
        if !simple {
            return None;
        }

        let answer = self.role_model(Role::Research).and_then(|model| {
            let prompt = self.prompts.direct_answer(&ctx.goal)?;
            Ok((model.invoke(&prompt)?, model.id().to_string()))
        });
        match answer {
            Ok((body, model_id)) => {
                info!("goal answered directly");
                self.ledger.append(
                    PerformanceRecord::new(
                        &ctx.goal,
                        ExecutorKind::Research.name(),
                        model_id,
                        RecordStatus::Success,
                    )
                    .feedback("answered without planning"),
                );
                Some(Report {
                    task_type: TaskType::General,
                    body,
                })
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "direct answer failed, planning instead");
                None
            }
        }
    }

    #[instrument(skip_all)]
    fn plan(&mut self, ctx: &mut SharedContext) -> Result<(), Halt> {
        let model = self
            .role_model(Role::Planner)
            .map_err(|err| Halt::Failed(format!("Planner model unavailable: {err:#}")))?;
        let result = self
            .collab
            .planner
            .create_plan(&ctx.goal, model.as_ref(), &self.stop);
        self.checkpoint()?;

        let status = if result.plan.is_empty() {
            RecordStatus::Failed
        } else {
            RecordStatus::Success
        };
        self.ledger.append(
            PerformanceRecord::new(&ctx.goal, Role::Planner.ledger_name(), model.id(), status)
                .feedback("plan generation")
                .output(json!({ "plan": result.plan, "debug_info": result.debug_info })),
        );
        if result.plan.is_empty() {
            let reason = result
                .debug_info
                .final_error
                .unwrap_or_else(|| "no steps".to_string());
            return Err(Halt::Failed(format!("Planner returned an empty plan: {reason}")));
        }
        info!(steps = result.plan.len(), "plan ready");
        ctx.plan = result.plan;
        Ok(())
    }

    /// Human review loop. Empty input approves; a cancelled wait keeps the
    /// current plan.
    #[instrument(skip_all)]
    fn review(&mut self, ctx: &mut SharedContext) -> Result<(), Halt> {
        loop {
            self.checkpoint()?;
            let prompt = format!("{}\n{REVIEW_PROMPT}", ctx.plan.render());
            match self.collab.input.request_input(&prompt, &self.stop) {
                InputReply::Stop => return Err(Halt::Stopped),
                InputReply::Cancelled => {
                    info!("plan review cancelled, keeping current plan");
                    return Ok(());
                }
                InputReply::Text(text) if text.trim().is_empty() => {
                    info!("plan approved");
                    return Ok(());
                }
                InputReply::Text(feedback) => {
                    self.checkpoint()?;
                    self.refine_plan(ctx, &feedback)?;
                }
            }
        }
    }

    fn refine_plan(&mut self, ctx: &mut SharedContext, feedback: &str) -> Result<(), Halt> {
        let goal_text = match self.prompts.review_goal(ctx, feedback) {
            Ok(text) => text,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not render review request");
                return Ok(());
            }
        };
        let model = self
            .role_model(Role::Planner)
            .map_err(|err| Halt::Failed(format!("Planner model unavailable: {err:#}")))?;
        let result = self
            .collab
            .planner
            .create_plan(&goal_text, model.as_ref(), &self.stop);
        self.checkpoint()?;

        let refined = !result.plan.is_empty();
        self.ledger.append(
            PerformanceRecord::new(
                &ctx.goal,
                Role::Planner.ledger_name(),
                model.id(),
                if refined {
                    RecordStatus::Success
                } else {
                    RecordStatus::Failed
                },
            )
            .feedback(format!("plan review: {feedback}"))
            .output(json!({ "plan": result.plan, "debug_info": result.debug_info })),
        );
        if refined {
            info!(steps = result.plan.len(), "plan refined from review feedback");
            ctx.plan = result.plan;
        } else {
            warn!("planner returned nothing for the review feedback, keeping current plan");
        }
        Ok(())
    }

    /// The step loop. `index` only advances on success; a failure splices a
    /// new suffix in at the same index.
    #[instrument(skip_all)]
    fn execute(&mut self, ctx: &mut SharedContext) -> Result<(), Halt> {
        let mut index = 0;
        let mut replans = 0u32;
        let mut completed = 0usize;

        while index < ctx.plan.len() {
            self.checkpoint()?;
            let step = ctx.plan.steps[index].clone();
            let decision = self.route(ctx, &step);

            ctx.plan.steps[index].status = StepStatus::InProgress;
            let mut invocation = self.invoke(
                decision.executor,
                decision.model_id.as_deref(),
                &step,
                ctx,
            );
            if self.stop.is_stopped() {
                return Err(interrupt(ctx, index));
            }

            if decision.executor == ExecutorKind::Research
                && requires_code_escalation(&invocation.record)
            {
                info!(step_id = step.id, "research executor asked for code, re-dispatching");
                self.log_invocation(
                    &step,
                    &invocation,
                    RecordStatus::Success,
                    "escalated to code execution",
                );
                ctx.apply_output_tags(&invocation.record);
                ctx.execution_history.push(invocation.record);
                invocation = self.invoke(ExecutorKind::Code, None, &step, ctx);
                if self.stop.is_stopped() {
                    return Err(interrupt(ctx, index));
                }
            }

            let verdict = classify_record(&invocation.record);
            ctx.apply_output_tags(&invocation.record);
            ctx.execution_history.push(invocation.record.clone());

            match verdict {
                StepVerdict::Succeeded { result } => {
                    self.log_invocation(&step, &invocation, RecordStatus::Success, "");
                    let current = &mut ctx.plan.steps[index];
                    current.status = StepStatus::Completed;
                    current.result = result;
                    info!(step_id = step.id, task = %step.task, "step completed");

                    self.absorb_memory(ctx, &step, &invocation.record);
                    completed += 1;
                    if completed.checked_rem(self.config.compress_every) == Some(0) {
                        let folded = ctx.compress_execution_history(self.config.keep_last_n);
                        debug!(folded, "execution history compacted");
                    }
                    index += 1;
                }
                StepVerdict::Failed { error } => {
                    self.log_invocation(&step, &invocation, RecordStatus::Failed, &error);
                    ctx.plan.steps[index].status = StepStatus::Failed;
                    warn!(step_id = step.id, task = %step.task, error = %error, "step failed");
                    self.recover(ctx, index, &step, &error, &mut replans)?;
                }
            }
        }
        Ok(())
    }

    fn route(&mut self, ctx: &SharedContext, step: &Step) -> RouteDecision {
        let router_model = match self.role_model(Role::Router) {
            Ok(model) => Some(model),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "router model unavailable");
                None
            }
        };
        let decision = self.router.select(
            step,
            ctx,
            router_model.as_deref(),
            self.collab.models,
            &self.ledger,
        );
        info!(
            step_id = step.id,
            route = %decision.label(),
            fallback = decision.fallback,
            "step routed"
        );
        let router_id = router_model.as_ref().map_or("-", |m| m.id()).to_string();
        let entry = PerformanceRecord::new(
            &step.task,
            Role::Router.ledger_name(),
            router_id,
            RecordStatus::Success,
        );
        self.ledger
            .append(entry.feedback(decision.label()).output(json!(decision)));
        decision
    }

    /// Build the model (falling back to the executor default) and run the
    /// executor. A model that cannot be built yields an error record.
    fn invoke(
        &self,
        kind: ExecutorKind,
        model_id: Option<&str>,
        step: &Step,
        ctx: &SharedContext,
    ) -> Invocation {
        let model = match self.step_model(kind, model_id) {
            Ok(model) => model,
            Err(err) => {
                warn!(executor = %kind, err = %format!("{err:#}"), "no usable model");
                return Invocation {
                    record: ExecutionRecord::new(step.id, kind.name())
                        .with_error(format!("Model unavailable: {err:#}")),
                    model_id: model_id.unwrap_or("default").to_string(),
                };
            }
        };
        let executor = match kind {
            ExecutorKind::Code => self.collab.code,
            ExecutorKind::Research => self.collab.research,
        };
        let record = executor.run(step, ctx, model.as_ref(), &self.stop);
        Invocation {
            record,
            model_id: model.id().to_string(),
        }
    }

    fn step_model(&self, kind: ExecutorKind, model_id: Option<&str>) -> Result<Box<dyn Model>> {
        let role = kind.role();
        if let Some(id) = model_id {
            match self.collab.models.model(role, Some(id)) {
                Ok(model) => return Ok(model),
                Err(err) => warn!(
                    model = id,
                    err = %format!("{err:#}"),
                    "falling back to default model"
                ),
            }
        }
        self.collab.models.model(role, None)
    }

    fn log_invocation(
        &mut self,
        step: &Step,
        invocation: &Invocation,
        status: RecordStatus,
        feedback: &str,
    ) {
        let record = &invocation.record;
        let mut entry = PerformanceRecord::new(
            &step.task,
            &record.executor_name,
            &invocation.model_id,
            status,
        )
        .feedback(feedback)
        .input(json!({ "step_id": step.id, "description": step.description }))
        .output(json!({
            "content": record.content,
            "output": record.output,
            "error": record.error,
        }));
        if let Some(code) = &record.code {
            entry = entry.code(CodeExecution {
                code: code.clone(),
                output: record.output.clone(),
                artifacts: record.artifacts.clone(),
            });
        }
        self.ledger.append(entry);
    }

    fn absorb_memory(&mut self, ctx: &mut SharedContext, step: &Step, record: &ExecutionRecord) {
        let model = match self.role_model(Role::Memory) {
            Ok(model) => model,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "memory model unavailable, skipping extraction");
                return;
            }
        };
        let update = self.memory.extract(step, record, ctx, model.as_ref());
        if update.is_empty() {
            return;
        }
        let workspace = self.workspace;
        let merged = ctx.merge_update(step.id, update, |path| workspace.verified_file(path));
        for file in &merged.dropped_files {
            warn!(step_id = step.id, file = %file, "dropping claimed file that does not exist");
        }
        let status = if merged.dropped_files.is_empty() {
            RecordStatus::Success
        } else {
            RecordStatus::Failed
        };
        let feedback = if merged.dropped_files.is_empty() {
            String::new()
        } else {
            format!("unverified files dropped: {}", merged.dropped_files.join(", "))
        };
        self.ledger.append(
            PerformanceRecord::new(&step.task, Role::Memory.ledger_name(), model.id(), status)
                .feedback(feedback)
                .output(json!(merged)),
        );
    }

    /// Ask the planner for a replacement suffix starting at the failed step.
    #[instrument(skip_all, fields(step_id = step.id))]
    fn recover(
        &mut self,
        ctx: &mut SharedContext,
        index: usize,
        step: &Step,
        error: &str,
        replans: &mut u32,
    ) -> Result<(), Halt> {
        if *replans >= self.config.max_replans {
            return Err(Halt::Failed(format!(
                "Recovery limit reached after {} replans; last error: {error}",
                self.config.max_replans
            )));
        }
        *replans += 1;
        self.checkpoint()?;

        let goal_text = self
            .prompts
            .replan_goal(ctx, &step.task, error)
            .map_err(|err| Halt::Failed(format!("Could not build recovery request: {err:#}")))?;
        let model = self
            .role_model(Role::Planner)
            .map_err(|err| Halt::Failed(format!("Planner model unavailable: {err:#}")))?;
        let result = self
            .collab
            .planner
            .create_plan(&goal_text, model.as_ref(), &self.stop);
        self.checkpoint()?;

        let status = if result.plan.is_empty() {
            RecordStatus::Failed
        } else {
            RecordStatus::Success
        };
        self.ledger.append(
            PerformanceRecord::new(&step.task, Role::Planner.ledger_name(), model.id(), status)
                .feedback(format!("recovery replan {}", *replans))
                .input(json!({ "failed_step": step.id, "error": error }))
                .output(json!({ "plan": result.plan, "debug_info": result.debug_info })),
        );

        let final_error = result.debug_info.final_error.clone();
        ctx.plan = ctx
            .plan
            .splice(index, result.plan.steps)
            .map_err(|err| match err {
                SpliceError::EmptyReplacement => Halt::Failed(format!(
                    "Recovery failed: planner returned no steps ({})",
                    final_error.as_deref().unwrap_or("no reason given")
                )),
                other => Halt::Failed(format!("Recovery failed: {other}")),
            })?;
        info!(
            replan = *replans,
            steps = ctx.plan.len(),
            "plan spliced after failure"
        );
        Ok(())
    }

    fn report(&mut self, ctx: &SharedContext) -> Report {
        match self.role_model(Role::Reporter) {
            Ok(model) => {
                let report = self.reporter.generate(ctx, model.as_ref());
                let entry = PerformanceRecord::new(
                    &ctx.goal,
                    Role::Reporter.ledger_name(),
                    model.id(),
                    RecordStatus::Success,
                );
                self.ledger.append(entry.feedback(report.task_type.label()));
                report
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "reporter model unavailable");
                Report {
                    task_type: TaskType::General,
                    body: format!("Error generating report: {err:#}"),
                }
            }
        }
    }
}

/// Put an interrupted step back to pending.
fn interrupt(ctx: &mut SharedContext, index: usize) -> Halt {
    ctx.plan.steps[index].status = StepStatus::Pending;
    info!(step_id = ctx.plan.steps[index].id, "stop requested, step reset to pending");
    Halt::Stopped
}
