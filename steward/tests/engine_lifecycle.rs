//! Run-level tests driving the engine with scripted collaborators.
//!
//! Each test wires scripted models, planner, executors and human input into
//! an [`Engine`] over a temporary workspace and checks the terminal outcome,
//! the plan, the shared context and the performance ledger.

use std::fs;

use serde_json::{Value, json};
use tempfile::TempDir;

use steward::core::report::TaskType;
use steward::core::types::{ExecutorKind, Role, RunStatus, StepStatus};
use steward::engine::{Collaborators, Engine, RunOutcome};
use steward::io::config::StewardConfig;
use steward::io::input::InputReply;
use steward::io::ledger::{LEDGER_FILE_NAME, PerformanceRecord, RecordStatus};
use steward::io::workspace::Workspace;
use steward::stop::StopSignal;
use steward::test_support::{
    ScriptedExecutor, ScriptedInput, ScriptedModel, ScriptedModels, ScriptedPlanner,
    content_record, error_record, output_record, plan_of,
};

const GOAL: &str = "Analyze sales.csv and summarize revenue by region";

struct Fixture {
    _temp: TempDir,
    workspace: Workspace,
    config: StewardConfig,
}

fn fixture() -> Fixture {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace = Workspace::open(temp.path()).expect("workspace");
    Fixture {
        _temp: temp,
        workspace,
        config: StewardConfig::default(),
    }
}

struct Doubles {
    models: ScriptedModels,
    planner: ScriptedPlanner,
    code: ScriptedExecutor,
    research: ScriptedExecutor,
    input: ScriptedInput,
}

impl Doubles {
    fn new(planner: ScriptedPlanner) -> Self {
        Self {
            models: ScriptedModels::new(),
            planner,
            code: ScriptedExecutor::new(ExecutorKind::Code, Vec::new()),
            research: ScriptedExecutor::new(ExecutorKind::Research, Vec::new()),
            input: ScriptedInput::default(),
        }
    }

    fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            models: &self.models,
            planner: &self.planner,
            code: &self.code,
            research: &self.research,
            input: &self.input,
        }
    }
}

fn run(fx: &Fixture, doubles: &Doubles, stop: &StopSignal) -> (RunOutcome, Vec<PerformanceRecord>) {
    let mut engine = Engine::new(&fx.config, &fx.workspace, doubles.collaborators(), stop.clone());
    let outcome = engine.run(GOAL).expect("run");
    let records = engine.ledger().records().to_vec();
    (outcome, records)
}

fn statuses(outcome: &RunOutcome) -> Vec<StepStatus> {
    outcome.context.plan.steps.iter().map(|s| s.status).collect()
}

fn tasks(outcome: &RunOutcome) -> Vec<String> {
    outcome
        .context
        .plan
        .steps
        .iter()
        .map(|s| s.task.clone())
        .collect()
}

/// Three steps, each succeeding first time; the reporter runs exactly once.
///
/// The reporter model answers the classification prompt and then the report
/// prompt, so two prompts total.
#[test]
fn linear_plan_completes_and_reports_once() {
    let fx = fixture();
    let reporter = ScriptedModel::new("writer", ["Analysis", "# Revenue by region"]);
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&[
        "Load data",
        "Aggregate",
        "Summarize",
    ])]));
    doubles.models = ScriptedModels::new().with_model(Role::Reporter, reporter.clone());

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(statuses(&outcome), vec![StepStatus::Completed; 3]);
    assert_eq!(outcome.context.execution_history.len(), 3);
    let report = outcome.report.as_ref().expect("report");
    assert_eq!(report.task_type, TaskType::Analysis);
    assert_eq!(report.body, "# Revenue by region");
    assert_eq!(reporter.prompts().len(), 2);
    assert_eq!(outcome.status_line(), "Run completed: 3/3 steps completed.");
    assert_eq!(doubles.code.calls().len(), 3);
    assert!(doubles.research.calls().is_empty());
}

#[test]
fn output_tags_land_in_shared_state() {
    let fx = fixture();
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["Fit model"])]));
    doubles.code = ScriptedExecutor::new(
        ExecutorKind::Code,
        vec![output_record("METRIC: rmse=0.42\nOUTPUT_FILE: predictions.csv\n")],
    );

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Completed);
    let state = &outcome.context.shared_state;
    assert_eq!(state.get("rmse"), Some(&json!("0.42")));
    assert_eq!(state.get("last_output_file"), Some(&json!("predictions.csv")));
}

/// A research answer carrying the escalation sentinel is kept in history and
/// the same step is re-run by the code executor on its default model.
#[test]
fn research_escalates_to_code() {
    let fx = fixture();
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["Count rows"])]));
    doubles.models = ScriptedModels::new()
        .with_models(Role::Research, ["reader"])
        .with_model(
            Role::Router,
            ScriptedModel::new("router", ["ResearchExecutor:reader"]),
        );
    doubles.research = ScriptedExecutor::new(
        ExecutorKind::Research,
        vec![content_record("I cannot see the file. TASK_REQUIRES_CODE_AGENT")],
    );

    let (outcome, records) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Completed);
    let executors: Vec<&str> = outcome
        .context
        .execution_history
        .iter()
        .map(|r| r.executor_name.as_str())
        .collect();
    assert_eq!(executors, vec!["ResearchExecutor", "CodeExecutor"]);
    assert_eq!(doubles.research.calls(), vec![(1, "reader".to_string())]);
    assert_eq!(doubles.code.calls(), vec![(1, "code-default".to_string())]);
    assert_eq!(outcome.context.plan.steps[0].result.as_deref(), Some("done"));
    assert!(records.iter().any(|r| r.executor_name == "ResearchExecutor"
        && r.feedback.contains("escalated")));
}

/// Stop raised while the first step's memory is extracted: the loop halts
/// before step 2 and no report is produced.
#[test]
fn stop_between_steps_leaves_rest_pending() {
    let fx = fixture();
    let stop = StopSignal::new();
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["A", "B", "C"])]));
    doubles.models = ScriptedModels::new().with_model(
        Role::Memory,
        ScriptedModel::new("memory", Vec::<String>::new()).stop_on_call(1, &stop),
    );

    let (outcome, records) = run(&fx, &doubles, &stop);

    assert_eq!(outcome.status, RunStatus::Stopped);
    assert!(outcome.report.is_none());
    assert_eq!(
        statuses(&outcome),
        vec![StepStatus::Completed, StepStatus::Pending, StepStatus::Pending]
    );
    assert_eq!(doubles.code.calls().len(), 1);
    assert_eq!(outcome.status_line(), "Run stopped by user after 1/3 steps.");
    assert_eq!(records.last().map(|r| r.status), Some(RecordStatus::Failed));
}

/// Stop raised inside an executor discards that invocation and puts the step
/// back to pending.
#[test]
fn stop_during_step_resets_it_to_pending() {
    let fx = fixture();
    let stop = StopSignal::new();
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["A", "B", "C"])]));
    doubles.code = ScriptedExecutor::new(ExecutorKind::Code, Vec::new()).stop_on_call(2, &stop);

    let (outcome, _) = run(&fx, &doubles, &stop);

    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(
        statuses(&outcome),
        vec![StepStatus::Completed, StepStatus::Pending, StepStatus::Pending]
    );
    assert_eq!(outcome.context.execution_history.len(), 1);
}

/// A failed step is replaced by the recovery plan; the completed prefix is
/// untouched and ids continue from it.
///
/// ```text
/// 1. Load        ok
/// 2. Train       fails -> replan
/// 2. Fix columns ok
/// 3. Train again ok
/// ```
#[test]
fn failed_step_is_replaced_by_recovery_plan() {
    let fx = fixture();
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![
        plan_of(&["Load", "Train", "Report"]),
        plan_of(&["Fix columns", "Train again"]),
    ]));
    doubles.code = ScriptedExecutor::new(
        ExecutorKind::Code,
        vec![
            output_record("loaded 120 rows"),
            error_record("KeyError: 'revenue'"),
        ],
    );

    let (outcome, records) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(tasks(&outcome), vec!["Load", "Fix columns", "Train again"]);
    let ids: Vec<u32> = outcome.context.plan.steps.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(statuses(&outcome), vec![StepStatus::Completed; 3]);
    assert_eq!(outcome.context.execution_history.len(), 4);

    let goals = doubles.planner.goals();
    assert_eq!(goals.len(), 2);
    assert!(goals[1].contains("Train"));
    assert!(goals[1].contains("KeyError: 'revenue'"));
    assert!(records.iter().any(|r| r.status == RecordStatus::Failed
        && r.executor_name == "CodeExecutor"
        && r.feedback.contains("KeyError")));
}

#[test]
fn empty_recovery_plan_fails_the_run() {
    let fx = fixture();
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["Load"])]));
    doubles.code = ScriptedExecutor::new(ExecutorKind::Code, vec![error_record("boom")]);

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    match &outcome.status {
        RunStatus::Failed { reason } => assert!(reason.contains("Recovery failed"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(outcome.report.is_none());
    assert_eq!(statuses(&outcome), vec![StepStatus::Failed]);
}

#[test]
fn replan_limit_ends_the_run() {
    let mut fx = fixture();
    fx.config.max_replans = 1;
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![
        plan_of(&["A"]),
        plan_of(&["A retry"]),
        plan_of(&["never used"]),
    ]));
    doubles.code = ScriptedExecutor::new(
        ExecutorKind::Code,
        vec![error_record("first"), error_record("second")],
    );

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    match &outcome.status {
        RunStatus::Failed { reason } => assert!(reason.contains("Recovery limit"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(doubles.planner.goals().len(), 2);
}

#[test]
fn empty_initial_plan_fails_the_run() {
    let fx = fixture();
    let doubles = Doubles::new(ScriptedPlanner::new(Vec::new()));

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    match &outcome.status {
        RunStatus::Failed { reason } => assert!(reason.contains("empty plan"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(doubles.code.calls().is_empty());
}

#[test]
fn unparseable_route_falls_back_to_code_default() {
    let fx = fixture();
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["Explain"])]));
    doubles.models = ScriptedModels::new().with_model(
        Role::Router,
        ScriptedModel::new("router", ["I would use the research one"]),
    );

    let (outcome, records) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(doubles.research.calls().is_empty());
    assert_eq!(doubles.code.calls(), vec![(1, "code-default".to_string())]);
    assert!(records.iter().any(|r| r.executor_name == "Router"
        && r.feedback == "CodeExecutor:default"));
}

#[test]
fn broken_model_falls_back_to_executor_default() {
    let fx = fixture();
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["Train"])]));
    doubles.models = ScriptedModels::new()
        .with_models(Role::Code, ["small-coder", "big-coder"])
        .with_broken("big-coder")
        .with_model(
            Role::Router,
            ScriptedModel::new("router", ["CodeExecutor:big-coder"]),
        );

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(doubles.code.calls(), vec![(1, "small-coder".to_string())]);
    let requested: Vec<Option<String>> = doubles
        .models
        .requests()
        .into_iter()
        .filter(|(role, _)| *role == Role::Code)
        .map(|(_, id)| id)
        .collect();
    assert_eq!(requested, vec![Some("big-coder".to_string()), None]);
}

/// Files claimed by the memory model are tracked only when they exist.
#[test]
fn memory_update_drops_unverified_files() {
    let fx = fixture();
    fs::write(fx.workspace.root().join("clean.csv"), "region,revenue\n").expect("write");
    let memory = ScriptedModel::new(
        "memory",
        [concat!(
            r#"{"new_files": ["clean.csv", "ghost.csv"], "#,
            r#""summary": "Cleaned 10 rows", "metrics": {"rows": 10}}"#
        )],
    );
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["Clean"])]));
    doubles.models = ScriptedModels::new().with_model(Role::Memory, memory);

    let (outcome, records) = run(&fx, &doubles, &StopSignal::new());

    let ctx = &outcome.context;
    assert!(ctx.workspace_files.iter().any(|f| f == "clean.csv"));
    assert!(!ctx.workspace_files.iter().any(|f| f == "ghost.csv"));
    assert_eq!(ctx.shared_state.get("rows"), Some(&json!(10)));
    assert_eq!(ctx.plan.steps[0].result.as_deref(), Some("Cleaned 10 rows"));
    assert!(records.iter().any(|r| r.executor_name == "MemoryExtractor"
        && r.status == RecordStatus::Failed
        && r.feedback.contains("ghost.csv")));
}

/// An absolute path under the root and a `./` path name the same file as
/// its plain relative form, so the file is tracked once under that form.
#[test]
fn memory_update_tracks_claimed_paths_in_relative_form() {
    let fx = fixture();
    let absolute = fx.workspace.root().join("clean.csv");
    fs::write(&absolute, "region,revenue\n").expect("write");
    let claimed = json!({
        "new_files": [absolute.to_str().expect("utf8 path"), "./clean.csv"],
        "summary": "Cleaned",
    });
    let memory = ScriptedModel::new("memory", [claimed.to_string()]);
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["Clean"])]));
    doubles.models = ScriptedModels::new().with_model(Role::Memory, memory);

    let (outcome, records) = run(&fx, &doubles, &StopSignal::new());

    let files = &outcome.context.workspace_files;
    assert_eq!(files.iter().filter(|f| f.as_str() == "clean.csv").count(), 1);
    assert!(files.iter().all(|f| f != "./clean.csv" && !f.starts_with('/')));
    assert!(records.iter().any(|r| r.executor_name == "MemoryExtractor"
        && r.status == RecordStatus::Success));
}

/// With `keep_last_n = 2` the fifth completion folds the three oldest
/// records into summary lines; the sixth does not trigger another pass.
#[test]
fn history_is_compacted_every_few_completions() {
    let mut fx = fixture();
    fx.config.keep_last_n = 2;
    fx.config.compress_every = 5;
    let doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&[
        "One", "Two", "Three", "Four", "Five", "Six",
    ])]));

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Completed);
    let ctx = &outcome.context;
    assert_eq!(ctx.execution_history.len(), 3);
    let kept: Vec<u32> = ctx.execution_history.iter().map(|r| r.step_id).collect();
    assert_eq!(kept, vec![4, 5, 6]);
    assert_eq!(
        ctx.history_summary,
        vec![
            "Step 1 (CodeExecutor): completed",
            "Step 2 (CodeExecutor): completed",
            "Step 3 (CodeExecutor): completed",
        ]
    );
}

#[test]
fn zero_compaction_interval_never_compacts() {
    let mut fx = fixture();
    fx.config.keep_last_n = 1;
    fx.config.compress_every = 0;
    let doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["One", "Two", "Three"])]));

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.context.execution_history.len(), 3);
    assert!(outcome.context.history_summary.is_empty());
}

#[test]
fn review_approval_keeps_the_plan() {
    let mut fx = fixture();
    fx.config.enable_hitl = true;
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["Load", "Plot"])]));
    doubles.input = ScriptedInput::new(vec![InputReply::Text(String::new())]);

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(tasks(&outcome), vec!["Load", "Plot"]);
    assert_eq!(doubles.planner.goals().len(), 1);
    let prompts = doubles.input.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("1. [pending] Load"));
}

#[test]
fn review_feedback_replans_before_execution() {
    let mut fx = fixture();
    fx.config.enable_hitl = true;
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![
        plan_of(&["Load"]),
        plan_of(&["Load", "Plot revenue"]),
    ]));
    doubles.input = ScriptedInput::new(vec![
        InputReply::Text("add a revenue plot".to_string()),
        InputReply::Text(String::new()),
    ]);

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(tasks(&outcome), vec!["Load", "Plot revenue"]);
    let goals = doubles.planner.goals();
    assert_eq!(goals.len(), 2);
    assert!(goals[1].contains("add a revenue plot"));
    assert_eq!(doubles.code.calls().len(), 2);
}

#[test]
fn review_stop_ends_run_before_execution() {
    let mut fx = fixture();
    fx.config.enable_hitl = true;
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["Load"])]));
    doubles.input = ScriptedInput::new(vec![InputReply::Stop]);

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Stopped);
    assert!(doubles.code.calls().is_empty());
    assert_eq!(statuses(&outcome), vec![StepStatus::Pending]);
}

#[test]
fn simple_goal_is_answered_without_planning() {
    let mut fx = fixture();
    fx.config.enable_simple_task_check = true;
    let mut doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["unused"])]));
    doubles.models = ScriptedModels::new()
        .with_model(Role::Router, ScriptedModel::new("router", ["SIMPLE"]))
        .with_model(
            Role::Research,
            ScriptedModel::new("reader", ["Revenue is reported per region."]),
        );

    let (outcome, _) = run(&fx, &doubles, &StopSignal::new());

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(doubles.planner.goals().is_empty());
    let report = outcome.report.as_ref().expect("report");
    assert_eq!(report.task_type, TaskType::General);
    assert_eq!(report.body, "Revenue is reported per region.");
    assert_eq!(outcome.status_line(), "Run completed: answered directly.");
}

/// The ledger is flushed to disk at the end of every run, bracketed by a
/// start record and a completion record.
#[test]
fn ledger_is_written_to_workspace() {
    let fx = fixture();
    let doubles = Doubles::new(ScriptedPlanner::new(vec![plan_of(&["Load"])]));

    let (_, records) = run(&fx, &doubles, &StopSignal::new());

    let raw = fs::read_to_string(fx.workspace.root().join(LEDGER_FILE_NAME)).expect("ledger");
    let on_disk: Vec<Value> = serde_json::from_str(&raw).expect("json");
    assert_eq!(on_disk.len(), records.len());
    assert_eq!(on_disk[0]["status"], "start");
    assert_eq!(on_disk[on_disk.len() - 1]["status"], "success");
    assert!(
        on_disk
            .iter()
            .any(|r| r["executor_name"] == "Planner" && r["status"] == "success")
    );
}
