//! Scripted collaborators for driving the engine without real models.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use anyhow::{Result, anyhow, bail};

use crate::agents::{PlanDebugInfo, PlanResult, Planner, StepExecutor};
use crate::core::memory::SharedContext;
use crate::core::plan::Plan;
use crate::core::types::{ExecutionRecord, ExecutorKind, Role, Step};
use crate::io::input::{HumanInput, InputReply};
use crate::io::model::{Model, ModelProvider};
use crate::stop::StopSignal;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

#[derive(Debug, Default)]
struct ModelScript {
    replies: VecDeque<Reply>,
    fallback: Option<Reply>,
    prompts: Vec<String>,
    stop_at_call: Option<(usize, StopSignal)>,
}

/// Model that answers from a queue and records every prompt.
///
/// Clones share the queue and the prompt log. Once the queue is empty the
/// fallback reply is used; without one the model answers with an empty string.
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    id: String,
    script: Rc<RefCell<ModelScript>>,
}

impl ScriptedModel {
    pub fn new<I, S>(id: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = ModelScript {
            replies: replies.into_iter().map(|r| Reply::Text(r.into())).collect(),
            ..ModelScript::default()
        };
        Self {
            id: id.to_string(),
            script: Rc::new(RefCell::new(script)),
        }
    }

    /// Model whose every invocation fails with `message`.
    pub fn failing(id: &str, message: &str) -> Self {
        let model = Self::new(id, Vec::<String>::new());
        model.script.borrow_mut().fallback = Some(Reply::Fail(message.to_string()));
        model
    }


    /// Raise `stop` while answering the `call`-th invocation (1-based).
    pub fn stop_on_call(self, call: usize, stop: &StopSignal) -> Self {
        self.script.borrow_mut().stop_at_call = Some((call, stop.clone()));
        self
    }

    /// Same script under a different model id.
    pub fn renamed(&self, id: &str) -> Self {
        Self {
            id: id.to_string(),
            script: Rc::clone(&self.script),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.script.borrow().prompts.clone()
    }
}

impl Model for ScriptedModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn invoke(&self, prompt: &str) -> Result<String> {
        let mut script = self.script.borrow_mut();
        script.prompts.push(prompt.to_string());
        if let Some((call, stop)) = &script.stop_at_call
            && script.prompts.len() == *call
        {
            stop.request_stop();
        }
        let reply = script
            .replies
            .pop_front()
            .or_else(|| script.fallback.clone())
            .unwrap_or(Reply::Text(String::new()));
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(message) => Err(anyhow!(message)),
        }
    }
}

/// Provider handing out one scripted model per role.
#[derive(Debug, Default)]
pub struct ScriptedModels {
    models: HashMap<Role, ScriptedModel>,
    available: HashMap<Role, Vec<String>>,
    broken: HashSet<String>,
    requests: RefCell<Vec<(Role, Option<String>)>>,
}

impl ScriptedModels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, role: Role, model: ScriptedModel) -> Self {
        self.models.insert(role, model);
        self
    }

    /// Configured model ids for `role`, default first.
    pub fn with_models<I, S>(mut self, role: Role, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available
            .insert(role, ids.into_iter().map(Into::into).collect());
        self
    }

    /// Requests for `model_id` fail as if the model could not be built.
    pub fn with_broken(mut self, model_id: &str) -> Self {
        self.broken.insert(model_id.to_string());
        self
    }

    /// Every `(role, model_id)` requested so far.
    pub fn requests(&self) -> Vec<(Role, Option<String>)> {
        self.requests.borrow().clone()
    }
}

impl ModelProvider for ScriptedModels {
    fn model(&self, role: Role, model_id: Option<&str>) -> Result<Box<dyn Model>> {
        self.requests
            .borrow_mut()
            .push((role, model_id.map(str::to_string)));
        let id = match model_id {
            Some(id) => {
                if !self.available_models(role).iter().any(|m| m == id) {
                    bail!("model '{id}' is not configured for {role}");
                }
                id.to_string()
            }
            None => self.default_model_id(role),
        };
        if self.broken.contains(&id) {
            bail!("model '{id}' failed to start");
        }
        let model = self
            .models
            .get(&role)
            .cloned()
            .unwrap_or_else(|| ScriptedModel::new(&id, Vec::<String>::new()));
        Ok(Box::new(model.renamed(&id)))
    }

    fn available_models(&self, role: Role) -> Vec<String> {
        self.available
            .get(&role)
            .cloned()
            .unwrap_or_else(|| vec![format!("{role}-default")])
    }
}

/// Step executor returning queued records; once empty it succeeds with
/// `"done"` content.
#[derive(Debug)]
pub struct ScriptedExecutor {
    kind: ExecutorKind,
    records: RefCell<VecDeque<ExecutionRecord>>,
    calls: RefCell<Vec<(u32, String)>>,
    stop_at_call: Option<(usize, StopSignal)>,
}

impl ScriptedExecutor {
    pub fn new(kind: ExecutorKind, records: Vec<ExecutionRecord>) -> Self {
        Self {
            kind,
            records: RefCell::new(records.into()),
            calls: RefCell::new(Vec::new()),
            stop_at_call: None,
        }
    }

    /// Raise `stop` during the `call`-th run (1-based), as a front door would
    /// while the executor is busy.
    pub fn stop_on_call(mut self, call: usize, stop: &StopSignal) -> Self {
        self.stop_at_call = Some((call, stop.clone()));
        self
    }

    /// `(step_id, model_id)` of every run.
    pub fn calls(&self) -> Vec<(u32, String)> {
        self.calls.borrow().clone()
    }
}

impl StepExecutor for ScriptedExecutor {
    fn run(
        &self,
        step: &Step,
        _ctx: &SharedContext,
        model: &dyn Model,
        _stop: &StopSignal,
    ) -> ExecutionRecord {
        let mut calls = self.calls.borrow_mut();
        calls.push((step.id, model.id().to_string()));
        if let Some((call, stop)) = &self.stop_at_call
            && calls.len() == *call
        {
            stop.request_stop();
        }
        let template = self
            .records
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ExecutionRecord::new(0, "").with_content("done"));
        ExecutionRecord {
            step_id: step.id,
            executor_name: self.kind.name().to_string(),
            ..template
        }
    }
}

/// Planner returning queued plans; once empty it returns an empty plan.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    plans: RefCell<VecDeque<Plan>>,
    goals: RefCell<Vec<String>>,
}

impl ScriptedPlanner {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            plans: RefCell::new(plans.into()),
            goals: RefCell::new(Vec::new()),
        }
    }

    /// Goal text of every call.
    pub fn goals(&self) -> Vec<String> {
        self.goals.borrow().clone()
    }
}

impl Planner for ScriptedPlanner {
    fn create_plan(&self, goal: &str, _model: &dyn Model, _stop: &StopSignal) -> PlanResult {
        self.goals.borrow_mut().push(goal.to_string());
        match self.plans.borrow_mut().pop_front() {
            Some(plan) => PlanResult {
                plan,
                debug_info: PlanDebugInfo::default(),
            },
            None => PlanResult::empty(PlanDebugInfo {
                final_error: Some("no scripted plan left".to_string()),
                ..PlanDebugInfo::default()
            }),
        }
    }
}

/// Human input answering from a queue; an empty queue cancels.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    replies: RefCell<VecDeque<InputReply>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedInput {
    pub fn new(replies: Vec<InputReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl HumanInput for ScriptedInput {
    fn request_input(&self, prompt: &str, stop: &StopSignal) -> InputReply {
        self.prompts.borrow_mut().push(prompt.to_string());
        if stop.is_stopped() {
            return InputReply::Stop;
        }
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or(InputReply::Cancelled)
    }
}

/// Plan with tasks named as given, numbered from 1.
pub fn plan_of(tasks: &[&str]) -> Plan {
    Plan::from_drafts(tasks.iter().map(|t| (*t, format!("{t} description"))))
}

/// Successful record whose output is `output`.
pub fn output_record(output: &str) -> ExecutionRecord {
    ExecutionRecord::new(0, "").with_output(output)
}

/// Failed record carrying `error`.
pub fn error_record(error: &str) -> ExecutionRecord {
    ExecutionRecord::new(0, "").with_error(error)
}

/// Successful record with insight text `content`.
pub fn content_record(content: &str) -> ExecutionRecord {
    ExecutionRecord::new(0, "").with_content(content)
}
