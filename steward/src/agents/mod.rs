//! Model-driven components the engine invokes.
//!
//! Step executors and the planner sit behind traits so the engine can be
//! driven by scripted fakes in tests. The remaining components (router,
//! memory extractor, reporter) are thin prompt/parse wrappers with fixed
//! behavior.

pub mod code;
pub mod memory;
pub mod planner;
pub mod reporter;
pub mod research;
pub mod router;

use serde::Serialize;

use crate::core::memory::SharedContext;
use crate::core::plan::Plan;
use crate::core::types::{ExecutionRecord, Step};
use crate::io::model::Model;
use crate::stop::StopSignal;

/// Runs one plan step with a given model.
///
/// Implementations never fail outright: problems are reported through
/// [`ExecutionRecord::error`]. Calling `run` again for the same step is safe.
pub trait StepExecutor {
    fn run(
        &self,
        step: &Step,
        ctx: &SharedContext,
        model: &dyn Model,
        stop: &StopSignal,
    ) -> ExecutionRecord;
}

/// Turns goal text into a plan.
pub trait Planner {
    /// Returns an empty plan, never an error, once its own retries are spent;
    /// `debug_info.final_error` says why.
    fn create_plan(&self, goal: &str, model: &dyn Model, stop: &StopSignal) -> PlanResult;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanAttempt {
    pub attempt: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanDebugInfo {
    pub attempts: Vec<PlanAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanResult {
    pub plan: Plan,
    pub debug_info: PlanDebugInfo,
}

impl PlanResult {
    pub fn empty(debug_info: PlanDebugInfo) -> Self {
        Self {
            plan: Plan::default(),
            debug_info,
        }
    }
}
