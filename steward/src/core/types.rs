//! Core data types shared by planning, execution, and memory.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a single plan step.
///
/// Steps move `pending -> in_progress -> completed | failed`. A step that was
/// interrupted by a stop request is put back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: u32,
    pub task: String,
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Step {
    pub fn new(id: u32, task: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            task: task.into(),
            description: description.into(),
            status: StepStatus::Pending,
            result: None,
        }
    }
}

/// The two step executors a router may choose between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutorKind {
    Code,
    Research,
}

impl ExecutorKind {
    /// Stable name recorded in execution records and the performance ledger.
    pub fn name(self) -> &'static str {
        match self {
            ExecutorKind::Code => "CodeExecutor",
            ExecutorKind::Research => "ResearchExecutor",
        }
    }

    /// Resolve a router-provided executor name. Accepts the stable names plus
    /// the short `code`/`research` aliases, ignoring case and surrounding space.
    pub fn from_name(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase();
        match key.as_str() {
            "codeexecutor" | "code" | "codeagent" => Some(ExecutorKind::Code),
            "researchexecutor" | "research" | "researchagent" => Some(ExecutorKind::Research),
            _ => None,
        }
    }

    pub fn role(self) -> Role {
        match self {
            ExecutorKind::Code => Role::Code,
            ExecutorKind::Research => Role::Research,
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every component that talks to a language model, keyed for model lookup
/// and ledger attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Planner,
    Router,
    Code,
    Research,
    Memory,
    Reporter,
}

impl Role {
    /// Name used as `executor_name` in ledger records.
    pub fn ledger_name(self) -> &'static str {
        match self {
            Role::Planner => "Planner",
            Role::Router => "Router",
            Role::Code => ExecutorKind::Code.name(),
            Role::Research => ExecutorKind::Research.name(),
            Role::Memory => "MemoryExtractor",
            Role::Reporter => "Reporter",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Planner => "planner",
            Role::Router => "router",
            Role::Code => "code",
            Role::Research => "research",
            Role::Memory => "memory",
            Role::Reporter => "reporter",
        };
        f.write_str(name)
    }
}

/// Outcome of one executor invocation for one step.
///
/// Records are produced once by an executor and never edited afterwards;
/// the engine derives success or failure from them via
/// [`crate::core::outcome::classify_record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub step_id: u32,
    pub executor_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl ExecutionRecord {
    pub fn new(step_id: u32, executor_name: impl Into<String>) -> Self {
        Self {
            step_id,
            executor_name: executor_name.into(),
            content: String::new(),
            code: None,
            output: None,
            error: None,
            artifacts: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed { reason: String },
    Stopped,
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}
