//! Run-scoped shared memory: tracked files, key/value state, and the
//! bounded execution history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::parse::{OutputTag, scan_output_tags};
use crate::core::plan::Plan;
use crate::core::types::{ExecutionRecord, StepStatus};

/// Key under which the latest `OUTPUT_FILE:` tag is stored.
pub const LAST_OUTPUT_FILE_KEY: &str = "last_output_file";
/// Shared-state key highlighted first in the project history.
pub const CURRENT_DATASET_KEY: &str = "current_dataset";

const HISTORY_PREVIEW_CHARS: usize = 200;
const SUMMARY_ERROR_CHARS: usize = 100;

/// Structured facts a memory extractor pulled out of one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUpdate {
    #[serde(default)]
    pub new_files: Vec<String>,
    #[serde(default)]
    pub metrics: Map<String, Value>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub task_specific_info: Map<String, Value>,
}

impl MemoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty()
            && self.metrics.is_empty()
            && self.summary.trim().is_empty()
            && self.task_specific_info.is_empty()
    }
}

/// What a merge did with the claimed files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub accepted_files: Vec<String>,
    pub dropped_files: Vec<String>,
    pub state_keys: Vec<String>,
}

/// All state for one run, passed explicitly through the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SharedContext {
    pub goal: String,
    pub workspace_files: Vec<String>,
    pub plan: Plan,
    pub execution_history: Vec<ExecutionRecord>,
    pub shared_state: BTreeMap<String, Value>,
    pub history_summary: Vec<String>,
}

impl SharedContext {
    pub fn new(goal: impl Into<String>, workspace_files: Vec<String>) -> Self {
        Self {
            goal: goal.into(),
            workspace_files,
            ..Self::default()
        }
    }

    /// Add a file to the tracked list, keeping discovery order. Returns
    /// `false` when it was already tracked.
    pub fn track_file(&mut self, path: &str) -> bool {
        if self.workspace_files.iter().any(|f| f == path) {
            return false;
        }
        self.workspace_files.push(path.to_string());
        true
    }

    /// Apply `OUTPUT_FILE:`/`METRIC:` tags found in a record's output.
    pub fn apply_output_tags(&mut self, record: &ExecutionRecord) -> Vec<OutputTag> {
        let Some(output) = record.output.as_deref() else {
            return Vec::new();
        };
        let tags = scan_output_tags(output);
        for tag in &tags {
            match tag {
                OutputTag::OutputFile(path) => {
                    self.shared_state
                        .insert(LAST_OUTPUT_FILE_KEY.to_string(), Value::from(path.as_str()));
                }
                OutputTag::Metric { key, value } => {
                    self.shared_state
                        .insert(key.clone(), Value::from(value.as_str()));
                }
            }
        }
        tags
    }

    /// Merge an extracted update. `verify` maps a claimed file to its
    /// canonical workspace-relative path, or `None` when it is not an
    /// existing file under the root; only verified paths are tracked.
    /// Metrics then task info merge by key; a non-empty summary replaces the
    /// step result.
    pub fn merge_update(
        &mut self,
        step_id: u32,
        update: MemoryUpdate,
        verify: impl Fn(&str) -> Option<String>,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        for file in update.new_files {
            let file = file.trim();
            if file.is_empty() {
                continue;
            }
            match verify(file) {
                Some(path) => {
                    self.track_file(&path);
                    if !report.accepted_files.contains(&path) {
                        report.accepted_files.push(path);
                    }
                }
                None => report.dropped_files.push(file.to_string()),
            }
        }
        for (key, value) in update.metrics.into_iter().chain(update.task_specific_info) {
            report.state_keys.push(key.clone());
            self.shared_state.insert(key, value);
        }
        let summary = update.summary.trim();
        if !summary.is_empty()
            && let Some(step) = self.plan.steps.iter_mut().find(|s| s.id == step_id)
        {
            step.result = Some(summary.to_string());
        }
        report
    }

    /// Fold all but the last `keep_last_n` records into summary lines.
    /// Returns how many records were folded; a second call is a no-op.
    pub fn compress_execution_history(&mut self, keep_last_n: usize) -> usize {
        let len = self.execution_history.len();
        if len <= keep_last_n {
            return 0;
        }
        let folded = len - keep_last_n;
        for record in self.execution_history.drain(..folded) {
            let line = match record.error.as_deref() {
                Some(error) => {
                    let preview: String = error.chars().take(SUMMARY_ERROR_CHARS).collect();
                    format!(
                        "Step {} ({}): Error: {preview}...",
                        record.step_id, record.executor_name
                    )
                }
                None => format!(
                    "Step {} ({}): completed",
                    record.step_id, record.executor_name
                ),
            };
            self.history_summary.push(line);
        }
        folded
    }

    /// Every record still in history for `step_id`, rendered for a prompt.
    pub fn step_context(&self, step_id: u32) -> String {
        let mut out = String::new();
        for record in self.execution_history.iter().filter(|r| r.step_id == step_id) {
            out.push_str(&format!("--- {} ---\n", record.executor_name));
            if !record.content.is_empty() {
                out.push_str(&format!("Insight: {}\n", record.content));
            }
            if let Some(code) = &record.code {
                out.push_str(&format!("Code executed:\n{code}\n"));
            }
            if let Some(output) = &record.output {
                out.push_str(&format!("Output:\n{output}\n"));
            }
            if let Some(error) = &record.error {
                out.push_str(&format!("Error:\n{error}\n"));
            }
            out.push('\n');
        }
        if out.is_empty() {
            return "No previous actions in this step.".to_string();
        }
        out
    }

    /// Digest of shared state, completed steps, and compacted history.
    pub fn project_history(&self) -> String {
        let mut out = String::from("--- Project History ---\n");

        if !self.shared_state.is_empty() {
            out.push_str("Shared state:\n");
            if let Some(dataset) = self.shared_state.get(CURRENT_DATASET_KEY) {
                out.push_str(&format!(
                    "  >>> CURRENT DATASET: {} <<<\n",
                    display_value(dataset)
                ));
            }
            for (key, value) in &self.shared_state {
                if key != CURRENT_DATASET_KEY {
                    out.push_str(&format!("- {key}: {}\n", display_value(value)));
                }
            }
            out.push('\n');
        }

        let completed: Vec<_> = self
            .plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .collect();
        if completed.is_empty() {
            out.push_str("No steps completed yet.\n");
        }
        for step in completed {
            out.push_str(&format!("Step {}: {}\n", step.id, step.task));
            let last = self
                .execution_history
                .iter()
                .rev()
                .find(|r| r.step_id == step.id);
            if let Some(record) = last {
                if !record.content.is_empty() {
                    out.push_str(&format!("  Result: {}...\n", preview(&record.content)));
                } else if let Some(output) = &record.output {
                    out.push_str(&format!("  Output: {}...\n", preview(output)));
                }
            } else if let Some(result) = &step.result {
                out.push_str(&format!("  Result: {}...\n", preview(result)));
            }
        }

        if !self.history_summary.is_empty() {
            out.push_str("\nEarlier actions:\n");
            for line in &self.history_summary {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

fn preview(text: &str) -> String {
    text.chars().take(HISTORY_PREVIEW_CHARS).collect()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
