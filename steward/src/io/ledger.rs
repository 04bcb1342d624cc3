//! Append-only performance ledger persisted as `model_performance.json`.
//!
//! Records are committed in memory immediately and written to disk in
//! batches; the whole file is rewritten atomically on each flush.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::io::fs_util::write_atomic;

pub const LEDGER_FILE_NAME: &str = "model_performance.json";

const TASK_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Success,
    Failed,
    Start,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Success => "success",
            RecordStatus::Failed => "failed",
            RecordStatus::Start => "start",
        }
    }
}

/// Code that ran during an executor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeExecution {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// One routing decision or invocation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub timestamp: DateTime<Utc>,
    pub task: String,
    pub executor_name: String,
    pub model_id: String,
    pub status: RecordStatus,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_execution: Option<CodeExecution>,
}

impl PerformanceRecord {
    pub fn new(
        task: impl Into<String>,
        executor_name: impl Into<String>,
        model_id: impl Into<String>,
        status: RecordStatus,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            task: task.into(),
            executor_name: executor_name.into(),
            model_id: model_id.into(),
            status,
            feedback: String::new(),
            input_context: None,
            output_context: None,
            code_execution: None,
        }
    }

    pub fn feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = feedback.into();
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input_context = Some(input);
        self
    }

    pub fn output(mut self, output: Value) -> Self {
        self.output_context = Some(output);
        self
    }

    pub fn code(mut self, code: CodeExecution) -> Self {
        self.code_execution = Some(code);
        self
    }
}

#[derive(Debug)]
pub struct PerformanceLedger {
    path: PathBuf,
    records: Vec<PerformanceRecord>,
    pending: usize,
    batch_size: usize,
}

impl PerformanceLedger {
    /// Load the ledger in `workspace_root`. A missing file is an empty
    /// history; a corrupt one is logged and also treated as empty.
    #[instrument(skip_all, fields(root = %workspace_root.display()))]
    pub fn open(workspace_root: &Path, batch_size: usize) -> Self {
        let path = workspace_root.join(LEDGER_FILE_NAME);
        let records = match load_records(&path) {
            Ok(records) => records,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "ignoring unreadable performance ledger");
                Vec::new()
            }
        };
        debug!(records = records.len(), "performance ledger loaded");
        Self {
            path,
            records,
            pending: 0,
            batch_size: batch_size.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[PerformanceRecord] {
        &self.records
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Commit a record; writes the file once a full batch is pending.
    /// Write failures are logged and retried on the next flush.
    pub fn append(&mut self, record: PerformanceRecord) {
        self.records.push(record);
        self.pending += 1;
        if self.pending >= self.batch_size
            && let Err(err) = self.flush()
        {
            warn!(err = %format!("{err:#}"), "failed to write performance ledger");
        }
    }

    /// Write all records if anything is pending.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }
        let mut buf =
            serde_json::to_string_pretty(&self.records).context("serialize performance ledger")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)?;
        debug!(records = self.records.len(), flushed = self.pending, "ledger flushed");
        self.pending = 0;
        Ok(())
    }

    /// Short text summary of the last `limit` records for one executor.
    pub fn digest(&self, executor_name: &str, limit: usize) -> String {
        let relevant: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.executor_name == executor_name)
            .collect();
        if relevant.is_empty() {
            return "No history available.".to_string();
        }
        relevant[relevant.len().saturating_sub(limit)..]
            .iter()
            .map(|r| {
                let task: String = r.task.chars().take(TASK_PREVIEW_CHARS).collect();
                format!(
                    "- Task: {task}... | Model: {} | Status: {}",
                    r.model_id,
                    r.status.as_str()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Models that failed `task` on `executor_name` within the last `window`
    /// records for that executor.
    pub fn recent_failed_models(
        &self,
        task: &str,
        executor_name: &str,
        window: usize,
    ) -> Vec<String> {
        let mut failed: Vec<String> = Vec::new();
        let relevant = self
            .records
            .iter()
            .rev()
            .filter(|r| r.executor_name == executor_name && r.status != RecordStatus::Start)
            .take(window);
        for record in relevant {
            if record.status == RecordStatus::Failed
                && record.task == task
                && !failed.contains(&record.model_id)
            {
                failed.push(record.model_id.clone());
            }
        }
        failed
    }
}

fn load_records(path: &Path) -> Result<Vec<PerformanceRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task: &str, executor: &str, model: &str, status: RecordStatus) -> PerformanceRecord {
        PerformanceRecord::new(task, executor, model, status)
    }

    #[test]
    fn writes_after_each_full_batch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ledger = PerformanceLedger::open(temp.path(), 5);
        for i in 0..4 {
            ledger.append(record(&format!("t{i}"), "CodeExecutor", "m", RecordStatus::Success));
        }
        assert!(!ledger.path().exists(), "nothing written before the batch fills");
        ledger.append(record("t4", "CodeExecutor", "m", RecordStatus::Success));
        assert_eq!(ledger.pending(), 0);
        assert_eq!(PerformanceLedger::open(temp.path(), 5).records().len(), 5);

        ledger.append(record("t5", "CodeExecutor", "m", RecordStatus::Failed));
        ledger.flush().expect("flush");
        let reloaded = PerformanceLedger::open(temp.path(), 5);
        assert_eq!(reloaded.records().len(), 6);
        assert_eq!(reloaded.records()[5].status, RecordStatus::Failed);
    }

    #[test]
    fn corrupt_file_is_empty_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(LEDGER_FILE_NAME), "{not json").expect("write");
        let ledger = PerformanceLedger::open(temp.path(), 5);
        assert!(ledger.records().is_empty());
    }

    #[test]
    fn digest_lists_last_records_for_executor() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ledger = PerformanceLedger::open(temp.path(), 100);
        assert_eq!(ledger.digest("CodeExecutor", 5), "No history available.");

        let long_task = "a".repeat(80);
        ledger.append(record("old", "CodeExecutor", "m0", RecordStatus::Success));
        ledger.append(record(&long_task, "CodeExecutor", "m1", RecordStatus::Failed));
        ledger.append(record("other", "ResearchExecutor", "r", RecordStatus::Success));

        let digest = ledger.digest("CodeExecutor", 1);
        assert_eq!(
            digest,
            format!("- Task: {}... | Model: m1 | Status: failed", "a".repeat(50))
        );
    }

    #[test]
    fn recent_failures_are_scoped_to_task_and_window() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ledger = PerformanceLedger::open(temp.path(), 100);
        ledger.append(record("fit", "CodeExecutor", "old", RecordStatus::Failed));
        ledger.append(record("fit", "CodeExecutor", "big", RecordStatus::Failed));
        ledger.append(record("fit", "CodeExecutor", "big", RecordStatus::Start));
        ledger.append(record("load", "CodeExecutor", "small", RecordStatus::Failed));

        assert_eq!(ledger.recent_failed_models("fit", "CodeExecutor", 2), vec!["big"]);
        assert_eq!(
            ledger.recent_failed_models("fit", "CodeExecutor", 10),
            vec!["big", "old"]
        );
        assert!(ledger.recent_failed_models("fit", "ResearchExecutor", 10).is_empty());
    }
}
