//! Success/failure classification of execution records.

use crate::core::types::ExecutionRecord;

/// Substrings that mark an output as failed even when the executor reported
/// no error. Plain text that mentions e.g. `Error:` is misclassified too.
pub const ERROR_MARKERS: [&str; 13] = [
    "Traceback",
    "Error:",
    "Exception:",
    "SyntaxError",
    "NameError",
    "TypeError",
    "ValueError",
    "ImportError",
    "ModuleNotFoundError",
    "AttributeError",
    "IndexError",
    "KeyError",
    "FileNotFoundError",
];

/// Token a research executor emits when the step needs code execution.
pub const CODE_ESCALATION_SENTINEL: &str = "TASK_REQUIRES_CODE_AGENT";

const ERROR_PREVIEW_CHARS: usize = 200;

/// How the engine treats one execution record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepVerdict {
    Succeeded { result: Option<String> },
    Failed { error: String },
}

/// First error marker found in `output`, if any.
pub fn output_error_marker(output: &str) -> Option<&'static str> {
    ERROR_MARKERS
        .iter()
        .copied()
        .find(|marker| output.contains(marker))
}

/// Classify a record: an explicit error wins, then the output marker scan.
/// On success the step result prefers the insight text over raw output.
pub fn classify_record(record: &ExecutionRecord) -> StepVerdict {
    if let Some(error) = record.error.as_deref().filter(|e| !e.trim().is_empty()) {
        return StepVerdict::Failed {
            error: error.to_string(),
        };
    }
    if let Some(output) = record.output.as_deref()
        && output_error_marker(output).is_some()
    {
        let preview: String = output.chars().take(ERROR_PREVIEW_CHARS).collect();
        return StepVerdict::Failed {
            error: format!("Detected error in output: {preview}..."),
        };
    }

    let result = Some(record.content.trim())
        .filter(|s| !s.is_empty())
        .or_else(|| record.output.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        .map(str::to_string);
    StepVerdict::Succeeded { result }
}

/// Whether a research record asks to be re-run by the code executor.
pub fn requires_code_escalation(record: &ExecutionRecord) -> bool {
    record.content.contains(CODE_ESCALATION_SENTINEL)
        || record
            .output
            .as_deref()
            .is_some_and(|o| o.contains(CODE_ESCALATION_SENTINEL))
}
