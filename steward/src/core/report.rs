//! Report task types and the fixed outline each one selects.

use std::fmt;

use serde::Serialize;

/// Category a finished run is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum TaskType {
    Modeling,
    Analysis,
    DataProcessing,
    Implementation,
    #[default]
    General,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Modeling,
        TaskType::Analysis,
        TaskType::DataProcessing,
        TaskType::Implementation,
        TaskType::General,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TaskType::Modeling => "Modeling",
            TaskType::Analysis => "Analysis",
            TaskType::DataProcessing => "Data Processing",
            TaskType::Implementation => "Implementation",
            TaskType::General => "General",
        }
    }

    /// Lenient match of a classifier answer: trims whitespace, quotes, `*`
    /// and a trailing `.`, ignores case. Anything unrecognized is General.
    pub fn from_label(raw: &str) -> TaskType {
        let cleaned = raw
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '`')
            .trim_end_matches('.')
            .trim();
        TaskType::ALL
            .into_iter()
            .find(|t| t.label().eq_ignore_ascii_case(cleaned))
            .unwrap_or(TaskType::General)
    }

    /// Section outline the reporter fills in.
    pub fn outline(self) -> &'static str {
        match self {
            TaskType::Modeling => include_str!("outlines/modeling.md"),
            TaskType::Analysis => include_str!("outlines/analysis.md"),
            TaskType::DataProcessing => include_str!("outlines/data_processing.md"),
            TaskType::Implementation => include_str!("outlines/implementation.md"),
            TaskType::General => include_str!("outlines/general.md"),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Final report produced at the end of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub task_type: TaskType,
    pub body: String,
}
