//! Plan representation and the suffix-splice used by failure recovery.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::types::{Step, StepStatus};

/// Ordered steps; insertion order is execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

/// Why a splice was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpliceError {
    /// The planner produced no replacement steps.
    EmptyReplacement,
    /// `from_index` lies past the end of the plan.
    OutOfRange { from_index: usize, len: usize },
    /// A step before `from_index` has not completed.
    IncompletePrefix { step_id: u32, status: StepStatus },
}

impl fmt::Display for SpliceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpliceError::EmptyReplacement => write!(f, "replacement plan is empty"),
            SpliceError::OutOfRange { from_index, len } => {
                write!(f, "splice index {from_index} out of range for plan of {len} steps")
            }
            SpliceError::IncompletePrefix { step_id, status } => {
                write!(f, "step {step_id} before the splice point is {status}, not completed")
            }
        }
    }
}

impl Error for SpliceError {}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Build a fresh plan from drafted `(task, description)` pairs, numbered from 1.
    pub fn from_drafts<I, T, D>(drafts: I) -> Self
    where
        I: IntoIterator<Item = (T, D)>,
        T: Into<String>,
        D: Into<String>,
    {
        let steps = drafts
            .into_iter()
            .zip(1u32..)
            .map(|((task, description), id)| Step::new(id, task, description))
            .collect();
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// Replace `steps[from_index..]` with `replacement`.
    ///
    /// The prefix must be entirely completed. Replacement steps are renumbered
    /// from the last completed id + 1 (1 when the prefix is empty), reset to
    /// pending, and stripped of results.
    pub fn splice(&self, from_index: usize, replacement: Vec<Step>) -> Result<Plan, SpliceError> {
        if from_index > self.steps.len() {
            return Err(SpliceError::OutOfRange {
                from_index,
                len: self.steps.len(),
            });
        }
        if replacement.is_empty() {
            return Err(SpliceError::EmptyReplacement);
        }
        let prefix = &self.steps[..from_index];
        if let Some(bad) = prefix.iter().find(|s| s.status != StepStatus::Completed) {
            return Err(SpliceError::IncompletePrefix {
                step_id: bad.id,
                status: bad.status,
            });
        }

        let next_id = prefix.last().map(|s| s.id + 1).unwrap_or(1);
        let mut steps = prefix.to_vec();
        steps.extend(
            replacement
                .into_iter()
                .zip(next_id..)
                .map(|(step, id)| Step {
                    id,
                    status: StepStatus::Pending,
                    result: None,
                    ..step
                }),
        );
        Ok(Plan { steps })
    }

    /// Human-readable numbered listing, one step per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            out.push_str(&format!(
                "{}. [{}] {}: {}\n",
                step.id, step.status, step.task, step.description
            ));
        }
        out
    }
}

/// Report structural problems: non-increasing (hence duplicate) ids and more
/// than one step in progress.
pub fn validate_invariants(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    for pair in plan.steps.windows(2) {
        if pair[1].id <= pair[0].id {
            errors.push(format!(
                "step id {} does not increase after {}",
                pair[1].id, pair[0].id
            ));
        }
    }
    let in_progress = plan
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::InProgress)
        .count();
    if in_progress > 1 {
        errors.push(format!("{in_progress} steps are in_progress, expected at most 1"));
    }
    errors
}
