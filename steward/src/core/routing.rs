//! Deterministic parts of executor/model routing.

use serde::Serialize;

use crate::core::parse::parse_route;
use crate::core::types::{ExecutorKind, Step};

const COMPLEX_KEYWORDS: [&str; 14] = [
    "train",
    "model",
    "predict",
    "optimi",
    "neural",
    "regression",
    "classif",
    "cluster",
    "algorithm",
    "implement",
    "pipeline",
    "forecast",
    "statistic",
    "debug",
];
const COMPLEX_LENGTH_CHARS: usize = 300;

/// Rough size of a step, passed to the router model as a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Complex,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Complex => "complex",
        }
    }
}

pub fn classify_complexity(step: &Step) -> Complexity {
    let text = format!("{} {}", step.task, step.description).to_lowercase();
    if text.len() > COMPLEX_LENGTH_CHARS || COMPLEX_KEYWORDS.iter().any(|k| text.contains(k)) {
        Complexity::Complex
    } else {
        Complexity::Simple
    }
}

/// Which executor runs a step and with which model. `model_id == None` means
/// the executor's default model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub executor: ExecutorKind,
    pub model_id: Option<String>,
    pub fallback: bool,
}

impl RouteDecision {
    pub fn fallback() -> Self {
        Self {
            executor: ExecutorKind::Code,
            model_id: None,
            fallback: true,
        }
    }

    /// `executor:model` form used in logs and the ledger.
    pub fn label(&self) -> String {
        format!(
            "{}:{}",
            self.executor.name(),
            self.model_id.as_deref().unwrap_or("default")
        )
    }
}

/// Interpret a router answer against the models configured per executor.
/// Malformed answers fall back to the code executor; models that are not
/// configured for the chosen executor become the default.
pub fn resolve_route(raw: &str, models_for: impl Fn(ExecutorKind) -> Vec<String>) -> RouteDecision {
    let Some((executor, model)) = parse_route(raw) else {
        return RouteDecision::fallback();
    };
    let model_id = model.filter(|m| models_for(executor).iter().any(|known| known == m));
    RouteDecision {
        executor,
        model_id,
        fallback: false,
    }
}

/// Swap away from a model that recently failed this task. Picks the first
/// configured alternative with no recent failure; `None` when that is the
/// default. Leaves the decision alone when no alternative exists.
pub fn avoid_recent_failure(
    decision: RouteDecision,
    default_model: &str,
    available: &[String],
    recently_failed: &[String],
) -> RouteDecision {
    let chosen = decision.model_id.as_deref().unwrap_or(default_model);
    if !recently_failed.iter().any(|m| m == chosen) {
        return decision;
    }
    let candidates = std::iter::once(default_model).chain(available.iter().map(String::as_str));
    for candidate in candidates {
        if candidate != chosen && !recently_failed.iter().any(|m| m == candidate) {
            let model_id = (candidate != default_model).then(|| candidate.to_string());
            return RouteDecision {
                model_id,
                ..decision
            };
        }
    }
    decision
}
