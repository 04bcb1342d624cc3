//! Prompt rendering for every model-facing component.
//!
//! Templates live in `prompts/` and mark their sections with
//! `<!-- section:KEY required|droppable -->`. After rendering, droppable
//! sections are removed in a fixed order until the prompt fits the byte
//! budget; the last section is truncated as a final resort.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, Value, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::memory::SharedContext;
use crate::core::routing::Complexity;
use crate::core::types::{ExecutionRecord, Step};

const TEMPLATES: [(&str, &str); 11] = [
    ("planner", include_str!("prompts/planner.md")),
    ("replan_goal", include_str!("prompts/replan_goal.md")),
    ("review_goal", include_str!("prompts/review_goal.md")),
    ("router", include_str!("prompts/router.md")),
    ("code", include_str!("prompts/code.md")),
    ("research", include_str!("prompts/research.md")),
    ("memory", include_str!("prompts/memory.md")),
    ("classify", include_str!("prompts/classify.md")),
    ("report", include_str!("prompts/report.md")),
    ("simple_check", include_str!("prompts/simple_check.md")),
    ("direct_answer", include_str!("prompts/direct_answer.md")),
];

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 7] = [
    "previews",
    "files",
    "state",
    "step_context",
    "plan",
    "goal",
    "history",
];

const SECTION_SEPARATOR: &str = "\n\n";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex is valid")
});

/// Workspace view shared by the step executors' prompts.
#[derive(Debug, Clone, Copy)]
pub struct StepView<'a> {
    pub step: &'a Step,
    pub context: &'a SharedContext,
    pub files: &'a [String],
    pub previews: &'a str,
}

/// Feedback from a failed code attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CodeRetry<'a> {
    pub code: &'a str,
    pub output: &'a str,
    pub hint: Option<&'a str>,
}

/// Inputs for the router prompt.
#[derive(Debug, Clone)]
pub struct RouterView<'a> {
    pub step: &'a Step,
    pub goal: &'a str,
    pub files: &'a [String],
    pub complexity: Complexity,
    pub code_models: &'a [String],
    pub research_models: &'a [String],
    pub code_history: &'a str,
    pub research_history: &'a str,
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Renders prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .expect("embedded prompt template should be valid");
        }
        Self { env, budget_bytes }
    }

    fn render(&self, name: &str, ctx: Value) -> Result<String> {
        let rendered = self.env.get_template(name)?.render(ctx)?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        debug!(
            template = name,
            sections = sections.len(),
            "prompt rendered"
        );
        Ok(render_sections(&sections))
    }

    pub fn planner(
        &self,
        goal: &str,
        files: &[String],
        previews: &str,
        feedback: Option<&str>,
    ) -> Result<String> {
        self.render(
            "planner",
            context! {
                goal => goal.trim(),
                files => files,
                previews => non_empty(previews),
                feedback => feedback.and_then(non_empty),
            },
        )
    }

    /// Goal text asking the planner to replace the failed remainder of a plan.
    pub fn replan_goal(
        &self,
        ctx: &SharedContext,
        failed_task: &str,
        error: &str,
    ) -> Result<String> {
        self.render(
            "replan_goal",
            context! {
                goal => ctx.goal.trim(),
                plan => ctx.plan.render(),
                failed_task => failed_task,
                error => error.trim(),
            },
        )
    }

    /// Goal text asking the planner to revise a plan after human review.
    pub fn review_goal(&self, ctx: &SharedContext, feedback: &str) -> Result<String> {
        self.render(
            "review_goal",
            context! {
                goal => ctx.goal.trim(),
                plan => ctx.plan.render(),
                feedback => feedback.trim(),
            },
        )
    }

    pub fn router(&self, view: &RouterView<'_>) -> Result<String> {
        self.render(
            "router",
            context! {
                step => view.step,
                goal => view.goal.trim(),
                files => view.files,
                complexity => view.complexity.as_str(),
                code_models => view.code_models,
                research_models => view.research_models,
                code_history => view.code_history,
                research_history => view.research_history,
            },
        )
    }

    pub fn code(&self, view: &StepView<'_>, retry: Option<&CodeRetry<'_>>) -> Result<String> {
        self.render(
            "code",
            context! {
                step => view.step,
                goal => view.context.goal.trim(),
                files => view.files,
                previews => non_empty(view.previews),
                history => view.context.project_history(),
                step_context => view.context.step_context(view.step.id),
                retry => retry,
            },
        )
    }

    pub fn research(&self, view: &StepView<'_>) -> Result<String> {
        self.render(
            "research",
            context! {
                step => view.step,
                goal => view.context.goal.trim(),
                files => view.files,
                previews => non_empty(view.previews),
                history => view.context.project_history(),
                step_context => view.context.step_context(view.step.id),
            },
        )
    }

    pub fn memory(
        &self,
        step: &Step,
        record: &ExecutionRecord,
        ctx: &SharedContext,
    ) -> Result<String> {
        let shared_state = serde_json::to_string_pretty(&ctx.shared_state)?;
        self.render(
            "memory",
            context! {
                step => step,
                record => record,
                shared_state => shared_state,
            },
        )
    }

    pub fn classify(&self, history: &str) -> Result<String> {
        self.render("classify", context! { history => history })
    }

    pub fn report(
        &self,
        ctx: &SharedContext,
        task_type: &str,
        outline: &str,
        history: &str,
    ) -> Result<String> {
        self.render(
            "report",
            context! {
                goal => ctx.goal.trim(),
                task_type => task_type,
                outline => outline.trim(),
                history => history,
                files => &ctx.workspace_files,
            },
        )
    }

    pub fn simple_check(&self, goal: &str) -> Result<String> {
        self.render("simple_check", context! { goal => goal.trim() })
    }

    pub fn direct_answer(&self, goal: &str) -> Result<String> {
        self.render("direct_answer", context! { goal => goal.trim() })
    }
}

fn non_empty(text: &str) -> Option<&str> {
    Some(text.trim()).filter(|t| !t.is_empty())
}

/// Split rendered output on section markers. Empty droppable sections are
/// discarded.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

/// Rendered length, counting the blank line between sections.
fn total_len(sections: &[ParsedSection]) -> usize {
    let separators = sections.len().saturating_sub(1) * SECTION_SEPARATOR.len();
    sections.iter().map(|s| s.content.len()).sum::<usize>() + separators
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let over = total_len(sections).saturating_sub(budget);
    if over == 0 {
        return;
    }
    if let Some(last) = sections.last_mut() {
        const MARK: &str = "\n[truncated]";
        let keep = last.content.len().saturating_sub(over + MARK.len());
        let mut cut = keep;
        while cut > 0 && !last.content.is_char_boundary(cut) {
            cut -= 1;
        }
        let before_len = last.content.len();
        last.content.truncate(cut);
        last.content.push_str(MARK);
        debug!(
            section = %last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}
