//! Parsing boundary for untrusted model text.
//!
//! Everything a language model returns passes through here before the engine
//! acts on it. Lenient helpers degrade to an empty value; the strict plan
//! parser returns an error the planner turns into a retry.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::core::memory::MemoryUpdate;
use crate::core::plan::Plan;
use crate::core::types::ExecutorKind;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
const MEMORY_UPDATE_SCHEMA: &str = include_str!("../../schemas/memory_update.schema.json");

static FENCED_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\n(.*?)```").expect("fenced json regex is valid")
});

static PYTHON_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python|py)[ \t]*\n(.*?)```").expect("python block regex is valid")
});

static BARE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[ \t]*\n(.*?)```").expect("bare block regex is valid"));

/// Locate the JSON object in a model response: a fenced block first, then the
/// outermost `{ ... }` span.
pub fn extract_json_block(text: &str) -> Option<&str> {
    for caps in FENCED_JSON_RE.captures_iter(text) {
        if let Some(body) = caps.get(1).map(|m| m.as_str().trim())
            && body.starts_with('{')
        {
            return Some(body);
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn validate_against(schema_src: &str, instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(schema_src).context("parse embedded schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[derive(Deserialize)]
struct PlanDraft {
    steps: Vec<StepDraft>,
}

#[derive(Deserialize)]
struct StepDraft {
    task: String,
    #[serde(default)]
    description: String,
}

/// Parse a planner response into a freshly numbered plan.
pub fn parse_plan_response(text: &str) -> Result<Plan> {
    let json = extract_json_block(text).ok_or_else(|| anyhow!("no JSON object in response"))?;
    let value: Value = serde_json::from_str(json).context("response is not valid JSON")?;
    validate_against(PLAN_SCHEMA, &value)?;
    let draft: PlanDraft = serde_json::from_value(value).context("decode plan")?;
    Ok(Plan::from_drafts(
        draft.steps.into_iter().map(|s| (s.task, s.description)),
    ))
}

/// Parse a memory-extraction response. Invalid input yields an empty update.
pub fn parse_memory_update(text: &str) -> MemoryUpdate {
    match try_parse_memory_update(text) {
        Ok(update) => update,
        Err(err) => {
            debug!(err = %format!("{err:#}"), "discarding memory update");
            MemoryUpdate::default()
        }
    }
}

fn try_parse_memory_update(text: &str) -> Result<MemoryUpdate> {
    let json = extract_json_block(text).ok_or_else(|| anyhow!("no JSON object in response"))?;
    let value: Value = serde_json::from_str(json).context("response is not valid JSON")?;
    validate_against(MEMORY_UPDATE_SCHEMA, &value)?;
    serde_json::from_value(value).context("decode memory update")
}

/// Split a router answer of the form `executor:model` on the first `:`.
///
/// Returns `None` when there is no colon or the executor is unknown. A blank
/// model part becomes `None`.
pub fn parse_route(raw: &str) -> Option<(ExecutorKind, Option<String>)> {
    let line = raw
        .lines()
        .map(|l| l.trim().trim_matches(|c: char| c == '`' || c == '"' || c == '\''))
        .rfind(|l| !l.is_empty())?;
    let (executor, model) = line.split_once(':')?;
    let executor = ExecutorKind::from_name(executor)?;
    let model = model.trim();
    Some((executor, (!model.is_empty()).then(|| model.to_string())))
}

/// Extract the code to run from a model response: a `python` fenced block,
/// else the first untagged fenced block.
pub fn extract_code_block(text: &str) -> Option<String> {
    PYTHON_BLOCK_RE
        .captures(text)
        .or_else(|| BARE_BLOCK_RE.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|code| !code.is_empty())
}

/// A structured hint printed by generated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTag {
    OutputFile(String),
    Metric { key: String, value: String },
}

/// Scan raw output line by line for `OUTPUT_FILE:` and `METRIC: key=value` tags.
///
/// Both tags are looked for on every line. When a line carries both, each
/// value stops where the other tag begins.
pub fn scan_output_tags(output: &str) -> Vec<OutputTag> {
    const OUTPUT_FILE: &str = "OUTPUT_FILE:";
    const METRIC: &str = "METRIC:";

    let mut tags = Vec::new();
    for line in output.lines() {
        if let Some(path) = tag_value(line, OUTPUT_FILE, METRIC) {
            let path = path.trim();
            if !path.is_empty() {
                tags.push(OutputTag::OutputFile(path.to_string()));
            }
        }
        if let Some(metric) = tag_value(line, METRIC, OUTPUT_FILE)
            && let Some((key, value)) = metric.split_once('=')
        {
            let key = key.trim();
            if !key.is_empty() {
                tags.push(OutputTag::Metric {
                    key: key.to_string(),
                    value: value.trim().to_string(),
                });
            }
        }
    }
    tags
}

/// Text following `tag` on `line`, up to a later `other` tag if present.
fn tag_value<'a>(line: &'a str, tag: &str, other: &str) -> Option<&'a str> {
    let start = line.find(tag)? + tag.len();
    let rest = &line[start..];
    Some(rest.find(other).map_or(rest, |end| &rest[..end]))
}

/// Whether a complexity judgement calls the goal simple.
pub fn is_simple_verdict(raw: &str) -> bool {
    let upper = raw.to_ascii_uppercase();
    upper.contains("SIMPLE") && !upper.contains("NOT SIMPLE") && !upper.contains("COMPLEX")
}
