//! `steward` CLI: run a goal through the adaptive execution engine.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use steward::agents::code::CodeExecutor;
use steward::agents::planner::LlmPlanner;
use steward::agents::research::ResearchExecutor;
use steward::core::types::{ExecutorKind, RunStatus};
use steward::engine::{Collaborators, Engine, RunOutcome};
use steward::exit_codes;
use steward::io::config::{StewardConfig, load_config, write_config};
use steward::io::input::StdinInput;
use steward::io::ledger::PerformanceLedger;
use steward::io::model::ConfiguredModels;
use steward::io::prompt::PromptBuilder;
use steward::io::workspace::Workspace;
use steward::logging;
use steward::stop::{StopSignal, stop_on_interrupt};

#[derive(Parser)]
#[command(
    name = "steward",
    version,
    about = "Plan, route and execute analysis goals with local models"
)]
struct Cli {
    /// Log progress at info level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan and execute a goal inside a workspace directory.
    Run {
        /// The request to fulfil.
        #[arg(long)]
        goal: String,
        #[arg(long, default_value = "workspace")]
        workspace: PathBuf,
        #[arg(long, default_value = "steward.toml")]
        config: PathBuf,
        /// Ask for plan approval before executing.
        #[arg(long)]
        hitl: bool,
        /// Print the full outcome as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Write a default `steward.toml` and create the workspace directory.
    Init {
        #[arg(long, default_value = "steward.toml")]
        config: PathBuf,
        #[arg(long, default_value = "workspace")]
        workspace: PathBuf,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Show recent ledger records for one executor.
    History {
        #[arg(long, default_value = "workspace")]
        workspace: PathBuf,
        /// CodeExecutor, ResearchExecutor, Planner, Router, ...
        #[arg(long)]
        executor: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn dispatch(command: Command) -> Result<i32> {
    match command {
        Command::Run {
            goal,
            workspace,
            config,
            hitl,
            json,
        } => cmd_run(&goal, &workspace, &config, hitl, json),
        Command::Init {
            config,
            workspace,
            force,
        } => cmd_init(&config, &workspace, force),
        Command::History {
            workspace,
            executor,
            limit,
        } => cmd_history(&workspace, &executor, limit),
    }
}

fn cmd_run(goal: &str, workspace: &Path, config: &Path, hitl: bool, json: bool) -> Result<i32> {
    let mut config = load_config(config)?;
    config.enable_hitl |= hitl;

    let workspace = Workspace::open(workspace)?.with_execution(
        config.python.clone(),
        config.exec_timeout(),
        config.output_limit_bytes,
    );
    let prompts = PromptBuilder::new(config.prompt_budget_bytes);
    let models = ConfiguredModels::new(
        config.models.clone(),
        config.model_timeout(),
        config.output_limit_bytes,
    );
    let planner = LlmPlanner::new(
        workspace.clone(),
        prompts.clone(),
        config.planner_max_attempts,
    );
    let code = CodeExecutor::new(workspace.clone(), prompts.clone(), config.code_max_attempts);
    let research = ResearchExecutor::new(workspace.clone(), prompts);
    let input = StdinInput::spawn(config.input_poll());

    let collab = Collaborators {
        models: &models,
        planner: &planner,
        code: &code,
        research: &research,
        input: &input,
    };
    let stop = StopSignal::new();
    stop_on_interrupt(&stop)?;
    let mut engine = Engine::new(&config, &workspace, collab, stop);
    let outcome = engine.run(goal)?;

    if json {
        let payload = serde_json::to_string_pretty(&outcome).context("serialize outcome")?;
        println!("{payload}");
    } else {
        print_outcome(&outcome);
    }
    Ok(exit_code(&outcome.status))
}

fn print_outcome(outcome: &RunOutcome) {
    if !outcome.context.plan.is_empty() {
        print!("{}", outcome.context.plan.render());
        println!();
    }
    println!("{}", outcome.status_line());
    if let Some(report) = &outcome.report {
        println!();
        println!("{}", report.body);
    }
}

fn exit_code(status: &RunStatus) -> i32 {
    match status {
        RunStatus::Completed => exit_codes::OK,
        RunStatus::Failed { .. } => exit_codes::FAILED,
        RunStatus::Stopped => exit_codes::STOPPED,
    }
}

fn cmd_init(config: &Path, workspace: &Path, force: bool) -> Result<i32> {
    if force || !config.exists() {
        write_config(config, &StewardConfig::default())?;
        info!(path = %config.display(), "wrote default config");
    }
    Workspace::open(workspace)?;
    Ok(exit_codes::OK)
}

fn cmd_history(workspace: &Path, executor: &str, limit: usize) -> Result<i32> {
    let workspace = Workspace::open(workspace)?;
    let ledger = PerformanceLedger::open(workspace.root(), 1);
    let name = ExecutorKind::from_name(executor).map_or(executor, |kind| kind.name());
    println!("{}", ledger.digest(name, limit));
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_defaults() {
        let cli = Cli::parse_from(["steward", "run", "--goal", "summarize sales.csv"]);
        match cli.command {
            Command::Run {
                goal,
                workspace,
                config,
                hitl,
                json,
            } => {
                assert_eq!(goal, "summarize sales.csv");
                assert_eq!(workspace, PathBuf::from("workspace"));
                assert_eq!(config, PathBuf::from("steward.toml"));
                assert!(!hitl);
                assert!(!json);
            }
            _ => panic!("expected run"),
        }
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_init_force_and_global_verbose() {
        let cli = Cli::parse_from(["steward", "init", "--force", "-v"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn exit_codes_follow_status() {
        assert_eq!(exit_code(&RunStatus::Completed), exit_codes::OK);
        assert_eq!(exit_code(&RunStatus::Stopped), exit_codes::STOPPED);
        assert_eq!(
            exit_code(&RunStatus::Failed {
                reason: "x".to_string()
            }),
            exit_codes::FAILED
        );
    }

    #[test]
    fn init_writes_config_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = temp.path().join("steward.toml");
        let workspace = temp.path().join("ws");
        cmd_init(&config, &workspace, false).expect("init");
        assert!(config.exists());
        assert!(workspace.is_dir());

        std::fs::write(&config, "keep_last_n = 3\n").expect("edit");
        cmd_init(&config, &workspace, false).expect("init again");
        let cfg = load_config(&config).expect("load");
        assert_eq!(cfg.keep_last_n, 3);
    }
}
