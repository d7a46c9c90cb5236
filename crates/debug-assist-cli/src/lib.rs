//! Command-line collaborator for the debugging assistant.
//!
//! The binary provisions the data directory, opens the JSON-backed API and
//! prints every result as pretty JSON on stdout. API failures are printed as
//! the structured error payload before the process exits non-zero.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use debug_assist_api::{ApiError, DebugAssistApi, PromptRequest};
use debug_assist_core::{
    AnalysisOptions, FailureInput, FailureStatus, GroupBy, ProgressionPolicy, PromptStyle,
    TimeRange,
};
use debug_assist_store::DataPaths;
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Parser)]
#[command(name = "debug-assist")]
#[command(about = "Test failure tracking and guided debugging")]
pub struct Cli {
    #[arg(long, default_value = "./.debug-assist")]
    data_dir: PathBuf,

    /// Never move a failure's step pointer backward.
    #[arg(long)]
    monotonic_steps: bool,

    /// Log filter directive; overrides `RUST_LOG`.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record a new test failure.
    Register(RegisterArgs),
    /// Apply a debugging principle to a failure.
    Debug(DebugArgs),
    /// Show a failure with its debugging progress.
    Info(FailureIdArgs),
    /// List failures, newest first.
    List(ListArgs),
    /// Set a failure's status.
    Status(StatusArgs),
    /// Group failures and rank the groups for triage.
    Analyze(AnalyzeArgs),
    /// Render a debugging prompt for a group or a failure.
    Prompt(PromptArgs),
    /// List the nine debugging principles.
    Principles,
}

#[derive(Debug, Args)]
pub struct RegisterArgs {
    #[arg(long)]
    test_name: String,
    #[arg(long)]
    file_path: String,
    #[arg(long)]
    line_number: i64,
    #[arg(long)]
    error_message: String,
    #[arg(long)]
    traceback: String,
    /// JSON object of local variable names to values.
    #[arg(long)]
    locals_json: Option<String>,
}

#[derive(Debug, Args)]
pub struct DebugArgs {
    #[arg(long)]
    failure_id: String,
    /// Principle number 1-9; defaults to the failure's current step.
    #[arg(long)]
    principle: Option<u8>,
    #[arg(long)]
    analysis: String,
}

#[derive(Debug, Args)]
pub struct FailureIdArgs {
    #[arg(long)]
    failure_id: String,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    status: Option<StatusArg>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long)]
    failure_id: String,
    #[arg(long)]
    status: StatusArg,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[arg(long, value_enum, default_value_t = GroupByArg::ErrorType)]
    group_by: GroupByArg,
    #[arg(long, value_enum, default_value_t = TimeRangeArg::All)]
    time_range: TimeRangeArg,
    #[arg(long)]
    include_resolved: bool,
}

#[derive(Debug, Args)]
pub struct PromptArgs {
    #[arg(long)]
    group_id: Option<String>,
    #[arg(long)]
    failure_id: Option<String>,
    #[arg(long, value_enum, default_value_t = PromptStyleArg::Detailed)]
    style: PromptStyleArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    New,
    #[value(name = "in_progress")]
    InProgress,
    Resolved,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum GroupByArg {
    #[value(name = "error_type")]
    ErrorType,
    #[value(name = "file_path")]
    FilePath,
    Pattern,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TimeRangeArg {
    All,
    Today,
    Week,
    Month,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PromptStyleArg {
    Detailed,
    Concise,
    #[value(name = "step_by_step")]
    StepByStep,
    #[value(name = "root_cause")]
    RootCause,
}

/// Executes the parsed CLI against the configured data directory.
///
/// # Errors
/// Returns an error when logging setup or data directory provisioning fails,
/// when an argument cannot be parsed, or when the API operation fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    init_logging(cli.log_level.as_deref())?;

    let paths = DataPaths::in_dir(&cli.data_dir);
    paths
        .ensure()
        .with_context(|| format!("failed preparing data directory {}", cli.data_dir.display()))?;
    let api = DebugAssistApi::with_json_files(&paths).with_policy(ProgressionPolicy {
        monotonic: cli.monotonic_steps,
    });
    tracing::debug!(
        data_dir = %cli.data_dir.display(),
        monotonic = cli.monotonic_steps,
        "opened data directory"
    );

    run_command(&api, cli.command)
}

/// Executes one command against an already constructed API.
///
/// # Errors
/// Returns an error when an argument cannot be parsed or the API operation
/// fails. API errors are printed as a JSON payload first.
pub fn run_command(api: &DebugAssistApi, command: Command) -> Result<()> {
    match command {
        Command::Register(args) => {
            let locals = args.locals_json.as_deref().map(parse_locals_json).transpose()?;
            let input = FailureInput {
                test_name: args.test_name,
                file_path: args.file_path,
                line_number: args.line_number,
                error_message: args.error_message,
                traceback: args.traceback,
                locals,
            };
            emit(api.register_failure(input))
        }
        Command::Debug(args) => emit(api.apply_principle(
            &args.failure_id,
            args.principle,
            &args.analysis,
        )),
        Command::Info(args) => emit(api.get_failure_info(&args.failure_id)),
        Command::List(args) => emit(api.list_failures(args.status.map(map_status))),
        Command::Status(args) => emit(api.update_status(&args.failure_id, map_status(args.status))),
        Command::Analyze(args) => emit(api.analyze(AnalysisOptions {
            group_by: map_group_by(args.group_by),
            time_range: map_time_range(args.time_range),
            include_resolved: args.include_resolved,
        })),
        Command::Prompt(args) => emit(api.generate_prompt(&PromptRequest {
            group_id: args.group_id,
            failure_id: args.failure_id,
            prompt_style: map_prompt_style(args.style),
        })),
        Command::Principles => print_json(&api.principles()),
    }
}

fn emit<T: Serialize>(result: Result<T, ApiError>) -> Result<()> {
    match result {
        Ok(value) => print_json(&value),
        Err(err) => {
            print_json(&err.payload())?;
            Err(anyhow!(err))
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid --log-level directive: {directive}"))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    // A subscriber may already be installed when the CLI is embedded or tested.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}

fn parse_locals_json(raw: &str) -> Result<BTreeMap<String, Value>> {
    serde_json::from_str(raw).with_context(|| format!("locals_json must be a JSON object: {raw}"))
}

fn map_status(value: StatusArg) -> FailureStatus {
    match value {
        StatusArg::New => FailureStatus::New,
        StatusArg::InProgress => FailureStatus::InProgress,
        StatusArg::Resolved => FailureStatus::Resolved,
    }
}

fn map_group_by(value: GroupByArg) -> GroupBy {
    match value {
        GroupByArg::ErrorType => GroupBy::ErrorType,
        GroupByArg::FilePath => GroupBy::FilePath,
        GroupByArg::Pattern => GroupBy::Pattern,
    }
}

fn map_time_range(value: TimeRangeArg) -> TimeRange {
    match value {
        TimeRangeArg::All => TimeRange::All,
        TimeRangeArg::Today => TimeRange::Today,
        TimeRangeArg::Week => TimeRange::Week,
        TimeRangeArg::Month => TimeRange::Month,
    }
}

fn map_prompt_style(value: PromptStyleArg) -> PromptStyle {
    match value {
        PromptStyleArg::Detailed => PromptStyle::Detailed,
        PromptStyleArg::Concise => PromptStyle::Concise,
        PromptStyleArg::StepByStep => PromptStyle::StepByStep,
        PromptStyleArg::RootCause => PromptStyle::RootCause,
    }
}
