#![forbid(unsafe_code)]

//! Failure records, the nine-principle debugging checklist, failure grouping
//! and prompt rendering.
//!
//! Everything in this crate is a pure function over in-memory records. Loading
//! and saving the records is the job of `debug-assist-store`; the load, mutate
//! and save cycle for each operation lives in `debug-assist-api`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

pub mod grouping;
pub mod principles;
pub mod progression;
pub mod prompt;

pub use grouping::{
    analyze_failures, extract_error_type, filter_failures, group_failures, normalize_pattern,
    priority_score, root_cause_hypothesis, triage, AnalysisInsights, AnalysisOptions,
    AnalysisReport, GroupBy, TimeRange, TriageLevel, TriageRecommendation,
};
pub use principles::{Principle, PrincipleNumber, PRINCIPLES, PRINCIPLE_COUNT};
pub use progression::{
    apply_principle, debugging_progress, new_session, CompletedPrinciple, DebuggingProgress,
    PrincipleApplication, ProgressCounts, ProgressionPolicy, StepSummary,
};
pub use prompt::{render_failure_prompt, render_group_prompt, DebugPrompt, PromptStyle};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    #[default]
    New,
    InProgress,
    Resolved,
}

impl FailureStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// One reported test failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub status: FailureStatus,
    /// Next principle to apply, always within `1..=9`.
    pub current_debug_step: u8,
    pub test_name: String,
    pub file_path: String,
    pub line_number: i64,
    pub error_message: String,
    pub traceback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locals: Option<BTreeMap<String, Value>>,
}

/// Caller-supplied fields of a failure report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureInput {
    pub test_name: String,
    pub file_path: String,
    pub line_number: i64,
    pub error_message: String,
    pub traceback: String,
    #[serde(default)]
    pub locals: Option<BTreeMap<String, Value>>,
}

impl FailureInput {
    #[must_use]
    pub fn into_record(self, id: String, timestamp: OffsetDateTime) -> FailureRecord {
        FailureRecord {
            id,
            timestamp,
            status: FailureStatus::New,
            current_debug_step: PrincipleNumber::FIRST.get(),
            test_name: self.test_name,
            file_path: self.file_path,
            line_number: self.line_number,
            error_message: self.error_message,
            traceback: self.traceback,
            locals: self.locals,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DebugStepStatus {
    Pending,
    Completed,
}

/// Application of one principle within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebugStep {
    pub step: u8,
    pub name: String,
    pub status: DebugStepStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub llm_analysis: Option<String>,
}

impl DebugStep {
    #[must_use]
    pub fn pending(number: PrincipleNumber, started_at: OffsetDateTime) -> Self {
        Self {
            step: number.get(),
            name: number.principle().name.to_string(),
            status: DebugStepStatus::Pending,
            started_at,
            completed_at: None,
            llm_analysis: None,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == DebugStepStatus::Completed
    }
}

/// Debugging history of a single failure.
///
/// `debug_steps` is sparse: an entry exists only for principles that were
/// touched, plus the pending placeholder one ahead of the last application.
/// Entries are kept ordered by step number with at most one per number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebugSession {
    pub id: String,
    pub failure_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub debug_steps: Vec<DebugStep>,
}

impl DebugSession {
    #[must_use]
    pub fn step(&self, number: PrincipleNumber) -> Option<&DebugStep> {
        self.debug_steps
            .iter()
            .find(|entry| entry.step == number.get())
    }

    /// Returns the entry for `number`, inserting a pending one in step order
    /// when the session has none yet.
    pub fn step_entry(&mut self, number: PrincipleNumber, now: OffsetDateTime) -> &mut DebugStep {
        let index = match self
            .debug_steps
            .iter()
            .position(|entry| entry.step == number.get())
        {
            Some(index) => index,
            None => {
                let index = self
                    .debug_steps
                    .iter()
                    .position(|entry| entry.step > number.get())
                    .unwrap_or(self.debug_steps.len());
                self.debug_steps
                    .insert(index, DebugStep::pending(number, now));
                index
            }
        };
        &mut self.debug_steps[index]
    }

    pub fn completed_steps(&self) -> impl Iterator<Item = &DebugStep> {
        self.debug_steps.iter().filter(|entry| entry.is_completed())
    }
}

/// Failures sharing one grouping key, recomputed on every analysis run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureGroup {
    pub id: String,
    pub name: String,
    pub pattern: String,
    pub count: usize,
    pub failures: Vec<String>,
    pub common_error_type: String,
    pub root_cause_hypothesis: String,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

#[must_use]
pub fn new_failure_id() -> String {
    format!("failure_{}", Ulid::new())
}

#[must_use]
pub fn session_id_for(failure_id: &str) -> String {
    format!("session_{failure_id}")
}

/// Group ids are fresh per analysis run: identical inputs yield new ids.
#[must_use]
pub fn new_group_id(ordinal: usize) -> String {
    format!("group_{}_{ordinal}", Ulid::new())
}

/// Parses an RFC3339 timestamp and normalizes it to UTC.
///
/// # Errors
/// Returns [`CoreError::Validation`] when parsing fails.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, CoreError> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map(|parsed| parsed.to_offset(UtcOffset::UTC))
        .map_err(|err| CoreError::Validation(format!("invalid RFC3339 timestamp: {err}")))
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`CoreError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, CoreError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| CoreError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}
