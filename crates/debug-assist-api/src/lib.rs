#![forbid(unsafe_code)]

//! Operation surface for collaborators (HTTP handlers, tool dispatchers, the
//! CLI).
//!
//! Each operation is a self-contained cycle: load the stores it needs, mutate
//! in memory, rewrite the stores in full. Every operation returns
//! `Result<_, ApiError>`; [`ApiError::payload`] renders the structured error
//! object for callers that report errors as data.
//!
//! Stores are written one after another, failures first. When a later write
//! fails the earlier ones stand: a failure can be left without its session,
//! and the next `apply_principle` recreates it.
//!
//! Operations on one [`DebugAssistApi`] are serialized by an in-process
//! mutex. Separate processes sharing a data directory still race, and the
//! last writer wins.

use std::sync::{Mutex, MutexGuard, PoisonError};

use debug_assist_core::{
    analyze_failures, apply_principle, debugging_progress, new_failure_id, new_session, now_utc,
    render_failure_prompt, render_group_prompt, session_id_for, AnalysisOptions, AnalysisReport,
    CoreError, DebugPrompt, DebugSession, DebuggingProgress, FailureGroup, FailureInput,
    FailureRecord, FailureStatus, Principle, PrincipleApplication, PrincipleNumber,
    ProgressionPolicy, PromptStyle, PRINCIPLES, PRINCIPLE_COUNT,
};
use debug_assist_store::{DataPaths, JsonFileStore, MemoryStore, RecordStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidArgument(message) | CoreError::Validation(message) => {
                Self::InvalidArgument(message)
            }
        }
    }
}

impl ApiError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Storage(_) => "storage_error",
        }
    }

    #[must_use]
    pub fn suggestion(&self) -> String {
        match self {
            Self::NotFound { entity, .. } => match *entity {
                "failure group" => {
                    "Run an analysis first and use one of the returned group ids.".to_string()
                }
                _ => "List failures to find a valid failure id.".to_string(),
            },
            Self::InvalidArgument(_) => format!(
                "Check the arguments: principle numbers run from 1 to {PRINCIPLE_COUNT}, and \
                 prompts need either a group id or a failure id."
            ),
            Self::Storage(err) => format!(
                "Check that {} exists and is readable and writable, then retry.",
                err.path().display()
            ),
        }
    }

    #[must_use]
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: true,
            code: self.code(),
            message: self.to_string(),
            suggestion: self.suggestion(),
        }
    }

    fn failure_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "failure",
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub error: bool,
    pub code: &'static str,
    pub message: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredFailure {
    pub failure_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailureInfo {
    pub failure: FailureRecord,
    pub debugging_progress: DebuggingProgress,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailureList {
    pub total: usize,
    pub failures: Vec<FailureRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptRequest {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub failure_id: Option<String>,
    #[serde(default)]
    pub prompt_style: PromptStyle,
}

pub struct DebugAssistApi {
    failures: Box<dyn RecordStore<FailureRecord>>,
    sessions: Box<dyn RecordStore<DebugSession>>,
    groups: Box<dyn RecordStore<FailureGroup>>,
    policy: ProgressionPolicy,
    lock: Mutex<()>,
}

impl DebugAssistApi {
    #[must_use]
    pub fn new(
        failures: impl RecordStore<FailureRecord> + 'static,
        sessions: impl RecordStore<DebugSession> + 'static,
        groups: impl RecordStore<FailureGroup> + 'static,
    ) -> Self {
        Self {
            failures: Box::new(failures),
            sessions: Box::new(sessions),
            groups: Box::new(groups),
            policy: ProgressionPolicy::default(),
            lock: Mutex::new(()),
        }
    }

    /// Backs the API with the three JSON files of a data directory. The files
    /// are expected to exist already, see [`DataPaths::ensure`].
    #[must_use]
    pub fn with_json_files(paths: &DataPaths) -> Self {
        Self::new(
            JsonFileStore::new(&paths.failures),
            JsonFileStore::new(&paths.sessions),
            JsonFileStore::new(&paths.groups),
        )
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new(), MemoryStore::new(), MemoryStore::new())
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ProgressionPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn policy(&self) -> ProgressionPolicy {
        self.policy
    }

    fn serialize(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a new failure together with its debug session.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] when either store cannot be read or written.
    pub fn register_failure(&self, input: FailureInput) -> Result<RegisteredFailure, ApiError> {
        let _guard = self.serialize();
        let now = now_utc();

        let failure = input.into_record(new_failure_id(), now);
        let session = new_session(&failure, now);
        let registered = RegisteredFailure {
            failure_id: failure.id.clone(),
            session_id: session.id.clone(),
        };

        let mut failures = self.failures.load()?;
        let mut sessions = self.sessions.load()?;
        info!(
            failure_id = %failure.id,
            test_name = %failure.test_name,
            "registered test failure"
        );
        failures.insert(failure.id.clone(), failure);
        sessions.insert(session.id.clone(), session);
        self.failures.save(&failures)?;
        self.sessions.save(&sessions)?;

        Ok(registered)
    }

    /// Records an analysis for one principle and advances the failure's step
    /// pointer. `principle` defaults to the failure's current step.
    ///
    /// # Errors
    /// Returns [`ApiError::InvalidArgument`] for a principle outside `1..=9`,
    /// [`ApiError::NotFound`] for an unknown failure and
    /// [`ApiError::Storage`] when a store cannot be read or written.
    pub fn apply_principle(
        &self,
        failure_id: &str,
        principle: Option<u8>,
        analysis: &str,
    ) -> Result<PrincipleApplication, ApiError> {
        let principle = principle.map(PrincipleNumber::new).transpose()?;
        let _guard = self.serialize();
        let now = now_utc();

        let mut failures = self.failures.load()?;
        let failure = failures
            .get_mut(failure_id)
            .ok_or_else(|| ApiError::failure_not_found(failure_id))?;
        let mut sessions = self.sessions.load()?;
        let session_id = session_id_for(failure_id);
        let mut session = sessions
            .remove(&session_id)
            .unwrap_or_else(|| new_session(failure, now));

        let result = apply_principle(failure, &mut session, principle, analysis, self.policy, now);
        info!(
            failure_id,
            principle = result.current_principle.number,
            current_debug_step = result.current_debug_step,
            "applied debugging principle"
        );

        sessions.insert(session_id, session);
        self.failures.save(&failures)?;
        self.sessions.save(&sessions)?;

        Ok(result)
    }

    /// # Errors
    /// Returns [`ApiError::NotFound`] for an unknown failure and
    /// [`ApiError::Storage`] when a store cannot be read.
    pub fn get_failure_info(&self, failure_id: &str) -> Result<FailureInfo, ApiError> {
        let _guard = self.serialize();

        let mut failures = self.failures.load()?;
        let failure = failures
            .remove(failure_id)
            .ok_or_else(|| ApiError::failure_not_found(failure_id))?;
        let sessions = self.sessions.load()?;
        let session = sessions.get(&session_id_for(failure_id));

        Ok(FailureInfo {
            debugging_progress: debugging_progress(&failure, session),
            failure,
        })
    }

    /// Lists failures newest first, optionally restricted to one status.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] when the failure store cannot be read.
    pub fn list_failures(&self, status: Option<FailureStatus>) -> Result<FailureList, ApiError> {
        let _guard = self.serialize();

        let mut failures: Vec<FailureRecord> = self
            .failures
            .load()?
            .into_values()
            .filter(|failure| status.is_none() || status == Some(failure.status))
            .collect();
        failures.sort_by(|lhs, rhs| {
            rhs.timestamp
                .cmp(&lhs.timestamp)
                .then_with(|| rhs.id.cmp(&lhs.id))
        });

        Ok(FailureList {
            total: failures.len(),
            failures,
        })
    }

    /// Sets a failure's informational status. The step pointer is untouched.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] for an unknown failure and
    /// [`ApiError::Storage`] when the failure store cannot be read or written.
    pub fn update_status(
        &self,
        failure_id: &str,
        status: FailureStatus,
    ) -> Result<FailureRecord, ApiError> {
        let _guard = self.serialize();

        let mut failures = self.failures.load()?;
        let failure = failures
            .get_mut(failure_id)
            .ok_or_else(|| ApiError::failure_not_found(failure_id))?;
        failure.status = status;
        let updated = failure.clone();
        info!(failure_id, status = status.as_str(), "updated failure status");

        self.failures.save(&failures)?;
        Ok(updated)
    }

    /// Groups the selected failures and merges the new groups into the group
    /// store.
    ///
    /// Groups get fresh ids on every run and earlier groups are never pruned,
    /// so repeated analyses of the same failures accumulate duplicate groups.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] when a store cannot be read or written.
    pub fn analyze(&self, options: AnalysisOptions) -> Result<AnalysisReport, ApiError> {
        let _guard = self.serialize();

        let failures = self.failures.load()?;
        let report = analyze_failures(failures.values(), &options, now_utc());

        let mut groups = self.groups.load()?;
        for group in &report.groups {
            groups.insert(group.id.clone(), group.clone());
        }
        self.groups.save(&groups)?;
        info!(
            group_by = options.group_by.as_str(),
            time_range = options.time_range.as_str(),
            total_failures = report.total_failures,
            group_count = report.group_count,
            "analyzed failures"
        );

        Ok(report)
    }

    /// # Errors
    /// Returns [`ApiError::NotFound`] for an unknown group and
    /// [`ApiError::Storage`] when the group store cannot be read.
    pub fn get_group(&self, group_id: &str) -> Result<FailureGroup, ApiError> {
        let _guard = self.serialize();
        self.load_group(group_id)
    }

    fn load_group(&self, group_id: &str) -> Result<FailureGroup, ApiError> {
        self.groups
            .load()?
            .remove(group_id)
            .ok_or_else(|| ApiError::NotFound {
                entity: "failure group",
                id: group_id.to_string(),
            })
    }

    /// Renders a debugging prompt for a group (preferred when both ids are
    /// given) or a single failure. Nothing is persisted.
    ///
    /// # Errors
    /// Returns [`ApiError::InvalidArgument`] when neither id is supplied,
    /// [`ApiError::NotFound`] when the referenced id does not exist and
    /// [`ApiError::Storage`] when a store cannot be read.
    pub fn generate_prompt(&self, request: &PromptRequest) -> Result<DebugPrompt, ApiError> {
        let _guard = self.serialize();

        if let Some(group_id) = request.group_id.as_deref() {
            let group = self.load_group(group_id)?;
            let failures = self.failures.load()?;
            let members: Vec<&FailureRecord> = group
                .failures
                .iter()
                .filter_map(|id| failures.get(id))
                .collect();
            return Ok(render_group_prompt(&group, &members, request.prompt_style));
        }

        if let Some(failure_id) = request.failure_id.as_deref() {
            let failures = self.failures.load()?;
            let failure = failures
                .get(failure_id)
                .ok_or_else(|| ApiError::failure_not_found(failure_id))?;
            return Ok(render_failure_prompt(failure, request.prompt_style));
        }

        Err(ApiError::InvalidArgument(
            "either group_id or failure_id must be provided".to_string(),
        ))
    }

    #[must_use]
    pub fn principles(&self) -> &'static [Principle] {
        &PRINCIPLES
    }
}
