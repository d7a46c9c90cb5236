use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    session_id_for, DebugSession, DebugStep, DebugStepStatus, FailureRecord, Principle,
    PrincipleNumber, PRINCIPLE_COUNT,
};

/// Controls how `apply_principle` moves a failure's step pointer.
///
/// The default reproduces open re-visit semantics: applying principle `k`
/// always sets the pointer to `min(k + 1, 9)`, even when that moves it
/// backward. With `monotonic` set the pointer never decreases.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ProgressionPolicy {
    pub monotonic: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepSummary {
    pub number: u8,
    pub name: String,
    pub status: DebugStepStatus,
    pub analysis: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl From<&DebugStep> for StepSummary {
    fn from(step: &DebugStep) -> Self {
        Self {
            number: step.step,
            name: step.name.clone(),
            status: step.status,
            analysis: step.llm_analysis.clone(),
            completed_at: step.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PrincipleApplication {
    pub failure_id: String,
    pub current_principle: StepSummary,
    pub next_principle: Option<Principle>,
    pub is_complete: bool,
    pub current_debug_step: u8,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProgressCounts {
    pub completed: usize,
    pub total: u8,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CompletedPrinciple {
    pub number: u8,
    pub name: String,
    pub analysis: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DebuggingProgress {
    pub session_id: String,
    pub current_principle: Principle,
    pub progress: ProgressCounts,
    pub completed_principles: Vec<CompletedPrinciple>,
    pub debug_steps: Vec<DebugStep>,
}

/// Creates the session that accompanies a freshly registered failure: a
/// single pending entry for principle 1.
#[must_use]
pub fn new_session(failure: &FailureRecord, now: OffsetDateTime) -> DebugSession {
    DebugSession {
        id: session_id_for(&failure.id),
        failure_id: failure.id.clone(),
        created_at: now,
        debug_steps: vec![DebugStep::pending(PrincipleNumber::FIRST, now)],
    }
}

/// Records `analysis` as the outcome of one principle and moves the failure's
/// step pointer.
///
/// `principle` defaults to the failure's current step. The matching session
/// entry is created or overwritten, and a pending placeholder is added for the
/// following principle when none exists.
pub fn apply_principle(
    failure: &mut FailureRecord,
    session: &mut DebugSession,
    principle: Option<PrincipleNumber>,
    analysis: &str,
    policy: ProgressionPolicy,
    now: OffsetDateTime,
) -> PrincipleApplication {
    let number =
        principle.unwrap_or_else(|| PrincipleNumber::clamped(failure.current_debug_step));

    let entry = session.step_entry(number, now);
    entry.status = DebugStepStatus::Completed;
    entry.completed_at = Some(now);
    entry.llm_analysis = Some(analysis.to_string());
    let current_principle = StepSummary::from(&*entry);

    let next = number.next();
    if let Some(next) = next {
        if session.step(next).is_none() {
            session.step_entry(next, now);
        }
    }

    let target = number.advanced();
    let pointer = if policy.monotonic {
        target.max(PrincipleNumber::clamped(failure.current_debug_step))
    } else {
        target
    };
    failure.current_debug_step = pointer.get();

    PrincipleApplication {
        failure_id: failure.id.clone(),
        current_principle,
        next_principle: next.map(|value| *value.principle()),
        is_complete: number.is_last(),
        current_debug_step: failure.current_debug_step,
    }
}

/// Summarizes a failure's session. A missing session reads as one that has
/// not completed any principle yet.
#[must_use]
pub fn debugging_progress(
    failure: &FailureRecord,
    session: Option<&DebugSession>,
) -> DebuggingProgress {
    let completed_principles: Vec<CompletedPrinciple> = session
        .map(|session| {
            session
                .completed_steps()
                .map(|step| CompletedPrinciple {
                    number: step.step,
                    name: step.name.clone(),
                    analysis: step.llm_analysis.clone(),
                    completed_at: step.completed_at,
                })
                .collect()
        })
        .unwrap_or_default();

    DebuggingProgress {
        session_id: session.map_or_else(|| session_id_for(&failure.id), |value| value.id.clone()),
        current_principle: *PrincipleNumber::clamped(failure.current_debug_step).principle(),
        progress: ProgressCounts {
            completed: completed_principles.len(),
            total: PRINCIPLE_COUNT,
        },
        completed_principles,
        debug_steps: session
            .map(|value| value.debug_steps.clone())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_rfc3339_utc, FailureStatus};

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn number(value: u8) -> PrincipleNumber {
        must_ok(PrincipleNumber::new(value))
    }

    fn at(value: &str) -> OffsetDateTime {
        must_ok(parse_rfc3339_utc(value))
    }

    fn fixture_failure() -> FailureRecord {
        FailureRecord {
            id: "failure_fixture".to_string(),
            timestamp: at("2026-02-07T12:00:00Z"),
            status: FailureStatus::New,
            current_debug_step: 1,
            test_name: "test_user_authentication".to_string(),
            file_path: "/path/to/test_auth.py".to_string(),
            line_number: 42,
            error_message: "AssertionError: Expected 'authenticated', got None".to_string(),
            traceback: "Traceback (most recent call last):".to_string(),
            locals: None,
        }
    }

    fn fixture_pair() -> (FailureRecord, DebugSession) {
        let failure = fixture_failure();
        let session = new_session(&failure, failure.timestamp);
        (failure, session)
    }

    #[test]
    fn new_session_has_single_pending_first_step() {
        let (_, session) = fixture_pair();
        assert_eq!(session.id, "session_failure_fixture");
        assert_eq!(session.debug_steps.len(), 1);
        assert_eq!(session.debug_steps[0].step, 1);
        assert_eq!(session.debug_steps[0].status, DebugStepStatus::Pending);
    }

    #[test]
    fn default_principle_is_current_step() {
        let (mut failure, mut session) = fixture_pair();
        let now = at("2026-02-07T12:05:00Z");

        let result = apply_principle(
            &mut failure,
            &mut session,
            None,
            "root cause is X",
            ProgressionPolicy::default(),
            now,
        );

        assert_eq!(result.current_principle.number, 1);
        assert_eq!(result.current_principle.status, DebugStepStatus::Completed);
        assert_eq!(result.current_principle.analysis.as_deref(), Some("root cause is X"));
        assert_eq!(failure.current_debug_step, 2);
        assert_eq!(result.next_principle.map(|p| p.number), Some(2));
        assert!(!result.is_complete);

        let first = session.step(number(1));
        assert_eq!(first.and_then(|step| step.completed_at), Some(now));
        let placeholder = session.step(number(2));
        assert_eq!(placeholder.map(|step| step.status), Some(DebugStepStatus::Pending));
    }

    #[test]
    fn reapplying_overwrites_single_entry() {
        let (mut failure, mut session) = fixture_pair();
        let policy = ProgressionPolicy::default();

        let first_at = at("2026-02-07T12:01:00Z");
        let second_at = at("2026-02-07T12:02:00Z");
        apply_principle(&mut failure, &mut session, Some(number(1)), "first", policy, first_at);
        apply_principle(&mut failure, &mut session, Some(number(1)), "second", policy, second_at);

        let entries: Vec<&DebugStep> = session
            .debug_steps
            .iter()
            .filter(|step| step.step == 1)
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].llm_analysis.as_deref(), Some("second"));
        assert_eq!(entries[0].completed_at, Some(at("2026-02-07T12:02:00Z")));
    }

    #[test]
    fn backward_jump_moves_pointer_back_by_default() {
        let (mut failure, mut session) = fixture_pair();
        let policy = ProgressionPolicy::default();
        let now = at("2026-02-07T13:00:00Z");

        apply_principle(&mut failure, &mut session, Some(number(7)), "plug checked", policy, now);
        assert_eq!(failure.current_debug_step, 8);

        apply_principle(&mut failure, &mut session, Some(number(3)), "looked again", policy, now);
        assert_eq!(failure.current_debug_step, 4);
        assert!(session.step(number(7)).is_some_and(DebugStep::is_completed));
    }

    #[test]
    fn monotonic_policy_keeps_pointer_forward() {
        let (mut failure, mut session) = fixture_pair();
        let policy = ProgressionPolicy { monotonic: true };
        let now = at("2026-02-07T13:00:00Z");

        apply_principle(&mut failure, &mut session, Some(number(7)), "plug checked", policy, now);
        apply_principle(&mut failure, &mut session, Some(number(3)), "looked again", policy, now);

        assert_eq!(failure.current_debug_step, 8);
    }

    #[test]
    fn last_principle_completes_without_next() {
        let (mut failure, mut session) = fixture_pair();

        let result = apply_principle(
            &mut failure,
            &mut session,
            Some(number(9)),
            "final check",
            ProgressionPolicy::default(),
            at("2026-02-07T14:00:00Z"),
        );

        assert!(result.is_complete);
        assert!(result.next_principle.is_none());
        assert_eq!(failure.current_debug_step, 9);
        assert!(session.debug_steps.iter().all(|step| step.step <= 9));
    }

    #[test]
    fn skipping_ahead_leaves_gaps_unpopulated() {
        let (mut failure, mut session) = fixture_pair();

        apply_principle(
            &mut failure,
            &mut session,
            Some(number(5)),
            "one change",
            ProgressionPolicy::default(),
            at("2026-02-07T14:00:00Z"),
        );

        let steps: Vec<u8> = session.debug_steps.iter().map(|step| step.step).collect();
        assert_eq!(steps, vec![1, 5, 6]);
    }

    #[test]
    fn progress_counts_completed_steps() {
        let (mut failure, mut session) = fixture_pair();
        let policy = ProgressionPolicy::default();
        let now = at("2026-02-07T14:00:00Z");
        apply_principle(&mut failure, &mut session, None, "one", policy, now);
        apply_principle(&mut failure, &mut session, None, "two", policy, now);

        let progress = debugging_progress(&failure, Some(&session));
        assert_eq!(progress.progress.completed, 2);
        assert_eq!(progress.progress.total, 9);
        assert_eq!(progress.current_principle.number, 3);
        assert_eq!(progress.completed_principles[1].analysis.as_deref(), Some("two"));

        let empty = debugging_progress(&failure, None);
        assert_eq!(empty.progress.completed, 0);
        assert_eq!(empty.session_id, "session_failure_fixture");
    }
}
