use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{format_rfc3339, FailureGroup, FailureRecord, PrincipleNumber, PRINCIPLES};

const GROUP_SAMPLE_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    #[default]
    Detailed,
    Concise,
    StepByStep,
    RootCause,
}

impl PromptStyle {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detailed => "detailed",
            Self::Concise => "concise",
            Self::StepByStep => "step_by_step",
            Self::RootCause => "root_cause",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "detailed" => Some(Self::Detailed),
            "concise" => Some(Self::Concise),
            "step_by_step" => Some(Self::StepByStep),
            "root_cause" => Some(Self::RootCause),
            _ => None,
        }
    }

    fn traceback_lines(self) -> usize {
        match self {
            Self::Concise => 5,
            _ => 15,
        }
    }

    fn locals_limit(self) -> usize {
        match self {
            Self::Concise => 3,
            _ => 10,
        }
    }

    fn instructions(self, subject: &str) -> String {
        match self {
            Self::Detailed => format!(
                "Analyze {subject} thoroughly. Explain what the test expects, what actually \
                 happened, the most likely root cause, and propose a concrete fix."
            ),
            Self::Concise => format!(
                "In a few sentences, state the most likely cause of {subject} and the smallest \
                 fix."
            ),
            Self::StepByStep => format!(
                "Work through {subject} one debugging principle at a time, recording findings \
                 for each principle before moving to the next."
            ),
            Self::RootCause => format!(
                "Identify the root cause of {subject}. Separate symptoms from causes and \
                 explain how to verify the cause before fixing it."
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebugPrompt {
    pub title: String,
    pub prompt_style: PromptStyle,
    pub target_type: String,
    pub target_id: String,
    pub instructions: String,
    pub prompt: String,
}

#[must_use]
pub fn render_failure_prompt(failure: &FailureRecord, style: PromptStyle) -> DebugPrompt {
    let mut prompt = String::new();

    match style {
        PromptStyle::Concise => {
            line(
                &mut prompt,
                format_args!("Test `{}` failed: {}", failure.test_name, failure.error_message),
            );
            line(
                &mut prompt,
                format_args!("Location: {}:{}", failure.file_path, failure.line_number),
            );
            write_traceback(&mut prompt, &failure.traceback, style);
            write_locals(&mut prompt, failure, style);
        }
        PromptStyle::Detailed | PromptStyle::RootCause => {
            write_failure_header(&mut prompt, failure);
            write_traceback(&mut prompt, &failure.traceback, style);
            write_locals(&mut prompt, failure, style);
            if style == PromptStyle::RootCause {
                write_root_cause_questions(&mut prompt);
            }
        }
        PromptStyle::StepByStep => {
            write_failure_header(&mut prompt, failure);
            write_traceback(&mut prompt, &failure.traceback, style);
            write_locals(&mut prompt, failure, style);
            write_checklist(&mut prompt, PrincipleNumber::clamped(failure.current_debug_step));
        }
    }

    DebugPrompt {
        title: format!("Debug test failure: {}", failure.test_name),
        prompt_style: style,
        target_type: "failure".to_string(),
        target_id: failure.id.clone(),
        instructions: style.instructions("this test failure"),
        prompt,
    }
}

/// Renders a group together with up to three of its member failures.
#[must_use]
pub fn render_group_prompt(
    group: &FailureGroup,
    members: &[&FailureRecord],
    style: PromptStyle,
) -> DebugPrompt {
    let mut prompt = String::new();

    line(&mut prompt, format_args!("Failure group: {}", group.name));
    line(&mut prompt, format_args!("Failures: {}", group.count));
    line(&mut prompt, format_args!("Error type: {}", group.common_error_type));
    line(&mut prompt, format_args!("Pattern: {}", group.pattern));
    if style != PromptStyle::Concise {
        line(
            &mut prompt,
            format_args!(
                "Seen: {} to {}",
                timestamp_text(group.first_seen),
                timestamp_text(group.last_seen)
            ),
        );
        line(&mut prompt, format_args!("Hypothesis: {}", group.root_cause_hypothesis));
    }

    for (index, member) in members.iter().take(GROUP_SAMPLE_SIZE).enumerate() {
        prompt.push('\n');
        line(&mut prompt, format_args!("Sample {} of {}:", index + 1, group.count));
        if style == PromptStyle::Concise {
            line(
                &mut prompt,
                format_args!(
                    "{} ({}:{})",
                    member.test_name, member.file_path, member.line_number
                ),
            );
            line(&mut prompt, format_args!("{}", member.error_message));
        } else {
            write_failure_header(&mut prompt, member);
            write_traceback(&mut prompt, &member.traceback, style);
            write_locals(&mut prompt, member, style);
        }
    }

    match style {
        PromptStyle::StepByStep => write_checklist(&mut prompt, PrincipleNumber::FIRST),
        PromptStyle::RootCause => write_root_cause_questions(&mut prompt),
        PromptStyle::Detailed | PromptStyle::Concise => {}
    }

    DebugPrompt {
        title: format!("Debug failure group: {}", group.name),
        prompt_style: style,
        target_type: "group".to_string(),
        target_id: group.id.clone(),
        instructions: style.instructions(&format!(
            "this group of {} related test failures",
            group.count
        )),
        prompt,
    }
}

/// Appends one formatted line and its newline.
fn line(prompt: &mut String, args: fmt::Arguments<'_>) {
    prompt.push_str(&fmt::format(args));
    prompt.push('\n');
}

fn write_failure_header(prompt: &mut String, failure: &FailureRecord) {
    line(prompt, format_args!("Test: {}", failure.test_name));
    line(prompt, format_args!("File: {}:{}", failure.file_path, failure.line_number));
    line(prompt, format_args!("Reported: {}", timestamp_text(failure.timestamp)));
    line(prompt, format_args!("Error: {}", failure.error_message));
}

fn write_traceback(prompt: &mut String, traceback: &str, style: PromptStyle) {
    let lines: Vec<&str> = traceback.trim_end().lines().collect();
    if lines.is_empty() {
        return;
    }
    let keep = style.traceback_lines();
    let skipped = lines.len().saturating_sub(keep);

    prompt.push_str("Traceback:\n");
    if skipped > 0 {
        line(prompt, format_args!("  ... {skipped} earlier lines omitted"));
    }
    for frame in &lines[skipped..] {
        line(prompt, format_args!("{frame}"));
    }
}

fn write_locals(prompt: &mut String, failure: &FailureRecord, style: PromptStyle) {
    let Some(locals) = failure.locals.as_ref().filter(|locals| !locals.is_empty()) else {
        return;
    };

    prompt.push_str("Local variables:\n");
    for (name, value) in locals.iter().take(style.locals_limit()) {
        let rendered = match value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        line(prompt, format_args!("  {name} = {rendered}"));
    }
    let hidden = locals.len().saturating_sub(style.locals_limit());
    if hidden > 0 {
        line(prompt, format_args!("  ... {hidden} more"));
    }
}

fn write_checklist(prompt: &mut String, current: PrincipleNumber) {
    prompt.push_str("\nDebugging checklist:\n");
    for principle in &PRINCIPLES {
        let marker = if principle.number == current.get() { ">" } else { " " };
        line(
            prompt,
            format_args!(
                "{marker} {}. {}: {}",
                principle.number, principle.name, principle.description
            ),
        );
    }
}

fn write_root_cause_questions(prompt: &mut String) {
    prompt.push_str(
        "\nAnswer:\n\
         1. What changed recently in the code or environment?\n\
         2. Which assumption in the test or code no longer holds?\n\
         3. What single experiment would confirm the cause?\n",
    );
}

fn timestamp_text(value: OffsetDateTime) -> String {
    format_rfc3339(value).unwrap_or_else(|_| value.to_string())
}
