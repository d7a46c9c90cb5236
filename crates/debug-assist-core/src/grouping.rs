use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::{Duration, Month, OffsetDateTime, UtcOffset};

use crate::{new_group_id, FailureGroup, FailureRecord, FailureStatus};

const UNKNOWN_ERROR_TYPE: &str = "UnknownError";
const CRITICAL_ERROR_TYPES: [&str; 2] = ["SecurityError", "DataCorruptionError"];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    ErrorType,
    FilePath,
    Pattern,
}

impl GroupBy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ErrorType => "error_type",
            Self::FilePath => "file_path",
            Self::Pattern => "pattern",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "error_type" => Some(Self::ErrorType),
            "file_path" => Some(Self::FilePath),
            "pattern" => Some(Self::Pattern),
            _ => None,
        }
    }

    fn key_for(self, failure: &FailureRecord) -> String {
        match self {
            Self::ErrorType => extract_error_type(&failure.error_message),
            Self::FilePath => failure.file_path.clone(),
            Self::Pattern => normalize_pattern(&failure.error_message),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    #[default]
    All,
    Today,
    Week,
    Month,
}

impl TimeRange {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "today" => Some(Self::Today),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    /// Whether `timestamp` falls inside the window ending at `now`.
    #[must_use]
    pub fn contains(self, timestamp: OffsetDateTime, now: OffsetDateTime) -> bool {
        match self {
            Self::All => true,
            Self::Today => {
                timestamp.to_offset(UtcOffset::UTC).date() == now.to_offset(UtcOffset::UTC).date()
            }
            Self::Week => timestamp >= now - Duration::days(7),
            Self::Month => timestamp >= one_month_before(now),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct AnalysisOptions {
    #[serde(default)]
    pub group_by: GroupBy,
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(default)]
    pub include_resolved: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriageLevel {
    Low,
    Medium,
    High,
    Urgent,
}

impl TriageLevel {
    #[must_use]
    pub fn from_priority(priority: usize) -> Self {
        if priority > 15 {
            Self::Urgent
        } else if priority > 10 {
            Self::High
        } else if priority > 5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriageRecommendation {
    pub group_id: String,
    pub group_name: String,
    pub priority_score: usize,
    pub priority: TriageLevel,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisInsights {
    pub most_common_error: Option<String>,
    pub error_distribution: BTreeMap<String, usize>,
    pub triage_recommendations: Vec<TriageRecommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisReport {
    pub total_failures: usize,
    pub group_count: usize,
    pub group_by: GroupBy,
    pub time_range: TimeRange,
    pub include_resolved: bool,
    pub groups: Vec<FailureGroup>,
    pub insights: AnalysisInsights,
}

fn error_type_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(\w+Error|Exception):").ok())
        .as_ref()
}

fn digits_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").ok()).as_ref()
}

fn single_quoted_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"'[^']*'").ok()).as_ref()
}

fn double_quoted_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""[^"]*""#).ok()).as_ref()
}

/// Pulls the leading `<Word>Error` / `Exception` identifier out of an error
/// message, or `UnknownError` when none is present.
#[must_use]
pub fn extract_error_type(message: &str) -> String {
    error_type_regex()
        .and_then(|regex| regex.captures(message))
        .and_then(|captures| captures.get(1))
        .map_or_else(
            || UNKNOWN_ERROR_TYPE.to_string(),
            |found| found.as_str().to_string(),
        )
}

/// Coarse structural fingerprint of an error message: digit runs become `N`
/// and quoted substrings become `'VALUE'` / `"VALUE"`.
#[must_use]
pub fn normalize_pattern(message: &str) -> String {
    let mut pattern = message.to_string();
    if let Some(regex) = digits_regex() {
        pattern = regex.replace_all(&pattern, "N").into_owned();
    }
    if let Some(regex) = single_quoted_regex() {
        pattern = regex.replace_all(&pattern, "'VALUE'").into_owned();
    }
    if let Some(regex) = double_quoted_regex() {
        pattern = regex.replace_all(&pattern, "\"VALUE\"").into_owned();
    }
    pattern
}

#[must_use]
pub fn root_cause_hypothesis(error_type: &str) -> &'static str {
    match error_type {
        "AssertionError" => {
            "Expected and actual values do not match. Likely a regression or a changed \
             behavior that the test still asserts against."
        }
        "TypeError" => {
            "Incorrect type handling. A value of an unexpected type reaches code that \
             cannot handle it, often after an interface change."
        }
        "AttributeError" | "NameError" => {
            "Missing attribute or variable. Possibly a refactor renamed or removed \
             something the test still relies on."
        }
        "ImportError" => {
            "Dependency or import path issue. Check installed packages and module paths."
        }
        "TimeoutError" => {
            "Performance regression or deadlock. An operation no longer finishes in time."
        }
        _ => "Unknown pattern. The failures need individual investigation.",
    }
}

/// Applies the time window and resolved-status filter, keeping input order.
#[must_use]
pub fn filter_failures<'a, I>(
    failures: I,
    options: &AnalysisOptions,
    now: OffsetDateTime,
) -> Vec<&'a FailureRecord>
where
    I: IntoIterator<Item = &'a FailureRecord>,
{
    failures
        .into_iter()
        .filter(|failure| options.include_resolved || failure.status != FailureStatus::Resolved)
        .filter(|failure| options.time_range.contains(failure.timestamp, now))
        .collect()
}

/// Partitions failures by key, in order of each key's first appearance.
///
/// `common_error_type` comes from the member that opened the group, not a
/// majority vote. Every call mints new group ids.
#[must_use]
pub fn group_failures(failures: &[&FailureRecord], group_by: GroupBy) -> Vec<FailureGroup> {
    let mut index_by_key: BTreeMap<String, usize> = BTreeMap::new();
    let mut groups: Vec<FailureGroup> = Vec::new();

    for failure in failures {
        let key = group_by.key_for(failure);
        if let Some(index) = index_by_key.get(&key) {
            let group = &mut groups[*index];
            group.count += 1;
            group.failures.push(failure.id.clone());
            group.first_seen = group.first_seen.min(failure.timestamp);
            group.last_seen = group.last_seen.max(failure.timestamp);
            continue;
        }

        let error_type = extract_error_type(&failure.error_message);
        index_by_key.insert(key.clone(), groups.len());
        groups.push(FailureGroup {
            id: new_group_id(groups.len()),
            name: format!("{key} Failures"),
            pattern: key,
            count: 1,
            failures: vec![failure.id.clone()],
            root_cause_hypothesis: root_cause_hypothesis(&error_type).to_string(),
            common_error_type: error_type,
            first_seen: failure.timestamp,
            last_seen: failure.timestamp,
        });
    }

    groups
}

/// `count + 5` when the newest member is under a day old, `+ 10` for
/// security or data-corruption failures.
#[must_use]
pub fn priority_score(group: &FailureGroup, now: OffsetDateTime) -> usize {
    let mut score = group.count;
    if now - group.last_seen < Duration::DAY {
        score += 5;
    }
    if CRITICAL_ERROR_TYPES.contains(&group.common_error_type.as_str()) {
        score += 10;
    }
    score
}

/// Triage recommendations ordered from most to least urgent.
#[must_use]
pub fn triage(groups: &[FailureGroup], now: OffsetDateTime) -> Vec<TriageRecommendation> {
    let mut recommendations: Vec<TriageRecommendation> = groups
        .iter()
        .map(|group| {
            let score = priority_score(group, now);
            let level = TriageLevel::from_priority(score);
            TriageRecommendation {
                group_id: group.id.clone(),
                group_name: group.name.clone(),
                priority_score: score,
                priority: level,
                recommendation: recommendation_text(level, group),
            }
        })
        .collect();
    recommendations.sort_by(|lhs, rhs| rhs.priority_score.cmp(&lhs.priority_score));
    recommendations
}

fn recommendation_text(level: TriageLevel, group: &FailureGroup) -> String {
    let error_type = &group.common_error_type;
    let pattern = &group.pattern;
    let count = group.count;
    match level {
        TriageLevel::Urgent => format!(
            "Fix immediately: {count} {error_type} failures matching \"{pattern}\" are recent \
             or critical. Stop other work until this group is understood."
        ),
        TriageLevel::High => format!(
            "Schedule a fix soon: {error_type} keeps failing ({count} failures matching \
             \"{pattern}\")."
        ),
        TriageLevel::Medium => format!(
            "Investigate in the next debugging session: {count} {error_type} failures \
             matching \"{pattern}\"."
        ),
        TriageLevel::Low => format!(
            "Track and revisit if it recurs: {count} {error_type} failure(s) matching \
             \"{pattern}\"."
        ),
    }
}

/// Filters, groups and triages a failure set in one pass.
#[must_use]
pub fn analyze_failures<'a, I>(
    failures: I,
    options: &AnalysisOptions,
    now: OffsetDateTime,
) -> AnalysisReport
where
    I: IntoIterator<Item = &'a FailureRecord>,
{
    let selected = filter_failures(failures, options, now);
    let groups = group_failures(&selected, options.group_by);

    let mut error_distribution: BTreeMap<String, usize> = BTreeMap::new();
    for failure in &selected {
        *error_distribution
            .entry(extract_error_type(&failure.error_message))
            .or_insert(0) += 1;
    }

    let mut most_common_error: Option<(&String, usize)> = None;
    for (error_type, count) in &error_distribution {
        match most_common_error {
            Some((_, best)) if *count <= best => {}
            _ => most_common_error = Some((error_type, *count)),
        }
    }

    let insights = AnalysisInsights {
        most_common_error: most_common_error.map(|(error_type, _)| error_type.clone()),
        triage_recommendations: triage(&groups, now),
        error_distribution,
    };

    AnalysisReport {
        total_failures: selected.len(),
        group_count: groups.len(),
        group_by: options.group_by,
        time_range: options.time_range,
        include_resolved: options.include_resolved,
        groups,
        insights,
    }
}

fn one_month_before(now: OffsetDateTime) -> OffsetDateTime {
    let (year, month) = match now.month() {
        Month::January => (now.year() - 1, Month::December),
        other => (now.year(), other.previous()),
    };
    let day = now.day().min(month.length(year));
    match time::Date::from_calendar_date(year, month, day) {
        Ok(date) => now.replace_date(date),
        Err(_) => now - Duration::days(30),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_rfc3339_utc;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn at(value: &str) -> OffsetDateTime {
        must_ok(parse_rfc3339_utc(value))
    }

    fn failure(id: &str, message: &str, file_path: &str, timestamp: &str) -> FailureRecord {
        FailureRecord {
            id: id.to_string(),
            timestamp: at(timestamp),
            status: FailureStatus::New,
            current_debug_step: 1,
            test_name: format!("test_{id}"),
            file_path: file_path.to_string(),
            line_number: 10,
            error_message: message.to_string(),
            traceback: String::new(),
            locals: None,
        }
    }

    #[test]
    fn extracts_error_type_or_falls_back() {
        assert_eq!(extract_error_type("TypeError: unsupported operand"), "TypeError");
        assert_eq!(
            extract_error_type("E   AssertionError: expected 1"),
            "AssertionError"
        );
        assert_eq!(extract_error_type("Exception: generic"), "Exception");
        assert_eq!(extract_error_type("assert 1 == 2"), "UnknownError");
    }

    #[test]
    fn pattern_collapses_numbers_and_quotes() {
        assert_eq!(
            normalize_pattern("AssertionError: expected 42, got 7"),
            "AssertionError: expected N, got N"
        );
        assert_eq!(
            normalize_pattern("Expected 10, got 3"),
            normalize_pattern("Expected 42, got 7")
        );
        assert_eq!(
            normalize_pattern("KeyError: 'user_12' not in \"cache\""),
            "KeyError: 'VALUE' not in \"VALUE\""
        );
    }

    #[test]
    fn groups_by_error_type_with_first_member_metadata() {
        let records = [
            failure("a", "TypeError: bad operand", "tests/a.py", "2026-02-07T10:00:00Z"),
            failure("b", "AssertionError: 1 != 2", "tests/b.py", "2026-02-07T11:00:00Z"),
            failure("c", "TypeError: not callable", "tests/c.py", "2026-02-07T09:00:00Z"),
        ];
        let refs: Vec<&FailureRecord> = records.iter().collect();

        let groups = group_failures(&refs, GroupBy::ErrorType);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "TypeError Failures");
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].failures, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(groups[0].first_seen, at("2026-02-07T09:00:00Z"));
        assert_eq!(groups[0].last_seen, at("2026-02-07T10:00:00Z"));
        assert!(groups[0].root_cause_hypothesis.starts_with("Incorrect type handling"));
    }

    #[test]
    fn file_path_grouping_keeps_first_member_error_type() {
        let records = [
            failure("a", "ImportError: no module", "tests/a.py", "2026-02-07T10:00:00Z"),
            failure("b", "TypeError: nope", "tests/a.py", "2026-02-07T11:00:00Z"),
        ];
        let refs: Vec<&FailureRecord> = records.iter().collect();

        let groups = group_failures(&refs, GroupBy::FilePath);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].pattern, "tests/a.py");
        assert_eq!(groups[0].common_error_type, "ImportError");
    }

    #[test]
    fn filter_excludes_resolved_and_out_of_window() {
        let now = at("2026-03-15T12:00:00Z");
        let mut resolved = failure("r", "TypeError: x", "a.py", "2026-03-15T08:00:00Z");
        resolved.status = FailureStatus::Resolved;
        let records = [
            failure("today", "TypeError: x", "a.py", "2026-03-15T01:00:00Z"),
            failure("week", "TypeError: x", "a.py", "2026-03-10T12:00:00Z"),
            failure("month", "TypeError: x", "a.py", "2026-02-20T12:00:00Z"),
            failure("old", "TypeError: x", "a.py", "2026-01-01T12:00:00Z"),
            resolved,
        ];

        let ids = |options: AnalysisOptions| -> Vec<String> {
            filter_failures(&records, &options, now)
                .into_iter()
                .map(|record| record.id.clone())
                .collect()
        };

        assert_eq!(ids(AnalysisOptions::default()).len(), 4);
        assert_eq!(
            ids(AnalysisOptions {
                include_resolved: true,
                ..AnalysisOptions::default()
            })
            .len(),
            5
        );
        assert_eq!(
            ids(AnalysisOptions {
                time_range: TimeRange::Today,
                ..AnalysisOptions::default()
            }),
            vec!["today".to_string()]
        );
        assert_eq!(
            ids(AnalysisOptions {
                time_range: TimeRange::Week,
                ..AnalysisOptions::default()
            }),
            vec!["today".to_string(), "week".to_string()]
        );
        assert_eq!(
            ids(AnalysisOptions {
                time_range: TimeRange::Month,
                ..AnalysisOptions::default()
            }),
            vec!["today".to_string(), "week".to_string(), "month".to_string()]
        );
    }

    #[test]
    fn today_compares_utc_calendar_dates() {
        let now = at("2026-03-15T12:00:00Z");
        let eastern = must_ok(UtcOffset::from_hms(-5, 0, 0));
        let far_east = must_ok(UtcOffset::from_hms(9, 0, 0));

        // 2026-03-14 locally, 2026-03-15 in UTC.
        let late_local = at("2026-03-15T02:00:00Z").to_offset(eastern);
        // 2026-03-15 locally, 2026-03-14 in UTC.
        let early_local = at("2026-03-14T20:00:00Z").to_offset(far_east);

        assert!(TimeRange::Today.contains(late_local, now));
        assert!(!TimeRange::Today.contains(early_local, now));
        assert!(TimeRange::Today.contains(at("2026-03-15T23:59:59Z"), now.to_offset(far_east)));
    }

    #[test]
    fn month_window_clamps_to_shorter_month() {
        let now = at("2026-03-31T12:00:00Z");
        assert_eq!(one_month_before(now), at("2026-02-28T12:00:00Z"));
        let january = at("2026-01-15T00:00:00Z");
        assert_eq!(one_month_before(january), at("2025-12-15T00:00:00Z"));
        let leap = at("2024-03-30T08:00:00Z");
        assert_eq!(one_month_before(leap), at("2024-02-29T08:00:00Z"));
    }

    #[test]
    fn priority_bands_and_ordering() {
        let now = at("2026-02-07T12:00:00Z");
        let mut records = Vec::new();
        for index in 0..12 {
            records.push(failure(
                &format!("sec{index}"),
                "SecurityError: token leaked",
                "tests/sec.py",
                "2026-02-07T11:00:00Z",
            ));
        }
        records.push(failure("old", "TypeError: x", "tests/t.py", "2026-01-01T00:00:00Z"));
        let refs: Vec<&FailureRecord> = records.iter().collect();
        let groups = group_failures(&refs, GroupBy::ErrorType);

        let recommendations = triage(&groups, now);

        assert_eq!(recommendations.len(), 2);
        assert_eq!(recommendations[0].priority_score, 12 + 5 + 10);
        assert_eq!(recommendations[0].priority, TriageLevel::Urgent);
        assert!(recommendations[0].recommendation.contains("SecurityError"));
        assert_eq!(recommendations[1].priority_score, 1);
        assert_eq!(recommendations[1].priority, TriageLevel::Low);
    }

    #[test]
    fn triage_thresholds_are_strict() {
        assert_eq!(TriageLevel::from_priority(16), TriageLevel::Urgent);
        assert_eq!(TriageLevel::from_priority(15), TriageLevel::High);
        assert_eq!(TriageLevel::from_priority(10), TriageLevel::Medium);
        assert_eq!(TriageLevel::from_priority(5), TriageLevel::Low);
    }

    #[test]
    fn analysis_reports_distribution_and_most_common() {
        let now = at("2026-02-07T12:00:00Z");
        let records = [
            failure("a", "TypeError: x", "a.py", "2026-02-07T10:00:00Z"),
            failure("b", "TypeError: y", "b.py", "2026-02-07T10:00:00Z"),
            failure("c", "AssertionError: z", "c.py", "2026-02-07T10:00:00Z"),
        ];

        let report = analyze_failures(
            &records,
            &AnalysisOptions {
                group_by: GroupBy::FilePath,
                ..AnalysisOptions::default()
            },
            now,
        );

        assert_eq!(report.total_failures, 3);
        assert_eq!(report.group_count, 3);
        assert_eq!(report.insights.most_common_error.as_deref(), Some("TypeError"));
        assert_eq!(report.insights.error_distribution.get("TypeError"), Some(&2));
        assert_eq!(report.insights.triage_recommendations.len(), 3);
    }

    #[test]
    fn empty_analysis_has_no_most_common_error() {
        let report = analyze_failures(
            std::iter::empty::<&FailureRecord>(),
            &AnalysisOptions::default(),
            at("2026-02-07T12:00:00Z"),
        );
        assert_eq!(report.total_failures, 0);
        assert!(report.groups.is_empty());
        assert!(report.insights.most_common_error.is_none());
    }
}
