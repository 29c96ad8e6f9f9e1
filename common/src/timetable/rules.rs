// Rule compiler: stored constraint rows -> structured predicates
//
// The validator only ever sees `CompiledRule`; raw strings are parsed once here
// and malformed rows are dropped with a warning.

use crate::errors::RuleParseError;
use crate::models::{CourseKind, RuleRow};
use crate::timetable::time::{TimeOfDay, TimeRange, Weekday};
use std::collections::BTreeSet;
use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

/// Course-kind filter of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Internal,
    External,
    All,
}

impl KindFilter {
    pub fn parse(raw: Option<&str>) -> Result<Self, RuleParseError> {
        match raw.map(|s| s.trim().to_ascii_lowercase()) {
            None => Ok(KindFilter::All),
            Some(s) if s.is_empty() || s == "all" || s == "any" => Ok(KindFilter::All),
            Some(s) if s == "internal" => Ok(KindFilter::Internal),
            Some(s) if s == "external" => Ok(KindFilter::External),
            Some(s) => Err(RuleParseError::InvalidKind(s)),
        }
    }

    pub fn matches(&self, kind: CourseKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Internal => kind == CourseKind::Internal,
            KindFilter::External => kind == CourseKind::External,
        }
    }
}

/// A rule ready for evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pub id: Uuid,
    pub description: String,
    /// `None` applies to every level
    pub levels: Option<HashSet<i32>>,
    pub kind: KindFilter,
    /// `None` covers every working day
    pub days: Option<BTreeSet<Weekday>>,
    /// `None` covers the whole day
    pub window: Option<TimeRange>,
}

impl CompiledRule {
    /// Whether the rule's level and course-kind filters select this placement
    pub fn applies_to(&self, level: Option<i32>, kind: CourseKind) -> bool {
        let level_matches = match (&self.levels, level) {
            (None, _) => true,
            (Some(levels), Some(level)) => levels.contains(&level),
            (Some(_), None) => false,
        };
        level_matches && self.kind.matches(kind)
    }

    /// Whether the rule forbids `range` on `day`
    pub fn forbids(&self, day: Weekday, range: &TimeRange) -> bool {
        let day_hit = self.days.as_ref().map_or(true, |days| days.contains(&day));
        let time_hit = self.window.as_ref().map_or(true, |window| window.overlaps(range));
        day_hit && time_hit
    }
}

/// Compile one stored rule
pub fn compile_rule(row: &RuleRow) -> Result<CompiledRule, RuleParseError> {
    let days = match row.days.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_day_set(raw)?),
    };
    let window = match row.time_window.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_window(raw)?),
    };

    if days.is_none() && window.is_none() {
        return Err(RuleParseError::Vacuous);
    }

    let levels = row
        .levels
        .as_ref()
        .filter(|levels| !levels.is_empty())
        .map(|levels| levels.iter().copied().collect());

    Ok(CompiledRule {
        id: row.id,
        description: row.description.clone(),
        levels,
        kind: KindFilter::parse(row.course_kind.as_deref())?,
        days,
        window,
    })
}

/// Compile every enforceable rule, dropping vacuous and malformed rows
pub fn compile_rules(rows: &[RuleRow]) -> Vec<CompiledRule> {
    rows.iter()
        .filter_map(|row| match compile_rule(row) {
            Ok(rule) => Some(rule),
            Err(RuleParseError::Vacuous) => None,
            Err(e) => {
                warn!(rule_id = %row.id, description = %row.description, error = %e, "Dropping malformed rule");
                None
            }
        })
        .collect()
}

/// Expand "Sunday, Tuesday-Thursday" into a day set
pub fn parse_day_set(raw: &str) -> Result<BTreeSet<Weekday>, RuleParseError> {
    let mut days = BTreeSet::new();

    for token in raw.split([',', ';']).map(str::trim).filter(|t| !t.is_empty()) {
        match token.split_once('-') {
            Some((from, to)) => {
                let from: Weekday = from
                    .parse()
                    .map_err(|_| RuleParseError::InvalidDay(token.to_string()))?;
                let to: Weekday = to
                    .parse()
                    .map_err(|_| RuleParseError::InvalidDay(token.to_string()))?;
                days.extend(Weekday::span(from, to));
            }
            None => {
                let day: Weekday = token
                    .parse()
                    .map_err(|_| RuleParseError::InvalidDay(token.to_string()))?;
                days.insert(day);
            }
        }
    }

    if days.is_empty() {
        return Err(RuleParseError::InvalidDay(raw.to_string()));
    }
    Ok(days)
}

/// Parse "08:00-10:00"; a window whose start is not before its end is malformed
pub fn parse_window(raw: &str) -> Result<TimeRange, RuleParseError> {
    let invalid = || RuleParseError::InvalidWindow(raw.to_string());
    let (start, end) = raw.split_once('-').ok_or_else(invalid)?;
    let start: TimeOfDay = start.parse().map_err(|_| invalid())?;
    let end: TimeOfDay = end.parse().map_err(|_| invalid())?;
    TimeRange::new(start, end).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(days: Option<&str>, window: Option<&str>) -> RuleRow {
        RuleRow {
            id: Uuid::new_v4(),
            description: "No internal lectures on Monday mornings".to_string(),
            levels: Some(vec![5]),
            course_kind: Some("internal".to_string()),
            days: days.map(str::to_string),
            time_window: window.map(str::to_string),
        }
    }

    fn range(start: &str, end: &str) -> TimeRange {
        TimeRange::parse(start, end).unwrap()
    }

    #[test]
    fn test_day_set_expands_ranges_and_lists() {
        let days = parse_day_set("Sunday, Tuesday-Thursday").unwrap();
        assert_eq!(
            days.into_iter().collect::<Vec<_>>(),
            vec![
                Weekday::Sunday,
                Weekday::Tuesday,
                Weekday::Wednesday,
                Weekday::Thursday
            ]
        );
    }

    #[test]
    fn test_day_set_rejects_unknown_tokens() {
        assert!(matches!(
            parse_day_set("Monday, Funday"),
            Err(RuleParseError::InvalidDay(_))
        ));
        assert!(parse_day_set(" , ").is_err());
    }

    #[test]
    fn test_window_must_be_ordered() {
        assert_eq!(parse_window("08:00-10:00").unwrap(), range("08:00", "10:00"));
        assert!(parse_window("10:00-08:00").is_err());
        assert!(parse_window("10:00").is_err());
    }

    #[test]
    fn test_vacuous_rule_is_excluded() {
        assert_eq!(compile_rule(&row(None, None)), Err(RuleParseError::Vacuous));
        assert_eq!(compile_rule(&row(Some(" "), Some(""))), Err(RuleParseError::Vacuous));
    }

    #[test]
    fn test_malformed_rules_are_dropped_from_compiled_set() {
        let rows = vec![
            row(Some("Monday"), Some("08:00-10:00")),
            row(Some("Monday"), Some("10:00-08:00")),
            row(None, None),
            row(Some("Someday"), None),
        ];
        let compiled = compile_rules(&rows);
        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled[0].id, rows[0].id);
    }

    #[test]
    fn test_rule_filters_by_level_and_kind() {
        let rule = compile_rule(&row(Some("Monday"), Some("08:00-10:00"))).unwrap();
        assert!(rule.applies_to(Some(5), CourseKind::Internal));
        assert!(!rule.applies_to(Some(5), CourseKind::External));
        assert!(!rule.applies_to(Some(6), CourseKind::Internal));
        assert!(!rule.applies_to(None, CourseKind::Internal));
    }

    #[test]
    fn test_rule_without_levels_applies_everywhere() {
        let mut raw = row(Some("Monday"), None);
        raw.levels = Some(vec![]);
        raw.course_kind = None;
        let rule = compile_rule(&raw).unwrap();
        assert!(rule.applies_to(None, CourseKind::External));
        assert!(rule.applies_to(Some(2), CourseKind::Internal));
    }

    #[test]
    fn test_forbids_requires_day_and_window_hit() {
        let rule = compile_rule(&row(Some("Monday"), Some("08:00-10:00"))).unwrap();
        assert!(rule.forbids(Weekday::Monday, &range("08:30", "09:20")));
        assert!(rule.forbids(Weekday::Monday, &range("09:50", "10:40")));
        assert!(!rule.forbids(Weekday::Monday, &range("10:00", "10:50")));
        assert!(!rule.forbids(Weekday::Tuesday, &range("08:30", "09:20")));
    }

    #[test]
    fn test_day_only_rule_blocks_whole_day() {
        let rule = compile_rule(&row(Some("Thursday"), None)).unwrap();
        assert!(rule.forbids(Weekday::Thursday, &range("15:00", "15:50")));
        assert!(!rule.forbids(Weekday::Wednesday, &range("15:00", "15:50")));
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let mut raw = row(Some("Monday"), None);
        raw.course_kind = Some("graduate".to_string());
        assert!(matches!(compile_rule(&raw), Err(RuleParseError::InvalidKind(_))));
    }
}
