// Reasoning service boundary
//
// Whatever comes back from `propose` is untrusted: every field is optional and
// the lifecycle service re-validates each placement before committing it.

pub mod http;
pub mod reference;

pub use http::HttpReasoningClient;
pub use reference::ReferencePlanner;

use crate::errors::ReasoningError;
use crate::models::CourseKind;
use crate::timetable::pattern::{CoursePattern, BLOCK_MINUTES, BUFFER_MINUTES, PERIOD_MINUTES};
use crate::timetable::time::{TimeOfDay, TimeRange, Weekday};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;
use uuid::Uuid;

/// A committed slot the proposal must avoid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupiedSlot {
    pub slot_id: Uuid,
    pub course_code: String,
    pub day: Weekday,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

/// A section whose meeting pattern is not yet complete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingSection {
    pub section_id: Uuid,
    pub course_code: String,
    pub course_name: String,
    pub section_number: i32,
    pub kind: CourseKind,
    pub requirement: String,
    #[serde(skip)]
    pub pattern: CoursePattern,
    /// Meetings this section already holds
    #[serde(skip)]
    pub placed: Vec<(Weekday, TimeRange)>,
}

/// One proposed placement as received, nothing parsed yet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPlacement {
    pub section_id: Option<String>,
    pub day: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl RawPlacement {
    /// Read a placement out of an arbitrary JSON value; non-objects yield `None`
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| object.get(*name))
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
        };
        Some(Self {
            section_id: field(&["section_id", "sectionId"]),
            day: field(&["day"]),
            start: field(&["start", "start_time", "startTime"]),
            end: field(&["end", "end_time", "endTime"]),
        })
    }
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Propose placements for `pending` given the requirement brief and the
    /// slots already occupied
    async fn propose(
        &self,
        brief: &str,
        occupied: &[OccupiedSlot],
        pending: &[PendingSection],
    ) -> Result<Vec<RawPlacement>, ReasoningError>;
}

/// Natural-language requirement brief for one generation run
pub fn build_brief(
    level: Option<i32>,
    group_no: i32,
    occupied: &[OccupiedSlot],
    pending: &[PendingSection],
) -> String {
    let mut brief = String::new();
    let level = level.map_or_else(|| "unassigned".to_string(), |l| l.to_string());
    let _ = writeln!(brief, "Timetable for level {}, group {}.", level, group_no);
    let _ = writeln!(
        brief,
        "Working days are Sunday to Thursday. A 1-hour meeting occupies {} minutes followed by a \
         {} minute break; a connected 2-hour block occupies {} minutes with no break inside it.",
        PERIOD_MINUTES,
        BUFFER_MINUTES,
        BLOCK_MINUTES
    );

    if occupied.is_empty() {
        let _ = writeln!(brief, "No slots are occupied yet.");
    } else {
        let _ = writeln!(brief, "Occupied slots (do not overlap these):");
        for slot in occupied {
            let _ = writeln!(
                brief,
                "- {} {} {}-{}",
                slot.course_code, slot.day, slot.start, slot.end
            );
        }
    }

    let _ = writeln!(brief, "Sections to place:");
    for section in pending {
        let _ = writeln!(
            brief,
            "- section_id {} ({} {}, section {}, {}): {}",
            section.section_id,
            section.course_code,
            section.course_name,
            section.section_number,
            section.kind,
            section.requirement
        );
        if !section.placed.is_empty() {
            let held: Vec<String> = section
                .placed
                .iter()
                .map(|(day, range)| format!("{} {}", day, range))
                .collect();
            let _ = writeln!(brief, "  already placed: {}", held.join(", "));
        }
    }

    let _ = write!(
        brief,
        "Respond with a JSON array of objects {{\"section_id\", \"day\", \"start\", \"end\"}} \
         using HH:MM times, one object per meeting; repeat a section_id for each meeting it \
         still needs."
    );
    brief
}

/// Pull placements out of a service response body
///
/// Accepts a JSON array, an object with a `placements` array, or free text
/// wrapping an array (taken between the first `[` and the last `]`).
pub fn extract_placements(body: &str) -> Result<Vec<RawPlacement>, ReasoningError> {
    let items = match serde_json::from_str::<Value>(body.trim()) {
        Ok(Value::Array(items)) => items,
        Ok(Value::Object(mut object)) => match object.remove("placements") {
            Some(Value::Array(items)) => items,
            _ => return Err(ReasoningError::Malformed("no placements array".to_string())),
        },
        _ => embedded_array(body)?,
    };

    Ok(items.iter().filter_map(RawPlacement::from_value).collect())
}

fn embedded_array(body: &str) -> Result<Vec<Value>, ReasoningError> {
    let (Some(open), Some(close)) = (body.find('['), body.rfind(']')) else {
        return Err(ReasoningError::Malformed("no JSON array found".to_string()));
    };
    if close <= open {
        return Err(ReasoningError::Malformed("no JSON array found".to_string()));
    }
    serde_json::from_str::<Vec<Value>>(&body[open..=close])
        .map_err(|e| ReasoningError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Course, CourseCategory};
    use crate::timetable::pattern::{required_pattern, PatternCatalog};

    fn pending() -> PendingSection {
        let course = Course {
            id: Uuid::new_v4(),
            code: "CS201".to_string(),
            name: "Data Structures".to_string(),
            level: 5,
            is_external: false,
            category: CourseCategory::SingleBlock,
        };
        let pattern = required_pattern(&course, &PatternCatalog::default());
        PendingSection {
            section_id: Uuid::new_v4(),
            course_code: course.code.clone(),
            course_name: course.name.clone(),
            section_number: 1,
            kind: CourseKind::Internal,
            requirement: pattern.describe(),
            pattern,
            placed: Vec::new(),
        }
    }

    #[test]
    fn test_extracts_bare_array_and_drops_non_objects() {
        let body = r#"[{"section_id":"a","day":"Sunday","start":"08:00","end":"08:50"}, 7, "x"]"#;
        let placements = extract_placements(body).unwrap();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].day.as_deref(), Some("Sunday"));
    }

    #[test]
    fn test_extracts_wrapped_placements_object() {
        let body = r#"{"placements":[{"sectionId":"a","day":"Monday","startTime":"09:00"}]}"#;
        let placements = extract_placements(body).unwrap();
        assert_eq!(placements[0].section_id.as_deref(), Some("a"));
        assert_eq!(placements[0].start.as_deref(), Some("09:00"));
        assert_eq!(placements[0].end, None);
    }

    #[test]
    fn test_extracts_array_from_prose() {
        let body = "Here is the plan:\n[{\"section_id\":\"a\",\"day\":\"Tuesday\"}]\nGood luck.";
        assert_eq!(extract_placements(body).unwrap().len(), 1);
    }

    #[test]
    fn test_unusable_bodies_are_malformed() {
        for body in ["", "no json here", "] backwards [", r#"{"result": 1}"#] {
            assert!(
                matches!(extract_placements(body), Err(ReasoningError::Malformed(_))),
                "{:?} should be malformed",
                body
            );
        }
    }

    #[test]
    fn test_brief_lists_occupied_and_pending() {
        let occupied = vec![OccupiedSlot {
            slot_id: Uuid::new_v4(),
            course_code: "EXT100".to_string(),
            day: Weekday::Sunday,
            start: "08:00".parse().unwrap(),
            end: "08:50".parse().unwrap(),
        }];
        let section = pending();
        let brief = build_brief(Some(5), 2, &occupied, std::slice::from_ref(&section));
        assert!(brief.contains("level 5, group 2"));
        assert!(brief.contains("EXT100 Sunday 08:00-08:50"));
        assert!(brief.contains(&section.section_id.to_string()));
        assert!(brief.contains("connected 2-hour lecture"));
        assert!(brief.contains("one object per meeting"));
        assert!(!brief.contains("already placed"));
    }

    #[test]
    fn test_brief_lists_meetings_already_held() {
        let mut section = pending();
        section.placed = vec![(Weekday::Monday, TimeRange::parse("10:00", "11:40").unwrap())];
        let brief = build_brief(Some(5), 1, &[], std::slice::from_ref(&section));
        assert!(brief.contains("already placed: Monday 10:00-11:40"));
    }
}
