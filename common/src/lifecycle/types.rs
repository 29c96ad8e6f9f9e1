// Request and response shapes of the lifecycle operations

use crate::models::{CourseCategory, CourseKind, Schedule, ScheduleStatus, Slot};
use crate::timetable::time::{TimeOfDay, Weekday};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    #[serde(default)]
    pub force_new: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOutcome {
    pub schedule_id: Uuid,
    pub created: bool,
    pub status: ScheduleStatus,
    pub level: Option<i32>,
    pub group_no: i32,
}

/// Manual or external slot entry
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSlotRequest {
    pub schedule_id: Option<Uuid>,
    pub course_code: String,
    /// Required when the course is not yet in the catalog
    pub course_name: Option<String>,
    /// Required when the course is not yet in the catalog
    pub level: Option<i32>,
    pub category: Option<CourseCategory>,
    pub section_number: Option<i32>,
    pub capacity: Option<i32>,
    pub instructor: Option<String>,
    pub room: Option<String>,
    pub day: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub is_external: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSlotOutcome {
    /// The schedule actually mutated
    pub resolved_schedule_id: Uuid,
    pub slot_id: Uuid,
    pub section_id: Uuid,
    /// True when the slot landed somewhere other than the requested schedule
    pub redirected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_schedule_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    pub imported: usize,
    pub failed: usize,
    pub rows: Vec<ImportRowResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSlotRequest {
    pub day: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateSlotOutcome {
    pub schedule_id: Uuid,
    pub slot: Slot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoveSlotOutcome {
    pub schedule_id: Uuid,
    pub slot_id: Uuid,
    /// Section that lost this meeting and is pending again
    pub section_id: Option<Uuid>,
}

/// A section whose meeting pattern is incomplete, with its course resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingItem {
    pub section_id: Uuid,
    pub course_id: Uuid,
    pub course_code: String,
    pub course_name: String,
    pub section_number: i32,
    pub capacity: i32,
    pub placed_meetings: usize,
    /// `None` when the placed meetings fit no pattern option
    pub remaining_meetings: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoPopulateOutcome {
    pub level: i32,
    pub created: usize,
    pub items: Vec<PendingItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPlacement {
    pub section_id: Option<String>,
    pub day: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateOutcome {
    pub schedule_id: Uuid,
    pub placed: usize,
    pub skipped: Vec<SkippedPlacement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub status: ScheduleStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionRequest {
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub schedule_id: Uuid,
    pub status: ScheduleStatus,
    /// History version written; `None` when the call was a no-op
    pub version: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleListItem {
    pub id: Uuid,
    pub level: Option<i32>,
    pub group_no: i32,
    pub status: ScheduleStatus,
    /// Level reserved for non-standard cohorts
    pub irregular: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridSection {
    pub section_id: Uuid,
    pub section_number: i32,
    pub capacity: i32,
    pub instructor: Option<String>,
    pub room: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridSlot {
    pub slot_id: Uuid,
    pub day: Weekday,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub course_id: Uuid,
    pub course_code: Option<String>,
    pub course_name: Option<String>,
    pub level: Option<i32>,
    pub kind: Option<CourseKind>,
    pub section: Option<GridSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridView {
    pub schedule: Schedule,
    pub slots: Vec<GridSlot>,
    pub pending: Vec<PendingItem>,
}
