use crate::timetable::time::{TimeOfDay, TimeRange, Weekday};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Schedule Models
// ============================================================================

/// Lifecycle state of a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Draft,
    Generated,
    Shared,
    Approved,
    Finalized,
    Archived,
}

impl ScheduleStatus {
    /// Slots may be added, moved or removed, and generation may run
    pub fn is_editable(&self) -> bool {
        matches!(self, ScheduleStatus::Draft | ScheduleStatus::Generated)
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleStatus::Draft => write!(f, "draft"),
            ScheduleStatus::Generated => write!(f, "generated"),
            ScheduleStatus::Shared => write!(f, "shared"),
            ScheduleStatus::Approved => write!(f, "approved"),
            ScheduleStatus::Finalized => write!(f, "finalized"),
            ScheduleStatus::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(ScheduleStatus::Draft),
            "generated" => Ok(ScheduleStatus::Generated),
            "shared" => Ok(ScheduleStatus::Shared),
            "approved" => Ok(ScheduleStatus::Approved),
            "finalized" => Ok(ScheduleStatus::Finalized),
            "archived" => Ok(ScheduleStatus::Archived),
            _ => Err(format!("Invalid schedule status: {}", s)),
        }
    }
}

/// One timetable draft for a level and group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    /// Owning committee; `None` for schedules created under global sharing
    pub committee_id: Option<Uuid>,
    pub level: Option<i32>,
    pub group_no: i32,
    pub status: ScheduleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new_draft(committee_id: Option<Uuid>, level: Option<i32>, group_no: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            committee_id,
            level,
            group_no,
            status: ScheduleStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Course, Slot and Section Models
// ============================================================================

/// Whether a course is taught by the home department or supplied externally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseKind {
    Internal,
    External,
}

impl CourseKind {
    pub fn from_external_flag(is_external: bool) -> Self {
        if is_external {
            CourseKind::External
        } else {
            CourseKind::Internal
        }
    }
}

impl fmt::Display for CourseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CourseKind::Internal => write!(f, "internal"),
            CourseKind::External => write!(f, "external"),
        }
    }
}

/// Stored meeting-cadence category of a course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseCategory {
    #[default]
    Standard,
    SingleBlock,
    TwoBlocks,
}

impl fmt::Display for CourseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CourseCategory::Standard => write!(f, "standard"),
            CourseCategory::SingleBlock => write!(f, "single_block"),
            CourseCategory::TwoBlocks => write!(f, "two_blocks"),
        }
    }
}

impl FromStr for CourseCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" | "" => Ok(CourseCategory::Standard),
            "single_block" => Ok(CourseCategory::SingleBlock),
            "two_blocks" => Ok(CourseCategory::TwoBlocks),
            _ => Err(format!("Invalid course category: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub level: i32,
    pub is_external: bool,
    pub category: CourseCategory,
}

impl Course {
    pub fn kind(&self) -> CourseKind {
        CourseKind::from_external_flag(self.is_external)
    }
}

/// A committed weekly meeting, optionally owned by one section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub course_id: Uuid,
    pub section_id: Option<Uuid>,
    pub day: Weekday,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl Slot {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }
}

/// A placement target
///
/// A section owns every slot whose `section_id` points at it; it stays pending
/// until those slots make up one complete meeting pattern option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub course_id: Uuid,
    pub section_number: i32,
    pub capacity: i32,
    pub instructor: Option<String>,
    pub room: Option<String>,
}

// ============================================================================
// Rule Models
// ============================================================================

/// Institutional constraint row as stored; compiled by `timetable::rules`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRow {
    pub id: Uuid,
    pub description: String,
    pub levels: Option<Vec<i32>>,
    pub course_kind: Option<String>,
    pub days: Option<String>,
    pub time_window: Option<String>,
}

// ============================================================================
// History Models
// ============================================================================

/// Append-only record of one committed schedule mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub committee_id: Option<Uuid>,
    pub version: i32,
    pub snapshot: serde_json::Value,
    pub diff: Option<serde_json::Value>,
    pub summary: String,
    pub status: ScheduleStatus,
    pub level: Option<i32>,
    pub group_no: i32,
    pub slot_count: i32,
    pub actor_id: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Listing view without the heavy snapshot/diff payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub version: i32,
    pub summary: String,
    pub status: ScheduleStatus,
    pub level: Option<i32>,
    pub group_no: i32,
    pub slot_count: i32,
    pub actor_id: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&HistoryEntry> for HistorySummary {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            id: entry.id,
            schedule_id: entry.schedule_id,
            version: entry.version,
            summary: entry.summary.clone(),
            status: entry.status,
            level: entry.level,
            group_no: entry.group_no,
            slot_count: entry.slot_count,
            actor_id: entry.actor_id.clone(),
            note: entry.note.clone(),
            created_at: entry.created_at,
        }
    }
}

/// Filter for history listings
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub schedule_id: Option<Uuid>,
    pub level: Option<i32>,
    pub group_no: Option<i32>,
    pub status: Option<ScheduleStatus>,
    pub page: u32,
    pub limit: u32,
}

impl HistoryFilter {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    /// Clamp paging parameters into their accepted ranges
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.limit = match self.limit {
            0 => Self::DEFAULT_LIMIT,
            n => n.min(Self::MAX_LIMIT),
        };
        self
    }

    /// Rows to skip; computed in 64 bits so huge page numbers cannot wrap
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}

// ============================================================================
// Caller and Ownership Models
// ============================================================================

/// Ownership predicate applied to every schedule lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Global sharing mode: every caller sees every schedule
    Global,
    Committee(Uuid),
}

impl Scope {
    pub fn permits(&self, schedule: &Schedule) -> bool {
        match self {
            Scope::Global => true,
            Scope::Committee(id) => schedule.committee_id == Some(*id),
        }
    }

    /// Committee recorded on schedules created in this scope
    pub fn owner(&self) -> Option<Uuid> {
        match self {
            Scope::Global => None,
            Scope::Committee(id) => Some(*id),
        }
    }
}

/// Resolved caller identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub scope: Scope,
}

/// Claims carried by the bearer credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,              // Subject (user ID)
    pub username: String,         // Username
    pub committee_id: Option<Uuid>,
    pub exp: i64,                 // Expiration time (Unix timestamp)
    pub iat: i64,                 // Issued at (Unix timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_strings() {
        for status in [
            ScheduleStatus::Draft,
            ScheduleStatus::Generated,
            ScheduleStatus::Shared,
            ScheduleStatus::Approved,
            ScheduleStatus::Finalized,
            ScheduleStatus::Archived,
        ] {
            assert_eq!(status.to_string().parse::<ScheduleStatus>().unwrap(), status);
        }
        assert!("locked".parse::<ScheduleStatus>().is_err());
    }

    #[test]
    fn test_only_draft_and_generated_are_editable() {
        assert!(ScheduleStatus::Draft.is_editable());
        assert!(ScheduleStatus::Generated.is_editable());
        assert!(!ScheduleStatus::Shared.is_editable());
        assert!(!ScheduleStatus::Approved.is_editable());
        assert!(!ScheduleStatus::Finalized.is_editable());
        assert!(!ScheduleStatus::Archived.is_editable());
    }

    #[test]
    fn test_committee_scope_hides_foreign_schedules() {
        let mine = Uuid::new_v4();
        let schedule = Schedule::new_draft(Some(Uuid::new_v4()), Some(5), 1);
        assert!(!Scope::Committee(mine).permits(&schedule));
        assert!(Scope::Global.permits(&schedule));
        assert!(Scope::Committee(schedule.committee_id.unwrap()).permits(&schedule));
    }

    #[test]
    fn test_history_filter_normalization() {
        let filter = HistoryFilter {
            page: 0,
            limit: 500,
            ..Default::default()
        }
        .normalized();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, HistoryFilter::MAX_LIMIT);
        assert_eq!(filter.offset(), 0);

        let filter = HistoryFilter {
            page: 3,
            limit: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(filter.limit, HistoryFilter::DEFAULT_LIMIT);
        assert_eq!(filter.offset(), 40);
    }

    #[test]
    fn test_offset_does_not_wrap_for_huge_pages() {
        let filter = HistoryFilter {
            page: 50_000_000,
            limit: 100,
            ..Default::default()
        }
        .normalized();
        assert_eq!(filter.offset(), 4_999_999_900);

        let filter = HistoryFilter {
            page: u32::MAX,
            limit: 100,
            ..Default::default()
        }
        .normalized();
        assert_eq!(filter.offset(), u64::from(u32::MAX - 1) * 100);
    }
}
