// Persistence seam for the schedule lifecycle
//
// Every mutating lifecycle operation runs inside one `StoreTx`. The first read
// of a schedule it intends to change goes through `lock_schedule`, which holds
// the row until `commit` (or drop, which rolls back).

use crate::errors::DatabaseError;
use crate::models::{
    Course, HistoryEntry, HistoryFilter, HistorySummary, Page, RuleRow, Schedule, Scope, Section,
    Slot,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Entry point to a storage backend
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DatabaseError>;

    /// History listing, most recent first
    async fn list_history(
        &self,
        scope: Scope,
        filter: &HistoryFilter,
    ) -> Result<Page<HistorySummary>, DatabaseError>;

    async fn get_history(
        &self,
        scope: Scope,
        id: Uuid,
    ) -> Result<Option<HistoryEntry>, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}

/// Unit of work over the schedule tables
#[async_trait]
pub trait StoreTx: Send {
    // ---- schedules ----

    /// Read a schedule and hold its row lock for the rest of the transaction
    async fn lock_schedule(&mut self, id: Uuid) -> Result<Option<Schedule>, DatabaseError>;

    async fn find_schedule(&mut self, id: Uuid) -> Result<Option<Schedule>, DatabaseError>;

    /// Schedules visible in `scope`, archived ones excluded, ordered by level
    /// then group number
    async fn list_schedules(&mut self, scope: Scope) -> Result<Vec<Schedule>, DatabaseError>;

    /// `max(group_no) + 1` over the (scope, level) pool, serialized per pool
    async fn next_group_no(
        &mut self,
        scope: Scope,
        level: Option<i32>,
    ) -> Result<i32, DatabaseError>;

    async fn insert_schedule(&mut self, schedule: &Schedule) -> Result<(), DatabaseError>;

    async fn update_schedule(&mut self, schedule: &Schedule) -> Result<(), DatabaseError>;

    // ---- courses ----

    async fn find_course_by_code(&mut self, code: &str) -> Result<Option<Course>, DatabaseError>;

    async fn list_courses(&mut self, ids: &[Uuid]) -> Result<Vec<Course>, DatabaseError>;

    async fn list_internal_courses(&mut self, level: i32) -> Result<Vec<Course>, DatabaseError>;

    async fn insert_course(&mut self, course: &Course) -> Result<(), DatabaseError>;

    // ---- slots ----

    /// Slots of a schedule ordered by weekday then start time; a slot's
    /// `section_id` names the section it meets for
    async fn list_slots(&mut self, schedule_id: Uuid) -> Result<Vec<Slot>, DatabaseError>;

    async fn find_slot(&mut self, id: Uuid) -> Result<Option<Slot>, DatabaseError>;

    async fn insert_slot(&mut self, slot: &Slot) -> Result<(), DatabaseError>;

    async fn update_slot(&mut self, slot: &Slot) -> Result<(), DatabaseError>;

    async fn delete_slot(&mut self, id: Uuid) -> Result<(), DatabaseError>;

    // ---- sections ----

    async fn list_sections(&mut self, schedule_id: Uuid) -> Result<Vec<Section>, DatabaseError>;

    async fn find_section(&mut self, id: Uuid) -> Result<Option<Section>, DatabaseError>;

    async fn insert_section(&mut self, section: &Section) -> Result<(), DatabaseError>;

    async fn update_section(&mut self, section: &Section) -> Result<(), DatabaseError>;

    // ---- rules ----

    async fn list_rules(&mut self) -> Result<Vec<RuleRow>, DatabaseError>;

    // ---- history ----

    async fn latest_history(
        &mut self,
        schedule_id: Uuid,
    ) -> Result<Option<HistoryEntry>, DatabaseError>;

    async fn insert_history(&mut self, entry: &HistoryEntry) -> Result<(), DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;
}
