// Schedule lifecycle service
//
// Owns every mutating operation on a schedule. Each one opens a store
// transaction, locks the schedule row before reading its status or level,
// validates, writes, appends one history version and commits.

mod generate;
mod slots;
mod status;
pub mod types;

pub use types::*;

use crate::config::{SchedulingConfig, Settings};
use crate::db::{ScheduleStore, StoreTx};
use crate::errors::ScheduleError;
use crate::events::EventPublisher;
use crate::history::{record_version, Attribution};
use crate::models::{
    Caller, Course, HistoryEntry, HistoryFilter, HistorySummary, Page, Schedule, ScheduleStatus,
    Section, Slot,
};
use crate::reasoning::ReasoningService;
use crate::timetable::pattern::{required_pattern, PatternCatalog, Progress};
use crate::timetable::rules::{compile_rules, CompiledRule};
use crate::timetable::validator::SectionTarget;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Entry point for every schedule operation
pub struct ScheduleService {
    store: Arc<dyn ScheduleStore>,
    reasoning: Arc<dyn ReasoningService>,
    events: Arc<dyn EventPublisher>,
    catalog: PatternCatalog,
    scheduling: SchedulingConfig,
    reasoning_timeout: Duration,
}

impl ScheduleService {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        reasoning: Arc<dyn ReasoningService>,
        events: Arc<dyn EventPublisher>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            reasoning,
            events,
            catalog: PatternCatalog::from_config(&settings.scheduling),
            scheduling: settings.scheduling.clone(),
            reasoning_timeout: Duration::from_secs(settings.reasoning.timeout_seconds),
        }
    }

    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.store
    }

    /// Return the caller's open draft, or create one
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn init_schedule(
        &self,
        caller: &Caller,
        force_new: bool,
    ) -> Result<InitOutcome, ScheduleError> {
        let mut tx = self.store.begin().await?;

        if !force_new {
            let existing = tx
                .list_schedules(caller.scope)
                .await?
                .into_iter()
                .find(|s| s.status == ScheduleStatus::Draft);
            if let Some(schedule) = existing {
                tx.commit().await?;
                return Ok(InitOutcome {
                    schedule_id: schedule.id,
                    created: false,
                    status: schedule.status,
                    level: schedule.level,
                    group_no: schedule.group_no,
                });
            }
        }

        let schedule = create_draft(tx.as_mut(), caller, None).await?;
        tx.commit().await?;

        info!(schedule_id = %schedule.id, group_no = schedule.group_no, "Schedule initialized");
        Ok(InitOutcome {
            schedule_id: schedule.id,
            created: true,
            status: schedule.status,
            level: schedule.level,
            group_no: schedule.group_no,
        })
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list_schedules(
        &self,
        caller: &Caller,
    ) -> Result<Vec<ScheduleListItem>, ScheduleError> {
        let mut tx = self.store.begin().await?;
        let schedules = tx.list_schedules(caller.scope).await?;
        tx.commit().await?;

        Ok(schedules
            .into_iter()
            .map(|s| ScheduleListItem {
                irregular: s
                    .level
                    .map_or(false, |l| self.scheduling.irregular_levels.contains(&l)),
                id: s.id,
                level: s.level,
                group_no: s.group_no,
                status: s.status,
                created_at: s.created_at,
                updated_at: s.updated_at,
            })
            .collect())
    }

    /// Slots in week order with course and section detail, plus the pending
    /// sections
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_grid(
        &self,
        caller: &Caller,
        schedule_id: Uuid,
    ) -> Result<GridView, ScheduleError> {
        let mut tx = self.store.begin().await?;
        let schedule = tx
            .find_schedule(schedule_id)
            .await?
            .filter(|s| caller.scope.permits(s))
            .ok_or_else(|| ScheduleError::schedule_not_found(schedule_id))?;

        let slots = tx.list_slots(schedule.id).await?;
        let sections = tx.list_sections(schedule.id).await?;
        let course_ids: Vec<Uuid> = slots
            .iter()
            .map(|s| s.course_id)
            .chain(sections.iter().map(|s| s.course_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let courses = course_map(tx.list_courses(&course_ids).await?);
        tx.commit().await?;

        let grid_slots = slots
            .iter()
            .map(|slot| {
                let course = courses.get(&slot.course_id);
                let section = sections
                    .iter()
                    .find(|s| Some(s.id) == slot.section_id)
                    .map(|s| GridSection {
                        section_id: s.id,
                        section_number: s.section_number,
                        capacity: s.capacity,
                        instructor: s.instructor.clone(),
                        room: s.room.clone(),
                    });
                GridSlot {
                    slot_id: slot.id,
                    day: slot.day,
                    start: slot.start,
                    end: slot.end,
                    course_id: slot.course_id,
                    course_code: course.map(|c| c.code.clone()),
                    course_name: course.map(|c| c.name.clone()),
                    level: course.map(|c| c.level),
                    kind: course.map(Course::kind),
                    section,
                }
            })
            .collect();

        Ok(GridView {
            pending: self.pending_items(&sections, &slots, &courses),
            schedule,
            slots: grid_slots,
        })
    }

    #[instrument(skip(self, filter), fields(user_id = %caller.user_id))]
    pub async fn list_history(
        &self,
        caller: &Caller,
        filter: HistoryFilter,
    ) -> Result<Page<HistorySummary>, ScheduleError> {
        let filter = filter.normalized();
        Ok(self.store.list_history(caller.scope, &filter).await?)
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_history(
        &self,
        caller: &Caller,
        history_id: Uuid,
    ) -> Result<HistoryEntry, ScheduleError> {
        self.store
            .get_history(caller.scope, history_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(format!("History entry not found: {}", history_id)))
    }

    async fn compiled_rules(tx: &mut dyn StoreTx) -> Result<Vec<CompiledRule>, ScheduleError> {
        Ok(compile_rules(&tx.list_rules().await?))
    }

    /// Sections whose meetings do not yet complete their pattern, ordered by
    /// course code then section number
    fn pending_items(
        &self,
        sections: &[Section],
        slots: &[Slot],
        courses: &HashMap<Uuid, Course>,
    ) -> Vec<PendingItem> {
        let mut items: Vec<PendingItem> = sections
            .iter()
            .filter_map(|s| {
                let course = courses.get(&s.course_id)?;
                let pattern = required_pattern(course, &self.catalog);
                let target = SectionTarget::new(s, course.kind(), &pattern, slots);
                let remaining_meetings = match target.progress() {
                    Progress::Complete => return None,
                    Progress::Open { remaining } => Some(remaining),
                    Progress::Unmatched => None,
                };
                Some(PendingItem {
                    section_id: s.id,
                    course_id: course.id,
                    course_code: course.code.clone(),
                    course_name: course.name.clone(),
                    section_number: s.section_number,
                    capacity: s.capacity,
                    placed_meetings: target.placed.len(),
                    remaining_meetings,
                })
            })
            .collect();
        items.sort_by(|a, b| {
            a.course_code
                .cmp(&b.course_code)
                .then(a.section_number.cmp(&b.section_number))
        });
        items
    }
}

/// Lock a schedule the caller owns; foreign schedules read as missing
async fn lock_owned(
    tx: &mut dyn StoreTx,
    caller: &Caller,
    schedule_id: Uuid,
) -> Result<Schedule, ScheduleError> {
    tx.lock_schedule(schedule_id)
        .await?
        .filter(|s| caller.scope.permits(s))
        .ok_or_else(|| ScheduleError::schedule_not_found(schedule_id))
}

/// Only draft and generated schedules take slot edits or generation
fn ensure_editable(schedule: &Schedule) -> Result<(), ScheduleError> {
    match schedule.status {
        status if status.is_editable() => Ok(()),
        ScheduleStatus::Finalized => Err(ScheduleError::finalized()),
        status => Err(ScheduleError::State(format!(
            "Schedule is {}; only draft or generated schedules can be edited",
            status
        ))),
    }
}

/// Insert a new draft in the caller's pool for `level` and record version 1
async fn create_draft(
    tx: &mut dyn StoreTx,
    caller: &Caller,
    level: Option<i32>,
) -> Result<Schedule, ScheduleError> {
    let group_no = tx.next_group_no(caller.scope, level).await?;
    let schedule = Schedule::new_draft(caller.scope.owner(), level, group_no);
    tx.insert_schedule(&schedule).await?;
    record_version(
        tx,
        &schedule,
        "Schedule initialized",
        &Attribution::actor(&caller.user_id),
    )
    .await?;
    Ok(schedule)
}

/// Bump `updated_at`, persist, and append the history version
async fn commit_change(
    tx: &mut dyn StoreTx,
    schedule: &mut Schedule,
    summary: &str,
    attribution: &Attribution,
) -> Result<HistoryEntry, ScheduleError> {
    schedule.updated_at = Utc::now();
    tx.update_schedule(schedule).await?;
    Ok(record_version(tx, schedule, summary, attribution).await?)
}

fn course_map(courses: Vec<Course>) -> HashMap<Uuid, Course> {
    courses.into_iter().map(|c| (c.id, c)).collect()
}
