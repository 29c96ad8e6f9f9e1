// Slot and section mutations

use super::{
    commit_change, course_map, create_draft, ensure_editable, lock_owned, AddSlotOutcome, AddSlotRequest, AutoPopulateOutcome, ImportOutcome, ImportRowResult,
    RemoveSlotOutcome, ScheduleService, UpdateSlotOutcome, UpdateSlotRequest,
};
use crate::db::StoreTx;
use crate::errors::ScheduleError;
use crate::history::Attribution;
use crate::models::{Caller, Course, CourseKind, Schedule, ScheduleStatus, Section, Slot};
use crate::telemetry;
use crate::timetable::validator::{parse_placement, PlacementContext};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;

impl ScheduleService {
    /// Place a course meeting entered by hand or copied from an external list
    ///
    /// The slot may land in a different schedule than the one requested: a
    /// finalized target or a level mismatch resolves to an open draft of the
    /// course's level, created on demand. The outcome names the schedule that
    /// was actually written.
    #[instrument(skip(self, request), fields(user_id = %caller.user_id, course = %request.course_code))]
    pub async fn add_slot(
        &self,
        caller: &Caller,
        request: AddSlotRequest,
    ) -> Result<AddSlotOutcome, ScheduleError> {
        let source = if request.is_external { "external" } else { "manual" };
        self.add_slot_from(caller, request, source).await
    }

    /// Run each row through `add_slot` as an external entry, independently
    #[instrument(skip(self, rows), fields(user_id = %caller.user_id, rows = rows.len()))]
    pub async fn import_external_slots(
        &self,
        caller: &Caller,
        rows: Vec<AddSlotRequest>,
    ) -> Result<ImportOutcome, ScheduleError> {
        let mut results = Vec::with_capacity(rows.len());
        for (index, mut row) in rows.into_iter().enumerate() {
            row.is_external = true;
            let result = match self.add_slot_from(caller, row, "import").await {
                Ok(outcome) => ImportRowResult {
                    index,
                    resolved_schedule_id: Some(outcome.resolved_schedule_id),
                    slot_id: Some(outcome.slot_id),
                    error: None,
                    reason: None,
                },
                Err(ScheduleError::Internal(detail)) => {
                    return Err(ScheduleError::Internal(detail));
                }
                Err(e) => ImportRowResult {
                    index,
                    resolved_schedule_id: None,
                    slot_id: None,
                    error: Some(e.code().to_string()),
                    reason: Some(e.to_string()),
                },
            };
            results.push(result);
        }

        let imported = results.iter().filter(|r| r.error.is_none()).count();
        let failed = results.len() - imported;
        info!(imported = imported, failed = failed, "External slot import finished");
        Ok(ImportOutcome {
            imported,
            failed,
            rows: results,
        })
    }

    async fn add_slot_from(
        &self,
        caller: &Caller,
        request: AddSlotRequest,
        source: &'static str,
    ) -> Result<AddSlotOutcome, ScheduleError> {
        let placement = parse_placement(&request.day, &request.start, &request.end)?;
        let section_number = request.section_number.unwrap_or(1);
        if section_number < 1 {
            return Err(ScheduleError::Validation(
                "sectionNumber must be at least 1".to_string(),
            ));
        }
        let capacity = request
            .capacity
            .unwrap_or(self.scheduling.default_section_capacity);
        if capacity < 1 {
            return Err(ScheduleError::Validation(
                "capacity must be at least 1".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        let course = resolve_course(tx.as_mut(), &request).await?;
        let (mut schedule, redirected) =
            resolve_target(tx.as_mut(), caller, request.schedule_id, course.level).await?;

        let slots = tx.list_slots(schedule.id).await?;
        if schedule.level.is_none() && slots.is_empty() {
            schedule.level = Some(course.level);
        }

        let rules = Self::compiled_rules(tx.as_mut()).await?;
        let ctx = PlacementContext {
            schedule_id: schedule.id,
            level: schedule.level,
            rules: &rules,
            slots: &slots,
        };
        ctx.check(course.kind(), &placement, None)?;

        // Another meeting of an existing section joins it rather than duplicating it
        let existing = tx
            .list_sections(schedule.id)
            .await?
            .into_iter()
            .find(|s| s.course_id == course.id && s.section_number == section_number);
        let section = match existing {
            Some(mut section) => {
                section.capacity = request.capacity.unwrap_or(section.capacity);
                section.instructor = request.instructor.clone().or(section.instructor);
                section.room = request.room.clone().or(section.room);
                tx.update_section(&section).await?;
                section
            }
            None => {
                let section = Section {
                    id: Uuid::new_v4(),
                    schedule_id: schedule.id,
                    course_id: course.id,
                    section_number,
                    capacity,
                    instructor: request.instructor.clone(),
                    room: request.room.clone(),
                };
                tx.insert_section(&section).await?;
                section
            }
        };

        let slot = Slot {
            id: Uuid::new_v4(),
            schedule_id: schedule.id,
            course_id: course.id,
            section_id: Some(section.id),
            day: placement.day,
            start: placement.range.start,
            end: placement.range.end,
        };
        tx.insert_slot(&slot).await?;

        let summary = match course.kind() {
            CourseKind::External => "Added external slot",
            CourseKind::Internal => "Added slot manually",
        };
        commit_change(
            tx.as_mut(),
            &mut schedule,
            summary,
            &Attribution::actor(&caller.user_id),
        )
        .await?;
        tx.commit().await?;

        telemetry::record_slot_committed(source);
        info!(
            schedule_id = %schedule.id,
            slot_id = %slot.id,
            redirected = redirected,
            "Slot added"
        );
        Ok(AddSlotOutcome {
            resolved_schedule_id: schedule.id,
            slot_id: slot.id,
            section_id: section.id,
            redirected,
        })
    }

    /// Move a slot; rules and overlap are checked against every other slot
    #[instrument(skip(self, request), fields(user_id = %caller.user_id))]
    pub async fn update_slot(
        &self,
        caller: &Caller,
        slot_id: Uuid,
        request: UpdateSlotRequest,
    ) -> Result<UpdateSlotOutcome, ScheduleError> {
        let placement = parse_placement(&request.day, &request.start, &request.end)?;

        let mut tx = self.store.begin().await?;
        let (mut schedule, mut slot) = lock_slot(tx.as_mut(), caller, slot_id).await?;
        ensure_editable(&schedule)?;

        let kind = tx
            .list_courses(&[slot.course_id])
            .await?
            .first()
            .map(Course::kind)
            .ok_or_else(|| {
                ScheduleError::Internal(format!("Course {} of slot {} is missing", slot.course_id, slot.id))
            })?;

        let slots = tx.list_slots(schedule.id).await?;
        let rules = Self::compiled_rules(tx.as_mut()).await?;
        let ctx = PlacementContext {
            schedule_id: schedule.id,
            level: schedule.level,
            rules: &rules,
            slots: &slots,
        };
        ctx.check(kind, &placement, Some(slot.id))?;

        slot.day = placement.day;
        slot.start = placement.range.start;
        slot.end = placement.range.end;
        tx.update_slot(&slot).await?;
        commit_change(
            tx.as_mut(),
            &mut schedule,
            "Updated slot",
            &Attribution::actor(&caller.user_id),
        )
        .await?;
        tx.commit().await?;

        telemetry::record_slot_committed("manual");
        Ok(UpdateSlotOutcome {
            schedule_id: schedule.id,
            slot,
        })
    }

    /// Delete a slot; its section is pending again until the meeting is replaced
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn remove_slot(
        &self,
        caller: &Caller,
        slot_id: Uuid,
    ) -> Result<RemoveSlotOutcome, ScheduleError> {
        let mut tx = self.store.begin().await?;
        let (mut schedule, slot) = lock_slot(tx.as_mut(), caller, slot_id).await?;
        ensure_editable(&schedule)?;

        tx.delete_slot(slot.id).await?;
        commit_change(
            tx.as_mut(),
            &mut schedule,
            "Removed slot",
            &Attribution::actor(&caller.user_id),
        )
        .await?;
        tx.commit().await?;

        info!(schedule_id = %schedule.id, slot_id = %slot_id, section_id = ?slot.section_id, "Slot removed");
        Ok(RemoveSlotOutcome {
            schedule_id: schedule.id,
            slot_id,
            section_id: slot.section_id,
        })
    }

    /// Create placeholder sections for internal courses of the schedule's level
    ///
    /// The level comes from the schedule or, failing that, from the courses
    /// already placed in it. Courses that already have a section here are
    /// skipped, so repeated calls create nothing new.
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn auto_populate_internal_sections(
        &self,
        caller: &Caller,
        schedule_id: Uuid,
    ) -> Result<AutoPopulateOutcome, ScheduleError> {
        let mut tx = self.store.begin().await?;
        let mut schedule = lock_owned(tx.as_mut(), caller, schedule_id).await?;
        ensure_editable(&schedule)?;

        let (level, inferred) = match schedule.level {
            Some(level) => (level, false),
            None => (infer_level(tx.as_mut(), &schedule).await?, true),
        };

        let mut sections = tx.list_sections(schedule.id).await?;
        let covered: HashSet<Uuid> = sections.iter().map(|s| s.course_id).collect();
        let missing: Vec<Course> = tx
            .list_internal_courses(level)
            .await?
            .into_iter()
            .filter(|c| !covered.contains(&c.id))
            .collect();

        for course in &missing {
            let section = Section {
                id: Uuid::new_v4(),
                schedule_id: schedule.id,
                course_id: course.id,
                section_number: 1,
                capacity: self.scheduling.default_section_capacity,
                instructor: None,
                room: None,
            };
            tx.insert_section(&section).await?;
            sections.push(section);
        }

        if !missing.is_empty() || inferred {
            schedule.level = Some(level);
            let summary = format!("Auto-populated {} internal sections", missing.len());
            commit_change(
                tx.as_mut(),
                &mut schedule,
                &summary,
                &Attribution::actor(&caller.user_id),
            )
            .await?;
        }

        let slots = tx.list_slots(schedule.id).await?;
        let course_ids: Vec<Uuid> = sections.iter().map(|s| s.course_id).collect();
        let courses = course_map(tx.list_courses(&course_ids).await?);
        tx.commit().await?;

        info!(schedule_id = %schedule.id, level = level, created = missing.len(), "Internal sections populated");
        Ok(AutoPopulateOutcome {
            level,
            created: missing.len(),
            items: self.pending_items(&sections, &slots, &courses),
        })
    }
}

/// Find the course by code, creating it when the request carries enough detail
async fn resolve_course(
    tx: &mut dyn StoreTx,
    request: &AddSlotRequest,
) -> Result<Course, ScheduleError> {
    let code = request.course_code.trim();
    if code.is_empty() {
        return Err(ScheduleError::Validation("courseCode is required".to_string()));
    }
    if let Some(course) = tx.find_course_by_code(code).await? {
        return Ok(course);
    }

    let level = request.level.ok_or_else(|| {
        ScheduleError::Validation(format!("level is required to create course {}", code))
    })?;
    let name = request
        .course_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            ScheduleError::Validation(format!("courseName is required to create course {}", code))
        })?;

    let course = Course {
        id: Uuid::new_v4(),
        code: code.to_ascii_uppercase(),
        name: name.to_string(),
        level,
        is_external: request.is_external,
        category: request.category.unwrap_or_default(),
    };
    tx.insert_course(&course).await?;
    info!(code = %course.code, level = level, "Course created");
    Ok(course)
}

/// Pick the schedule a new slot for a `level` course should go into
///
/// Returns the locked schedule and whether it differs from the requested one.
/// The redirect decision is made on an unlocked read, so a transaction only
/// ever holds the row it finally writes; candidate drafts are then locked in
/// listing order.
async fn resolve_target(
    tx: &mut dyn StoreTx,
    caller: &Caller,
    requested: Option<Uuid>,
    level: i32,
) -> Result<(Schedule, bool), ScheduleError> {
    let Some(id) = requested else {
        return Ok((open_draft_for_level(tx, caller, level, None).await?, false));
    };

    let seen = tx
        .find_schedule(id)
        .await?
        .filter(|s| caller.scope.permits(s))
        .ok_or_else(|| ScheduleError::schedule_not_found(id))?;
    if let Some(reason) = redirect_reason(&seen, level)? {
        info!(
            schedule_id = %id,
            schedule_level = ?seen.level,
            course_level = level,
            reason = reason,
            "Redirecting slot to an open draft"
        );
        return Ok((open_draft_for_level(tx, caller, level, Some(id)).await?, true));
    }

    let schedule = lock_owned(tx, caller, id).await?;
    if schedule.status != seen.status || schedule.level != seen.level {
        return Err(ScheduleError::Conflict(format!(
            "Schedule {} changed while the slot was being added; retry",
            id
        )));
    }
    Ok((schedule, false))
}

/// Why a slot for a `level` course cannot go into `schedule` itself
fn redirect_reason(schedule: &Schedule, level: i32) -> Result<Option<&'static str>, ScheduleError> {
    match schedule.status {
        ScheduleStatus::Finalized => Ok(Some("target is finalized")),
        _ => {
            ensure_editable(schedule)?;
            Ok(match schedule.level {
                Some(current) if current != level => Some("level mismatch"),
                _ => None,
            })
        }
    }
}

/// First draft or generated schedule of `level` in the caller's pool, else an
/// empty level-less draft, else a new draft
async fn open_draft_for_level(
    tx: &mut dyn StoreTx,
    caller: &Caller,
    level: i32,
    exclude: Option<Uuid>,
) -> Result<Schedule, ScheduleError> {
    let candidates: Vec<Schedule> = tx
        .list_schedules(caller.scope)
        .await?
        .into_iter()
        .filter(|s| Some(s.id) != exclude)
        .filter(|s| matches!(s.status, ScheduleStatus::Draft | ScheduleStatus::Generated))
        .collect();

    for candidate in candidates.iter().filter(|s| s.level == Some(level)) {
        if let Some(locked) = relock_candidate(tx, candidate.id, Some(level)).await? {
            return Ok(locked);
        }
    }
    for candidate in candidates
        .iter()
        .filter(|s| s.level.is_none() && s.status == ScheduleStatus::Draft)
    {
        if tx.list_slots(candidate.id).await?.is_empty() {
            if let Some(locked) = relock_candidate(tx, candidate.id, None).await? {
                return Ok(locked);
            }
        }
    }

    create_draft(tx, caller, Some(level)).await
}

/// Lock a candidate found by an unlocked listing and confirm it still fits
async fn relock_candidate(
    tx: &mut dyn StoreTx,
    id: Uuid,
    level: Option<i32>,
) -> Result<Option<Schedule>, ScheduleError> {
    Ok(tx.lock_schedule(id).await?.filter(|s| {
        s.level == level && matches!(s.status, ScheduleStatus::Draft | ScheduleStatus::Generated)
    }))
}

/// Lock the schedule owning `slot_id`; foreign slots read as missing
async fn lock_slot(
    tx: &mut dyn StoreTx,
    caller: &Caller,
    slot_id: Uuid,
) -> Result<(Schedule, Slot), ScheduleError> {
    let not_found = || ScheduleError::NotFound(format!("Slot not found: {}", slot_id));
    let slot = tx.find_slot(slot_id).await?.ok_or_else(not_found)?;
    let schedule = tx
        .lock_schedule(slot.schedule_id)
        .await?
        .filter(|s| caller.scope.permits(s))
        .ok_or_else(not_found)?;

    // Re-read under the lock in case the slot moved or vanished meanwhile
    let slot = tx
        .find_slot(slot_id)
        .await?
        .filter(|s| s.schedule_id == schedule.id)
        .ok_or_else(not_found)?;
    Ok((schedule, slot))
}

/// Most common level among courses placed in the schedule; ties go to the
/// lower level
async fn infer_level(tx: &mut dyn StoreTx, schedule: &Schedule) -> Result<i32, ScheduleError> {
    let slots = tx.list_slots(schedule.id).await?;
    let course_ids: Vec<Uuid> = slots.iter().map(|s| s.course_id).collect();
    let courses = course_map(tx.list_courses(&course_ids).await?);

    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for slot in &slots {
        if let Some(course) = courses.get(&slot.course_id) {
            *counts.entry(course.level).or_default() += 1;
        }
    }
    if counts.len() > 1 {
        warn!(schedule_id = %schedule.id, levels = ?counts, "Placed courses span several levels");
    }

    counts
        .iter()
        .max_by(|(la, ca), (lb, cb)| ca.cmp(cb).then(lb.cmp(la)))
        .map(|(level, _)| *level)
        .ok_or_else(|| {
            ScheduleError::Validation(
                "Cannot infer level: schedule has no level and no placed courses".to_string(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::super::tests::{caller, service, settings};
    use super::*;
    use crate::db::{InMemoryStore, ScheduleStore};
    use crate::errors::DatabaseError;
    use crate::events::TracingPublisher;
    use crate::models::{
        CourseCategory, HistoryEntry, HistoryFilter, HistorySummary, Page, RuleRow, Scope,
    };
    use crate::reasoning::ReferencePlanner;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// In-memory store that records every schedule row lock taken
    #[derive(Clone, Default)]
    struct LockTrace {
        inner: InMemoryStore,
        locked: Arc<Mutex<Vec<Uuid>>>,
    }

    struct TracedTx {
        inner: Box<dyn StoreTx>,
        locked: Arc<Mutex<Vec<Uuid>>>,
    }

    #[async_trait]
    impl ScheduleStore for LockTrace {
        async fn begin(&self) -> Result<Box<dyn StoreTx>, DatabaseError> {
            Ok(Box::new(TracedTx {
                inner: self.inner.begin().await?,
                locked: self.locked.clone(),
            }))
        }

        async fn list_history(
            &self,
            scope: Scope,
            filter: &HistoryFilter,
        ) -> Result<Page<HistorySummary>, DatabaseError> {
            self.inner.list_history(scope, filter).await
        }

        async fn get_history(
            &self,
            scope: Scope,
            id: Uuid,
        ) -> Result<Option<HistoryEntry>, DatabaseError> {
            self.inner.get_history(scope, id).await
        }

        async fn health_check(&self) -> Result<(), DatabaseError> {
            self.inner.health_check().await
        }
    }

    #[async_trait]
    impl StoreTx for TracedTx {
        async fn lock_schedule(&mut self, id: Uuid) -> Result<Option<Schedule>, DatabaseError> {
            self.locked.lock().unwrap().push(id);
            self.inner.lock_schedule(id).await
        }

        async fn find_schedule(&mut self, id: Uuid) -> Result<Option<Schedule>, DatabaseError> {
            self.inner.find_schedule(id).await
        }

        async fn list_schedules(&mut self, scope: Scope) -> Result<Vec<Schedule>, DatabaseError> {
            self.inner.list_schedules(scope).await
        }

        async fn next_group_no(
            &mut self,
            scope: Scope,
            level: Option<i32>,
        ) -> Result<i32, DatabaseError> {
            self.inner.next_group_no(scope, level).await
        }

        async fn insert_schedule(&mut self, schedule: &Schedule) -> Result<(), DatabaseError> {
            self.inner.insert_schedule(schedule).await
        }

        async fn update_schedule(&mut self, schedule: &Schedule) -> Result<(), DatabaseError> {
            self.inner.update_schedule(schedule).await
        }

        async fn find_course_by_code(
            &mut self,
            code: &str,
        ) -> Result<Option<Course>, DatabaseError> {
            self.inner.find_course_by_code(code).await
        }

        async fn list_courses(&mut self, ids: &[Uuid]) -> Result<Vec<Course>, DatabaseError> {
            self.inner.list_courses(ids).await
        }

        async fn list_internal_courses(
            &mut self,
            level: i32,
        ) -> Result<Vec<Course>, DatabaseError> {
            self.inner.list_internal_courses(level).await
        }

        async fn insert_course(&mut self, course: &Course) -> Result<(), DatabaseError> {
            self.inner.insert_course(course).await
        }

        async fn list_slots(&mut self, schedule_id: Uuid) -> Result<Vec<Slot>, DatabaseError> {
            self.inner.list_slots(schedule_id).await
        }

        async fn find_slot(&mut self, id: Uuid) -> Result<Option<Slot>, DatabaseError> {
            self.inner.find_slot(id).await
        }

        async fn insert_slot(&mut self, slot: &Slot) -> Result<(), DatabaseError> {
            self.inner.insert_slot(slot).await
        }

        async fn update_slot(&mut self, slot: &Slot) -> Result<(), DatabaseError> {
            self.inner.update_slot(slot).await
        }

        async fn delete_slot(&mut self, id: Uuid) -> Result<(), DatabaseError> {
            self.inner.delete_slot(id).await
        }

        async fn list_sections(
            &mut self,
            schedule_id: Uuid,
        ) -> Result<Vec<Section>, DatabaseError> {
            self.inner.list_sections(schedule_id).await
        }

        async fn find_section(&mut self, id: Uuid) -> Result<Option<Section>, DatabaseError> {
            self.inner.find_section(id).await
        }

        async fn insert_section(&mut self, section: &Section) -> Result<(), DatabaseError> {
            self.inner.insert_section(section).await
        }

        async fn update_section(&mut self, section: &Section) -> Result<(), DatabaseError> {
            self.inner.update_section(section).await
        }

        async fn list_rules(&mut self) -> Result<Vec<RuleRow>, DatabaseError> {
            self.inner.list_rules().await
        }

        async fn latest_history(
            &mut self,
            schedule_id: Uuid,
        ) -> Result<Option<HistoryEntry>, DatabaseError> {
            self.inner.latest_history(schedule_id).await
        }

        async fn insert_history(&mut self, entry: &HistoryEntry) -> Result<(), DatabaseError> {
            self.inner.insert_history(entry).await
        }

        async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
            self.inner.commit().await
        }
    }

    fn traced_service(trace: &LockTrace) -> ScheduleService {
        ScheduleService::new(
            Arc::new(trace.clone()),
            Arc::new(ReferencePlanner),
            Arc::new(TracingPublisher),
            &settings(),
        )
    }

    fn request(code: &str, day: &str, start: &str, end: &str) -> AddSlotRequest {
        AddSlotRequest {
            course_code: code.to_string(),
            course_name: Some(format!("{} course", code)),
            level: Some(5),
            day: day.to_string(),
            start: start.to_string(),
            end: end.to_string(),
            ..Default::default()
        }
    }

    async fn seed_internal(store: &InMemoryStore, code: &str, level: i32) -> Course {
        let course = Course {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: format!("{} course", code),
            level,
            is_external: false,
            category: CourseCategory::Standard,
        };
        store.insert_course(course.clone()).await;
        course
    }

    #[tokio::test]
    async fn test_overlapping_slot_is_a_conflict() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;

        let mut first = request("CS101", "Sunday", "08:00", "08:50");
        first.schedule_id = Some(id);
        let placed = service.add_slot(&caller, first).await.unwrap();
        assert_eq!(placed.resolved_schedule_id, id);
        assert!(!placed.redirected);

        let mut second = request("CS101", "Sunday", "08:30", "09:20");
        second.schedule_id = Some(id);
        second.section_number = Some(2);
        let err = service.add_slot(&caller, second).await.unwrap_err();
        assert_eq!(err.code(), "conflict");
        assert_eq!(err.to_string(), "conflicts with existing slot");
    }

    #[tokio::test]
    async fn test_rule_blocks_internal_but_not_external() {
        let store = InMemoryStore::new();
        store
            .insert_rule(RuleRow {
                id: Uuid::new_v4(),
                description: "No level 5 internal teaching Monday morning".to_string(),
                levels: Some(vec![5]),
                course_kind: Some("internal".to_string()),
                days: Some("Monday".to_string()),
                time_window: Some("08:00-10:00".to_string()),
            })
            .await;
        let service = service(&store);
        let caller = caller(Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;

        let mut internal = request("CS201", "Monday", "08:30", "09:20");
        internal.schedule_id = Some(id);
        let err = service.add_slot(&caller, internal).await.unwrap_err();
        assert_eq!(err.code(), "rule_violation");

        let mut external = request("MATH201", "Monday", "08:30", "09:20");
        external.schedule_id = Some(id);
        external.is_external = true;
        let placed = service.add_slot(&caller, external).await.unwrap();
        assert_eq!(placed.resolved_schedule_id, id);
    }

    #[tokio::test]
    async fn test_level_mismatch_redirects_without_touching_original() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;

        let mut first = request("CS101", "Sunday", "08:00", "08:50");
        first.schedule_id = Some(id);
        service.add_slot(&caller, first).await.unwrap();

        let mut other = request("CS301", "Sunday", "08:00", "08:50");
        other.schedule_id = Some(id);
        other.level = Some(6);
        let outcome = service.add_slot(&caller, other).await.unwrap();
        assert!(outcome.redirected);
        assert_ne!(outcome.resolved_schedule_id, id);

        let mut tx = store.begin().await.unwrap();
        let original = tx.find_schedule(id).await.unwrap().unwrap();
        let redirected = tx
            .find_schedule(outcome.resolved_schedule_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original.level, Some(5));
        assert_eq!(redirected.level, Some(6));
        assert_eq!(redirected.group_no, 1);
    }

    #[tokio::test]
    async fn test_finalized_target_redirects_to_new_draft() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;

        let mut first = request("CS101", "Sunday", "08:00", "08:50");
        first.schedule_id = Some(id);
        service.add_slot(&caller, first).await.unwrap();
        service.share(&caller, id, None).await.unwrap();
        service.approve(&caller, id, None).await.unwrap();
        service.finalize(&caller, id, None).await.unwrap();

        let mut late = request("CS102", "Monday", "08:00", "08:50");
        late.schedule_id = Some(id);
        let outcome = service.add_slot(&caller, late).await.unwrap();
        assert!(outcome.redirected);

        let grid = service.get_grid(&caller, id).await.unwrap();
        assert_eq!(grid.slots.len(), 1);
        let fresh = service
            .get_grid(&caller, outcome.resolved_schedule_id)
            .await
            .unwrap();
        assert_eq!(fresh.schedule.group_no, 2);
        assert_eq!(fresh.slots.len(), 1);
    }

    #[tokio::test]
    async fn test_new_course_needs_a_level() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(Uuid::new_v4());

        let mut incomplete = request("CS999", "Sunday", "08:00", "08:50");
        incomplete.level = None;
        let err = service.add_slot(&caller, incomplete).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn test_update_excludes_itself_and_remove_unlinks() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(Uuid::new_v4());

        let placed = service
            .add_slot(&caller, request("CS101", "Sunday", "08:00", "08:50"))
            .await
            .unwrap();

        let moved = service
            .update_slot(
                &caller,
                placed.slot_id,
                UpdateSlotRequest {
                    day: "Sunday".to_string(),
                    start: "08:20".to_string(),
                    end: "09:10".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.slot.start.to_string(), "08:20");

        let removed = service.remove_slot(&caller, placed.slot_id).await.unwrap();
        assert_eq!(removed.section_id, Some(placed.section_id));

        let grid = service
            .get_grid(&caller, placed.resolved_schedule_id)
            .await
            .unwrap();
        assert!(grid.slots.is_empty());
        assert_eq!(grid.pending.len(), 1);
        assert_eq!(grid.pending[0].section_id, placed.section_id);
    }

    #[tokio::test]
    async fn test_stranger_cannot_touch_slot() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let owner = caller(Uuid::new_v4());
        let placed = service
            .add_slot(&owner, request("CS101", "Sunday", "08:00", "08:50"))
            .await
            .unwrap();

        let err = service
            .remove_slot(&caller(Uuid::new_v4()), placed.slot_id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_auto_populate_is_idempotent() {
        let store = InMemoryStore::new();
        seed_internal(&store, "CS310", 5).await;
        seed_internal(&store, "CS320", 5).await;
        seed_internal(&store, "CS410", 6).await;
        let service = service(&store);
        let caller = caller(Uuid::new_v4());

        let mut external = request("MATH201", "Sunday", "08:00", "08:50");
        external.is_external = true;
        let placed = service.add_slot(&caller, external).await.unwrap();

        let first = service
            .auto_populate_internal_sections(&caller, placed.resolved_schedule_id)
            .await
            .unwrap();
        assert_eq!(first.level, 5);
        assert_eq!(first.created, 2);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].course_code, "CS310");

        let second = service
            .auto_populate_internal_sections(&caller, placed.resolved_schedule_id)
            .await
            .unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.items.len(), 2);
    }

    #[tokio::test]
    async fn test_auto_populate_without_level_or_slots_fails() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;

        let err = service
            .auto_populate_internal_sections(&caller, id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn test_import_reports_each_row() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(Uuid::new_v4());

        let rows = vec![
            request("PHYS101", "Sunday", "08:00", "08:50"),
            request("PHYS102", "Friday", "08:00", "08:50"),
            request("PHYS103", "Sunday", "08:10", "09:00"),
        ];
        let outcome = service.import_external_slots(&caller, rows).await.unwrap();

        assert_eq!(outcome.imported, 1);
        assert_eq!(outcome.failed, 2);
        assert!(outcome.rows[0].slot_id.is_some());
        assert_eq!(outcome.rows[1].error.as_deref(), Some("validation_error"));
        assert_eq!(outcome.rows[2].error.as_deref(), Some("conflict"));
    }

    #[tokio::test]
    async fn test_redirect_never_locks_the_requested_schedule() {
        let trace = LockTrace::default();
        let service = traced_service(&trace);
        let caller = caller(Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;

        let mut first = request("CS101", "Sunday", "08:00", "08:50");
        first.schedule_id = Some(id);
        service.add_slot(&caller, first).await.unwrap();
        assert_eq!(*trace.locked.lock().unwrap(), vec![id]);

        // Level 6 course sent to the level 5 schedule: a new level 6 draft
        trace.locked.lock().unwrap().clear();
        let mut other = request("CS301", "Sunday", "08:00", "08:50");
        other.schedule_id = Some(id);
        other.level = Some(6);
        let created = service.add_slot(&caller, other).await.unwrap();
        assert!(created.redirected);
        assert!(!trace.locked.lock().unwrap().contains(&id));

        // Second redirect reuses that draft and locks only it
        trace.locked.lock().unwrap().clear();
        let mut again = request("CS302", "Monday", "08:00", "08:50");
        again.schedule_id = Some(id);
        again.level = Some(6);
        let reused = service.add_slot(&caller, again).await.unwrap();
        assert_eq!(reused.resolved_schedule_id, created.resolved_schedule_id);
        assert_eq!(
            *trace.locked.lock().unwrap(),
            vec![created.resolved_schedule_id]
        );
    }

    #[tokio::test]
    async fn test_crossing_redirects_both_complete() {
        let store = InMemoryStore::new();
        let service = Arc::new(service(&store));
        let caller = caller(Uuid::new_v4());

        let five = service
            .add_slot(&caller, request("CS101", "Sunday", "08:00", "08:50"))
            .await
            .unwrap()
            .resolved_schedule_id;
        let mut seed_six = request("CS301", "Sunday", "08:00", "08:50");
        seed_six.level = Some(6);
        let six = service.add_slot(&caller, seed_six).await.unwrap().resolved_schedule_id;

        let mut into_five = request("CS302", "Monday", "08:00", "08:50");
        into_five.schedule_id = Some(five);
        into_five.level = Some(6);
        let mut into_six = request("CS102", "Monday", "08:00", "08:50");
        into_six.schedule_id = Some(six);

        let (a, b) = tokio::join!(
            service.add_slot(&caller, into_five),
            service.add_slot(&caller, into_six)
        );
        assert_eq!(a.unwrap().resolved_schedule_id, six);
        assert_eq!(b.unwrap().resolved_schedule_id, five);
    }

    #[tokio::test]
    async fn test_approved_schedule_rejects_slot_edits() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(Uuid::new_v4());
        let id = service.init_schedule(&caller, false).await.unwrap().schedule_id;

        let mut first = request("CS101", "Sunday", "08:00", "08:50");
        first.schedule_id = Some(id);
        let placed = service.add_slot(&caller, first).await.unwrap();
        service.share(&caller, id, None).await.unwrap();

        let moved = UpdateSlotRequest {
            day: "Monday".to_string(),
            start: "10:00".to_string(),
            end: "10:50".to_string(),
        };
        let err = service
            .update_slot(&caller, placed.slot_id, moved.clone())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "state_error");
        assert!(err.to_string().contains("shared"));

        service.approve(&caller, id, None).await.unwrap();
        let err = service
            .update_slot(&caller, placed.slot_id, moved)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "state_error");
        assert!(err.to_string().contains("approved"));
        assert_eq!(
            service.remove_slot(&caller, placed.slot_id).await.unwrap_err().code(),
            "state_error"
        );
        let mut late = request("CS102", "Tuesday", "08:00", "08:50");
        late.schedule_id = Some(id);
        assert_eq!(
            service.add_slot(&caller, late).await.unwrap_err().code(),
            "state_error"
        );

        let grid = service.get_grid(&caller, id).await.unwrap();
        assert_eq!(grid.slots.len(), 1);
        assert_eq!(grid.slots[0].day, crate::timetable::time::Weekday::Sunday);
    }

    #[tokio::test]
    async fn test_further_meetings_join_the_same_section() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let caller = caller(Uuid::new_v4());

        let first = service
            .add_slot(&caller, request("CS101", "Sunday", "08:00", "08:50"))
            .await
            .unwrap();
        let mut second = request("CS101", "Tuesday", "08:00", "08:50");
        second.schedule_id = Some(first.resolved_schedule_id);
        let second = service.add_slot(&caller, second).await.unwrap();
        assert_eq!(second.section_id, first.section_id);

        let grid = service
            .get_grid(&caller, first.resolved_schedule_id)
            .await
            .unwrap();
        assert_eq!(grid.slots.len(), 2);
        assert!(grid
            .slots
            .iter()
            .all(|s| s.section.as_ref().map(|sec| sec.section_id) == Some(first.section_id)));
        assert_eq!(grid.pending.len(), 1);
        assert_eq!(grid.pending[0].placed_meetings, 2);
        assert_eq!(grid.pending[0].remaining_meetings, Some(2));
    }
}
