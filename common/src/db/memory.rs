// In-memory schedule store
//
// Used by tests and by the `memory` storage backend for local development.
// A transaction holds the store-wide mutex and works on a copy of the data,
// which replaces the shared state on commit and is discarded on drop.

use crate::db::store::{ScheduleStore, StoreTx};
use crate::errors::DatabaseError;
use crate::models::{
    Course, HistoryEntry, HistoryFilter, HistorySummary, Page, RuleRow, Schedule, ScheduleStatus,
    Scope, Section, Slot,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryData {
    schedules: HashMap<Uuid, Schedule>,
    courses: HashMap<Uuid, Course>,
    slots: HashMap<Uuid, Slot>,
    sections: HashMap<Uuid, Section>,
    rules: Vec<RuleRow>,
    history: Vec<HistoryEntry>,
}

impl MemoryData {
    fn visible_history(&self, scope: Scope) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter().filter(move |entry| match scope {
            Scope::Global => true,
            Scope::Committee(id) => entry.committee_id == Some(id),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    data: Arc<Mutex<MemoryData>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a catalog course
    pub async fn insert_course(&self, course: Course) {
        self.data.lock().await.courses.insert(course.id, course);
    }

    /// Seed an institutional rule
    pub async fn insert_rule(&self, rule: RuleRow) {
        self.data.lock().await.rules.push(rule);
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DatabaseError> {
        let guard = self.data.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn list_history(
        &self,
        scope: Scope,
        filter: &HistoryFilter,
    ) -> Result<Page<HistorySummary>, DatabaseError> {
        let filter = filter.clone().normalized();
        let data = self.data.lock().await;

        let mut matching: Vec<&HistoryEntry> = data
            .visible_history(scope)
            .filter(|e| filter.schedule_id.map_or(true, |id| e.schedule_id == id))
            .filter(|e| filter.level.map_or(true, |level| e.level == Some(level)))
            .filter(|e| filter.group_no.map_or(true, |group| e.group_no == group))
            .filter(|e| filter.status.map_or(true, |status| e.status == status))
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.version.cmp(&a.version))
        });

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(filter.limit as usize)
            .map(HistorySummary::from)
            .collect();

        Ok(Page {
            items,
            page: filter.page,
            limit: filter.limit,
            total,
        })
    }

    async fn get_history(
        &self,
        scope: Scope,
        id: Uuid,
    ) -> Result<Option<HistoryEntry>, DatabaseError> {
        let data = self.data.lock().await;
        let entry = data.visible_history(scope).find(|e| e.id == id).cloned();
        Ok(entry)
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryData>,
    working: MemoryData,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_schedule(&mut self, id: Uuid) -> Result<Option<Schedule>, DatabaseError> {
        // The whole store is already held by this transaction
        Ok(self.working.schedules.get(&id).cloned())
    }

    async fn find_schedule(&mut self, id: Uuid) -> Result<Option<Schedule>, DatabaseError> {
        Ok(self.working.schedules.get(&id).cloned())
    }

    async fn list_schedules(&mut self, scope: Scope) -> Result<Vec<Schedule>, DatabaseError> {
        let mut schedules: Vec<Schedule> = self
            .working
            .schedules
            .values()
            .filter(|s| scope.permits(s) && s.status != ScheduleStatus::Archived)
            .cloned()
            .collect();
        schedules.sort_by_key(|s| (s.level.is_none(), s.level, s.group_no, s.created_at));
        Ok(schedules)
    }

    async fn next_group_no(
        &mut self,
        scope: Scope,
        level: Option<i32>,
    ) -> Result<i32, DatabaseError> {
        let max = self
            .working
            .schedules
            .values()
            .filter(|s| scope.permits(s) && s.level == level)
            .map(|s| s.group_no)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn insert_schedule(&mut self, schedule: &Schedule) -> Result<(), DatabaseError> {
        if self.working.schedules.contains_key(&schedule.id) {
            return Err(DatabaseError::DuplicateKey(format!("schedule {}", schedule.id)));
        }
        self.working.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn update_schedule(&mut self, schedule: &Schedule) -> Result<(), DatabaseError> {
        match self.working.schedules.get_mut(&schedule.id) {
            Some(existing) => {
                *existing = schedule.clone();
                Ok(())
            }
            None => Err(DatabaseError::NotFound(format!("schedule {}", schedule.id))),
        }
    }

    async fn find_course_by_code(&mut self, code: &str) -> Result<Option<Course>, DatabaseError> {
        Ok(self
            .working
            .courses
            .values()
            .find(|c| c.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn list_courses(&mut self, ids: &[Uuid]) -> Result<Vec<Course>, DatabaseError> {
        let mut courses: Vec<Course> = ids
            .iter()
            .filter_map(|id| self.working.courses.get(id).cloned())
            .collect();
        courses.sort_by(|a, b| a.code.cmp(&b.code));
        courses.dedup_by_key(|c| c.id);
        Ok(courses)
    }

    async fn list_internal_courses(&mut self, level: i32) -> Result<Vec<Course>, DatabaseError> {
        let mut courses: Vec<Course> = self
            .working
            .courses
            .values()
            .filter(|c| c.level == level && !c.is_external)
            .cloned()
            .collect();
        courses.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(courses)
    }

    async fn insert_course(&mut self, course: &Course) -> Result<(), DatabaseError> {
        if self
            .working
            .courses
            .values()
            .any(|c| c.code.eq_ignore_ascii_case(&course.code))
        {
            return Err(DatabaseError::DuplicateKey(format!("course {}", course.code)));
        }
        self.working.courses.insert(course.id, course.clone());
        Ok(())
    }

    async fn list_slots(&mut self, schedule_id: Uuid) -> Result<Vec<Slot>, DatabaseError> {
        let mut slots: Vec<Slot> = self
            .working
            .slots
            .values()
            .filter(|s| s.schedule_id == schedule_id)
            .cloned()
            .collect();
        slots.sort_by_key(|s| (s.day, s.start, s.id));
        Ok(slots)
    }

    async fn find_slot(&mut self, id: Uuid) -> Result<Option<Slot>, DatabaseError> {
        Ok(self.working.slots.get(&id).cloned())
    }

    async fn insert_slot(&mut self, slot: &Slot) -> Result<(), DatabaseError> {
        if !self.working.schedules.contains_key(&slot.schedule_id) {
            return Err(DatabaseError::ForeignKeyViolation(format!(
                "schedule {}",
                slot.schedule_id
            )));
        }
        if let Some(section_id) = slot.section_id {
            if !self.working.sections.contains_key(&section_id) {
                return Err(DatabaseError::ForeignKeyViolation(format!(
                    "section {}",
                    section_id
                )));
            }
        }
        self.working.slots.insert(slot.id, slot.clone());
        Ok(())
    }

    async fn update_slot(&mut self, slot: &Slot) -> Result<(), DatabaseError> {
        match self.working.slots.get_mut(&slot.id) {
            Some(existing) => {
                *existing = slot.clone();
                Ok(())
            }
            None => Err(DatabaseError::NotFound(format!("slot {}", slot.id))),
        }
    }

    async fn delete_slot(&mut self, id: Uuid) -> Result<(), DatabaseError> {
        self.working.slots.remove(&id);
        Ok(())
    }

    async fn list_sections(&mut self, schedule_id: Uuid) -> Result<Vec<Section>, DatabaseError> {
        let mut sections: Vec<Section> = self
            .working
            .sections
            .values()
            .filter(|s| s.schedule_id == schedule_id)
            .cloned()
            .collect();
        sections.sort_by_key(|s| (s.course_id, s.section_number, s.id));
        Ok(sections)
    }

    async fn find_section(&mut self, id: Uuid) -> Result<Option<Section>, DatabaseError> {
        Ok(self.working.sections.get(&id).cloned())
    }

    async fn insert_section(&mut self, section: &Section) -> Result<(), DatabaseError> {
        self.working.sections.insert(section.id, section.clone());
        Ok(())
    }

    async fn update_section(&mut self, section: &Section) -> Result<(), DatabaseError> {
        match self.working.sections.get_mut(&section.id) {
            Some(existing) => {
                *existing = section.clone();
                Ok(())
            }
            None => Err(DatabaseError::NotFound(format!("section {}", section.id))),
        }
    }

    async fn list_rules(&mut self) -> Result<Vec<RuleRow>, DatabaseError> {
        Ok(self.working.rules.clone())
    }

    async fn latest_history(
        &mut self,
        schedule_id: Uuid,
    ) -> Result<Option<HistoryEntry>, DatabaseError> {
        Ok(self
            .working
            .history
            .iter()
            .filter(|e| e.schedule_id == schedule_id)
            .max_by_key(|e| e.version)
            .cloned())
    }

    async fn insert_history(&mut self, entry: &HistoryEntry) -> Result<(), DatabaseError> {
        if self
            .working
            .history
            .iter()
            .any(|e| e.schedule_id == entry.schedule_id && e.version == entry.version)
        {
            return Err(DatabaseError::DuplicateKey(format!(
                "history {} v{}",
                entry.schedule_id, entry.version
            )));
        }
        self.working.history.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
