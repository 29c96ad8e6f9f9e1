// PostgreSQL implementation of the schedule store
//
// Schedule rows are locked with SELECT ... FOR UPDATE; group numbers are
// allocated under a transaction-scoped advisory lock keyed by (scope, level).

use crate::db::store::{ScheduleStore, StoreTx};
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{
    Course, CourseCategory, HistoryEntry, HistoryFilter, HistorySummary, Page, RuleRow, Schedule,
    ScheduleStatus, Scope, Section, Slot,
};
use crate::timetable::time::{TimeOfDay, Weekday};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

const SCHEDULE_COLUMNS: &str = "id, committee_id, level, group_no, status, created_at, updated_at";
const COURSE_COLUMNS: &str = "id, code, name, level, is_external, category";
const SLOT_COLUMNS: &str =
    "id, schedule_id, course_id, section_id, day, start_minute, end_minute";
const SECTION_COLUMNS: &str =
    "id, schedule_id, course_id, section_number, capacity, instructor, room";
const HISTORY_COLUMNS: &str = "id, schedule_id, committee_id, version, snapshot, diff, summary, \
     status, level, group_no, slot_count, actor_id, note, created_at";

/// Store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ScheduleStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DatabaseError> {
        let tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(Box::new(PgTx { tx }))
    }

    #[instrument(skip(self))]
    async fn list_history(
        &self,
        scope: Scope,
        filter: &HistoryFilter,
    ) -> Result<Page<HistorySummary>, DatabaseError> {
        let filter = filter.clone().normalized();
        let status = filter.status.map(|s| s.to_string());
        let predicate = r#"
            WHERE ($1::uuid IS NULL OR committee_id = $1)
              AND ($2::uuid IS NULL OR schedule_id = $2)
              AND ($3::int IS NULL OR level = $3)
              AND ($4::int IS NULL OR group_no = $4)
              AND ($5::text IS NULL OR status = $5)
        "#;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM schedule_history {}",
            predicate
        ))
        .bind(scope.owner())
        .bind(filter.schedule_id)
        .bind(filter.level)
        .bind(filter.group_no)
        .bind(status.as_deref())
        .fetch_one(self.pool.pool())
        .await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM schedule_history {} \
             ORDER BY created_at DESC, version DESC LIMIT $6 OFFSET $7",
            HISTORY_COLUMNS, predicate
        ))
        .bind(scope.owner())
        .bind(filter.schedule_id)
        .bind(filter.level)
        .bind(filter.group_no)
        .bind(status.as_deref())
        .bind(i64::from(filter.limit))
        .bind(i64::try_from(filter.offset()).unwrap_or(i64::MAX))
        .fetch_all(self.pool.pool())
        .await?;

        let items = rows
            .iter()
            .map(|row| history_from_row(row).map(|entry| HistorySummary::from(&entry)))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(count = items.len(), total, "Listed history entries");
        Ok(Page {
            items,
            page: filter.page,
            limit: filter.limit,
            total,
        })
    }

    #[instrument(skip(self))]
    async fn get_history(
        &self,
        scope: Scope,
        id: Uuid,
    ) -> Result<Option<HistoryEntry>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM schedule_history \
             WHERE id = $1 AND ($2::uuid IS NULL OR committee_id = $2)",
            HISTORY_COLUMNS
        ))
        .bind(id)
        .bind(scope.owner())
        .fetch_optional(self.pool.pool())
        .await?;

        row.as_ref().map(history_from_row).transpose()
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        self.pool.health_check().await
    }
}

/// Open PostgreSQL transaction; rolled back on drop unless committed
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    #[instrument(skip(self))]
    async fn lock_schedule(&mut self, id: Uuid) -> Result<Option<Schedule>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM schedules WHERE id = $1 FOR UPDATE",
            SCHEDULE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn find_schedule(&mut self, id: Uuid) -> Result<Option<Schedule>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM schedules WHERE id = $1",
            SCHEDULE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn list_schedules(&mut self, scope: Scope) -> Result<Vec<Schedule>, DatabaseError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM schedules
            WHERE ($1::uuid IS NULL OR committee_id = $1)
              AND status <> 'archived'
            ORDER BY level NULLS LAST, group_no, created_at
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(scope.owner())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(schedule_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn next_group_no(
        &mut self,
        scope: Scope,
        level: Option<i32>,
    ) -> Result<i32, DatabaseError> {
        let key = format!(
            "schedule-group:{}:{}",
            scope.owner().map_or_else(|| "global".to_string(), |id| id.to_string()),
            level.map_or_else(|| "none".to_string(), |l| l.to_string())
        );
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&key)
            .execute(&mut *self.tx)
            .await?;

        let next: i32 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(group_no), 0) + 1
            FROM schedules
            WHERE ($1::uuid IS NULL OR committee_id = $1)
              AND level IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(scope.owner())
        .bind(level)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(next)
    }

    async fn insert_schedule(&mut self, schedule: &Schedule) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO schedules (id, committee_id, level, group_no, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(schedule.id)
        .bind(schedule.committee_id)
        .bind(schedule.level)
        .bind(schedule.group_no)
        .bind(schedule.status.to_string())
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&mut *self.tx)
        .await?;

        tracing::info!(schedule_id = %schedule.id, group_no = schedule.group_no, "Schedule created");
        Ok(())
    }

    async fn update_schedule(&mut self, schedule: &Schedule) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE schedules
            SET level = $2, group_no = $3, status = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(schedule.id)
        .bind(schedule.level)
        .bind(schedule.group_no)
        .bind(schedule.status.to_string())
        .bind(schedule.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("schedule {}", schedule.id)));
        }
        Ok(())
    }

    async fn find_course_by_code(&mut self, code: &str) -> Result<Option<Course>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM courses WHERE UPPER(code) = UPPER($1)",
            COURSE_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(course_from_row).transpose()
    }

    async fn list_courses(&mut self, ids: &[Uuid]) -> Result<Vec<Course>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM courses WHERE id = ANY($1) ORDER BY code",
            COURSE_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(course_from_row).collect()
    }

    async fn list_internal_courses(&mut self, level: i32) -> Result<Vec<Course>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM courses WHERE level = $1 AND is_external = FALSE ORDER BY code",
            COURSE_COLUMNS
        ))
        .bind(level)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(course_from_row).collect()
    }

    async fn insert_course(&mut self, course: &Course) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO courses (id, code, name, level, is_external, category)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(course.id)
        .bind(&course.code)
        .bind(&course.name)
        .bind(course.level)
        .bind(course.is_external)
        .bind(course.category.to_string())
        .execute(&mut *self.tx)
        .await?;

        tracing::info!(course_code = %course.code, level = course.level, "Course created");
        Ok(())
    }

    async fn list_slots(&mut self, schedule_id: Uuid) -> Result<Vec<Slot>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM slots WHERE schedule_id = $1",
            SLOT_COLUMNS
        ))
        .bind(schedule_id)
        .fetch_all(&mut *self.tx)
        .await?;

        // Day names do not sort in week order in SQL
        let mut slots = rows.iter().map(slot_from_row).collect::<Result<Vec<_>, _>>()?;
        slots.sort_by_key(|slot| (slot.day, slot.start, slot.id));
        Ok(slots)
    }

    async fn find_slot(&mut self, id: Uuid) -> Result<Option<Slot>, DatabaseError> {
        let row = sqlx::query(&format!("SELECT {} FROM slots WHERE id = $1", SLOT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.as_ref().map(slot_from_row).transpose()
    }

    async fn insert_slot(&mut self, slot: &Slot) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO slots (
                id, schedule_id, course_id, section_id, day, start_minute, end_minute
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(slot.id)
        .bind(slot.schedule_id)
        .bind(slot.course_id)
        .bind(slot.section_id)
        .bind(slot.day.as_str())
        .bind(i32::from(slot.start.minutes()))
        .bind(i32::from(slot.end.minutes()))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_slot(&mut self, slot: &Slot) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE slots SET day = $2, start_minute = $3, end_minute = $4 WHERE id = $1",
        )
        .bind(slot.id)
        .bind(slot.day.as_str())
        .bind(i32::from(slot.start.minutes()))
        .bind(i32::from(slot.end.minutes()))
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("slot {}", slot.id)));
        }
        Ok(())
    }

    async fn delete_slot(&mut self, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM slots WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn list_sections(&mut self, schedule_id: Uuid) -> Result<Vec<Section>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sections WHERE schedule_id = $1 \
             ORDER BY course_id, section_number, id",
            SECTION_COLUMNS
        ))
        .bind(schedule_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(section_from_row).collect()
    }

    async fn find_section(&mut self, id: Uuid) -> Result<Option<Section>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sections WHERE id = $1",
            SECTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(section_from_row).transpose()
    }

    async fn insert_section(&mut self, section: &Section) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO sections (
                id, schedule_id, course_id, section_number, capacity, instructor, room
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(section.id)
        .bind(section.schedule_id)
        .bind(section.course_id)
        .bind(section.section_number)
        .bind(section.capacity)
        .bind(&section.instructor)
        .bind(&section.room)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_section(&mut self, section: &Section) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE sections
            SET section_number = $2, capacity = $3, instructor = $4, room = $5
            WHERE id = $1
            "#,
        )
        .bind(section.id)
        .bind(section.section_number)
        .bind(section.capacity)
        .bind(&section.instructor)
        .bind(&section.room)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("section {}", section.id)));
        }
        Ok(())
    }

    async fn list_rules(&mut self) -> Result<Vec<RuleRow>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT id, description, levels, course_kind, days, time_window
            FROM scheduling_rules
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| -> Result<RuleRow, DatabaseError> {
                Ok(RuleRow {
                    id: row.try_get("id")?,
                    description: row.try_get("description")?,
                    levels: row.try_get("levels")?,
                    course_kind: row.try_get("course_kind")?,
                    days: row.try_get("days")?,
                    time_window: row.try_get("time_window")?,
                })
            })
            .collect()
    }

    async fn latest_history(
        &mut self,
        schedule_id: Uuid,
    ) -> Result<Option<HistoryEntry>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM schedule_history WHERE schedule_id = $1 \
             ORDER BY version DESC LIMIT 1",
            HISTORY_COLUMNS
        ))
        .bind(schedule_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(history_from_row).transpose()
    }

    async fn insert_history(&mut self, entry: &HistoryEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO schedule_history (
                id, schedule_id, committee_id, version, snapshot, diff, summary,
                status, level, group_no, slot_count, actor_id, note, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(entry.id)
        .bind(entry.schedule_id)
        .bind(entry.committee_id)
        .bind(entry.version)
        .bind(&entry.snapshot)
        .bind(&entry.diff)
        .bind(&entry.summary)
        .bind(entry.status.to_string())
        .bind(entry.level)
        .bind(entry.group_no)
        .bind(entry.slot_count)
        .bind(&entry.actor_id)
        .bind(&entry.note)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))
    }
}

fn schedule_from_row(row: &PgRow) -> Result<Schedule, DatabaseError> {
    let status: String = row.try_get("status")?;
    Ok(Schedule {
        id: row.try_get("id")?,
        committee_id: row.try_get("committee_id")?,
        level: row.try_get("level")?,
        group_no: row.try_get("group_no")?,
        status: status.parse::<ScheduleStatus>().map_err(DatabaseError::Decode)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn course_from_row(row: &PgRow) -> Result<Course, DatabaseError> {
    let category: String = row.try_get("category")?;
    Ok(Course {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        level: row.try_get("level")?,
        is_external: row.try_get("is_external")?,
        category: category.parse::<CourseCategory>().map_err(DatabaseError::Decode)?,
    })
}

fn slot_from_row(row: &PgRow) -> Result<Slot, DatabaseError> {
    let day: String = row.try_get("day")?;
    Ok(Slot {
        id: row.try_get("id")?,
        schedule_id: row.try_get("schedule_id")?,
        course_id: row.try_get("course_id")?,
        section_id: row.try_get("section_id")?,
        day: day
            .parse::<Weekday>()
            .map_err(|e| DatabaseError::Decode(e.to_string()))?,
        start: minutes_from_row(row, "start_minute")?,
        end: minutes_from_row(row, "end_minute")?,
    })
}

fn minutes_from_row(row: &PgRow, column: &str) -> Result<TimeOfDay, DatabaseError> {
    let raw: i32 = row.try_get(column)?;
    u16::try_from(raw)
        .ok()
        .and_then(TimeOfDay::from_minutes)
        .ok_or_else(|| DatabaseError::Decode(format!("{} out of range: {}", column, raw)))
}

fn section_from_row(row: &PgRow) -> Result<Section, DatabaseError> {
    Ok(Section {
        id: row.try_get("id")?,
        schedule_id: row.try_get("schedule_id")?,
        course_id: row.try_get("course_id")?,
        section_number: row.try_get("section_number")?,
        capacity: row.try_get("capacity")?,
        instructor: row.try_get("instructor")?,
        room: row.try_get("room")?,
    })
}

fn history_from_row(row: &PgRow) -> Result<HistoryEntry, DatabaseError> {
    let status: String = row.try_get("status")?;
    Ok(HistoryEntry {
        id: row.try_get("id")?,
        schedule_id: row.try_get("schedule_id")?,
        committee_id: row.try_get("committee_id")?,
        version: row.try_get("version")?,
        snapshot: row.try_get("snapshot")?,
        diff: row.try_get("diff")?,
        summary: row.try_get("summary")?,
        status: status.parse::<ScheduleStatus>().map_err(DatabaseError::Decode)?,
        level: row.try_get("level")?,
        group_no: row.try_get("group_no")?,
        slot_count: row.try_get("slot_count")?,
        actor_id: row.try_get("actor_id")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
    })
}
