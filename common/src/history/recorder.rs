// Append one history version inside the caller's transaction

use crate::db::StoreTx;
use crate::errors::DatabaseError;
use crate::history::diff::diff_snapshots;
use crate::history::snapshot::ScheduleSnapshot;
use crate::models::{Course, HistoryEntry, Schedule};
use crate::telemetry;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use tracing::{instrument, warn};
use uuid::Uuid;

/// Who made a change and why
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    pub actor_id: Option<String>,
    pub note: Option<String>,
}

impl Attribution {
    pub fn actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            note: None,
        }
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note.filter(|n| !n.trim().is_empty());
        self
    }
}

/// Snapshot `schedule` as it stands in `tx` and append version N+1
///
/// Must run after the mutation it describes and before commit, with the
/// schedule row already locked, so versions stay gap-free per schedule.
#[instrument(skip(tx, schedule, attribution), fields(schedule_id = %schedule.id))]
pub async fn record_version(
    tx: &mut dyn StoreTx,
    schedule: &Schedule,
    summary: &str,
    attribution: &Attribution,
) -> Result<HistoryEntry, DatabaseError> {
    let slots = tx.list_slots(schedule.id).await?;
    let sections = tx.list_sections(schedule.id).await?;

    let course_ids: Vec<Uuid> = slots
        .iter()
        .map(|s| s.course_id)
        .chain(sections.iter().map(|s| s.course_id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let courses: HashMap<Uuid, Course> = tx
        .list_courses(&course_ids)
        .await?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();

    let snapshot = ScheduleSnapshot::capture(schedule, &slots, &sections, &courses);
    let previous = tx.latest_history(schedule.id).await?;

    let diff = match &previous {
        None => None,
        Some(prev) => match serde_json::from_value::<ScheduleSnapshot>(prev.snapshot.clone()) {
            Ok(prev_snapshot) => diff_snapshots(&prev_snapshot, &snapshot)?
                .map(serde_json::to_value)
                .transpose()?,
            Err(e) => {
                warn!(version = prev.version, error = %e, "Previous snapshot unreadable, omitting diff");
                None
            }
        },
    };

    let entry = HistoryEntry {
        id: Uuid::new_v4(),
        schedule_id: schedule.id,
        committee_id: schedule.committee_id,
        version: previous.as_ref().map_or(1, |p| p.version + 1),
        snapshot: serde_json::to_value(&snapshot)?,
        diff,
        summary: summary.to_string(),
        status: schedule.status,
        level: schedule.level,
        group_no: schedule.group_no,
        slot_count: slots.len() as i32,
        actor_id: attribution.actor_id.clone(),
        note: attribution.note.clone(),
        created_at: Utc::now(),
    };

    tx.insert_history(&entry).await?;
    telemetry::record_history_version();
    tracing::debug!(version = entry.version, summary = summary, "History version recorded");
    Ok(entry)
}
