// Structural diff between consecutive snapshots
//
// Records are matched by their stable ids; a record whose id appears on only
// one side is added or removed, a record on both sides is compared field by
// field.

use crate::history::snapshot::{ScheduleSnapshot, SectionRecord, SlotRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

trait Keyed {
    fn key(&self) -> Uuid;
}

impl Keyed for SlotRecord {
    fn key(&self) -> Uuid {
        self.id
    }
}

impl Keyed for SectionRecord {
    fn key(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordChange {
    pub id: Uuid,
    pub fields: Vec<FieldChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionDiff {
    pub added: Vec<Value>,
    pub removed: Vec<Value>,
    pub changed: Vec<RecordChange>,
}

impl CollectionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub schedule: Vec<FieldChange>,
    pub slots: CollectionDiff,
    pub sections: CollectionDiff,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty() && self.slots.is_empty() && self.sections.is_empty()
    }
}

/// Compute the diff from `previous` to `next`; `None` when nothing changed
pub fn diff_snapshots(
    previous: &ScheduleSnapshot,
    next: &ScheduleSnapshot,
) -> Result<Option<SnapshotDiff>, serde_json::Error> {
    let diff = SnapshotDiff {
        schedule: field_changes(
            &serde_json::to_value(&previous.schedule)?,
            &serde_json::to_value(&next.schedule)?,
        ),
        slots: diff_records(&previous.slots, &next.slots)?,
        sections: diff_records(&previous.sections, &next.sections)?,
    };
    Ok((!diff.is_empty()).then_some(diff))
}

fn diff_records<T: Keyed + Serialize>(
    before: &[T],
    after: &[T],
) -> Result<CollectionDiff, serde_json::Error> {
    let before: BTreeMap<Uuid, &T> = before.iter().map(|r| (r.key(), r)).collect();
    let after: BTreeMap<Uuid, &T> = after.iter().map(|r| (r.key(), r)).collect();
    let mut diff = CollectionDiff::default();

    for (id, record) in &after {
        match before.get(id) {
            None => diff.added.push(serde_json::to_value(record)?),
            Some(old) => {
                let fields =
                    field_changes(&serde_json::to_value(old)?, &serde_json::to_value(record)?);
                if !fields.is_empty() {
                    diff.changed.push(RecordChange { id: *id, fields });
                }
            }
        }
    }
    for (id, record) in &before {
        if !after.contains_key(id) {
            diff.removed.push(serde_json::to_value(record)?);
        }
    }

    Ok(diff)
}

/// Per-field comparison of two serialized records
fn field_changes(before: &Value, after: &Value) -> Vec<FieldChange> {
    let empty = Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);

    let mut fields: Vec<&String> = before.keys().chain(after.keys()).collect();
    fields.sort();
    fields.dedup();

    fields
        .into_iter()
        .filter_map(|field| {
            let old = before.get(field).cloned().unwrap_or(Value::Null);
            let new = after.get(field).cloned().unwrap_or(Value::Null);
            (old != new).then(|| FieldChange {
                field: field.clone(),
                before: old,
                after: new,
            })
        })
        .collect()
}
