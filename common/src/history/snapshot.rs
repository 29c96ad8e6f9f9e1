// Typed point-in-time capture of a schedule

use crate::models::{Course, Schedule, ScheduleStatus, Section, Slot};
use crate::timetable::time::{TimeOfDay, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleMeta {
    pub id: Uuid,
    pub committee_id: Option<Uuid>,
    pub level: Option<i32>,
    pub group_no: i32,
    pub status: ScheduleStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub id: Uuid,
    pub course_id: Uuid,
    pub course_code: Option<String>,
    pub course_name: Option<String>,
    pub section_id: Option<Uuid>,
    pub day: Weekday,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub id: Uuid,
    pub course_id: Uuid,
    pub course_code: Option<String>,
    pub section_number: i32,
    pub capacity: i32,
    pub instructor: Option<String>,
    pub room: Option<String>,
}

/// Schedule metadata plus every slot and section, with course labels resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub schedule: ScheduleMeta,
    pub slots: Vec<SlotRecord>,
    pub sections: Vec<SectionRecord>,
}

impl ScheduleSnapshot {
    pub fn capture(
        schedule: &Schedule,
        slots: &[Slot],
        sections: &[Section],
        courses: &HashMap<Uuid, Course>,
    ) -> Self {
        let mut slot_records: Vec<SlotRecord> = slots
            .iter()
            .map(|slot| {
                let course = courses.get(&slot.course_id);
                SlotRecord {
                    id: slot.id,
                    course_id: slot.course_id,
                    course_code: course.map(|c| c.code.clone()),
                    course_name: course.map(|c| c.name.clone()),
                    section_id: slot.section_id,
                    day: slot.day,
                    start: slot.start,
                    end: slot.end,
                }
            })
            .collect();
        slot_records.sort_by_key(|s| (s.day, s.start, s.id));

        let mut section_records: Vec<SectionRecord> = sections
            .iter()
            .map(|section| SectionRecord {
                id: section.id,
                course_id: section.course_id,
                course_code: courses.get(&section.course_id).map(|c| c.code.clone()),
                section_number: section.section_number,
                capacity: section.capacity,
                instructor: section.instructor.clone(),
                room: section.room.clone(),
            })
            .collect();
        section_records.sort_by(|a, b| {
            a.course_code
                .cmp(&b.course_code)
                .then(a.section_number.cmp(&b.section_number))
                .then(a.id.cmp(&b.id))
        });

        Self {
            schedule: ScheduleMeta {
                id: schedule.id,
                committee_id: schedule.committee_id,
                level: schedule.level,
                group_no: schedule.group_no,
                status: schedule.status,
            },
            slots: slot_records,
            sections: section_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CourseCategory;

    #[test]
    fn test_capture_resolves_course_labels_and_orders_slots() {
        let schedule = Schedule::new_draft(None, Some(5), 1);
        let course = Course {
            id: Uuid::new_v4(),
            code: "CS101".to_string(),
            name: "Intro to Computing".to_string(),
            level: 5,
            is_external: false,
            category: CourseCategory::Standard,
        };
        let at = |day, minutes: u16| Slot {
            id: Uuid::new_v4(),
            schedule_id: schedule.id,
            course_id: course.id,
            section_id: None,
            day,
            start: TimeOfDay::from_minutes(minutes).unwrap(),
            end: TimeOfDay::from_minutes(minutes + 50).unwrap(),
        };
        let slots = vec![at(Weekday::Tuesday, 480), at(Weekday::Sunday, 480)];
        let courses = HashMap::from([(course.id, course.clone())]);

        let snapshot = ScheduleSnapshot::capture(&schedule, &slots, &[], &courses);

        assert_eq!(snapshot.schedule.level, Some(5));
        assert_eq!(snapshot.slots[0].day, Weekday::Sunday);
        assert_eq!(snapshot.slots[1].course_code.as_deref(), Some("CS101"));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["slots"][0]["start"], "08:00");
        let back: ScheduleSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
