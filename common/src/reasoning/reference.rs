// Built-in planner used when no reasoning endpoint is configured
//
// Greedy: each pending section takes the first pattern option whose open
// meetings all fit, each at the earliest grid position that keeps clear of
// occupied slots, earlier proposals and the break after one-hour meetings.

use crate::errors::ReasoningError;
use crate::reasoning::{OccupiedSlot, PendingSection, RawPlacement, ReasoningService};
use crate::timetable::time::{TimeOfDay, TimeRange, Weekday};
use crate::timetable::validator::crowds;
use async_trait::async_trait;
use std::collections::BTreeSet;

const FIRST_START: TimeOfDay = TimeOfDay::at(8, 0);
const LAST_START: TimeOfDay = TimeOfDay::at(16, 0);
const STEP_MINUTES: u16 = 60;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferencePlanner;

impl ReferencePlanner {
    pub fn plan(&self, occupied: &[OccupiedSlot], pending: &[PendingSection]) -> Vec<RawPlacement> {
        let mut taken: Vec<(Weekday, TimeRange)> = occupied
            .iter()
            .map(|slot| {
                (
                    slot.day,
                    TimeRange {
                        start: slot.start,
                        end: slot.end,
                    },
                )
            })
            .collect();

        let mut proposals = Vec::new();
        for section in pending {
            let Some(meetings) = plan_section(section, &taken) else {
                tracing::debug!(section_id = %section.section_id, "No free grid positions for section");
                continue;
            };
            for (day, range) in meetings {
                taken.push((day, range));
                proposals.push(RawPlacement {
                    section_id: Some(section.section_id.to_string()),
                    day: Some(day.to_string()),
                    start: Some(range.start.to_string()),
                    end: Some(range.end.to_string()),
                });
            }
        }
        proposals
    }
}

/// Every open meeting of the first option that can be completed around `taken`
fn plan_section(
    section: &PendingSection,
    taken: &[(Weekday, TimeRange)],
) -> Option<Vec<(Weekday, TimeRange)>> {
    section.pattern.options.iter().find_map(|option| {
        let open = option.remaining(&section.placed)?;
        if open.is_empty() {
            return None;
        }

        let mut used_days: BTreeSet<Weekday> = section.placed.iter().map(|(day, _)| *day).collect();
        let mut busy = taken.to_vec();
        let mut planned = Vec::with_capacity(open.len());
        for meeting in open {
            let (day, range) = meeting
                .days
                .iter()
                .filter(|day| !option.distinct_days || !used_days.contains(*day))
                .find_map(|&day| {
                    grid_starts().find_map(|start| {
                        let range =
                            TimeRange::new(start, start.plus(meeting.duration_minutes())?).ok()?;
                        let free = !busy.iter().any(|(d, r)| *d == day && crowds(r, &range));
                        (free && meeting.admits(day, &range)).then_some((day, range))
                    })
                })?;
            used_days.insert(day);
            busy.push((day, range));
            planned.push((day, range));
        }
        Some(planned)
    })
}

fn grid_starts() -> impl Iterator<Item = TimeOfDay> {
    (0..)
        .map_while(|step: u16| FIRST_START.plus(step * STEP_MINUTES))
        .take_while(|start| *start <= LAST_START)
}

#[async_trait]
impl ReasoningService for ReferencePlanner {
    async fn propose(
        &self,
        _brief: &str,
        occupied: &[OccupiedSlot],
        pending: &[PendingSection],
    ) -> Result<Vec<RawPlacement>, ReasoningError> {
        Ok(self.plan(occupied, pending))
    }
}
