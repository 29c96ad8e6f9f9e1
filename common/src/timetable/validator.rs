// Placement validation
//
// Pure checks over a candidate (day, start, end) and the schedule context it
// would land in. The lifecycle service calls these under the schedule lock.

use crate::errors::{ScheduleError, TimeParseError};
use crate::models::{CourseKind, Section, Slot};
use crate::timetable::pattern::{CoursePattern, Progress, BUFFER_MINUTES, PERIOD_MINUTES};
use crate::timetable::rules::CompiledRule;
use crate::timetable::time::{TimeRange, Weekday};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

pub const CONFLICT_REASON: &str = "conflicts with existing slot";
pub const SECTION_UNAVAILABLE_REASON: &str = "section not found or already placed";
pub const PATTERN_REASON: &str = "does not match required meeting pattern";
pub const BREAK_REASON: &str = "leaves no break after a 1-hour meeting";

/// A parsed, well-ordered placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub day: Weekday,
    #[serde(flatten)]
    pub range: TimeRange,
}

/// Why a candidate placement was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InvalidDay(String),
    InvalidTime(String),
    SectionUnavailable,
    RuleViolation(String),
    Conflict { slot_id: Uuid },
    NoBreak { slot_id: Uuid },
    PatternMismatch,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InvalidDay(reason) | Rejection::InvalidTime(reason) => f.write_str(reason),
            Rejection::SectionUnavailable => f.write_str(SECTION_UNAVAILABLE_REASON),
            Rejection::RuleViolation(description) => f.write_str(description),
            Rejection::Conflict { .. } => f.write_str(CONFLICT_REASON),
            Rejection::NoBreak { .. } => f.write_str(BREAK_REASON),
            Rejection::PatternMismatch => f.write_str(PATTERN_REASON),
        }
    }
}

impl From<Rejection> for ScheduleError {
    fn from(rejection: Rejection) -> Self {
        let reason = rejection.to_string();
        match rejection {
            Rejection::InvalidDay(_) | Rejection::InvalidTime(_) | Rejection::PatternMismatch => {
                ScheduleError::Validation(reason)
            }
            Rejection::SectionUnavailable => ScheduleError::NotFound(reason),
            Rejection::RuleViolation(_) => ScheduleError::RuleViolation(reason),
            Rejection::Conflict { .. } | Rejection::NoBreak { .. } => {
                ScheduleError::Conflict(reason)
            }
        }
    }
}

/// Steps 1 and 2: working day, parseable and ordered times
pub fn parse_placement(day: &str, start: &str, end: &str) -> Result<Placement, Rejection> {
    let day: Weekday = day
        .parse()
        .map_err(|e: TimeParseError| Rejection::InvalidDay(e.to_string()))?;
    let range = TimeRange::parse(start, end).map_err(|e| Rejection::InvalidTime(e.to_string()))?;
    Ok(Placement { day, range })
}

/// A section together with the pattern it must complete and the meetings it
/// already holds
#[derive(Debug, Clone)]
pub struct SectionTarget<'a> {
    pub section: &'a Section,
    pub kind: CourseKind,
    pub pattern: &'a CoursePattern,
    pub placed: Vec<(Weekday, TimeRange)>,
}

impl<'a> SectionTarget<'a> {
    /// Gather the meetings `slots` already hold for `section`
    pub fn new(
        section: &'a Section,
        kind: CourseKind,
        pattern: &'a CoursePattern,
        slots: &[Slot],
    ) -> Self {
        let placed = slots
            .iter()
            .filter(|slot| slot.section_id == Some(section.id))
            .map(|slot| (slot.day, slot.range()))
            .collect();
        Self {
            section,
            kind,
            pattern,
            placed,
        }
    }

    /// External sections are entered by hand and complete with one meeting
    pub fn progress(&self) -> Progress {
        match self.kind {
            CourseKind::External if self.placed.is_empty() => Progress::Open { remaining: 1 },
            CourseKind::External => Progress::Complete,
            CourseKind::Internal => self.pattern.progress(&self.placed),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.progress() != Progress::Complete
    }
}

/// Step 3: the section exists in this schedule and still needs meetings
pub fn check_section(target: Option<&SectionTarget<'_>>, schedule_id: Uuid) -> Result<(), Rejection> {
    match target {
        Some(target) if target.section.schedule_id == schedule_id && target.is_pending() => Ok(()),
        _ => Err(Rejection::SectionUnavailable),
    }
}

/// Step 4: no applicable rule forbids the placement
pub fn check_rules(
    rules: &[CompiledRule],
    level: Option<i32>,
    kind: CourseKind,
    placement: &Placement,
) -> Result<(), Rejection> {
    match rules
        .iter()
        .filter(|rule| rule.applies_to(level, kind))
        .find(|rule| rule.forbids(placement.day, &placement.range))
    {
        Some(rule) => Err(Rejection::RuleViolation(rule.description.clone())),
        None => Ok(()),
    }
}

/// Step 5: no overlap with committed slots on the same day
///
/// `moving` excludes the slot being updated from the comparison.
pub fn check_overlap(
    slots: &[Slot],
    placement: &Placement,
    moving: Option<Uuid>,
) -> Result<(), Rejection> {
    match slots
        .iter()
        .filter(|slot| Some(slot.id) != moving)
        .find(|slot| slot.day == placement.day && slot.range().overlaps(&placement.range))
    {
        Some(slot) => Err(Rejection::Conflict { slot_id: slot.id }),
        None => Ok(()),
    }
}

/// End of a meeting's occupancy, counting the break after a one-hour meeting
fn occupied_until(range: &TimeRange) -> u16 {
    let end = range.end.minutes();
    if range.duration_minutes() == PERIOD_MINUTES {
        end + BUFFER_MINUTES
    } else {
        end
    }
}

/// Whether two same-day meetings overlap once breaks are counted
pub fn crowds(a: &TimeRange, b: &TimeRange) -> bool {
    a.start.minutes() < occupied_until(b) && b.start.minutes() < occupied_until(a)
}

/// Generated placements keep the break after every one-hour meeting clear
pub fn check_spacing(slots: &[Slot], placement: &Placement) -> Result<(), Rejection> {
    match slots
        .iter()
        .find(|slot| slot.day == placement.day && crowds(&slot.range(), &placement.range))
    {
        Some(slot) => Err(Rejection::NoBreak { slot_id: slot.id }),
        None => Ok(()),
    }
}

/// The section's meetings plus this one must still fit a single pattern option
pub fn check_pattern(target: &SectionTarget<'_>, placement: &Placement) -> Result<(), Rejection> {
    let fits = match target.kind {
        CourseKind::External => target.placed.is_empty(),
        CourseKind::Internal => {
            target
                .pattern
                .accepts(&target.placed, placement.day, &placement.range)
        }
    };
    if fits {
        Ok(())
    } else {
        Err(Rejection::PatternMismatch)
    }
}

/// Schedule-side context a placement is validated against
#[derive(Debug, Clone, Copy)]
pub struct PlacementContext<'a> {
    pub schedule_id: Uuid,
    pub level: Option<i32>,
    pub rules: &'a [CompiledRule],
    pub slots: &'a [Slot],
}

impl<'a> PlacementContext<'a> {
    /// Rule and overlap checks for an already-parsed placement
    pub fn check(
        &self,
        kind: CourseKind,
        placement: &Placement,
        moving: Option<Uuid>,
    ) -> Result<(), Rejection> {
        check_rules(self.rules, self.level, kind, placement)?;
        check_overlap(self.slots, placement, moving)
    }

    /// Full pipeline for one generated meeting of a pending section
    pub fn validate_section_placement(
        &self,
        target: Option<&SectionTarget<'_>>,
        day: &str,
        start: &str,
        end: &str,
    ) -> Result<Placement, Rejection> {
        let placement = parse_placement(day, start, end)?;
        let target = match target {
            Some(target) => target,
            None => return Err(Rejection::SectionUnavailable),
        };
        check_section(Some(target), self.schedule_id)?;
        self.check(target.kind, &placement, None)?;
        check_spacing(self.slots, &placement)?;
        check_pattern(target, &placement)?;
        Ok(placement)
    }
}
