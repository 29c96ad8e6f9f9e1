// Weekly meeting cadence per course category
//
// Pure functions: the resulting `CoursePattern` feeds the requirement brief for
// the reasoning service and is the reference every proposal is checked against.

use crate::config::SchedulingConfig;
use crate::models::{Course, CourseCategory};
use crate::timetable::time::{TimeOfDay, TimeRange, Weekday};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;

/// Occupancy of a one-hour meeting
pub const PERIOD_MINUTES: u16 = 50;
/// Gap implied after a one-hour meeting before the next one
pub const BUFFER_MINUTES: u16 = 10;
/// Two consecutive periods with no buffer between them
pub const BLOCK_MINUTES: u16 = 2 * PERIOD_MINUTES;

const MORNING: TimeRange = TimeRange {
    start: TimeOfDay::at(8, 0),
    end: TimeOfDay::at(12, 0),
};

/// Course codes with fixed cadences
#[derive(Debug, Clone, Default)]
pub struct PatternCatalog {
    category_a: HashSet<String>,
    category_b: HashSet<String>,
}

impl PatternCatalog {
    pub fn new<A, B>(category_a: A, category_b: B) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        B: IntoIterator,
        B::Item: AsRef<str>,
    {
        Self {
            category_a: category_a.into_iter().map(|c| normalize_code(c.as_ref())).collect(),
            category_b: category_b.into_iter().map(|c| normalize_code(c.as_ref())).collect(),
        }
    }

    pub fn from_config(config: &SchedulingConfig) -> Self {
        Self::new(&config.category_a_codes, &config.category_b_codes)
    }

    pub fn classify(&self, course: &Course) -> PatternCategory {
        let code = normalize_code(&course.code);
        if self.category_a.contains(&code) {
            return PatternCategory::FixedA;
        }
        if self.category_b.contains(&code) {
            return PatternCategory::FixedB;
        }
        match course.category {
            CourseCategory::SingleBlock => PatternCategory::SingleBlock,
            CourseCategory::TwoBlocks => PatternCategory::TwoBlocks,
            CourseCategory::Standard => PatternCategory::Standard,
        }
    }
}

fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    SingleBlock,
    TwoBlocks,
    FixedA,
    FixedB,
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingKind {
    Lecture,
    Tutorial,
}

/// One required weekly meeting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Meeting {
    pub kind: MeetingKind,
    /// 1 = single period, 2 = connected block
    pub periods: u8,
    pub days: BTreeSet<Weekday>,
    pub window: Option<TimeRange>,
}

impl Meeting {
    fn new(kind: MeetingKind, periods: u8, days: &[Weekday]) -> Self {
        Self {
            kind,
            periods,
            days: days.iter().copied().collect(),
            window: None,
        }
    }

    fn within(mut self, window: TimeRange) -> Self {
        self.window = Some(window);
        self
    }

    pub fn duration_minutes(&self) -> u16 {
        u16::from(self.periods) * PERIOD_MINUTES
    }

    /// Whether a concrete placement has this meeting's shape
    pub fn admits(&self, day: Weekday, range: &TimeRange) -> bool {
        range.duration_minutes() == self.duration_minutes()
            && self.days.contains(&day)
            && self
                .window
                .map_or(true, |w| w.start <= range.start && range.end <= w.end)
    }

    fn describe(&self) -> String {
        let length = if self.periods == 1 {
            format!("1-hour {} ({} min)", kind_label(self.kind), PERIOD_MINUTES)
        } else {
            format!(
                "connected {}-hour {} ({} min, no break)",
                self.periods,
                kind_label(self.kind),
                self.duration_minutes()
            )
        };
        let days = if self.days.len() == Weekday::ALL.len() {
            "any working day".to_string()
        } else {
            self.days
                .iter()
                .map(Weekday::as_str)
                .collect::<Vec<_>>()
                .join(" or ")
        };
        match &self.window {
            Some(window) => format!("{} on {} between {}", length, days, window),
            None => format!("{} on {}", length, days),
        }
    }
}

fn kind_label(kind: MeetingKind) -> &'static str {
    match kind {
        MeetingKind::Lecture => "lecture",
        MeetingKind::Tutorial => "tutorial",
    }
}

/// One acceptable way of meeting a course's weekly requirement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternOption {
    pub meetings: Vec<Meeting>,
    /// Meetings must land on pairwise different days
    pub distinct_days: bool,
}

impl PatternOption {
    fn new(meetings: Vec<Meeting>) -> Self {
        Self {
            meetings,
            distinct_days: false,
        }
    }

    fn on_distinct_days(mut self) -> Self {
        self.distinct_days = true;
        self
    }

    pub fn meeting_hours(&self) -> u8 {
        self.meetings.iter().map(|m| m.periods).sum()
    }

    /// Meetings of this option still open once `placed` is accounted for;
    /// `None` when `placed` cannot be part of this option at all
    pub fn remaining(&self, placed: &[(Weekday, TimeRange)]) -> Option<Vec<&Meeting>> {
        if placed.len() > self.meetings.len() {
            return None;
        }
        if self.distinct_days {
            let days: BTreeSet<Weekday> = placed.iter().map(|(day, _)| *day).collect();
            if days.len() != placed.len() {
                return None;
            }
        }
        let mut assigned = vec![false; self.meetings.len()];
        if !self.assign(placed, &mut assigned) {
            return None;
        }
        Some(
            self.meetings
                .iter()
                .zip(assigned)
                .filter(|(_, taken)| !taken)
                .map(|(meeting, _)| meeting)
                .collect(),
        )
    }

    /// Give every placed meeting its own required meeting, backtracking
    fn assign(&self, placed: &[(Weekday, TimeRange)], assigned: &mut [bool]) -> bool {
        let Some(((day, range), rest)) = placed.split_first() else {
            return true;
        };
        for (i, meeting) in self.meetings.iter().enumerate() {
            if !assigned[i] && meeting.admits(*day, range) {
                assigned[i] = true;
                if self.assign(rest, assigned) {
                    return true;
                }
                assigned[i] = false;
            }
        }
        false
    }
}

/// How far a section's committed meetings go towards its pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Some option is fully covered
    Complete,
    /// Fewest meetings still needed across the options that remain possible
    Open { remaining: usize },
    /// The committed meetings fit no option
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoursePattern {
    pub category: PatternCategory,
    pub options: Vec<PatternOption>,
}

impl CoursePattern {
    pub fn progress(&self, placed: &[(Weekday, TimeRange)]) -> Progress {
        let mut fewest: Option<usize> = None;
        for option in &self.options {
            if let Some(open) = option.remaining(placed) {
                if open.is_empty() {
                    return Progress::Complete;
                }
                fewest = Some(fewest.map_or(open.len(), |n| n.min(open.len())));
            }
        }
        fewest.map_or(Progress::Unmatched, |remaining| Progress::Open { remaining })
    }

    /// Whether one more meeting on `day` at `range` keeps `placed` inside a
    /// single option
    pub fn accepts(&self, placed: &[(Weekday, TimeRange)], day: Weekday, range: &TimeRange) -> bool {
        let mut candidate = placed.to_vec();
        candidate.push((day, *range));
        self.options
            .iter()
            .any(|option| option.remaining(&candidate).is_some())
    }

    /// Natural-language requirement for the reasoning service
    pub fn describe(&self) -> String {
        let mut text = String::new();
        for (i, option) in self.options.iter().enumerate() {
            if i > 0 {
                text.push_str(" OR ");
            }
            let parts: Vec<String> = option.meetings.iter().map(Meeting::describe).collect();
            let _ = write!(text, "{}", parts.join(" + "));
            if option.distinct_days {
                text.push_str(" (each on a different day)");
            }
            let _ = write!(text, " [{} meeting-hours]", option.meeting_hours());
        }
        text
    }
}

/// Derive the weekly meeting pattern for a course
pub fn required_pattern(course: &Course, catalog: &PatternCatalog) -> CoursePattern {
    use MeetingKind::{Lecture, Tutorial};
    use Weekday::*;

    let category = catalog.classify(course);
    let any_day = Weekday::ALL;

    let options = match category {
        PatternCategory::SingleBlock => vec![PatternOption::new(vec![Meeting::new(
            Lecture, 2, &any_day,
        )])],
        PatternCategory::TwoBlocks => vec![PatternOption::new(vec![
            Meeting::new(Lecture, 2, &any_day),
            Meeting::new(Lecture, 2, &any_day),
        ])
        .on_distinct_days()],
        PatternCategory::FixedA => vec![PatternOption::new(vec![
            Meeting::new(Lecture, 1, &[Sunday]),
            Meeting::new(Lecture, 1, &[Tuesday]),
            Meeting::new(Lecture, 1, &[Thursday]),
            Meeting::new(Tutorial, 1, &any_day).within(MORNING),
        ])],
        PatternCategory::FixedB => {
            let pairs = [(Sunday, Tuesday), (Monday, Wednesday), (Tuesday, Thursday)];
            let mut options: Vec<PatternOption> = pairs
                .iter()
                .map(|&(first, second)| {
                    PatternOption::new(vec![
                        Meeting::new(Lecture, 1, &[first]),
                        Meeting::new(Lecture, 1, &[second]),
                        Meeting::new(Tutorial, 1, &any_day),
                    ])
                })
                .collect();
            options.push(PatternOption::new(vec![
                Meeting::new(Lecture, 2, &[Monday, Wednesday]),
                Meeting::new(Tutorial, 1, &any_day),
            ]));
            options
        }
        PatternCategory::Standard => vec![PatternOption::new(vec![
            Meeting::new(Lecture, 1, &[Sunday]),
            Meeting::new(Lecture, 1, &[Tuesday]),
            Meeting::new(Lecture, 1, &[Thursday]),
            Meeting::new(Tutorial, 1, &any_day),
        ])],
    };

    CoursePattern { category, options }
}
