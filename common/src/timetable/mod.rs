// Timetable engine: value types, rule compiler, placement validation and
// meeting patterns

pub mod pattern;
pub mod rules;
pub mod time;
pub mod validator;

pub use pattern::{required_pattern, CoursePattern, PatternCatalog, PatternCategory};
pub use rules::{compile_rules, CompiledRule};
pub use time::{TimeOfDay, TimeRange, Weekday};
pub use validator::{Placement, PlacementContext, Rejection};
