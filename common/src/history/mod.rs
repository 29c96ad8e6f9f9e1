// Schedule version history: snapshots, keyed diffs and the recorder

pub mod diff;
pub mod recorder;
pub mod snapshot;

pub use diff::{diff_snapshots, SnapshotDiff};
pub use recorder::{record_version, Attribution};
pub use snapshot::ScheduleSnapshot;
