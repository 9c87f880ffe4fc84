//! rollcall-attendance: Turns recognitions into attendance records.
//!
//! [`PresenceTracker`] decides when an identity enters or leaves;
//! [`CsvAttendanceStore`] keeps the resulting table on disk.

pub mod presence;
pub mod store;

pub use presence::{PresenceConfig, PresenceEvent, PresenceTracker, DEFAULT_DEBOUNCE_SECS};
pub use store::{
    AttendanceRecord, AttendanceSink, CsvAttendanceStore, EntryOutcome, ExitOutcome,
    SessionPolicy, StoreError, COLUMNS, read_table,
};
