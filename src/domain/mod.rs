pub mod exercise;
pub mod log_key;
pub mod record;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub use exercise::{validate_batch, BatchError, ExerciseEntry};
pub use log_key::{InvalidLogKey, LogId, LogKey};
pub use record::{LogPatch, NewLogRecord, PersistedLogRecord};

pub fn now_utc_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}

pub fn format_rfc3339(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .expect("RFC3339 formatting for UTC timestamp should never fail")
}
