use chrono::{DateTime, SubsecRound, Utc};

/// Source of "now" for the curve engine and the volume sources.
/// Injected so month boundaries and refresh timestamps can be pinned in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// `YYYY-MM` bucket the volume cache is keyed by.
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Truncates to microseconds, the resolution Postgres stores `timestamptz` at.
pub fn store_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}
