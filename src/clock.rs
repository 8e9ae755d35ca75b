//! Injectable time source.
//!
//! Every stage receives its notion of "now" through [`Clock`] so identical
//! inputs plus an identical clock produce byte-identical artifacts.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Epoch milliseconds, the unit used for `createdAt` fields.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// RFC 3339 with millisecond precision, the format used for `generatedAt`.
    fn now_rfc3339(&self) -> String {
        format_timestamp(&self.now())
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Build from epoch milliseconds. Out-of-range values clamp to the epoch.
    pub fn from_millis(millis: i64) -> Self {
        let at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self(at)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
