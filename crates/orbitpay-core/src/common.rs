use serde::{Deserialize, Serialize};

/// A span of whole seconds, used wherever the spec calls for a duration
/// (product entitlement length, renewal windows, lease TTLs).
///
/// Kept as a newtype rather than a raw `i64` so call sites read
/// `Duration::days(30)` instead of a bare magic number, the same role
/// `SubscriptionInterval` + `interval_count` play in the teacher crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Duration(i64);

impl Duration {
    pub const fn seconds(secs: i64) -> Self {
        Self(secs)
    }

    pub const fn minutes(mins: i64) -> Self {
        Self(mins * 60)
    }

    pub const fn hours(hrs: i64) -> Self {
        Self(hrs * 3600)
    }

    pub const fn days(days: i64) -> Self {
        Self(days * 86400)
    }

    pub const fn as_seconds(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<Duration> for chrono::Duration {
    fn from(d: Duration) -> Self {
        chrono::Duration::seconds(d.0)
    }
}

impl From<chrono::Duration> for Duration {
    fn from(d: chrono::Duration) -> Self {
        Duration(d.num_seconds())
    }
}

impl std::ops::Add<Duration> for chrono::DateTime<chrono::Utc> {
    type Output = chrono::DateTime<chrono::Utc>;

    fn add(self, rhs: Duration) -> Self::Output {
        self + chrono::Duration::from(rhs)
    }
}
