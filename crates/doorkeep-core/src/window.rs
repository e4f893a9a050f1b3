//! Validity window calculation.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// How far a code's validity extends around the stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    pub before: Duration,
    pub after: Duration,
}

impl BufferConfig {
    pub fn hours(before: i64, after: i64) -> Self {
        Self {
            before: Duration::hours(before),
            after: Duration::hours(after),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::hours(2, 2)
    }
}

/// The `[valid_from, valid_until)` interval a device must accept a code in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl ValidityWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at < self.valid_until
    }

    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.valid_until <= now
    }

    pub fn start_timestamp(&self) -> i64 {
        self.valid_from.timestamp()
    }

    pub fn end_timestamp(&self) -> i64 {
        self.valid_until.timestamp()
    }
}

/// Anything that names an instant. Naive values are read as UTC.
pub trait ToUtc {
    fn to_utc(&self) -> DateTime<Utc>;
}

impl ToUtc for DateTime<Utc> {
    fn to_utc(&self) -> DateTime<Utc> {
        *self
    }
}

impl ToUtc for DateTime<FixedOffset> {
    fn to_utc(&self) -> DateTime<Utc> {
        self.with_timezone(&Utc)
    }
}

impl ToUtc for NaiveDateTime {
    fn to_utc(&self) -> DateTime<Utc> {
        self.and_utc()
    }
}

/// `[checkin - before, checkout + after)`, computed in UTC.
///
/// `checkout > checkin` is the caller's precondition.
pub fn calculate_window(
    checkin: &impl ToUtc,
    checkout: &impl ToUtc,
    buffers: &BufferConfig,
) -> ValidityWindow {
    ValidityWindow {
        valid_from: checkin.to_utc() - buffers.before,
        valid_until: checkout.to_utc() + buffers.after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn two_hour_buffers_around_stay() {
        let window = calculate_window(
            &utc("2025-11-20T15:00:00Z"),
            &utc("2025-11-22T11:00:00Z"),
            &BufferConfig::hours(2, 2),
        );
        assert_eq!(window.valid_from, utc("2025-11-20T13:00:00Z"));
        assert_eq!(window.valid_until, utc("2025-11-22T13:00:00Z"));
    }

    #[test]
    fn naive_and_aware_inputs_agree() {
        let buffers = BufferConfig::default();
        let naive_in = NaiveDateTime::parse_from_str("2025-11-20 15:00", "%Y-%m-%d %H:%M").unwrap();
        let naive_out = NaiveDateTime::parse_from_str("2025-11-22 11:00", "%Y-%m-%d %H:%M").unwrap();
        let rome = FixedOffset::east_opt(3600).unwrap();
        let aware_in = rome.with_ymd_and_hms(2025, 11, 20, 16, 0, 0).unwrap();
        let aware_out = rome.with_ymd_and_hms(2025, 11, 22, 12, 0, 0).unwrap();

        let from_naive = calculate_window(&naive_in, &naive_out, &buffers);
        let from_aware = calculate_window(&aware_in, &aware_out, &buffers);
        let from_utc = calculate_window(&naive_in.and_utc(), &naive_out.and_utc(), &buffers);

        assert_eq!(from_naive, from_aware);
        assert_eq!(from_naive, from_utc);
    }

    #[test]
    fn positive_buffers_strictly_enclose_stay() {
        let base = utc("2024-01-01T00:00:00Z");
        for _ in 0..2_000 {
            let checkin = base + Duration::minutes(fastrand::i64(0..500_000));
            let checkout = checkin + Duration::minutes(fastrand::i64(1..30_000));
            let buffers = BufferConfig {
                before: Duration::minutes(fastrand::i64(1..1_440)),
                after: Duration::minutes(fastrand::i64(1..1_440)),
            };
            let window = calculate_window(&checkin, &checkout, &buffers);
            assert!(window.valid_from < checkin);
            assert!(checkin <= checkout);
            assert!(checkout < window.valid_until);
            assert_eq!(window.valid_until, checkout + buffers.after);
        }
    }

    #[test]
    fn window_membership() {
        let window = calculate_window(
            &utc("2025-11-20T15:00:00Z"),
            &utc("2025-11-22T11:00:00Z"),
            &BufferConfig::default(),
        );
        assert!(window.contains(utc("2025-11-20T13:00:00Z")));
        assert!(!window.contains(utc("2025-11-22T13:00:00Z")));
        assert!(window.has_elapsed(utc("2025-11-22T14:00:00Z")));
        assert_eq!(window.end_timestamp() - window.start_timestamp(), 48 * 3600);
    }
}
