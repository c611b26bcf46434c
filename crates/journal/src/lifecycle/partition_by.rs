//! Calendar partitioning policy.
//!
//! A journal is split into partitions that each cover one calendar period.
//! [`PartitionBy`] aligns a nanosecond timestamp to the start of its period
//! and names the resulting partition (`2013-01-01`, `2013-01`, `2013` or
//! `default`).

use std::fmt;

/// Nanosecond timestamp since the Unix epoch.
pub type Timestamp = i64;

const NANOS_PER_DAY: i64 = 86_400 * 1_000_000_000;

/// Half-open time range `[start, end)` in nanoseconds.
///
/// An end of `i64::MAX` is inclusive: the range runs to the end of time, so
/// ranges clamped at the top of the nanosecond range still contain it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    /// Inclusive start.
    pub start: Timestamp,
    /// Exclusive end, unless it is `i64::MAX`.
    pub end: Timestamp,
}

impl TimeRange {
    /// Creates a new range.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Returns true if `ts` falls in the range.
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && (ts < self.end || self.end == Timestamp::MAX)
    }

    /// Returns true if the two ranges share at least one timestamp.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Calendar period covered by a single partition.
///
/// # Examples
/// ```rust,ignore
/// use alopex_journal::lifecycle::partition_by::PartitionBy;
///
/// let range = PartitionBy::Month.range_for(0);
/// assert_eq!(PartitionBy::Month.name_for(range.start), "1970-01");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionBy {
    /// One partition per UTC day.
    #[default]
    Day,
    /// One partition per UTC calendar month.
    Month,
    /// One partition per UTC calendar year.
    Year,
    /// A single partition covering all time.
    None,
}

impl PartitionBy {
    /// Returns the partition range containing `timestamp`.
    ///
    /// Note: timestamps close to the ends of the `i64` nanosecond range
    /// saturate, so the last partition's end may be clamped to `i64::MAX`.
    pub fn range_for(self, timestamp: Timestamp) -> TimeRange {
        match self {
            Self::Day => {
                let (days, _) = div_floor(timestamp, NANOS_PER_DAY);
                TimeRange::new(
                    days.saturating_mul(NANOS_PER_DAY),
                    (days + 1).saturating_mul(NANOS_PER_DAY),
                )
            }
            Self::Month => {
                let (year, month, _) = civil_from_days(div_floor(timestamp, NANOS_PER_DAY).0);
                let (next_year, next_month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
                TimeRange::new(
                    days_from_civil(year, month, 1).saturating_mul(NANOS_PER_DAY),
                    days_from_civil(next_year, next_month, 1).saturating_mul(NANOS_PER_DAY),
                )
            }
            Self::Year => {
                let (year, _, _) = civil_from_days(div_floor(timestamp, NANOS_PER_DAY).0);
                TimeRange::new(
                    days_from_civil(year, 1, 1).saturating_mul(NANOS_PER_DAY),
                    days_from_civil(year + 1, 1, 1).saturating_mul(NANOS_PER_DAY),
                )
            }
            Self::None => TimeRange::new(i64::MIN, i64::MAX),
        }
    }

    /// Returns the partition name for the period containing `timestamp`.
    pub fn name_for(self, timestamp: Timestamp) -> String {
        let (year, month, day) = civil_from_days(div_floor(timestamp, NANOS_PER_DAY).0);
        match self {
            Self::Day => format!("{:04}-{:02}-{:02}", year, month, day),
            Self::Month => format!("{:04}-{:02}", year, month),
            Self::Year => format!("{:04}", year),
            Self::None => "default".to_string(),
        }
    }
}

impl fmt::Display for PartitionBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Day => "DAY",
            Self::Month => "MONTH",
            Self::Year => "YEAR",
            Self::None => "NONE",
        };
        f.write_str(label)
    }
}

fn div_floor(value: i64, divisor: i64) -> (i64, i64) {
    let mut quotient = value / divisor;
    let mut remainder = value % divisor;
    if remainder < 0 {
        quotient -= 1;
        remainder += divisor;
    }
    (quotient, remainder)
}

fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 {
        z / 146_097
    } else {
        (z - 146_096) / 146_097
    };
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = mp + if mp < 10 { 3 } else { -9 };
    let year = y + if month <= 2 { 1 } else { 0 };
    (year as i32, month as u32, day as u32)
}

fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = i64::from(year) - if month <= 2 { 1 } else { 0 };
    let era = if y >= 0 { y / 400 } else { (y - 399) / 400 };
    let yoe = y - era * 400;
    let m = i64::from(month);
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
