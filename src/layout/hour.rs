//! Hour buckets.
//!
//! A bucket is a timestamp truncated to the start of its UTC hour. Rows are
//! attributed to exactly one bucket, which in turn names one hive partition.

use std::fmt;

use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::error::{Error, Result};

const SECS_PER_HOUR: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourBucket {
    start_secs: i64,
}

impl HourBucket {
    /// Bucket containing `ts`, evaluated in UTC regardless of the offset `ts` carries.
    pub fn containing(ts: OffsetDateTime) -> Self {
        Self::from_unix_secs(ts.unix_timestamp())
    }

    pub fn from_unix_secs(secs: i64) -> Self {
        Self {
            start_secs: secs - secs.rem_euclid(SECS_PER_HOUR),
        }
    }

    /// Parse `YYYY-MM-DDTHH` (UTC).
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || Error::TimestampRange(format!("expected YYYY-MM-DDTHH, got {value:?}"));
        let (date, hour) = value.split_once('T').ok_or_else(invalid)?;
        let date = Date::parse(date, format_description!("[year]-[month]-[day]"))
            .map_err(|_| invalid())?;
        let hour: u8 = hour.parse().map_err(|_| invalid())?;
        let start = date
            .with_hms(hour, 0, 0)
            .map_err(|err| Error::TimestampRange(err.to_string()))?
            .assume_utc();
        Ok(Self::containing(start))
    }

    pub fn start_secs(&self) -> i64 {
        self.start_secs
    }

    pub fn start_micros(&self) -> i64 {
        self.start_secs * 1_000_000
    }

    pub fn end_micros(&self) -> i64 {
        self.next().start_micros()
    }

    pub fn start(&self) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.start_secs)
            .map_err(|err| Error::TimestampRange(err.to_string()))
    }

    pub fn next(&self) -> Self {
        Self {
            start_secs: self.start_secs + SECS_PER_HOUR,
        }
    }

    pub fn contains_micros(&self, micros: i64) -> bool {
        micros >= self.start_micros() && micros < self.end_micros()
    }

    /// Hive path components: `year=YYYY/month=MM/day=DD/hour=HH`.
    pub fn hive_components(&self) -> Result<[String; 4]> {
        let start = self.start()?;
        Ok([
            format!("year={:04}", start.year()),
            format!("month={:02}", start.month() as u8),
            format!("day={:02}", start.day()),
            format!("hour={:02}", start.hour()),
        ])
    }

    /// Inverse of [`HourBucket::hive_components`]; unknown segments are ignored.
    pub fn from_hive_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let (mut year, mut month, mut day, mut hour) = (None, None, None, None);
        for segment in segments {
            let Some((key, value)) = segment.split_once('=') else {
                continue;
            };
            match key {
                "year" => year = value.parse::<i32>().ok(),
                "month" => month = value.parse::<u8>().ok(),
                "day" => day = value.parse::<u8>().ok(),
                "hour" => hour = value.parse::<u8>().ok(),
                _ => {}
            }
        }
        let month = time::Month::try_from(month?).ok()?;
        let date = Date::from_calendar_date(year?, month, day?).ok()?;
        let start = date.with_hms(hour?, 0, 0).ok()?.assume_utc();
        Some(Self::containing(start))
    }
}

impl fmt::Display for HourBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start() {
            Ok(start) => write!(
                f,
                "{:04}-{:02}-{:02}T{:02}",
                start.year(),
                start.month() as u8,
                start.day(),
                start.hour()
            ),
            Err(_) => write!(f, "@{}", self.start_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn truncates_to_hour() {
        let bucket = HourBucket::containing(datetime!(2024-01-01 00:59:59.999 UTC));
        assert_eq!(bucket, HourBucket::containing(datetime!(2024-01-01 00:00 UTC)));
        assert_ne!(bucket, HourBucket::containing(datetime!(2024-01-01 01:00 UTC)));
        assert_eq!(bucket.next(), HourBucket::containing(datetime!(2024-01-01 01:00 UTC)));
    }

    #[test]
    fn offset_timestamps_bucket_in_utc() {
        let local = datetime!(2024-01-01 09:30 +09:00);
        assert_eq!(
            HourBucket::containing(local),
            HourBucket::containing(datetime!(2024-01-01 00:00 UTC))
        );
    }

    #[test]
    fn pre_epoch_truncates_downward() {
        let bucket = HourBucket::containing(datetime!(1969-12-31 23:30 UTC));
        assert_eq!(bucket.start_secs(), -3600);
    }

    #[test]
    fn hive_round_trip() {
        let bucket = HourBucket::parse("2024-03-05T07").unwrap();
        let parts = bucket.hive_components().unwrap();
        assert_eq!(parts, ["year=2024", "month=03", "day=05", "hour=07"]);
        let parsed = HourBucket::from_hive_segments(parts.iter().map(String::as_str));
        assert_eq!(parsed, Some(bucket));
        assert_eq!(bucket.to_string(), "2024-03-05T07");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(HourBucket::parse("2024-03-05").is_err());
        assert!(HourBucket::parse("2024-03-05T25").is_err());
        assert!(HourBucket::from_hive_segments(["year=2024", "month=13"]).is_none());
    }

    #[test]
    fn contains_is_half_open() {
        let bucket = HourBucket::containing(datetime!(2024-01-01 00:00 UTC));
        assert!(bucket.contains_micros(bucket.start_micros()));
        assert!(!bucket.contains_micros(bucket.end_micros()));
    }
}
