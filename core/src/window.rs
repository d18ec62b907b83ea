//! Calendar-day windows.
//!
//! Events are stored with UTC `created_at` timestamps while "today" is a local calendar
//! day. A [`DayWindow`] converts a local day into the half-open UTC interval
//! `[local midnight, next local midnight)`. Windows are cheap values and are recomputed
//! every time "today" is evaluated, so a long-running view never keeps yesterday's window.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayWindow {
    date: NaiveDate,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DayWindow {
    /// The window covering `date` as observed in `tz`.
    pub fn for_date<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Self {
        let start = local_midnight(date, tz);
        let end = date
            .succ_opt()
            .map_or(start + Duration::days(1), |next| local_midnight(next, tz));
        Self { date, start, end }
    }

    /// The window of the local day that contains `instant`.
    pub fn containing<Tz: TimeZone>(instant: DateTime<Utc>, tz: &Tz) -> Self {
        let date = instant.with_timezone(tz).date_naive();
        Self::for_date(date, tz)
    }

    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

// Ambiguous midnights (clocks going back) take the earlier instant; a midnight that falls
// in a DST gap moves to the first valid instant an hour later.
fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(midnight + Duration::hours(1)))
                .earliest()
        })
        .map_or_else(|| midnight.and_utc(), |dt| dt.with_timezone(&Utc))
}

/// Which clock decides where a day starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DayBoundary {
    /// The system's local time zone.
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
}

impl DayBoundary {
    /// Calendar date of `instant` under this boundary.
    #[must_use]
    pub fn date_of(self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            Self::Local => instant.with_timezone(&Local).date_naive(),
            Self::Utc => instant.date_naive(),
            Self::Fixed(offset) => instant.with_timezone(&offset).date_naive(),
        }
    }

    /// Wall-clock time of `instant` under this boundary.
    #[must_use]
    pub fn time_of(self, instant: DateTime<Utc>) -> NaiveTime {
        match self {
            Self::Local => instant.with_timezone(&Local).time(),
            Self::Utc => instant.time(),
            Self::Fixed(offset) => instant.with_timezone(&offset).time(),
        }
    }

    #[must_use]
    pub fn window(self, date: NaiveDate) -> DayWindow {
        match self {
            Self::Local => DayWindow::for_date(date, &Local),
            Self::Utc => DayWindow::for_date(date, &Utc),
            Self::Fixed(offset) => DayWindow::for_date(date, &offset),
        }
    }

    #[must_use]
    pub fn today(self) -> NaiveDate {
        self.date_of(Utc::now())
    }

    /// Today's window, evaluated now.
    #[must_use]
    pub fn today_window(self) -> DayWindow {
        self.window(self.today())
    }
}

impl fmt::Display for DayBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Utc => f.write_str("utc"),
            Self::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

impl FromStr for DayBoundary {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "local" => return Ok(Self::Local),
            "utc" | "z" => return Ok(Self::Utc),
            _ => {}
        }
        parse_offset(s).map(Self::Fixed).ok_or_else(|| {
            TrackerError::Validation(format!(
                "Invalid day boundary '{s}'. Use local, utc, or an offset like +02:00"
            ))
        })
    }
}

impl TryFrom<String> for DayBoundary {
    type Error = TrackerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DayBoundary> for String {
    fn from(value: DayBoundary) -> Self {
        value.to_string()
    }
}

/// Parse "+HH:MM", "-HH:MM" or "+HHMM".
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_utc_window_bounds() {
        let w = DayWindow::for_date(date(2024, 6, 15), &Utc);
        assert_eq!(w.date(), date(2024, 6, 15));
        assert_eq!(w.start(), utc("2024-06-15T00:00:00Z"));
        assert_eq!(w.end(), utc("2024-06-16T00:00:00Z"));
    }

    #[test]
    fn test_window_is_half_open() {
        let w = DayWindow::for_date(date(2024, 6, 15), &Utc);
        assert!(w.contains(utc("2024-06-15T00:00:00Z")));
        assert!(w.contains(utc("2024-06-15T23:59:59.999Z")));
        assert!(!w.contains(utc("2024-06-16T00:00:00Z")));
        assert!(!w.contains(utc("2024-06-14T23:59:59Z")));
    }

    #[test]
    fn test_fixed_offset_window_shifts() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let w = DayWindow::for_date(date(2024, 6, 15), &plus_two);
        assert_eq!(w.start(), utc("2024-06-14T22:00:00Z"));
        assert_eq!(w.end(), utc("2024-06-15T22:00:00Z"));
        // 23:30 UTC on the 15th is already the 16th at +02:00
        assert!(!w.contains(utc("2024-06-15T23:30:00Z")));
        assert!(w.contains(utc("2024-06-14T22:30:00Z")));
    }

    #[test]
    fn test_containing_uses_local_date() {
        let minus_five = FixedOffset::west_opt(5 * 3600).unwrap();
        let w = DayWindow::containing(utc("2024-06-16T03:00:00Z"), &minus_five);
        assert_eq!(w.date(), date(2024, 6, 15));
        assert!(w.contains(utc("2024-06-16T03:00:00Z")));
    }

    #[test]
    fn test_day_boundary_parse() {
        assert_eq!("local".parse::<DayBoundary>().unwrap(), DayBoundary::Local);
        assert_eq!("UTC".parse::<DayBoundary>().unwrap(), DayBoundary::Utc);
        assert_eq!(
            "+02:00".parse::<DayBoundary>().unwrap(),
            DayBoundary::Fixed(FixedOffset::east_opt(7200).unwrap())
        );
        assert_eq!(
            "-0530".parse::<DayBoundary>().unwrap(),
            DayBoundary::Fixed(FixedOffset::west_opt(5 * 3600 + 1800).unwrap())
        );
        assert!("mars".parse::<DayBoundary>().is_err());
        assert!("+25:00".parse::<DayBoundary>().is_err());
    }

    #[test]
    fn test_day_boundary_serde_roundtrip_string() {
        let b: DayBoundary = serde_json::from_str("\"+01:00\"").unwrap();
        assert_eq!(serde_json::to_string(&b).unwrap(), "\"+01:00\"");
    }

    #[test]
    fn test_day_boundary_date_of() {
        let b = DayBoundary::Fixed(FixedOffset::east_opt(9 * 3600).unwrap());
        assert_eq!(b.date_of(utc("2024-06-15T16:00:00Z")), date(2024, 6, 16));
        assert_eq!(DayBoundary::Utc.date_of(utc("2024-06-15T16:00:00Z")), date(2024, 6, 15));
    }

    // Cuba moves its clocks at midnight, so both DST transitions land on a day boundary.
    #[test]
    fn test_midnight_in_dst_gap_starts_an_hour_later() {
        let havana = chrono_tz::America::Havana;
        let before = DayWindow::for_date(date(2018, 3, 10), &havana);
        assert_eq!(before.start(), utc("2018-03-10T05:00:00Z"));
        assert_eq!(before.end(), utc("2018-03-11T05:00:00Z"));

        let short = DayWindow::for_date(date(2018, 3, 11), &havana);
        assert_eq!(short.start(), before.end());
        assert_eq!(short.end(), utc("2018-03-12T04:00:00Z"));
        assert_eq!(short.end() - short.start(), Duration::hours(23));
    }

    #[test]
    fn test_ambiguous_midnight_takes_earlier_instant() {
        let havana = chrono_tz::America::Havana;
        let before = DayWindow::for_date(date(2018, 11, 3), &havana);
        assert_eq!(before.start(), utc("2018-11-03T04:00:00Z"));
        assert_eq!(before.end(), utc("2018-11-04T04:00:00Z"));

        let long = DayWindow::for_date(date(2018, 11, 4), &havana);
        assert_eq!(long.start(), before.end());
        assert_eq!(long.end(), utc("2018-11-05T05:00:00Z"));
        assert_eq!(long.end() - long.start(), Duration::hours(25));
        // 00:30 CST, the second pass through the repeated hour
        let repeated = utc("2018-11-04T05:30:00Z");
        assert!(long.contains(repeated));
        assert_eq!(DayWindow::containing(repeated, &havana), long);
    }

    #[test]
    fn test_dst_days_tile_without_gaps() {
        let sao_paulo = chrono_tz::America::Sao_Paulo;
        let mut day = date(2018, 11, 1);
        let mut window = DayWindow::for_date(day, &sao_paulo);
        while day < date(2018, 11, 8) {
            day = day.succ_opt().unwrap();
            let next = DayWindow::for_date(day, &sao_paulo);
            assert_eq!(window.end(), next.start(), "gap before {day}");
            window = next;
        }
    }

    #[test]
    fn test_window_containing_now_contains_now() {
        let now = Utc::now();
        assert!(DayWindow::containing(now, &Utc).contains(now));
        let local = DayWindow::containing(now, &Local);
        assert!(local.contains(now));
        assert!(local.end() > local.start());
    }
}
