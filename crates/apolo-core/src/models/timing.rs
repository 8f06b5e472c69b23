//! Timing model
//!
//! A Timing describes calendar validity: which years, months, month days and
//! week days it covers, plus a start (and optional end) time of day. Rating
//! plans use it to decide whether a binding applies at a call's start time;
//! the scheduler uses it to compute the next wall-clock fire of an action plan.

use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Predefined timing identifiers
pub mod timing_ids {
    pub const ASAP: &str = "*asap";
    pub const EVERY_MINUTE: &str = "*every_minute";
    pub const HOURLY: &str = "*hourly";
    pub const DAILY: &str = "*daily";
    pub const WEEKLY: &str = "*weekly";
    pub const MONTHLY: &str = "*monthly";
    pub const MONTHLY_ESTIMATED: &str = "*monthly_estimated";
    pub const MONTH_END: &str = "*month_end";
    pub const YEARLY: &str = "*yearly";
    pub const ANY: &str = "*any";
}

/// Month day value meaning "last day of the month"
pub const LAST_MONTH_DAY: i32 = -1;

/// Timing entity
///
/// Empty calendar sets mean "any".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Timing {
    pub id: String,

    #[serde(default)]
    pub years: Vec<i32>,

    /// 1..=12
    #[serde(default)]
    pub months: Vec<u32>,

    /// 1..=31, or -1 for the last day of the month
    #[serde(default)]
    pub month_days: Vec<i32>,

    /// 0 = Sunday ..= 6 = Saturday
    #[serde(default)]
    pub week_days: Vec<u32>,

    /// `HH:MM:SS`, `*asap`, `*every_minute`, `*:MM:SS` (hourly) or `+<duration>`
    #[serde(default)]
    pub start_time: String,

    /// Optional `HH:MM:SS` end of the daily validity window
    #[serde(default)]
    pub end_time: String,

    /// Clamp month days past the end of a short month to its last day
    #[serde(default)]
    pub clamp_month_day: bool,
}

/// Parsed form of [`Timing::start_time`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSpec {
    /// Fire immediately, once
    Asap,
    /// Fire at second zero of every minute
    EveryMinute,
    /// Fire every hour at the given minute and second
    Hourly { minute: u32, second: u32 },
    /// Fire at a fixed time of day
    At(NaiveTime),
    /// Fire once, the given delay after the plan was loaded
    After(Duration),
}

impl StartSpec {
    /// One-shot specs are never rescheduled
    pub fn is_one_shot(&self) -> bool {
        matches!(self, StartSpec::Asap | StartSpec::After(_))
    }
}

impl Timing {
    /// Timing matching every instant
    pub fn any() -> Self {
        Self {
            id: timing_ids::ANY.to_string(),
            start_time: "00:00:00".to_string(),
            ..Default::default()
        }
    }

    /// Build a predefined timing anchored at `anchor`
    ///
    /// Relative timings such as `*monthly` take their day and time of day
    /// from the anchor (normally the scheduler load time).
    pub fn predefined(id: &str, anchor: DateTime<Utc>) -> Option<Self> {
        let at = anchor.format("%H:%M:%S").to_string();
        let mut timing = Timing {
            id: id.to_string(),
            ..Default::default()
        };
        match id {
            timing_ids::ASAP => timing.start_time = timing_ids::ASAP.to_string(),
            timing_ids::EVERY_MINUTE => timing.start_time = timing_ids::EVERY_MINUTE.to_string(),
            timing_ids::HOURLY => {
                timing.start_time = format!("*:{:02}:{:02}", anchor.minute(), anchor.second())
            }
            timing_ids::DAILY => timing.start_time = at,
            timing_ids::WEEKLY => {
                timing.week_days = vec![anchor.weekday().num_days_from_sunday()];
                timing.start_time = at;
            }
            timing_ids::MONTHLY => {
                timing.month_days = vec![anchor.day() as i32];
                timing.start_time = at;
            }
            timing_ids::MONTHLY_ESTIMATED => {
                timing.month_days = vec![anchor.day() as i32];
                timing.clamp_month_day = true;
                timing.start_time = at;
            }
            timing_ids::MONTH_END => {
                timing.month_days = vec![LAST_MONTH_DAY];
                timing.start_time = at;
            }
            timing_ids::YEARLY => {
                timing.months = vec![anchor.month()];
                timing.month_days = vec![anchor.day() as i32];
                timing.start_time = at;
            }
            timing_ids::ANY => return Some(Timing::any()),
            _ => return None,
        }
        Some(timing)
    }

    /// Parse the start time field
    pub fn start_spec(&self) -> AppResult<StartSpec> {
        let raw = self.start_time.trim();
        match raw {
            "" => Ok(StartSpec::At(NaiveTime::MIN)),
            timing_ids::ASAP => Ok(StartSpec::Asap),
            timing_ids::EVERY_MINUTE => Ok(StartSpec::EveryMinute),
            _ if raw.starts_with('+') => parse_duration(&raw[1..]).map(StartSpec::After),
            _ if raw.starts_with("*:") => {
                let mut parts = raw[2..].split(':');
                let minute = parse_field(parts.next(), raw, 59)?;
                let second = parse_field(parts.next(), raw, 59)?;
                Ok(StartSpec::Hourly { minute, second })
            }
            _ => parse_time_of_day(raw).map(StartSpec::At),
        }
    }

    fn end_tod(&self) -> AppResult<Option<NaiveTime>> {
        match self.end_time.trim() {
            "" => Ok(None),
            raw => parse_time_of_day(raw).map(Some),
        }
    }

    /// Calendar part of the match: year, month, month day, week day
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.years.is_empty() && !self.years.contains(&date.year()) {
            return false;
        }
        if !self.months.is_empty() && !self.months.contains(&date.month()) {
            return false;
        }
        if !self.week_days.is_empty()
            && !self
                .week_days
                .contains(&date.weekday().num_days_from_sunday())
        {
            return false;
        }
        if self.month_days.is_empty() {
            return true;
        }
        let last = last_day_of_month(date);
        let day = date.day() as i32;
        self.month_days.iter().any(|&d| {
            d == day
                || (d == LAST_MONTH_DAY && day == last)
                || (self.clamp_month_day && d > last && day == last)
        })
    }

    /// Whether a rating binding guarded by this timing applies at `t`
    ///
    /// Relative start specs do not restrict the time of day.
    pub fn is_active_at(&self, t: DateTime<Utc>) -> AppResult<bool> {
        if !self.matches_date(t.date_naive()) {
            return Ok(false);
        }
        let tod = t.time();
        if let StartSpec::At(start) = self.start_spec()? {
            if tod < start {
                return Ok(false);
            }
        }
        if let Some(end) = self.end_tod()? {
            if tod >= end {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// First fire instant at or after `after`
    ///
    /// `loaded_at` anchors `+<duration>` specs. Returns `None` when no date in
    /// the next `lookahead_days` days satisfies the calendar fields.
    pub fn next_fire(
        &self,
        after: DateTime<Utc>,
        loaded_at: DateTime<Utc>,
        lookahead_days: u32,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let spec = self.start_spec()?;
        match spec {
            StartSpec::Asap => return Ok(Some(after)),
            StartSpec::After(delay) => {
                return loaded_at.checked_add_signed(delay).map(Some).ok_or_else(|| {
                    AppError::InvalidInput(format!("start time out of range: {}", self.start_time))
                })
            }
            _ => {}
        }

        let start_date = after.date_naive();
        for offset in 0..=i64::from(lookahead_days) {
            let Some(date) = Duration::try_days(offset).and_then(|d| start_date.checked_add_signed(d))
            else {
                break;
            };
            if !self.matches_date(date) {
                continue;
            }
            let floor = if offset == 0 { after.time() } else { NaiveTime::MIN };
            if let Some(tod) = first_time_of_day(spec, floor) {
                return Ok(Some(Utc.from_utc_datetime(&date.and_time(tod))));
            }
        }
        Ok(None)
    }
}

/// Earliest time of day matching `spec` that is not before `floor`
fn first_time_of_day(spec: StartSpec, floor: NaiveTime) -> Option<NaiveTime> {
    match spec {
        StartSpec::At(t) => (t >= floor).then_some(t),
        StartSpec::EveryMinute => {
            let truncated = NaiveTime::from_hms_opt(floor.hour(), floor.minute(), 0)?;
            if truncated == floor {
                Some(truncated)
            } else {
                let (next, wrapped) = truncated.overflowing_add_signed(Duration::minutes(1));
                (wrapped == 0).then_some(next)
            }
        }
        StartSpec::Hourly { minute, second } => (floor.hour()..24)
            .filter_map(|h| NaiveTime::from_hms_opt(h, minute, second))
            .find(|t| *t >= floor),
        StartSpec::Asap | StartSpec::After(_) => Some(floor),
    }
}

fn last_day_of_month(date: NaiveDate) -> i32 {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|first| first.pred_opt())
        .map(|d| d.day() as i32)
        .unwrap_or(28)
}

fn parse_field(part: Option<&str>, raw: &str, max: u32) -> AppResult<u32> {
    part.and_then(|p| p.parse::<u32>().ok())
        .filter(|v| *v <= max)
        .ok_or_else(|| AppError::InvalidInput(format!("invalid start time: {}", raw)))
}

fn parse_time_of_day(raw: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .map_err(|_| AppError::InvalidInput(format!("invalid time of day: {}", raw)))
}

/// Parse a compact duration such as `90s`, `5m`, `1h30m` or `250ms`
pub fn parse_duration(raw: &str) -> AppResult<Duration> {
    let invalid = || AppError::InvalidInput(format!("invalid duration: {}", raw));
    let mut total = Duration::zero();
    let mut digits = String::new();
    let mut chars = raw.trim().chars().peekable();
    let mut seen_unit = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: i64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let part = match c {
            'h' => Duration::try_hours(value),
            's' => Duration::try_seconds(value),
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                Duration::try_milliseconds(value)
            }
            'm' => Duration::try_minutes(value),
            _ => return Err(invalid()),
        };
        total = part
            .and_then(|p| total.checked_add(&p))
            .ok_or_else(invalid)?;
        seen_unit = true;
    }

    match (seen_unit, digits.is_empty()) {
        (true, true) => Ok(total),
        // bare number means seconds
        (false, false) => digits
            .parse::<i64>()
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::milliseconds(250));
        assert_eq!(parse_duration("45").unwrap(), Duration::seconds(45));
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        assert!(matches!(
            parse_duration("9999999999999999s"),
            Err(AppError::InvalidInput(_))
        ));
        assert!(parse_duration("99999999999999999999s").is_err());
        assert!(parse_duration("9223372036854775807ms9223372036854775807ms").is_err());

        // representable as a delay, but not once added to the load time
        let t = Timing {
            id: "BIG".into(),
            start_time: "+2000000000000h".into(),
            ..Default::default()
        };
        let now = utc(2024, 1, 1, 0, 0, 0);
        assert!(matches!(t.next_fire(now, now, 10), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_start_spec_parsing() {
        let mut t = Timing::default();
        t.start_time = "*asap".into();
        assert_eq!(t.start_spec().unwrap(), StartSpec::Asap);
        t.start_time = "*:15:00".into();
        assert_eq!(
            t.start_spec().unwrap(),
            StartSpec::Hourly { minute: 15, second: 0 }
        );
        t.start_time = "+1h".into();
        assert_eq!(t.start_spec().unwrap(), StartSpec::After(Duration::hours(1)));
        t.start_time = "25:00:00".into();
        assert!(t.start_spec().is_err());
    }

    #[test]
    fn test_active_window() {
        let peak = Timing {
            id: "PEAK".into(),
            week_days: vec![1, 2, 3, 4, 5],
            start_time: "08:00:00".into(),
            end_time: "20:00:00".into(),
            ..Default::default()
        };
        // 2024-01-15 is a Monday
        assert!(peak.is_active_at(utc(2024, 1, 15, 9, 0, 0)).unwrap());
        assert!(!peak.is_active_at(utc(2024, 1, 15, 7, 59, 59)).unwrap());
        assert!(!peak.is_active_at(utc(2024, 1, 15, 20, 0, 0)).unwrap());
        assert!(!peak.is_active_at(utc(2024, 1, 14, 9, 0, 0)).unwrap());
    }

    #[test]
    fn test_next_fire_month_day_and_time() {
        let t = Timing {
            id: "T".into(),
            month_days: vec![10],
            start_time: "12:00:00".into(),
            ..Default::default()
        };
        let now = utc(2024, 3, 10, 13, 0, 0);
        let next = t.next_fire(now, now, 400).unwrap();
        assert_eq!(next, Some(utc(2024, 4, 10, 12, 0, 0)));

        let before = utc(2024, 3, 10, 11, 0, 0);
        assert_eq!(
            t.next_fire(before, before, 400).unwrap(),
            Some(utc(2024, 3, 10, 12, 0, 0))
        );
    }

    #[test]
    fn test_next_fire_every_minute() {
        let t = Timing::predefined(timing_ids::EVERY_MINUTE, utc(2024, 1, 1, 0, 0, 0)).unwrap();
        let now = utc(2024, 1, 1, 10, 5, 30);
        assert_eq!(
            t.next_fire(now, now, 10).unwrap(),
            Some(utc(2024, 1, 1, 10, 6, 0))
        );
        let late = utc(2024, 1, 1, 23, 59, 30);
        assert_eq!(
            t.next_fire(late, late, 10).unwrap(),
            Some(utc(2024, 1, 2, 0, 0, 0))
        );
    }

    #[test]
    fn test_month_end_and_estimated() {
        let anchor = utc(2024, 1, 31, 6, 0, 0);
        let estimated = Timing::predefined(timing_ids::MONTHLY_ESTIMATED, anchor).unwrap();
        let after = utc(2024, 2, 1, 0, 0, 0);
        assert_eq!(
            estimated.next_fire(after, anchor, 400).unwrap(),
            Some(utc(2024, 2, 29, 6, 0, 0))
        );

        let monthly = Timing::predefined(timing_ids::MONTHLY, anchor).unwrap();
        assert_eq!(
            monthly.next_fire(after, anchor, 400).unwrap(),
            Some(utc(2024, 3, 31, 6, 0, 0))
        );

        let month_end = Timing::predefined(timing_ids::MONTH_END, anchor).unwrap();
        assert_eq!(
            month_end.next_fire(utc(2024, 4, 2, 0, 0, 0), anchor, 400).unwrap(),
            Some(utc(2024, 4, 30, 6, 0, 0))
        );
    }

    #[test]
    fn test_impossible_calendar_gives_none() {
        let t = Timing {
            id: "FEB30".into(),
            months: vec![2],
            month_days: vec![30],
            start_time: "00:00:00".into(),
            ..Default::default()
        };
        let now = utc(2024, 1, 1, 0, 0, 0);
        assert_eq!(t.next_fire(now, now, 800).unwrap(), None);
    }
}
