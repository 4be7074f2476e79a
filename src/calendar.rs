use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;

/// Offset of Asia/Tehran (no DST since 2022).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 210;

/// Months in the order a school year runs through them.
pub const SCHOOL_YEAR_MONTHS: [u32; 12] = [7, 8, 9, 10, 11, 12, 1, 2, 3, 4, 5, 6];

pub const MONTH_NAMES: [&str; 12] = [
    "فروردین",
    "اردیبهشت",
    "خرداد",
    "تیر",
    "مرداد",
    "شهریور",
    "مهر",
    "آبان",
    "آذر",
    "دی",
    "بهمن",
    "اسفند",
];

/// A date in the Persian (Jalali) civil calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CivilDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateParseError {
    #[error("date is empty")]
    Empty,
    #[error("unrecognized date format: {0}")]
    Unrecognized(String),
    #[error("year {0} is before the Jalali epoch")]
    BeforeEpoch(i32),
}

const GREGORIAN_DAYS_BEFORE_MONTH: [i64; 12] =
    [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

/// Converts a Gregorian date into the Jalali calendar.
///
/// Uses the 33-year cycle arithmetic with the epoch split at Gregorian 1600.
/// Input must be a valid Gregorian date from year 622 on; callers validate
/// through [`parse_record_date`] or chrono before getting here.
pub fn gregorian_to_jalali(year: i32, month: u32, day: u32) -> CivilDate {
    let gy = i64::from(year);
    let gm = month.clamp(1, 12) as usize;
    let gd = i64::from(day);

    let (mut jy, gy) = if gy <= 1600 { (0, gy - 621) } else { (979, gy - 1600) };
    let gy2 = if gm > 2 { gy + 1 } else { gy };
    let mut days = 365 * gy + (gy2 + 3).div_euclid(4) - (gy2 + 99).div_euclid(100)
        + (gy2 + 399).div_euclid(400)
        - 80
        + gd
        + GREGORIAN_DAYS_BEFORE_MONTH[gm - 1];

    jy += 33 * days.div_euclid(12053);
    days = days.rem_euclid(12053);
    jy += 4 * days.div_euclid(1461);
    days = days.rem_euclid(1461);
    if days > 365 {
        jy += (days - 1) / 365;
        days = (days - 1) % 365;
    }

    let (jm, jd) = if days < 186 {
        (1 + days / 31, days % 31 + 1)
    } else {
        (7 + (days - 186) / 30, (days - 186) % 30 + 1)
    };

    CivilDate {
        year: jy as i32,
        month: jm as u32,
        day: jd as u32,
    }
}

pub fn to_civil(date: NaiveDate) -> CivilDate {
    gregorian_to_jalali(date.year(), date.month(), date.day())
}

/// School year a civil date belongs to: months 7..12 open the year, 1..6 close it.
pub fn school_year_of(date: CivilDate) -> i32 {
    if date.month >= 7 {
        date.year
    } else {
        date.year - 1
    }
}

pub fn current_school_year(reference_date: NaiveDate) -> i32 {
    school_year_of(to_civil(reference_date))
}

pub fn month_name(month: u32) -> Option<&'static str> {
    if (1..=12).contains(&month) {
        Some(MONTH_NAMES[(month - 1) as usize])
    } else {
        None
    }
}

/// The month a progress comparison looks back to. Month 7 starts the year.
pub fn previous_school_month(month: u32) -> Option<u32> {
    match month {
        7 => None,
        1 => Some(12),
        2..=12 => Some(month - 1),
        _ => None,
    }
}

/// Strict parse of a stored record date into the school's local calendar day.
///
/// Timestamps carrying an offset are shifted to `utc_offset_minutes` first, so
/// `2024-09-21T20:30:00Z` is 2024-09-22 in Tehran. Naive forms are taken as
/// already local.
pub fn parse_record_date(raw: &str, utc_offset_minutes: i32) -> Result<NaiveDate, DateParseError> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(DateParseError::Empty);
    }

    let date = if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .ok_or_else(|| DateParseError::Unrecognized(t.to_string()))?;
        dt.with_timezone(&offset).date_naive()
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        dt.date()
    } else if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        d
    } else {
        return Err(DateParseError::Unrecognized(t.to_string()));
    };

    if date.year() < 622 {
        return Err(DateParseError::BeforeEpoch(date.year()));
    }
    Ok(date)
}

/// [`parse_record_date`] followed by [`to_civil`].
pub fn parse_civil_date(raw: &str, utc_offset_minutes: i32) -> Result<CivilDate, DateParseError> {
    parse_record_date(raw, utc_offset_minutes).map(to_civil)
}
