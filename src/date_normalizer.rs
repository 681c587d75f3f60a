use crate::error::DateError;
use chrono::{Datelike, Local, NaiveDate};
use regex::{Captures, Regex};
use std::ops::Range;
use std::sync::OnceLock;

const MONTH_NAMES: &str = r"(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateShape {
    /// `a/b/y` with `/ - .`; month-first, then day-first.
    NumericTriple,
    /// `Y-M-D` with `/ - .`.
    IsoLike,
    /// `Month D, Y`.
    MonthDayYear,
    /// `D Month Y`.
    DayMonthYear,
    /// `D-Mon-Y`.
    DayMonYear,
}

fn numeric_triple_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})([/\-.])(\d{1,2})([/\-.])(\d{4}|\d{2})\b").expect("numeric date regex")
    })
}

fn iso_like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{4})[/\-.](\d{1,2})[/\-.](\d{1,2})\b").expect("iso date regex")
    })
}

fn month_day_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b({MONTH_NAMES})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
        ))
        .expect("month day year regex")
    })
}

fn day_month_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTH_NAMES})\.?,?\s+(\d{{4}})\b"
        ))
        .expect("day month year regex")
    })
}

fn day_mon_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b(\d{{1,2}})-({MONTH_NAMES})-(\d{{4}}|\d{{2}})\b"
        ))
        .expect("day mon year regex")
    })
}

fn trailing_punct_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w]+$").expect("trailing punct regex"))
}

fn shapes() -> [(DateShape, &'static Regex); 5] {
    [
        (DateShape::NumericTriple, numeric_triple_re()),
        (DateShape::IsoLike, iso_like_re()),
        (DateShape::MonthDayYear, month_day_year_re()),
        (DateShape::DayMonthYear, day_month_year_re()),
        (DateShape::DayMonYear, day_mon_year_re()),
    ]
}

fn month_from_name(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Resolves a year token. Two-digit years land in the 100-year window centred on
/// `current_year`.
fn expand_year(token: &str, current_year: i32) -> Option<i32> {
    let value = token.parse::<i32>().ok()?;
    match token.len() {
        4 => Some(value),
        2 => {
            let window_start = current_year - 50;
            let mut year = window_start - window_start.rem_euclid(100) + value;
            if year < window_start {
                year += 100;
            }
            Some(year)
        }
        _ => None,
    }
}

fn capture_u32(caps: &Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx)?.as_str().parse::<u32>().ok()
}

fn date_from_captures(shape: DateShape, caps: &Captures<'_>, current_year: i32) -> Option<NaiveDate> {
    match shape {
        DateShape::NumericTriple => {
            let first = capture_u32(caps, 1)?;
            let second = capture_u32(caps, 3)?;
            let year = expand_year(caps.get(5)?.as_str(), current_year)?;
            NaiveDate::from_ymd_opt(year, first, second)
                .or_else(|| NaiveDate::from_ymd_opt(year, second, first))
        }
        DateShape::IsoLike => {
            let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
            NaiveDate::from_ymd_opt(year, capture_u32(caps, 2)?, capture_u32(caps, 3)?)
        }
        DateShape::MonthDayYear => {
            let month = month_from_name(caps.get(1)?.as_str())?;
            let year = caps.get(3)?.as_str().parse::<i32>().ok()?;
            NaiveDate::from_ymd_opt(year, month, capture_u32(caps, 2)?)
        }
        DateShape::DayMonthYear | DateShape::DayMonYear => {
            let month = month_from_name(caps.get(2)?.as_str())?;
            let year = expand_year(caps.get(3)?.as_str(), current_year)?;
            NaiveDate::from_ymd_opt(year, month, capture_u32(caps, 1)?)
        }
    }
}

/// Byte ranges of every date-shaped substring in `text`, ordered by position.
/// Overlapping matches from different shapes are merged.
pub fn date_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = shapes()
        .iter()
        .flat_map(|(_, re)| re.find_iter(text).map(|m| m.range()).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    spans.sort_by_key(|r| (r.start, std::cmp::Reverse(r.end)));

    let mut merged: Vec<Range<usize>> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start < last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// The earliest date-shaped substring of `text`, if any.
pub fn first_date_candidate(text: &str) -> Option<&str> {
    date_spans(text).first().map(|r| &text[r.clone()])
}

pub fn normalize(raw: Option<&str>) -> Result<NaiveDate, DateError> {
    normalize_in_year(raw, Local::now().year())
}

/// Same as [`normalize`] with an explicit reference year for two-digit years.
pub fn normalize_in_year(raw: Option<&str>, current_year: i32) -> Result<NaiveDate, DateError> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    let cleaned = trailing_punct_re().replace(trimmed, "");
    if cleaned.is_empty() {
        return Err(DateError::Missing);
    }

    // Earliest match wins; among shapes at the same offset, the table order decides.
    let mut best: Option<(usize, NaiveDate)> = None;
    for (shape, re) in shapes() {
        for caps in re.captures_iter(&cleaned) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if best.is_some_and(|(start, _)| start <= whole.start()) {
                break;
            }
            if let Some(date) = date_from_captures(shape, &caps, current_year) {
                best = Some((whole.start(), date));
                break;
            }
        }
    }

    best.map(|(_, date)| date)
        .ok_or_else(|| DateError::Unrecognised(trimmed.to_string()))
}
