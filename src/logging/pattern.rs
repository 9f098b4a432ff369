//! Date masks for log file names
//!
//! Masks use the familiar `yyyy-mm-dd` style: lowercase `m` is the month, uppercase `M`
//! the minute. Text in single or double quotes is copied verbatim, and a leading `UTC:`
//! forces UTC regardless of the configured time zone.

use std::fmt::Write as _;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, Offset, Timelike, Utc};
use regex::Regex;

use crate::config::Timezone;

const UTC_PREFIX: &str = "UTC:";

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

fn token_regex() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| {
        Regex::new(
            r#"D{3,4}|d{1,4}|m{1,4}|yy(?:yy)?|HH?|hh?|MM?|ss?|TT?|tt?|WW?|[LloSZNp]|"[^"]*"|'[^']*'"#,
        )
        .expect("date mask regex is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Day,
    DayPadded,
    DayNameShort,
    DayName,
    RelativeDayShort,
    RelativeDay,
    IsoWeekday,
    IsoWeek,
    IsoWeekPadded,
    Month,
    MonthPadded,
    MonthNameShort,
    MonthName,
    YearShort,
    Year,
    Hour12,
    Hour12Padded,
    Hour24,
    Hour24Padded,
    Minute,
    MinutePadded,
    Second,
    SecondPadded,
    Millis,
    Centis,
    AmPmShortLower,
    AmPmLower,
    AmPmShortUpper,
    AmPmUpper,
    DaySuffix,
    ZoneName,
    ZoneOffset,
    ZoneOffsetColon,
}

impl Token {
    fn from_match(s: &str) -> Self {
        match s {
            "d" => Token::Day,
            "dd" => Token::DayPadded,
            "ddd" => Token::DayNameShort,
            "dddd" => Token::DayName,
            "DDD" => Token::RelativeDayShort,
            "DDDD" => Token::RelativeDay,
            "N" => Token::IsoWeekday,
            "W" => Token::IsoWeek,
            "WW" => Token::IsoWeekPadded,
            "m" => Token::Month,
            "mm" => Token::MonthPadded,
            "mmm" => Token::MonthNameShort,
            "mmmm" => Token::MonthName,
            "yy" => Token::YearShort,
            "yyyy" => Token::Year,
            "h" => Token::Hour12,
            "hh" => Token::Hour12Padded,
            "H" => Token::Hour24,
            "HH" => Token::Hour24Padded,
            "M" => Token::Minute,
            "MM" => Token::MinutePadded,
            "s" => Token::Second,
            "ss" => Token::SecondPadded,
            "l" => Token::Millis,
            "L" => Token::Centis,
            "t" => Token::AmPmShortLower,
            "tt" => Token::AmPmLower,
            "T" => Token::AmPmShortUpper,
            "TT" => Token::AmPmUpper,
            "S" => Token::DaySuffix,
            "Z" => Token::ZoneName,
            "o" => Token::ZoneOffset,
            "p" => Token::ZoneOffsetColon,
            quoted => Token::Literal(quoted[1..quoted.len() - 1].to_string()),
        }
    }
}

/// A parsed date mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePattern {
    tokens: Vec<Token>,
    force_utc: bool,
}

impl FilenamePattern {
    /// Parse a mask; unrecognized characters are kept as literals, so parsing never fails
    pub fn parse(mask: &str) -> Self {
        let (mask, force_utc) = match mask.strip_prefix(UTC_PREFIX) {
            Some(rest) => (rest, true),
            None => (mask, false),
        };

        let mut tokens = Vec::new();
        let mut last = 0;
        for m in token_regex().find_iter(mask) {
            if m.start() > last {
                tokens.push(Token::Literal(mask[last..m.start()].to_string()));
            }
            tokens.push(Token::from_match(m.as_str()));
            last = m.end();
        }
        if last < mask.len() {
            tokens.push(Token::Literal(mask[last..].to_string()));
        }

        Self { tokens, force_utc }
    }

    /// Render the mask for `timestamp` in the given time zone
    ///
    /// `DDD`/`DDDD` name the day relative to the current date.
    pub fn format(&self, timestamp: &DateTime<Utc>, timezone: Timezone) -> String {
        self.format_relative_to(timestamp, &Utc::now(), timezone)
    }

    fn format_relative_to(
        &self,
        timestamp: &DateTime<Utc>,
        now: &DateTime<Utc>,
        timezone: Timezone,
    ) -> String {
        let utc = self.force_utc || timezone == Timezone::Utc;
        let dt = in_zone(timestamp, utc);
        let today = in_zone(now, utc).date_naive();

        let mut out = String::new();
        for token in &self.tokens {
            render_token(&mut out, token, &dt, today, utc);
        }
        out
    }
}

fn in_zone(timestamp: &DateTime<Utc>, utc: bool) -> DateTime<FixedOffset> {
    if utc {
        timestamp.with_timezone(&Utc.fix())
    } else {
        let local = timestamp.with_timezone(&Local);
        local.with_timezone(&local.offset().fix())
    }
}

/// "Yesterday", "Today" or "Tomorrow" when `date` is next to `today`
fn relative_day(date: NaiveDate, today: NaiveDate) -> Option<(&'static str, &'static str)> {
    match (date - today).num_days() {
        -1 => Some(("Ysd", "Yesterday")),
        0 => Some(("Tdy", "Today")),
        1 => Some(("Tmw", "Tomorrow")),
        _ => None,
    }
}

fn render_token(
    out: &mut String,
    token: &Token,
    dt: &DateTime<FixedOffset>,
    today: NaiveDate,
    utc: bool,
) {
    let weekday = dt.weekday().num_days_from_sunday() as usize;
    let month0 = dt.month0() as usize;
    let (pm, hour12) = dt.hour12();

    // Writing into a String cannot fail
    let _ = match token {
        Token::Literal(s) => write!(out, "{}", s),
        Token::Day => write!(out, "{}", dt.day()),
        Token::DayPadded => write!(out, "{:02}", dt.day()),
        Token::DayNameShort => write!(out, "{}", &DAY_NAMES[weekday][..3]),
        Token::DayName => write!(out, "{}", DAY_NAMES[weekday]),
        Token::RelativeDayShort => match relative_day(dt.date_naive(), today) {
            Some((short, _)) => write!(out, "{}", short),
            None => write!(out, "{}", &DAY_NAMES[weekday][..3]),
        },
        Token::RelativeDay => match relative_day(dt.date_naive(), today) {
            Some((_, long)) => write!(out, "{}", long),
            None => write!(out, "{}", DAY_NAMES[weekday]),
        },
        Token::IsoWeekday => write!(out, "{}", dt.weekday().number_from_monday()),
        Token::IsoWeek => write!(out, "{}", dt.iso_week().week()),
        Token::IsoWeekPadded => write!(out, "{:02}", dt.iso_week().week()),
        Token::Month => write!(out, "{}", dt.month()),
        Token::MonthPadded => write!(out, "{:02}", dt.month()),
        Token::MonthNameShort => write!(out, "{}", &MONTH_NAMES[month0][..3]),
        Token::MonthName => write!(out, "{}", MONTH_NAMES[month0]),
        Token::YearShort => write!(out, "{:02}", dt.year().rem_euclid(100)),
        Token::Year => write!(out, "{:04}", dt.year()),
        Token::Hour12 => write!(out, "{}", hour12),
        Token::Hour12Padded => write!(out, "{:02}", hour12),
        Token::Hour24 => write!(out, "{}", dt.hour()),
        Token::Hour24Padded => write!(out, "{:02}", dt.hour()),
        Token::Minute => write!(out, "{}", dt.minute()),
        Token::MinutePadded => write!(out, "{:02}", dt.minute()),
        Token::Second => write!(out, "{}", dt.second()),
        Token::SecondPadded => write!(out, "{:02}", dt.second()),
        Token::Millis => write!(out, "{:03}", dt.timestamp_subsec_millis().min(999)),
        Token::Centis => write!(out, "{:02}", dt.timestamp_subsec_millis().min(999) / 10),
        Token::AmPmShortLower => write!(out, "{}", if pm { "p" } else { "a" }),
        Token::AmPmLower => write!(out, "{}", if pm { "pm" } else { "am" }),
        Token::AmPmShortUpper => write!(out, "{}", if pm { "P" } else { "A" }),
        Token::AmPmUpper => write!(out, "{}", if pm { "PM" } else { "AM" }),
        Token::DaySuffix => write!(out, "{}", day_suffix(dt.day())),
        Token::ZoneName => {
            if utc {
                write!(out, "UTC")
            } else {
                write!(out, "GMT{}", offset_string(dt.offset()))
            }
        }
        Token::ZoneOffset => write!(out, "{}", offset_string(dt.offset())),
        Token::ZoneOffsetColon => {
            let plain = offset_string(dt.offset());
            write!(out, "{}:{}", &plain[..3], &plain[3..])
        }
    };
}

fn day_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

/// `+hhmm` / `-hhmm`
fn offset_string(offset: &FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let minutes = secs.abs() / 60;
    format!("{}{:02}{:02}", sign, minutes / 60, minutes % 60)
}
