//! HTTP date handling: formatting for response headers and the access log, and lenient parsing
//! of `If-Modified-Since`.

use std::time::SystemTime;

use chrono::{
    DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use thiserror::Error;

/// Why an HTTP date could not be parsed.
#[derive(Debug, Error, PartialEq)]
pub enum DateError {
    #[error("expected 6 tokens, got {0}")]
    TokenCount(usize),
    #[error("expected hh:mm:ss, got {0} components")]
    TimeComponents(usize),
    #[error("unknown month `{0}'")]
    Month(String),
    #[error("invalid number `{0}'")]
    Number(String),
    #[error("unknown time zone `{0}'")]
    Zone(String),
    #[error("no such date or time")]
    OutOfRange,
}

/// Map a three-letter month abbreviation to 1-12, ignoring case. Unknown names map to 0.
pub fn month_number(name: &str) -> u32 {
    match name.to_ascii_uppercase().as_str() {
        "JAN" => 1,
        "FEB" => 2,
        "MAR" => 3,
        "APR" => 4,
        "MAY" => 5,
        "JUN" => 6,
        "JUL" => 7,
        "AUG" => 8,
        "SEP" => 9,
        "OCT" => 10,
        "NOV" => 11,
        "DEC" => 12,
        _ => 0,
    }
}

/// The zone named by the last token of an HTTP date.
#[derive(Debug, Clone, Copy)]
enum Zone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl Zone {
    /// `GMT`, `UTC`, `UT`, `Z`, a numeric offset like `+0100` or `-05:00`, or an IANA name like
    /// `Europe/Paris`.
    fn parse(token: &str) -> Option<Self> {
        if matches!(token, "GMT" | "UTC" | "UT" | "Z") {
            return FixedOffset::east_opt(0).map(Zone::Fixed);
        }
        let (sign, digits) = match token.as_bytes().first()? {
            b'+' => (1, &token[1..]),
            b'-' => (-1, &token[1..]),
            _ => return token.parse::<Tz>().ok().map(Zone::Named),
        };
        let digits = digits.replacen(':', "", 1);
        if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let hours: i32 = digits[..2].parse().ok()?;
        let minutes: i32 = digits[2..].parse().ok()?;
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).map(Zone::Fixed)
    }

    /// Place a wall-clock time in this zone. For an ambiguous time (clocks turned back) the
    /// earlier instant is used; a time skipped by the clocks does not exist.
    fn localize(self, datetime: &NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            Zone::Fixed(offset) => offset.from_local_datetime(datetime).earliest(),
            Zone::Named(tz) => tz
                .from_local_datetime(datetime)
                .earliest()
                .map(|local| local.with_timezone(&local.offset().fix())),
        }
    }
}

fn number<T: std::str::FromStr>(token: &str) -> Result<T, DateError> {
    token
        .parse()
        .map_err(|_| DateError::Number(token.to_string()))
}

/// Parse a date like `Sun, 06 Nov 1994 08:49:37 GMT`.
///
/// The weekday is not checked. The fields of the result are exactly the fields given, in the
/// zone named by the last token.
pub fn parse_http_date(value: &str) -> Result<DateTime<FixedOffset>, DateError> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    if tokens.len() != 6 {
        return Err(DateError::TokenCount(tokens.len()));
    }
    let hms: Vec<&str> = tokens[4].split(':').collect();
    if hms.len() != 3 {
        return Err(DateError::TimeComponents(hms.len()));
    }

    let month = match month_number(tokens[2]) {
        0 => return Err(DateError::Month(tokens[2].to_string())),
        month => month,
    };
    let day: u32 = number(tokens[1])?;
    let year: i32 = number(tokens[3])?;
    let (hour, minute, second): (u32, u32, u32) =
        (number(hms[0])?, number(hms[1])?, number(hms[2])?);
    let zone = Zone::parse(tokens[5]).ok_or_else(|| DateError::Zone(tokens[5].to_string()))?;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .and_then(|datetime| zone.localize(&datetime))
        .ok_or(DateError::OutOfRange)
}

/// Parse an `If-Modified-Since` value, falling back to the current time if it is malformed.
///
/// The fallback means a garbled header makes every resource look unmodified, so it is always
/// reported.
pub fn parse_if_modified_since(value: &str) -> DateTime<Utc> {
    match parse_http_date(value) {
        Ok(date) => date.with_timezone(&Utc),
        Err(e) => {
            tracing::warn!(header = value, "unparseable If-Modified-Since ({}), using now", e);
            Utc::now()
        }
    }
}

/// Truncate to whole seconds, the resolution of HTTP dates.
pub fn whole_seconds(date: DateTime<Utc>) -> DateTime<Utc> {
    date.with_nanosecond(0).unwrap_or(date)
}

/// RFC1123 formatted date.
pub struct HttpDate(pub SystemTime);

impl std::fmt::Display for HttpDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let datetime = DateTime::<Utc>::from(self.0);
        write!(f, "{}", datetime.format("%a, %d %b %Y %H:%M:%S GMT"))
    }
}

/// Common Log Format (CLF) formatted date, including the brackets.
pub struct ClfDate<Tz: TimeZone>(pub DateTime<Tz>);

impl<Tz: TimeZone> std::fmt::Display for ClfDate<Tz>
where
    Tz::Offset: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("[%d/%b/%Y:%H:%M:%S %z]"))
    }
}

impl ClfDate<Local> {
    /// The current local time.
    pub fn now() -> Self {
        Self(Local::now())
    }
}
