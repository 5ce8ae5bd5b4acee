//! Calendar-day keys shared by both sides of every date comparison.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DayError {
    #[error("date value is empty")]
    Empty,
    #[error("unrecognized date value `{value}`")]
    Unrecognized { value: String },
    #[error("`{value}` falls outside the supported calendar range")]
    OutOfRange { value: String },
}

/// A date truncated to year-month-day, rendered as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CalendarDay(Date);

impl CalendarDay {
    #[must_use]
    pub fn from_date(date: Date) -> Self {
        Self(date)
    }

    #[must_use]
    pub fn date(self) -> Date {
        self.0
    }

    /// Parse a strict `YYYY-MM-DD` key.
    ///
    /// # Errors
    /// Returns [`DayError`] when the input is blank or not a calendar date.
    pub fn parse(value: &str) -> Result<Self, DayError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DayError::Empty);
        }
        parse_date_only(trimmed)
            .map(Self)
            .ok_or_else(|| DayError::Unrecognized { value: value.to_string() })
    }
}

impl Display for CalendarDay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.0.year(), u8::from(self.0.month()), self.0.day())
    }
}

impl FromStr for CalendarDay {
    type Err = DayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl Serialize for CalendarDay {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CalendarDay {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Turns raw date attributes into [`CalendarDay`] keys under one fixed offset.
///
/// Date-only values are taken as-is. Date-times are shifted into the normalizer's
/// offset before truncation, so the same instant always lands on the same day no
/// matter which offset the remote store rendered it in.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DayNormalizer {
    offset: UtcOffset,
}

impl DayNormalizer {
    #[must_use]
    pub const fn utc() -> Self {
        Self { offset: UtcOffset::UTC }
    }

    #[must_use]
    pub const fn with_offset(offset: UtcOffset) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(&self) -> UtcOffset {
        self.offset
    }

    /// # Errors
    /// Returns [`DayError`] when `raw` is blank or neither a `YYYY-MM-DD` date nor an
    /// RFC 3339 timestamp.
    pub fn normalize(&self, raw: &str) -> Result<CalendarDay, DayError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DayError::Empty);
        }

        if let Some(date) = parse_date_only(trimmed) {
            return Ok(CalendarDay(date));
        }

        let instant = OffsetDateTime::parse(trimmed, &Rfc3339)
            .map_err(|_| DayError::Unrecognized { value: raw.to_string() })?;
        self.day_of(instant)
    }

    /// # Errors
    /// Returns [`DayError::OutOfRange`] when shifting `instant` into the offset
    /// leaves the representable date range.
    pub fn day_of(&self, instant: OffsetDateTime) -> Result<CalendarDay, DayError> {
        instant
            .checked_to_offset(self.offset)
            .map(|shifted| CalendarDay(shifted.date()))
            .ok_or_else(|| DayError::OutOfRange { value: instant.to_string() })
    }
}

impl Default for DayNormalizer {
    fn default() -> Self {
        Self::utc()
    }
}

fn parse_date_only(value: &str) -> Option<Date> {
    if value.len() != 10 {
        return None;
    }
    Date::parse(value, format_description!("[year]-[month]-[day]")).ok()
}
