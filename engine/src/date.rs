//! Packed `YYYYMMDD` integer dates used by the ledger.
//!
//! The ledger stores transaction dates as a single integer such as `20241015`.
//! Decoding validates digit count, month and day so a malformed value turns
//! into [`Error::InvalidPackedDate`] instead of surfacing later as some
//! unrelated failure.

use crate::{error::Result, Error};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Smallest and largest eight-digit packed dates.
const MIN_PACKED: i64 = 10000101;
const MAX_PACKED: i64 = 99991231;

/// Decode a packed `YYYYMMDD` integer into a calendar date.
pub fn decode_packed_date(value: i64) -> Result<NaiveDate> {
    let invalid = |reason: String| Error::InvalidPackedDate { value, reason };

    if !(MIN_PACKED..=MAX_PACKED).contains(&value) {
        return Err(invalid(format!(
            "expected eight digits YYYYMMDD, got {} digits",
            digit_count(value)
        )));
    }

    let year = (value / 10_000) as i32;
    let month = ((value / 100) % 100) as u32;
    let day = (value % 100) as u32;

    if !(1..=12).contains(&month) {
        return Err(invalid(format!("month {month} out of range")));
    }

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| invalid(format!("day {day} out of range for {year:04}-{month:02}")))
}

/// Encode a calendar date as a packed `YYYYMMDD` integer.
///
/// Only years 1000 through 9999 fit in eight digits; other dates are
/// rejected so every encoded value decodes back to the same date.
pub fn encode_packed_date(date: NaiveDate) -> Result<i64> {
    let value =
        i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day());
    if !(MIN_PACKED..=MAX_PACKED).contains(&value) {
        return Err(Error::InvalidPackedDate {
            value,
            reason: format!("year {} does not fit in four digits", date.year()),
        });
    }
    Ok(value)
}

/// Earliest date a packed integer can carry.
pub fn earliest_packed_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1000, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn digit_count(value: i64) -> usize {
    value.unsigned_abs().to_string().len()
}

/// A calendar date that travels as a packed integer on the ledger wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackedDate(pub NaiveDate);

impl PackedDate {
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for PackedDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl TryFrom<i64> for PackedDate {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        decode_packed_date(value).map(Self)
    }
}

impl Serialize for PackedDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let value = encode_packed_date(self.0).map_err(serde::ser::Error::custom)?;
        serializer.serialize_i64(value)
    }
}

impl<'de> Deserialize<'de> for PackedDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        PackedDate::try_from(value).map_err(serde::de::Error::custom)
    }
}
