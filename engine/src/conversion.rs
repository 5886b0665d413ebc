//! Conversion between points and minor currency units.
//!
//! # Rounding
//!
//! Both directions round to the nearest integer with ties going to the even
//! neighbour (banker's rounding). Plain half-up rounding biases every tie in
//! the same direction, so a balance that is pushed and pulled repeatedly drifts;
//! half-to-even spreads ties evenly in both directions.
//!
//! # Sign convention
//!
//! Points earned map to positive amounts (deposits into the member's ledger
//! account); points spent map to negative amounts (withdrawals). The reverse
//! direction uses the same convention.

use crate::{error::Result, Error, MinorUnits, Points};
use serde::{Deserialize, Serialize};

/// Largest number of fractional digits accepted in a decimal rate.
const MAX_RATE_SCALE: u32 = 9;

/// Exchange rate expressed as `minor_units` per `points` points.
///
/// The fraction is kept reduced, so `ConversionRate::new(20, 2)` and
/// `ConversionRate::new(10, 1)` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRate {
    minor_units: i64,
    points: i64,
}

impl ConversionRate {
    /// Create a rate of `minor_units` per `points` points. Both must be positive.
    pub fn new(minor_units: i64, points: i64) -> Result<Self> {
        if minor_units <= 0 || points <= 0 {
            return Err(Error::InvalidRate(format!(
                "rate must be positive, got {minor_units}/{points}"
            )));
        }
        let divisor = gcd(minor_units, points);
        Ok(Self {
            minor_units: minor_units / divisor,
            points: points / divisor,
        })
    }

    /// Parse a decimal major-unit rate, e.g. `"0.10"` currency per point.
    ///
    /// `currency_exponent` is the number of minor units digits of the currency
    /// (2 for USD), so `"0.10"` with exponent 2 is 10 minor units per point.
    pub fn from_decimal(text: &str, currency_exponent: u32) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidRate(format!("{reason}: {text:?}"));

        let trimmed = text.trim();
        let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
        if unsigned.starts_with('-') {
            return Err(invalid("rate must be positive"));
        }

        let (whole, fraction) = match unsigned.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (unsigned, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("empty rate"));
        }
        if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid("rate is not a decimal number"));
        }

        let scale = fraction.len() as u32;
        if scale > MAX_RATE_SCALE {
            return Err(invalid("rate has too many decimal places"));
        }

        let digits: i64 = format!("{whole}{fraction}")
            .parse()
            .map_err(|_| invalid("rate is out of range"))?;

        let (minor_units, points) = if currency_exponent >= scale {
            let factor = checked_pow10(currency_exponent - scale)
                .ok_or_else(|| invalid("rate is out of range"))?;
            let minor = digits
                .checked_mul(factor)
                .ok_or_else(|| invalid("rate is out of range"))?;
            (minor, 1)
        } else {
            let per = checked_pow10(scale - currency_exponent)
                .ok_or_else(|| invalid("rate is out of range"))?;
            (digits, per)
        };

        Self::new(minor_units, points)
    }

    /// Minor units per [`points_per_unit`](Self::points_per_unit) points.
    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// Points denominator of the reduced fraction.
    pub fn points_per_unit(&self) -> i64 {
        self.points
    }
}

impl std::fmt::Display for ConversionRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} minor/{} pts", self.minor_units, self.points)
    }
}

/// Convert a point delta to minor currency units, rounding half-to-even.
pub fn points_to_amount(points: Points, rate: &ConversionRate) -> Result<MinorUnits> {
    let numerator = i128::from(points) * i128::from(rate.minor_units);
    let amount = div_round_half_even(numerator, i128::from(rate.points));
    i64::try_from(amount).map_err(|_| Error::AmountOverflow(points))
}

/// Convert minor currency units to points, rounding half-to-even.
pub fn amount_to_points(amount: MinorUnits, rate: &ConversionRate) -> Result<Points> {
    let numerator = i128::from(amount) * i128::from(rate.points);
    let points = div_round_half_even(numerator, i128::from(rate.minor_units));
    i64::try_from(points).map_err(|_| Error::AmountOverflow(amount))
}

/// Division rounding to the nearest integer, ties to even. `denominator > 0`.
fn div_round_half_even(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator.div_euclid(denominator);
    let remainder = numerator.rem_euclid(denominator);
    match (remainder * 2).cmp(&denominator) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal if quotient % 2 == 0 => quotient,
        std::cmp::Ordering::Equal => quotient + 1,
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn checked_pow10(exp: u32) -> Option<i64> {
    10i64.checked_pow(exp)
}

/// Currency of the ledger accounts. Only used to render amounts for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Currency {
    /// ISO 4217 style code, e.g. `USD`
    pub code: String,
    /// Number of minor unit digits, e.g. 2 for cents
    pub exponent: u32,
}

impl Currency {
    /// Create a currency, validating the code and exponent.
    pub fn new(code: impl Into<String>, exponent: u32) -> Result<Self> {
        let code = code.into().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::InvalidCurrency(format!(
                "code must be three letters, got {code:?}"
            )));
        }
        if exponent > 6 {
            return Err(Error::InvalidCurrency(format!(
                "exponent {exponent} is larger than 6"
            )));
        }
        Ok(Self { code, exponent })
    }

    /// Render minor units as a decimal amount, e.g. `150` -> `"1.50 USD"`.
    pub fn format(&self, amount: MinorUnits) -> String {
        let sign = if amount < 0 { "-" } else { "" };
        let magnitude = amount.unsigned_abs();
        if self.exponent == 0 {
            return format!("{sign}{magnitude} {}", self.code);
        }
        let scale = 10u64.pow(self.exponent);
        format!(
            "{sign}{}.{:0width$} {}",
            magnitude / scale,
            magnitude % scale,
            self.code,
            width = self.exponent as usize
        )
    }
}
