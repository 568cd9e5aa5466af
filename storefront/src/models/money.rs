// storefront/src/models/money.rs

use serde::{Deserialize, Serialize};

/// Amount in minor units of an ISO-4217 currency, as exposed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
  pub value: i64,
  pub currency: String,
}

impl Money {
  pub fn new(value: i64, currency: impl Into<String>) -> Self {
    Self {
      value,
      currency: currency.into(),
    }
  }
}

/// Number of decimal digits between the minor and the major unit.
pub fn currency_exponent(currency: &str) -> u32 {
  match currency.to_ascii_uppercase().as_str() {
    "JPY" | "KRW" | "VND" | "CLP" | "ISK" => 0,
    "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
    _ => 2,
  }
}

/// Whole major units, or `None` when the amount has a fractional part. The
/// form-post gateways only accept integral amounts.
pub fn to_whole_major_units(minor: i64, currency: &str) -> Option<i64> {
  let factor = 10_i64.pow(currency_exponent(currency));
  (minor % factor == 0).then_some(minor / factor)
}

pub fn from_major_units(major: i64, currency: &str) -> i64 {
  major * 10_i64.pow(currency_exponent(currency))
}

/// Parses a gateway-reported major-unit amount (`"360"`, `"360.00"`) into minor
/// units. `None` when it is not a plain decimal or carries more precision than
/// the currency has.
pub fn parse_major_units(reported: &str, currency: &str) -> Option<i64> {
  let exp = currency_exponent(currency) as usize;
  let reported = reported.trim();
  let (whole, frac) = reported.split_once('.').unwrap_or((reported, ""));
  if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  let significant = frac.trim_end_matches('0');
  if significant.len() > exp {
    return None;
  }
  let frac_minor = if exp == 0 {
    0
  } else {
    format!("{:0<width$}", significant, width = exp).parse::<i64>().ok()?
  };
  whole
    .parse::<i64>()
    .ok()?
    .checked_mul(10_i64.pow(exp as u32))?
    .checked_add(frac_minor)
}

/// Decimal string such as `"360.00"`, used by REST gateways.
pub fn to_decimal_string(minor: i64, currency: &str) -> String {
  let exp = currency_exponent(currency);
  if exp == 0 {
    return minor.to_string();
  }
  let factor = 10_i64.pow(exp);
  let sign = if minor < 0 { "-" } else { "" };
  let abs = minor.abs();
  format!("{}{}.{:0width$}", sign, abs / factor, abs % factor, width = exp as usize)
}

/// `amount * bps / 10_000`, rounded half-up.
pub fn apply_basis_points(amount: i64, bps: i32) -> i64 {
  let product = amount as i128 * bps as i128;
  ((product + 5_000) / 10_000) as i64
}
