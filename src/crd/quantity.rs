//! Kubernetes resource quantity syntax
//!
//! Accepts `<sign><number><suffix>` where the suffix is a binary SI unit
//! (Ki..Ei), a decimal SI unit (n, u, m, k, M..E) or a decimal exponent
//! (`e3`, `E-2`). Values are passed through to the API server verbatim and
//! compared by amount when read back.

use thiserror::Error;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 10),
    ("Mi", 20),
    ("Gi", 30),
    ("Ti", 40),
    ("Pi", 50),
    ("Ei", 60),
];
const DECIMAL_SUFFIXES: [(&str, i32); 9] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Reasons a quantity string is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    /// Empty string or no leading number
    #[error("quantities must match the regular expression '^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$'")]
    FormatWrong,

    /// The numeric part has more than one decimal point or no digits
    #[error("unable to parse numeric part of quantity")]
    Numeric,

    /// Unknown unit suffix
    #[error("unable to parse quantity's suffix")]
    Suffix,
}

/// Multiplier named by the suffix: a power of two or a power of ten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    Binary(u32),
    Decimal(i32),
}

struct Quantity<'a> {
    negative: bool,
    number: &'a str,
    scale: Scale,
}

/// Check that `value` is a well-formed quantity (e.g. "500m", "1.5", "512Mi", "1e3")
pub fn validate_quantity(value: &str) -> Result<(), QuantityError> {
    parse(value).map(|_| ())
}

/// True when `a` and `b` denote the same amount
///
/// The API server stores quantities in canonical form ("0.5" comes back as
/// "500m", "1000m" as "1"), so desired and observed values are compared by
/// value. Strings that are not quantities only match themselves.
pub fn same_quantity(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (nanos(a), nanos(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn parse(value: &str) -> Result<Quantity<'_>, QuantityError> {
    let (negative, unsigned) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };

    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    if number_len == 0 {
        return Err(QuantityError::FormatWrong);
    }

    let (number, suffix) = unsigned.split_at(number_len);
    if number.matches('.').count() > 1 || !number.chars().any(|c| c.is_ascii_digit()) {
        return Err(QuantityError::Numeric);
    }

    Ok(Quantity {
        negative,
        number,
        scale: parse_suffix(suffix)?,
    })
}

fn parse_suffix(suffix: &str) -> Result<Scale, QuantityError> {
    if suffix.is_empty() {
        return Ok(Scale::Decimal(0));
    }
    if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Ok(Scale::Binary(*power));
    }
    if let Some((_, power)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Ok(Scale::Decimal(*power));
    }

    let exponent = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))
        .ok_or(QuantityError::Suffix)?;
    let digits = exponent
        .strip_prefix('+')
        .or_else(|| exponent.strip_prefix('-'))
        .unwrap_or(exponent);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(QuantityError::Suffix);
    }
    exponent
        .parse::<i32>()
        .map(Scale::Decimal)
        .map_err(|_| QuantityError::Suffix)
}

/// Value in units of 10^-9, rounded up; `None` when malformed or out of range
fn nanos(value: &str) -> Option<i128> {
    let quantity = parse(value).ok()?;
    let (int_part, frac_part) = quantity.number.split_once('.').unwrap_or((quantity.number, ""));

    let mut mantissa: i128 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        mantissa = mantissa
            .checked_mul(10)?
            .checked_add(i128::from(c.to_digit(10)?))?;
    }

    let (binary, exp10) = match quantity.scale {
        Scale::Binary(power) => (1i128 << power, 0),
        Scale::Decimal(power) => (1, power),
    };
    let value = mantissa.checked_mul(binary)?;
    let frac_len = i32::try_from(frac_part.len()).ok()?;
    let shift = exp10.checked_add(9)?.checked_sub(frac_len)?;

    let value = if shift >= 0 {
        value.checked_mul(10i128.checked_pow(shift.unsigned_abs())?)?
    } else {
        let divisor = 10i128.checked_pow(shift.unsigned_abs())?;
        value.checked_add(divisor - 1)? / divisor
    };
    Some(if quantity.negative { -value } else { value })
}
