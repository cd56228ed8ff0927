//! Fixed-point money conventions.
//!
//! Every financial quantity in the system is a `rust_decimal::Decimal` with a
//! fixed scale per field class. Floats never participate in a financial
//! calculation; conversion to `f64` happens only at the Prometheus / JSON
//! response boundary.

use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use thiserror::Error;

/// Scale for instrument prices.
pub const PRICE_SCALE: u32 = 8;
/// Scale for percentages (slippage, loss limits, deviations).
pub const PERCENT_SCALE: u32 = 4;
/// Scale for ZAR amounts.
pub const ZAR_SCALE: u32 = 2;
/// Scale for trust and confidence values.
pub const TRUST_SCALE: u32 = 4;

/// Quantize to the given scale using banker's rounding.
pub fn quantize(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven)
}

pub fn to_price(value: Decimal) -> Decimal {
    quantize(value, PRICE_SCALE)
}

pub fn to_percent(value: Decimal) -> Decimal {
    quantize(value, PERCENT_SCALE)
}

pub fn to_zar(value: Decimal) -> Decimal {
    quantize(value, ZAR_SCALE)
}

pub fn to_trust(value: Decimal) -> Decimal {
    quantize(value, TRUST_SCALE)
}

/// Canonical string form used for persistence and row hashing.
///
/// Trailing zeros are stripped and no exponent notation is ever produced, so
/// the same numeric value always renders to the same bytes regardless of the
/// scale it was computed at.
pub fn canonical_string(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Rejection reasons for a wire-level numeric field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecimalFieldError {
    /// A JSON float token was found where a decimal is required (AUD-001).
    #[error("float token is not a valid decimal field")]
    FloatToken,

    #[error("unparseable decimal literal: {0}")]
    Unparseable(String),

    #[error("expected a decimal string or integer")]
    WrongType,
}

/// Parse a wire-level JSON value into a `Decimal`.
///
/// Accepts decimal strings and integer tokens only. A float token is a hard
/// reject: the payload author has already lost precision and nothing
/// downstream can recover it.
pub fn decimal_from_wire(value: &Value) -> Result<Decimal, DecimalFieldError> {
    match value {
        Value::String(raw) => Decimal::from_str_exact(raw.trim())
            .map_err(|_| DecimalFieldError::Unparseable(raw.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Ok(Decimal::from(u))
            } else {
                Err(DecimalFieldError::FloatToken)
            }
        }
        _ => Err(DecimalFieldError::WrongType),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_bankers_rounding_at_midpoint() {
        // Ties round to even, both directions.
        assert_eq!(quantize(dec!(0.00005), 4), dec!(0.0000));
        assert_eq!(quantize(dec!(0.00015), 4), dec!(0.0002));
        assert_eq!(quantize(dec!(2.5), 0), dec!(2));
        assert_eq!(quantize(dec!(3.5), 0), dec!(4));
    }

    #[test]
    fn test_canonical_string_is_scale_independent() {
        assert_eq!(canonical_string(dec!(1850000.00)), "1850000");
        assert_eq!(canonical_string(dec!(0.0500)), "0.05");
        assert_eq!(canonical_string(dec!(1850000.00000000)), "1850000");
    }

    #[test]
    fn test_wire_decimal_accepts_strings_and_integers() {
        assert_eq!(
            decimal_from_wire(&json!("1850000.00")).unwrap(),
            dec!(1850000.00)
        );
        assert_eq!(decimal_from_wire(&json!(42)).unwrap(), dec!(42));
    }

    #[test]
    fn test_wire_decimal_rejects_float_tokens() {
        assert_eq!(
            decimal_from_wire(&json!(1850000.5)),
            Err(DecimalFieldError::FloatToken)
        );
        assert_eq!(
            decimal_from_wire(&json!(0.1)),
            Err(DecimalFieldError::FloatToken)
        );
    }

    #[test]
    fn test_wire_decimal_rejects_other_types() {
        assert_eq!(
            decimal_from_wire(&json!(null)),
            Err(DecimalFieldError::WrongType)
        );
        assert!(matches!(
            decimal_from_wire(&json!("not a number")),
            Err(DecimalFieldError::Unparseable(_))
        ));
    }
}
