//! Slippage guard for operator approvals.
//!
//! An approval is only as good as the price it was requested at. The guard
//! measures how far the market has drifted since the request and refuses the
//! approval with SEC-050 once the drift exceeds the threshold.

use crate::domain::errors::HitlError;
use crate::domain::money::{self, PERCENT_SCALE};
use rust_decimal::Decimal;

pub struct SlippageGuard {
    max_deviation_pct: Decimal,
}

impl SlippageGuard {
    pub fn new(max_deviation_pct: Decimal) -> Self {
        Self { max_deviation_pct }
    }

    /// deviation_pct = |current - request| / request x 100.
    ///
    /// Returns the deviation when acceptable, SEC-050 when exceeded.
    pub fn validate(
        &self,
        request_price: Decimal,
        current_price: Decimal,
    ) -> Result<Decimal, HitlError> {
        let deviation_pct = money::quantize(
            ((current_price - request_price) / request_price).abs() * Decimal::ONE_HUNDRED,
            PERCENT_SCALE,
        );

        if deviation_pct > self.max_deviation_pct {
            return Err(HitlError::SlippageExceeded {
                deviation_pct,
                threshold_pct: self.max_deviation_pct,
            });
        }
        Ok(deviation_pct)
    }
}
