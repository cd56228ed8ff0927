//! Inbound trading signals.
//!
//! A signal is immutable after insert. Wire parsing is strict: every numeric
//! field must arrive as a decimal string or integer token; float tokens are a
//! hard AUD-001 reject before anything is persisted.

use crate::domain::errors::IngressError;
use crate::domain::money::{self, DecimalFieldError};
use crate::domain::orders::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const DEFAULT_SOURCE: &str = "tradingview";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub correlation_id: Uuid,
    pub source: String,
    pub external_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    /// Protective stop supplied by the strategy, if any.
    pub stop_price: Option<Decimal>,
    /// Average true range at signal time, if supplied.
    pub atr: Option<Decimal>,
    /// Advisory model confidence in [0,1]. Informational only: it can veto
    /// through the trust gate but never authorizes a trade.
    pub advisory_confidence: Option<Decimal>,
    pub received_at: DateTime<Utc>,
}

impl Signal {
    /// Parse a raw webhook body into a typed signal.
    ///
    /// The HMAC signature must already have been verified over these exact
    /// bytes; parsing never runs on unauthenticated input.
    pub fn parse(correlation_id: Uuid, raw: &[u8]) -> Result<Self, IngressError> {
        let body: Value =
            serde_json::from_slice(raw).map_err(|e| IngressError::MalformedBody {
                reason: e.to_string(),
            })?;

        let obj = body.as_object().ok_or_else(|| IngressError::MalformedBody {
            reason: "body is not a JSON object".to_string(),
        })?;

        let symbol = required_str(obj, "symbol")?;
        let side: OrderSide = required_str(obj, "side")?
            .parse()
            .map_err(|reason| IngressError::MalformedBody { reason })?;
        let external_id = required_str(obj, "external_id")?;
        let source = match obj.get("source") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => DEFAULT_SOURCE.to_string(),
        };

        let price = required_decimal(obj, "price")?;
        let stop_price = optional_decimal(obj, "stop_price")?;
        let atr = optional_decimal(obj, "atr")?;
        let advisory_confidence = optional_decimal(obj, "confidence")?;

        if price <= Decimal::ZERO {
            return Err(IngressError::MalformedBody {
                reason: "price must be positive".to_string(),
            });
        }

        Ok(Signal {
            correlation_id,
            source,
            external_id,
            symbol,
            side,
            price: money::to_price(price),
            stop_price: stop_price.map(money::to_price),
            atr: atr.map(money::to_price),
            advisory_confidence: advisory_confidence.map(money::to_trust),
            received_at: Utc::now(),
        })
    }
}

fn required_str(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<String, IngressError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(IngressError::MalformedBody {
            reason: format!("field '{field}' must be a non-empty string"),
        }),
        None => Err(IngressError::MalformedBody {
            reason: format!("missing field '{field}'"),
        }),
    }
}

fn required_decimal(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Decimal, IngressError> {
    let value = obj.get(field).ok_or_else(|| IngressError::MalformedBody {
        reason: format!("missing field '{field}'"),
    })?;
    parse_decimal_field(value, field)
}

fn optional_decimal(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<Decimal>, IngressError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_decimal_field(value, field).map(Some),
    }
}

fn parse_decimal_field(value: &Value, field: &str) -> Result<Decimal, IngressError> {
    money::decimal_from_wire(value).map_err(|e| match e {
        DecimalFieldError::FloatToken => IngressError::FloatField {
            field: field.to_string(),
        },
        other => IngressError::MalformedBody {
            reason: format!("field '{field}': {other}"),
        },
    })
}
