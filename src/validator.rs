//! Unified-schema validation: the last gate before a record is durable.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::errors::ValidationError;
use crate::models::{RawRecord, Source, UnifiedRecord};

const MAX_SYMBOL_LEN: usize = 20;
const MAX_NAME_LEN: usize = 100;

pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Validator
    }

    /// `row` must already have unified field names (post-`SchemaMapper::map_row`).
    pub fn validate(&self, source: Source, row: &RawRecord) -> Result<UnifiedRecord, ValidationError> {
        let symbol = require_string(row, "symbol")?;
        if symbol.len() > MAX_SYMBOL_LEN {
            return Err(ValidationError::InvalidField {
                field: "symbol".to_string(),
                reason: format!("must be at most {MAX_SYMBOL_LEN} characters"),
            });
        }

        let name = require_string(row, "name")?;
        if name.len() > MAX_NAME_LEN {
            return Err(ValidationError::InvalidField {
                field: "name".to_string(),
                reason: format!("must be at most {MAX_NAME_LEN} characters"),
            });
        }

        let price_usd = require_f64(row, "price_usd")?;
        if price_usd <= 0.0 {
            return Err(ValidationError::InvalidField {
                field: "price_usd".to_string(),
                reason: "must be strictly positive".to_string(),
            });
        }

        let volume_24h = require_f64(row, "volume_24h")?;
        if volume_24h < 0.0 {
            return Err(ValidationError::InvalidField {
                field: "volume_24h".to_string(),
                reason: "must be non-negative".to_string(),
            });
        }

        let market_cap = optional_f64(row, "market_cap");
        let percent_change_24h = optional_f64(row, "percent_change_24h");
        let timestamp = require_timestamp(row)?;

        Ok(UnifiedRecord {
            symbol,
            name,
            price_usd,
            volume_24h,
            market_cap,
            percent_change_24h,
            timestamp,
            source,
        })
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

fn require_string(row: &RawRecord, field: &str) -> Result<String, ValidationError> {
    match row.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(ValidationError::InvalidField {
            field: field.to_string(),
            reason: "expected a non-empty string".to_string(),
        }),
        None => Err(ValidationError::MissingField(field.to_string())),
    }
}

fn require_f64(row: &RawRecord, field: &str) -> Result<f64, ValidationError> {
    match row.get(field) {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| ValidationError::InvalidField {
            field: field.to_string(),
            reason: "not representable as f64".to_string(),
        }),
        Some(_) => Err(ValidationError::InvalidField {
            field: field.to_string(),
            reason: "expected a number".to_string(),
        }),
        None => Err(ValidationError::MissingField(field.to_string())),
    }
}

fn optional_f64(row: &RawRecord, field: &str) -> Option<f64> {
    row.get(field).and_then(Value::as_f64)
}

/// Accepts an ISO-8601 string or a numeric epoch-seconds value (fractional
/// part tolerated as sub-second precision).
fn require_timestamp(row: &RawRecord) -> Result<DateTime<Utc>, ValidationError> {
    match row.get("timestamp") {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| ValidationError::InvalidField {
                field: "timestamp".to_string(),
                reason: "not a valid ISO-8601 timestamp".to_string(),
            }),
        Some(Value::Number(n)) => {
            let seconds = n.as_f64().ok_or_else(|| ValidationError::InvalidField {
                field: "timestamp".to_string(),
                reason: "not representable as f64".to_string(),
            })?;
            let millis = (seconds * 1000.0).round() as i64;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| ValidationError::InvalidField {
                    field: "timestamp".to_string(),
                    reason: "epoch value out of range".to_string(),
                })
        }
        Some(_) => Err(ValidationError::InvalidField {
            field: "timestamp".to_string(),
            reason: "expected a string or number".to_string(),
        }),
        None => Err(ValidationError::MissingField("timestamp".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_row() -> RawRecord {
        serde_json::from_value(json!({
            "symbol": "BTC",
            "name": "Bitcoin",
            "price_usd": 65000.5,
            "volume_24h": 1.2e10,
            "market_cap": 1.3e12,
            "percent_change_24h": -2.1,
            "timestamp": "2024-03-01T12:00:00Z",
        }))
        .unwrap()
    }

    #[test]
    fn accepts_a_fully_populated_row() {
        let record = Validator::new().validate(Source::A, &valid_row()).unwrap();
        assert_eq!(record.symbol, "BTC");
        assert_eq!(record.market_cap, Some(1.3e12));
    }

    #[test]
    fn rejects_non_positive_price() {
        let mut row = valid_row();
        row.insert("price_usd".to_string(), json!(0.0));
        assert!(matches!(
            Validator::new().validate(Source::A, &row),
            Err(ValidationError::InvalidField { field, .. }) if field == "price_usd"
        ));
    }

    #[test]
    fn rejects_negative_volume() {
        let mut row = valid_row();
        row.insert("volume_24h".to_string(), json!(-1.0));
        assert!(Validator::new().validate(Source::A, &row).is_err());
    }

    #[test]
    fn accepts_epoch_seconds_with_fractional_millis() {
        let mut row = valid_row();
        row.insert("timestamp".to_string(), json!(1_709_294_400.5));
        let record = Validator::new().validate(Source::A, &row).unwrap();
        assert_eq!(record.timestamp.timestamp_millis(), 1_709_294_400_500);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let mut row = valid_row();
        row.remove("name");
        assert!(matches!(
            Validator::new().validate(Source::A, &row),
            Err(ValidationError::MissingField(field)) if field == "name"
        ));
    }

    #[test]
    fn market_cap_absent_is_none_not_zero() {
        let mut row = valid_row();
        row.remove("market_cap");
        let record = Validator::new().validate(Source::A, &row).unwrap();
        assert_eq!(record.market_cap, None);
    }

    #[test]
    fn symbol_over_twenty_chars_is_rejected() {
        let mut row = valid_row();
        row.insert("symbol".to_string(), json!("A".repeat(21)));
        assert!(matches!(
            Validator::new().validate(Source::A, &row),
            Err(ValidationError::InvalidField { field, .. }) if field == "symbol"
        ));
    }

    #[test]
    fn symbol_at_twenty_chars_is_accepted() {
        let mut row = valid_row();
        row.insert("symbol".to_string(), json!("A".repeat(20)));
        assert!(Validator::new().validate(Source::A, &row).is_ok());
    }

    #[test]
    fn name_over_one_hundred_chars_is_rejected() {
        let mut row = valid_row();
        row.insert("name".to_string(), json!("A".repeat(101)));
        assert!(matches!(
            Validator::new().validate(Source::A, &row),
            Err(ValidationError::InvalidField { field, .. }) if field == "name"
        ));
    }
}
