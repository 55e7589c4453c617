//! Parsing of the miner's `/api/system/info` answer.
//!
//! The firmware returns one flat JSON object with a few dozen keys, most of
//! them optional and some of them firmware-version specific. Only
//! `hashRate` and `temp` are required. Known keys are renamed to the field
//! names the write endpoint expects; unknown numeric keys pass through under
//! their original name so newer firmware keeps reporting without a release
//! of the agent.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::PollError;
use crate::metrics::{FieldValue, MetricsRecord, field};
use crate::types::HashRate;

const HASHRATE_KEY: &str = "hashRate";
const TEMPERATURE_KEY: &str = "temp";
const POWER_KEY: &str = "power";
const SHARES_ACCEPTED_KEY: &str = "sharesAccepted";
const SHARES_REJECTED_KEY: &str = "sharesRejected";
const BEST_DIFF_KEY: &str = "bestDiff";
const HOSTNAME_KEY: &str = "hostname";

/// How a known device key is converted into an output field.
#[derive(Debug, Clone, Copy)]
enum Conversion {
    Float,
    /// GH/s in, H/s out.
    HashRate,
    Integer,
    Text,
}

/// Optional keys with a fixed output name: (device key, field, conversion).
const MAPPED_FIELDS: &[(&str, &str, Conversion)] = &[
    ("hashRate_1m", "hashrate_1m", Conversion::HashRate),
    ("hashRate_10m", "hashrate_10m", Conversion::HashRate),
    ("hashRate_1h", "hashrate_1h", Conversion::HashRate),
    ("vrTemp", "vr_temperature", Conversion::Float),
    ("voltage", "voltage", Conversion::Float),
    ("current", "current", Conversion::Float),
    ("coreVoltage", "core_voltage", Conversion::Float),
    ("coreVoltageActual", "core_voltage_actual", Conversion::Float),
    ("fanrpm", "fan_rpm", Conversion::Float),
    ("fanspeed", "fan_speed", Conversion::Float),
    ("bestSessionDiff", "best_session_diff", Conversion::Text),
    ("poolDifficulty", "pool_difficulty", Conversion::Float),
    ("frequency", "frequency", Conversion::Float),
    ("uptimeSeconds", "uptime", Conversion::Integer),
    ("freeHeap", "free_heap", Conversion::Integer),
    ("ASICModel", "asic_model", Conversion::Text),
    ("boardVersion", "board_version", Conversion::Text),
    ("version", "firmware_version", Conversion::Text),
];

/// Keys consumed into dedicated [`SystemInfo`] fields.
const CORE_KEYS: &[&str] = &[
    HASHRATE_KEY,
    TEMPERATURE_KEY,
    POWER_KEY,
    SHARES_ACCEPTED_KEY,
    SHARES_REJECTED_KEY,
    BEST_DIFF_KEY,
    HOSTNAME_KEY,
];

/// A validated device answer, not yet tied to a target or a poll time.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemInfo {
    pub hostname: Option<String>,
    pub hashrate: HashRate,
    pub temperature_c: f64,
    pub power_w: Option<f64>,
    pub shares_accepted: Option<u64>,
    pub shares_rejected: Option<u64>,
    pub best_difficulty: Option<String>,
    pub extra: BTreeMap<String, FieldValue>,
}

impl SystemInfo {
    /// Parse a raw response body.
    pub fn from_json(body: &[u8]) -> Result<Self, PollError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| PollError::ParseError(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Validate and normalize an already-decoded body.
    pub fn from_value(value: Value) -> Result<Self, PollError> {
        let Value::Object(map) = value else {
            return Err(PollError::ParseError(
                "status body is not a JSON object".to_string(),
            ));
        };

        let hashrate = required_number(&map, HASHRATE_KEY)?;
        let temperature_c = required_number(&map, TEMPERATURE_KEY)?;

        let mut extra = BTreeMap::new();
        for (key, name, conversion) in MAPPED_FIELDS {
            if let Some(value) = map.get(*key).and_then(|v| convert(v, *conversion)) {
                extra.insert((*name).to_string(), value);
            }
        }
        for (key, value) in &map {
            if CORE_KEYS.contains(&key.as_str()) || is_mapped(key) || is_output_name(key) {
                continue;
            }
            if let Some(number) = passthrough_number(value) {
                extra.insert(key.clone(), number);
            }
        }

        Ok(Self {
            hostname: map
                .get(HOSTNAME_KEY)
                .and_then(Value::as_str)
                .map(str::to_string),
            hashrate: HashRate::from_gigahashes(hashrate),
            temperature_c,
            power_w: map.get(POWER_KEY).and_then(Value::as_f64),
            shares_accepted: map.get(SHARES_ACCEPTED_KEY).and_then(as_count),
            shares_rejected: map.get(SHARES_REJECTED_KEY).and_then(as_count),
            best_difficulty: map.get(BEST_DIFF_KEY).and_then(as_text),
            extra,
        })
    }

    /// Stamp the answer with its device label and poll time.
    pub fn into_record(self, label: String, timestamp: OffsetDateTime) -> MetricsRecord {
        MetricsRecord {
            label,
            timestamp,
            hashrate: self.hashrate,
            temperature_c: self.temperature_c,
            power_w: self.power_w,
            shares_accepted: self.shares_accepted,
            shares_rejected: self.shares_rejected,
            best_difficulty: self.best_difficulty,
            extra: self.extra,
        }
    }
}

fn required_number(map: &Map<String, Value>, key: &str) -> Result<f64, PollError> {
    match map.get(key) {
        None | Some(Value::Null) => Err(PollError::ParseError(format!(
            "missing required field `{key}`"
        ))),
        Some(value) => value.as_f64().ok_or_else(|| {
            PollError::ParseError(format!("field `{key}` is not a number: {value}"))
        }),
    }
}

fn is_mapped(key: &str) -> bool {
    MAPPED_FIELDS.iter().any(|(device_key, _, _)| *device_key == key)
}

/// A raw key spelled like a normalized field would shadow it on the wire.
fn is_output_name(key: &str) -> bool {
    field::CORE.contains(&key) || MAPPED_FIELDS.iter().any(|(_, name, _)| *name == key)
}

fn convert(value: &Value, conversion: Conversion) -> Option<FieldValue> {
    match conversion {
        Conversion::Float => value.as_f64().map(FieldValue::Float),
        Conversion::HashRate => value
            .as_f64()
            .map(|ghs| FieldValue::Float(HashRate::from_gigahashes(ghs).as_hashes())),
        Conversion::Integer => as_integer(value).map(FieldValue::Integer),
        Conversion::Text => as_text(value).map(FieldValue::Text),
    }
}

fn passthrough_number(value: &Value) -> Option<FieldValue> {
    let Value::Number(number) = value else {
        return None;
    };
    number
        .as_i64()
        .map(FieldValue::Integer)
        .or_else(|| number.as_f64().map(FieldValue::Float))
}

/// Integers, tolerating firmware that encodes them as `12.0`.
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i64)
    })
}

fn as_count(value: &Value) -> Option<u64> {
    as_integer(value).and_then(|i| u64::try_from(i).ok())
}

/// Strings as-is; numbers rendered, since some firmware sends `bestDiff`
/// as a bare number.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn minimal_answer_has_only_required_fields() {
        let info = SystemInfo::from_value(json!({"hashRate": 523.4, "temp": 54.2})).unwrap();

        assert!((info.hashrate.as_gigahashes() - 523.4).abs() < 1e-9);
        assert_eq!(info.temperature_c, 54.2);
        assert_eq!(info.power_w, None);
        assert_eq!(info.shares_accepted, None);
        assert_eq!(info.shares_rejected, None);
        assert_eq!(info.best_difficulty, None);
        assert_eq!(info.hostname, None);
        assert!(info.extra.is_empty());
    }

    #[test]
    fn full_answer_maps_known_keys() {
        let info = SystemInfo::from_value(json!({
            "hostname": "bitaxe-garage",
            "hashRate": 1100.5,
            "hashRate_1m": 1000.0,
            "temp": 61.0,
            "vrTemp": 48.5,
            "power": 17.9,
            "sharesAccepted": 4021,
            "sharesRejected": 3,
            "bestDiff": "4.29G",
            "bestSessionDiff": 12345,
            "uptimeSeconds": 86400.0,
            "ASICModel": "BM1370",
            "version": "v2.4.2",
        }))
        .unwrap();

        assert_eq!(info.hostname.as_deref(), Some("bitaxe-garage"));
        assert_eq!(info.power_w, Some(17.9));
        assert_eq!(info.shares_accepted, Some(4021));
        assert_eq!(info.shares_rejected, Some(3));
        assert_eq!(info.best_difficulty.as_deref(), Some("4.29G"));
        assert_eq!(info.extra["hashrate_1m"], FieldValue::Float(1000.0e9));
        assert_eq!(info.extra["vr_temperature"], FieldValue::Float(48.5));
        assert_eq!(info.extra["best_session_diff"], FieldValue::Text("12345".into()));
        assert_eq!(info.extra["uptime"], FieldValue::Integer(86400));
        assert_eq!(info.extra["asic_model"], FieldValue::Text("BM1370".into()));
        assert_eq!(info.extra["firmware_version"], FieldValue::Text("v2.4.2".into()));
        assert!(!info.extra.contains_key("hashRate_1m"));
        assert!(!info.extra.contains_key("hostname"));
    }

    #[test]
    fn unknown_numeric_keys_pass_through_verbatim() {
        let info = SystemInfo::from_value(json!({
            "hashRate": 500.0,
            "temp": 50.0,
            "overheat_mode": 0,
            "expectedHashrate": 510.25,
            "ssid": "home-wifi",
            "isUsingFallbackStratum": false,
        }))
        .unwrap();

        assert_eq!(info.extra["overheat_mode"], FieldValue::Integer(0));
        assert_eq!(info.extra["expectedHashrate"], FieldValue::Float(510.25));
        assert!(!info.extra.contains_key("ssid"));
        assert!(!info.extra.contains_key("isUsingFallbackStratum"));
    }

    #[test]
    fn missing_temperature_is_a_parse_error() {
        let err = SystemInfo::from_value(json!({"hashRate": 500.0})).unwrap_err();
        assert!(matches!(err, PollError::ParseError(ref msg) if msg.contains("temp")));
    }

    #[test]
    fn missing_hashrate_is_a_parse_error() {
        let err = SystemInfo::from_value(json!({"temp": 50.0, "power": 15.0})).unwrap_err();
        assert!(matches!(err, PollError::ParseError(ref msg) if msg.contains("hashRate")));
    }

    #[test]
    fn non_numeric_required_field_is_a_parse_error() {
        let err = SystemInfo::from_value(json!({"hashRate": "fast", "temp": 50.0})).unwrap_err();
        assert!(matches!(err, PollError::ParseError(_)));
    }

    #[test]
    fn non_object_body_is_a_parse_error() {
        assert!(matches!(
            SystemInfo::from_json(b"[1, 2, 3]"),
            Err(PollError::ParseError(_))
        ));
        assert!(matches!(
            SystemInfo::from_json(b"<html>busy</html>"),
            Err(PollError::ParseError(_))
        ));
    }

    #[test]
    fn negative_share_counts_are_dropped() {
        let info = SystemInfo::from_value(json!({
            "hashRate": 500.0,
            "temp": 50.0,
            "sharesAccepted": -1,
        }))
        .unwrap();
        assert_eq!(info.shares_accepted, None);
    }

    #[test]
    fn raw_keys_never_shadow_normalized_fields() {
        let info = SystemInfo::from_json(
            br#"{"hashRate":500,"temp":50,"temperature":99,"hashRate_1m":1,"hashrate_1m":7}"#,
        )
        .unwrap();

        assert_eq!(info.temperature_c, 50.0);
        assert!(!info.extra.contains_key("temperature"));
        assert_eq!(info.extra["hashrate_1m"], FieldValue::Float(1e9));
        assert_eq!(info.extra.len(), 1);
    }

    #[test]
    fn same_body_gives_same_values() {
        let body = br#"{"hashRate": 523.4, "temp": 54.2, "sharesAccepted": 7, "foo": 1.5}"#;
        let first = SystemInfo::from_json(body).unwrap();
        let second = SystemInfo::from_json(body).unwrap();
        assert_eq!(first, second);
    }
}
