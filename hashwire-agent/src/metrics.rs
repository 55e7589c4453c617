//! Normalized telemetry records.
//!
//! A [`MetricsRecord`] is what one successful poll of one miner produces.
//! It is built by the device client and consumed unchanged by the uplink.

use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::types::HashRate;

/// Output names of the fields every record carries a dedicated slot for.
pub mod field {
    pub const HASHRATE: &str = "hashrate";
    pub const TEMPERATURE: &str = "temperature";
    pub const POWER: &str = "power";
    pub const SHARES_ACCEPTED: &str = "shares_accepted";
    pub const SHARES_REJECTED: &str = "shares_rejected";
    pub const BEST_DIFF: &str = "best_diff";

    pub const CORE: &[&str] = &[
        HASHRATE,
        TEMPERATURE,
        POWER,
        SHARES_ACCEPTED,
        SHARES_REJECTED,
        BEST_DIFF,
    ];
}

/// A single field value in a record's pass-through bag.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Text(String),
}

/// One snapshot of one miner at one poll time.
///
/// `hashrate` and `temperature_c` are always present; a device answer
/// without them is rejected before a record is built. Everything else is
/// optional and simply absent when the device does not report it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    /// Display label of the device, used as the `host` tag.
    pub label: String,

    /// When the poll completed. Non-decreasing per device.
    pub timestamp: OffsetDateTime,

    pub hashrate: HashRate,
    pub temperature_c: f64,
    pub power_w: Option<f64>,
    pub shares_accepted: Option<u64>,
    pub shares_rejected: Option<u64>,

    /// Best share difficulty, as the miner formats it (e.g. `"4.29G"`).
    pub best_difficulty: Option<String>,

    /// Additional fields keyed by their output field name.
    pub extra: BTreeMap<String, FieldValue>,
}
