//! Miner polling.
//!
//! A [`DeviceTarget`] is one configured miner plus the bookkeeping the
//! scheduler keeps about it. A [`Poller`] turns a target into either a
//! [`MetricsRecord`] or a [`PollError`], updating the target on the way.
//!
//! Each target is only ever handed to one poll at a time (the scheduler
//! borrows it mutably for the duration of the poll), so target state needs
//! no locking.

mod client;
mod info;

pub use client::DeviceClient;
pub use info::SystemInfo;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::metrics::MetricsRecord;
use crate::types::sanitize_miner_name;

/// Path of the status document on the miner's built-in web server.
pub const STATUS_PATH: &str = "/api/system/info";

/// Produces one record per call for a target.
///
/// Implementations must update the target through
/// [`DeviceTarget::record_success`] or [`DeviceTarget::record_failure`]
/// before returning, and must not retry internally; the next tick is the
/// retry.
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self, target: &mut DeviceTarget) -> Result<MetricsRecord, PollError>;
}

/// Why a poll produced no record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// Connection refused, DNS failure, reset mid-request.
    #[error("device unreachable: {0}")]
    Unreachable(String),

    /// No complete answer within the per-poll timeout.
    #[error("no answer within {0:?}")]
    TimedOut(std::time::Duration),

    /// The device answered with a non-2xx status.
    #[error("device answered HTTP {0}")]
    BadResponse(u16),

    /// The body was not JSON, or lacked `hashRate`/`temp`.
    #[error("unusable status body: {0}")]
    ParseError(String),
}

/// Coarse classification of a [`PollError`], for summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PollErrorKind {
    Unreachable,
    Timeout,
    BadResponse,
    ParseError,
}

impl PollError {
    pub fn kind(&self) -> PollErrorKind {
        match self {
            PollError::Unreachable(_) => PollErrorKind::Unreachable,
            PollError::TimedOut(_) => PollErrorKind::Timeout,
            PollError::BadResponse(_) => PollErrorKind::BadResponse,
            PollError::ParseError(_) => PollErrorKind::ParseError,
        }
    }
}

/// One configured miner and what the agent knows about it.
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    /// Host or host:port, without scheme.
    address: String,

    /// Operator-chosen name, already sanitized. Wins over everything.
    name: Option<String>,

    /// Sanitized hostname from the first answer that carried one.
    hostname: Option<String>,

    consecutive_failures: u32,
    last_success: Option<OffsetDateTime>,
    last_error: Option<PollError>,

    /// Timestamp of the last record produced, to keep timestamps monotonic.
    last_record_at: Option<OffsetDateTime>,
}

impl DeviceTarget {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            hostname: None,
            consecutive_failures: 0,
            last_success: None,
            last_error: None,
            last_record_at: None,
        }
    }

    /// Attach an operator-chosen name. Names that sanitize to nothing are
    /// ignored and the target falls back to its hostname or address.
    pub fn with_name(mut self, name: &str) -> Self {
        let sanitized = sanitize_miner_name(name);
        self.name = (!sanitized.is_empty()).then_some(sanitized);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Display label: operator name, else reported hostname, else the
    /// address with separators replaced.
    pub fn label(&self) -> String {
        self.name
            .as_ref()
            .or(self.hostname.as_ref())
            .cloned()
            .unwrap_or_else(|| self.address.replace(['.', ':'], "_"))
    }

    pub fn status_url(&self) -> String {
        format!("http://{}{}", self.address, STATUS_PATH)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_success(&self) -> Option<OffsetDateTime> {
        self.last_success
    }

    pub fn last_error(&self) -> Option<&PollError> {
        self.last_error.as_ref()
    }

    /// Account for a successful answer and turn it into a record.
    ///
    /// Resets the failure count. The record timestamp is `now`, or the
    /// previous record's timestamp if the wall clock went backwards.
    pub fn record_success(&mut self, info: SystemInfo, now: OffsetDateTime) -> MetricsRecord {
        if self.hostname.is_none() {
            self.hostname = info
                .hostname
                .as_deref()
                .map(sanitize_miner_name)
                .filter(|h| !h.is_empty());
        }

        let timestamp = self.last_record_at.map_or(now, |last| now.max(last));
        self.last_record_at = Some(timestamp);
        self.last_success = Some(timestamp);
        self.last_error = None;
        self.consecutive_failures = 0;

        info.into_record(self.label(), timestamp)
    }

    /// Account for a failed poll. Returns the new consecutive-failure count.
    pub fn record_failure(&mut self, error: PollError) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::Duration;

    use super::*;

    fn info(hostname: Option<&str>) -> SystemInfo {
        let mut body = json!({"hashRate": 500.0, "temp": 50.0});
        if let Some(h) = hostname {
            body["hostname"] = json!(h);
        }
        SystemInfo::from_value(body).unwrap()
    }

    #[test]
    fn label_falls_back_to_address() {
        assert_eq!(DeviceTarget::new("192.168.1.50").label(), "192_168_1_50");
        assert_eq!(DeviceTarget::new("10.0.0.7:8080").label(), "10_0_0_7_8080");
    }

    #[test]
    fn label_prefers_operator_name() {
        let mut target = DeviceTarget::new("192.168.1.50").with_name("Garage Rig");
        assert_eq!(target.label(), "GarageRig");

        target.record_success(info(Some("bitaxe")), OffsetDateTime::now_utc());
        assert_eq!(target.label(), "GarageRig");
    }

    #[test]
    fn blank_operator_name_is_ignored() {
        let target = DeviceTarget::new("192.168.1.50").with_name("!!!");
        assert_eq!(target.label(), "192_168_1_50");
    }

    #[test]
    fn first_reported_hostname_becomes_stable_label() {
        let mut target = DeviceTarget::new("192.168.1.50");
        let now = OffsetDateTime::now_utc();

        let record = target.record_success(info(Some("bitaxe.office")), now);
        assert_eq!(record.label, "bitaxeoffice");

        let record = target.record_success(info(Some("renamed")), now);
        assert_eq!(record.label, "bitaxeoffice");
    }

    #[test]
    fn success_resets_failure_state() {
        let mut target = DeviceTarget::new("192.168.1.50");
        assert_eq!(target.record_failure(PollError::BadResponse(500)), 1);
        assert_eq!(target.record_failure(PollError::BadResponse(500)), 2);
        assert_eq!(target.last_error(), Some(&PollError::BadResponse(500)));
        assert!(target.last_success().is_none());

        target.record_success(info(None), OffsetDateTime::now_utc());
        assert_eq!(target.consecutive_failures(), 0);
        assert!(target.last_error().is_none());
        assert!(target.last_success().is_some());

        assert_eq!(
            target.record_failure(PollError::Unreachable("refused".into())),
            1
        );
    }

    #[test]
    fn record_timestamps_never_go_backwards() {
        let mut target = DeviceTarget::new("192.168.1.50");
        let now = OffsetDateTime::now_utc();

        let first = target.record_success(info(None), now);
        let second = target.record_success(info(None), now - Duration::seconds(30));
        assert_eq!(first.timestamp, now);
        assert_eq!(second.timestamp, now);

        let third = target.record_success(info(None), now + Duration::seconds(10));
        assert_eq!(third.timestamp, now + Duration::seconds(10));
    }

    #[test]
    fn error_kinds_render_snake_case() {
        let timeout = PollError::TimedOut(std::time::Duration::from_secs(5));
        assert_eq!(timeout.kind().to_string(), "timeout");
        assert_eq!(PollError::BadResponse(503).kind().to_string(), "bad_response");
        assert_eq!(PollError::ParseError(String::new()).kind().to_string(), "parse_error");
    }
}
