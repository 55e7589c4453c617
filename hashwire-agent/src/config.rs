//! Agent configuration.
//!
//! Built once at startup (by the agent binary from flags and environment)
//! and handed to the scheduler, device client, and uplink. Nothing here
//! changes while the agent runs.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::HeaderValue;

use crate::device::{DeviceTarget, STATUS_PATH};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Per-poll timeout when none is configured. Shortened to half the interval
/// for intervals of 10s or less, so a poll always ends before the next tick.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive failures before a device is reported at warn level.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

pub const DEFAULT_UPLINK_URL: &str = "https://influx.bitaxeluck.com/api/v2/write";
pub const DEFAULT_BUCKET: &str = "miners";
pub const DEFAULT_ORG: &str = "hashluck";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);
pub const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("no miner addresses configured")]
    NoTargets,

    #[error("invalid miner address {0:?}")]
    InvalidAddress(String),

    #[error("miner address {0:?} listed more than once")]
    DuplicateAddress(String),

    #[error("API token is empty")]
    EmptyToken,

    #[error("API token contains characters not allowed in an HTTP header")]
    InvalidToken,

    #[error("poll interval must be positive")]
    ZeroInterval,

    #[error("poll timeout {timeout:?} must be shorter than the interval {interval:?}")]
    PollTimeoutTooLong {
        timeout: Duration,
        interval: Duration,
    },

    #[error("failure threshold must be at least 1")]
    ZeroFailureThreshold,

    #[error("invalid uplink URL {0:?}")]
    InvalidUplinkUrl(String),

    #[error("uplink max attempts must be at least 1")]
    ZeroAttempts,

    #[error("backoff cap {cap:?} is below the base delay {base:?}")]
    BackoffCapBelowBase { base: Duration, cap: Duration },
}

/// One miner as configured by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Host or host:port.
    pub address: String,

    /// Optional display name, overriding the miner's hostname.
    pub name: Option<String>,
}

impl TargetConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn to_target(&self) -> DeviceTarget {
        let target = DeviceTarget::new(self.address.clone());
        match &self.name {
            Some(name) => target.with_name(name),
            None => target,
        }
    }
}

/// Where and how to write.
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    pub url: String,
    pub bucket: String,
    pub org: String,

    /// Opaque bearer token.
    pub token: String,

    /// Bound on a single write request.
    pub request_timeout: Duration,

    /// Total attempts per batch, including the first.
    pub max_attempts: u32,

    pub backoff_base: Duration,
    pub backoff_cap: Duration,

    /// Upper bound on the sum of backoff waits for one batch.
    pub retry_budget: Duration,
}

impl UplinkConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_UPLINK_URL.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            org: DEFAULT_ORG.to_string(),
            token: token.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    /// Write URL with the bucket, org, and precision query parameters.
    pub fn write_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse_with_params(
            &self.url,
            &[
                ("bucket", self.bucket.as_str()),
                ("org", self.org.as_str()),
                ("precision", "ns"),
            ],
        )
        .map_err(|_| ConfigError::InvalidUplinkUrl(self.url.clone()))?;

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::InvalidUplinkUrl(self.url.clone()));
        }
        Ok(url)
    }

    /// `Authorization` header value for the token.
    pub fn authorization(&self) -> Result<HeaderValue, ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| ConfigError::InvalidToken)?;
        value.set_sensitive(true);
        Ok(value)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.write_url()?;
        self.authorization()?;
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.backoff_cap < self.backoff_base {
            return Err(ConfigError::BackoffCapBelowBase {
                base: self.backoff_base,
                cap: self.backoff_cap,
            });
        }
        Ok(())
    }
}

/// Everything the agent needs to run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub targets: Vec<TargetConfig>,
    pub interval: Duration,

    /// Explicit per-poll timeout; derived from the interval when `None`.
    pub poll_timeout: Option<Duration>,

    pub failure_threshold: u32,
    pub uplink: UplinkConfig,
}

impl AgentConfig {
    pub fn new(targets: Vec<TargetConfig>, token: impl Into<String>) -> Self {
        Self {
            targets,
            interval: DEFAULT_INTERVAL,
            poll_timeout: None,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            uplink: UplinkConfig::new(token),
        }
    }

    /// Pair a comma-separated address list with an optional comma-separated
    /// name list. Names apply positionally; extra names are ignored and
    /// missing ones leave the target unnamed.
    pub fn targets_from_lists(addresses: &str, names: &str) -> Vec<TargetConfig> {
        let mut names = split_list(names);
        split_list(addresses)
            .map(|address| TargetConfig {
                address: address.to_string(),
                name: names.next().map(str::to_string),
            })
            .collect()
    }

    pub fn effective_poll_timeout(&self) -> Duration {
        self.poll_timeout
            .unwrap_or_else(|| DEFAULT_POLL_TIMEOUT.min(self.interval / 2))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            validate_address(&target.address)?;
            if !seen.insert(target.address.as_str()) {
                return Err(ConfigError::DuplicateAddress(target.address.clone()));
            }
        }

        if self.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        let timeout = self.effective_poll_timeout();
        if timeout.is_zero() || timeout >= self.interval {
            return Err(ConfigError::PollTimeoutTooLong {
                timeout,
                interval: self.interval,
            });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }

        self.uplink.validate()
    }

    pub fn device_targets(&self) -> Vec<DeviceTarget> {
        self.targets.iter().map(TargetConfig::to_target).collect()
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// An address is a bare host or host:port that forms a valid status URL.
fn validate_address(address: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidAddress(address.to_string());

    if address.is_empty() || address.contains(['/', '?', '#', '@']) || address.contains("://") {
        return Err(invalid());
    }
    let url = Url::parse(&format!("http://{address}{STATUS_PATH}")).map_err(|_| invalid())?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn config() -> AgentConfig {
        AgentConfig::new(
            AgentConfig::targets_from_lists("192.168.1.50, 192.168.1.51", ""),
            "secret-token",
        )
    }

    #[test]
    fn defaults_are_valid() {
        let config = config();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.effective_poll_timeout(), Duration::from_secs(5));
        assert_eq!(config.failure_threshold, 5);
    }

    #[test]
    fn names_pair_positionally() {
        let targets =
            AgentConfig::targets_from_lists(" 10.0.0.1,,10.0.0.2 ,10.0.0.3", "Garage, Office");
        assert_eq!(
            targets,
            vec![
                TargetConfig {
                    address: "10.0.0.1".into(),
                    name: Some("Garage".into())
                },
                TargetConfig {
                    address: "10.0.0.2".into(),
                    name: Some("Office".into())
                },
                TargetConfig::new("10.0.0.3"),
            ]
        );
    }

    #[test]
    fn short_interval_shrinks_default_timeout() {
        let mut config = config();
        config.interval = Duration::from_secs(2);
        assert_eq!(config.effective_poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn explicit_timeout_must_be_below_interval() {
        let mut config = config();
        config.poll_timeout = Some(Duration::from_secs(10));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PollTimeoutTooLong { .. })
        ));
    }

    #[test]
    fn empty_target_list_is_rejected() {
        let config = AgentConfig::new(AgentConfig::targets_from_lists(" , ", ""), "t");
        assert_eq!(config.validate(), Err(ConfigError::NoTargets));
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let config = AgentConfig::new(
            AgentConfig::targets_from_lists("10.0.0.1,10.0.0.1", ""),
            "t",
        );
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateAddress("10.0.0.1".into()))
        );
    }

    #[test_case("192.168.1.50"; "ipv4")]
    #[test_case("192.168.1.50:8080"; "ipv4_with_port")]
    #[test_case("bitaxe.local"; "hostname")]
    #[test_case("[fe80::1]:80"; "ipv6")]
    fn accepts_address(address: &str) {
        assert_eq!(validate_address(address), Ok(()));
    }

    #[test_case("http://192.168.1.50"; "scheme")]
    #[test_case("192.168.1.50/api"; "path")]
    #[test_case("192.168.1.50:notaport"; "bad_port")]
    #[test_case("has space"; "space")]
    fn rejects_address(address: &str) {
        assert!(matches!(
            validate_address(address),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test_case("", ConfigError::EmptyToken; "empty")]
    #[test_case("   ", ConfigError::EmptyToken; "blank")]
    #[test_case("abc\ndef", ConfigError::InvalidToken; "newline")]
    fn rejects_token(token: &str, expected: ConfigError) {
        assert_eq!(UplinkConfig::new(token).validate(), Err(expected));
    }

    #[test]
    fn write_url_carries_query() {
        let url = UplinkConfig::new("t").write_url().unwrap();
        assert_eq!(url.path(), "/api/v2/write");
        let query: Vec<_> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("bucket".into(), "miners".into())));
        assert!(query.contains(&("org".into(), "hashluck".into())));
        assert!(query.contains(&("precision".into(), "ns".into())));
    }

    #[test]
    fn rejects_non_http_uplink() {
        let mut uplink = UplinkConfig::new("t");
        uplink.url = "ftp://example.com/write".into();
        assert!(matches!(
            uplink.validate(),
            Err(ConfigError::InvalidUplinkUrl(_))
        ));
    }

    #[test]
    fn rejects_inverted_backoff() {
        let mut uplink = UplinkConfig::new("t");
        uplink.backoff_base = Duration::from_secs(10);
        uplink.backoff_cap = Duration::from_secs(5);
        assert!(matches!(
            uplink.validate(),
            Err(ConfigError::BackoffCapBelowBase { .. })
        ));
    }
}
