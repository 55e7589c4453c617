use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{DeviceTarget, PollError, Poller, SystemInfo};
use crate::error::{Result, error_chain};
use crate::metrics::MetricsRecord;
use crate::tracing::prelude::*;

/// HTTP client for the miners' local status API.
///
/// One instance serves every target; the underlying connection pool is
/// shared. Each request is bounded by the poll timeout, which covers
/// connecting, sending, and reading the whole body.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl DeviceClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("hashwire-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, timeout })
    }

    /// Fetch and validate one status document, without touching any
    /// target state.
    pub async fn fetch(&self, url: &str) -> std::result::Result<SystemInfo, PollError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::BadResponse(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        SystemInfo::from_json(&body)
    }

    fn transport_error(&self, err: reqwest::Error) -> PollError {
        if err.is_timeout() {
            PollError::TimedOut(self.timeout)
        } else {
            PollError::Unreachable(error_chain(&err))
        }
    }
}

#[async_trait]
impl Poller for DeviceClient {
    async fn poll(
        &self,
        target: &mut DeviceTarget,
    ) -> std::result::Result<MetricsRecord, PollError> {
        let url = target.status_url();
        trace!(device = %target.label(), %url, "Polling device");

        match self.fetch(&url).await {
            Ok(info) => Ok(target.record_success(info, OffsetDateTime::now_utc())),
            Err(e) => {
                target.record_failure(e.clone());
                Err(e)
            }
        }
    }
}
