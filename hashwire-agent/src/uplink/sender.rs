use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use tokio_util::sync::CancellationToken;

use super::backoff::ExponentialBackoff;
use super::{DropReason, SendOutcome, Uplink, UplinkBatch, UplinkError, line_protocol};
use crate::config::UplinkConfig;
use crate::error::{Result, error_chain};
use crate::tracing::prelude::*;

/// Classification of one write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// 429, with the server's `Retry-After` when it sent a usable one.
    RetryAfter(Option<Duration>),
    Retryable(UplinkError),
    Fatal(UplinkError),
}

/// Map a write response onto what to do next.
pub fn classify(status: StatusCode, headers: &HeaderMap) -> AttemptOutcome {
    let code = status.as_u16();
    if status.is_success() {
        AttemptOutcome::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        AttemptOutcome::RetryAfter(headers.get(RETRY_AFTER).and_then(parse_retry_after))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        AttemptOutcome::Fatal(UplinkError::AuthError(code))
    } else if status.is_client_error() {
        AttemptOutcome::Fatal(UplinkError::ClientError(code))
    } else {
        // 5xx, and the odd 1xx/3xx that reqwest did not resolve.
        AttemptOutcome::Retryable(UplinkError::ServerError(code))
    }
}

/// Only the delta-seconds form is understood; an HTTP-date hint falls back
/// to plain exponential backoff.
fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    value
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Writes batches to the remote endpoint with bounded retries.
///
/// The state machine per batch is:
///
/// ```text
/// Attempt ──2xx──────────────────────────────► Delivered
///    │ ──4xx (not 429)───────────────────────► Dropped (fatal)
///    │ ──429 / 5xx / network──► attempts left and budget left?
///    │                              │ no ────► Dropped (exhausted)
///    ◄──────── Backoff ◄────────────┘ yes
/// ```
///
/// The HTTP client (and its connection pool) lives as long as the sender,
/// so consecutive ticks reuse the TLS session.
#[derive(Debug, Clone)]
pub struct UplinkSender {
    http: reqwest::Client,
    url: Url,
    authorization: HeaderValue,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    retry_budget: Duration,
}

impl UplinkSender {
    pub fn new(config: &UplinkConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("hashwire-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            url: config.write_url()?,
            authorization: config.authorization()?,
            max_attempts: config.max_attempts,
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
            retry_budget: config.retry_budget,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn attempt(&self, body: &str) -> AttemptOutcome {
        let response = self
            .http
            .post(self.url.clone())
            .header(AUTHORIZATION, self.authorization.clone())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body.to_owned())
            .send()
            .await;

        match response {
            Ok(response) => classify(response.status(), response.headers()),
            Err(e) => AttemptOutcome::Retryable(UplinkError::Network(describe(&e))),
        }
    }
}

#[async_trait]
impl Uplink for UplinkSender {
    async fn send(&self, batch: &UplinkBatch, cancel: &CancellationToken) -> SendOutcome {
        let (body, points) = line_protocol::render_batch(batch.records());
        if points == 0 {
            return SendOutcome::Delivered {
                points: 0,
                attempts: 0,
            };
        }

        let mut backoff = ExponentialBackoff::new(self.backoff_base, self.backoff_cap);
        let mut waited = Duration::ZERO;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let (error, hint) = match self.attempt(&body).await {
                AttemptOutcome::Success => {
                    debug!(points, attempts, "Batch written");
                    return SendOutcome::Delivered { points, attempts };
                }
                AttemptOutcome::Fatal(error) => {
                    return SendOutcome::Dropped {
                        error,
                        reason: DropReason::Fatal,
                        attempts,
                    };
                }
                AttemptOutcome::RetryAfter(hint) => (UplinkError::RateLimited, hint),
                AttemptOutcome::Retryable(error) => (error, None),
            };

            if attempts >= self.max_attempts {
                return SendOutcome::Dropped {
                    error,
                    reason: DropReason::AttemptsExhausted,
                    attempts,
                };
            }

            let delay = backoff.next_delay(hint);
            if waited + delay > self.retry_budget {
                return SendOutcome::Dropped {
                    error,
                    reason: DropReason::BudgetExhausted,
                    attempts,
                };
            }

            debug!(
                attempt = attempts,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Write failed, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return SendOutcome::Dropped {
                        error,
                        reason: DropReason::Cancelled,
                        attempts,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
            waited += delay;
        }
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return "request timed out".to_string();
    }
    error_chain(err)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn headers(retry_after: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = retry_after {
            headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test_case(200; "ok")]
    #[test_case(204; "no_content")]
    fn success(code: u16) {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(classify(status, &headers(None)), AttemptOutcome::Success);
    }

    #[test_case(401, UplinkError::AuthError(401); "unauthorized")]
    #[test_case(403, UplinkError::AuthError(403); "forbidden")]
    #[test_case(400, UplinkError::ClientError(400); "bad_request")]
    #[test_case(404, UplinkError::ClientError(404); "not_found")]
    #[test_case(413, UplinkError::ClientError(413); "too_large")]
    fn fatal(code: u16, expected: UplinkError) {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(
            classify(status, &headers(None)),
            AttemptOutcome::Fatal(expected)
        );
    }

    #[test_case(500; "internal")]
    #[test_case(502; "bad_gateway")]
    #[test_case(503; "unavailable")]
    fn retryable(code: u16) {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(
            classify(status, &headers(None)),
            AttemptOutcome::Retryable(UplinkError::ServerError(code))
        );
    }

    #[test_case(None, None; "no_header")]
    #[test_case(Some("2"), Some(Duration::from_secs(2)); "seconds")]
    #[test_case(Some(" 30 "), Some(Duration::from_secs(30)); "padded")]
    #[test_case(Some("Wed, 21 Oct 2015 07:28:00 GMT"), None; "http_date")]
    #[test_case(Some("-1"), None; "negative")]
    fn rate_limited(header: Option<&str>, expected: Option<Duration>) {
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, &headers(header)),
            AttemptOutcome::RetryAfter(expected)
        );
    }
}
