//! Delivery of collected records to the remote write endpoint.
//!
//! Each tick's records go out as one [`UplinkBatch`] in one request. A
//! batch is either delivered or dropped within a bounded time; nothing is
//! kept for a later tick.

mod backoff;
pub mod line_protocol;
mod sender;

pub use backoff::ExponentialBackoff;
pub use sender::{AttemptOutcome, UplinkSender, classify};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::metrics::MetricsRecord;

/// Records collected in one tick.
#[derive(Debug, Clone, Default)]
pub struct UplinkBatch {
    records: Vec<MetricsRecord>,
}

impl UplinkBatch {
    pub fn new(records: Vec<MetricsRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[MetricsRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Sends a batch and reports how it went. Never fails: failures are
/// outcomes.
#[async_trait]
pub trait Uplink: Send + Sync {
    async fn send(&self, batch: &UplinkBatch, cancel: &CancellationToken) -> SendOutcome;
}

/// Why a write attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UplinkError {
    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("server error (HTTP {0})")]
    ServerError(u16),

    /// 401/403: the token was refused.
    #[error("token rejected (HTTP {0})")]
    AuthError(u16),

    /// Any other 4xx; retrying the same body will not help.
    #[error("request rejected (HTTP {0})")]
    ClientError(u16),

    #[error("network error: {0}")]
    Network(String),
}

/// Why a batch was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DropReason {
    /// Non-retryable answer.
    Fatal,
    /// The attempt cap was reached.
    AttemptsExhausted,
    /// The next backoff would overrun the retry budget.
    BudgetExhausted,
    /// Shutdown began during a backoff wait.
    Cancelled,
}

/// Final result of sending one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered {
        points: usize,
        attempts: u32,
    },
    Dropped {
        error: UplinkError,
        reason: DropReason,
        attempts: u32,
    },
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            SendOutcome::Delivered { attempts, .. } | SendOutcome::Dropped { attempts, .. } => {
                *attempts
            }
        }
    }
}
