//! Stratum v1 pool auditor.
//!
//! Connects to a pool the way a miner would, walks it through
//! `mining.subscribe` and `mining.authorize`, waits for the first
//! `mining.notify`, and reports what the job says about the pool: the
//! coinbase tag, which pool software and branding it carries, and how the
//! coinbase outputs split the block reward.
//!
//! Nothing is mined and no share is submitted. The report is a snapshot of
//! one session, written as JSON and Markdown by [`AuditReport::write_to`].
//!
//! ```text
//! connect -> subscribe (id 1) -> authorize (id 2) -> first notify -> analyze
//! ```
//!
//! `mining.set_difficulty` and `mining.notify` are accepted in any phase;
//! pools commonly send both right after the authorize reply.

mod auditor;
mod coinbase;
mod connection;
mod error;
mod messages;
mod report;

use std::time::Duration;

pub use auditor::Auditor;
pub use coinbase::{
    CoinbaseAnalysis, Destination, PayoutAnalysis, PayoutOutput, PoolInterpretation,
    analyze_coinbase, analyze_payout, ascii_runs,
};
pub use connection::Connection;
pub use error::AuditError;
pub use messages::{JobNotification, Message, SubscribeResult};
pub use report::{
    AuditReport, AuthorizeReport, ConnectionReport, JSON_REPORT, JobSummary, MARKDOWN_REPORT,
    Metadata, SubscribeReport,
};

pub const DEFAULT_HOST: &str = "stratum.bitaxeluck.com";
pub const DEFAULT_PORT: u16 = 3334;

/// Placeholder payout address used when the operator gives none.
pub const DEFAULT_WALLET: &str = "bc1qaudit000000000000000000000000000000000";
pub const DEFAULT_WORKER: &str = "audit";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the reply to one request.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the first job after authorizing.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(15);

/// Who we tell the pool we are in `mining.subscribe`.
pub const USER_AGENT: &str = concat!("hashwire-audit/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub host: String,
    pub port: u16,
    pub wallet: String,
    pub worker: String,
    pub connect_timeout: Duration,
    pub reply_timeout: Duration,
    pub job_timeout: Duration,
}

impl AuditConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            wallet: DEFAULT_WALLET.to_string(),
            worker: DEFAULT_WORKER.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    /// Stratum username: `<wallet>.<worker>`.
    pub fn username(&self) -> String {
        format!("{}.{}", self.wallet, self.worker)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}
