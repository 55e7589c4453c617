//! The audit report and its two renderings.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::coinbase::{CoinbaseAnalysis, Destination, PayoutAnalysis};
use super::messages::{JobNotification, SubscribeResult};
use super::{AuditConfig, AuditError};

pub const JSON_REPORT: &str = "pool_audit.json";
pub const MARKDOWN_REPORT: &str = "pool_audit.md";

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub audit_timestamp: String,
    pub target_host: String,
    pub target_port: u16,
    pub tool_version: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionReport {
    pub fn connected(elapsed: Duration, remote_ip: Option<IpAddr>, local_port: Option<u16>) -> Self {
        Self {
            success: true,
            connect_time_ms: Some(round2(elapsed.as_secs_f64() * 1000.0)),
            remote_ip,
            local_port,
            error: None,
        }
    }

    pub fn failed(error: &AuditError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriptions: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extranonce1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extranonce2_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubscribeReport {
    pub fn accepted(result: &SubscribeResult) -> Self {
        Self {
            success: true,
            subscriptions: Some(result.subscriptions.clone()),
            extranonce1: Some(result.extranonce1.clone()),
            extranonce2_size: Some(result.extranonce2_size),
            error: None,
        }
    }

    pub fn refused(error: impl Into<String>) -> Self {
        Self {
            success: false,
            subscriptions: None,
            extranonce1: None,
            extranonce2_size: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeReport {
    pub success: bool,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The header fields of a job, without the coinbase halves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub prev_hash: String,
    pub version: String,
    pub nbits: String,
    pub ntime: String,
    pub clean_jobs: bool,
    pub merkle_branches: usize,
    pub coinbase1_len: usize,
    pub coinbase2_len: usize,
}

impl From<&JobNotification> for JobSummary {
    fn from(job: &JobNotification) -> Self {
        Self {
            job_id: job.job_id.clone(),
            prev_hash: job.prev_hash.clone(),
            version: job.version.clone(),
            nbits: job.nbits.clone(),
            ntime: job.ntime.clone(),
            clean_jobs: job.clean_jobs,
            merkle_branches: job.merkle_branches.len(),
            coinbase1_len: job.coinbase1.len(),
            coinbase2_len: job.coinbase2.len(),
        }
    }
}

/// Everything one audit session found.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub metadata: Metadata,
    pub connection: ConnectionReport,
    pub subscribe: Option<SubscribeReport>,
    pub authorize: Option<AuthorizeReport>,
    pub initial_difficulty: Option<f64>,
    pub difficulty: Option<f64>,
    pub jobs: Vec<JobSummary>,
    pub coinbase: Option<CoinbaseAnalysis>,
    pub payout: Option<PayoutAnalysis>,
    /// Non-fatal problems, in the order they happened.
    pub errors: Vec<String>,
}

impl AuditReport {
    pub fn new(config: &AuditConfig, started: OffsetDateTime) -> Self {
        Self {
            metadata: Metadata {
                audit_timestamp: started
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| started.to_string()),
                target_host: config.host.clone(),
                target_port: config.port,
                tool_version: env!("CARGO_PKG_VERSION"),
            },
            connection: ConnectionReport::default(),
            subscribe: None,
            authorize: None,
            initial_difficulty: None,
            difficulty: None,
            jobs: Vec::new(),
            coinbase: None,
            payout: None,
            errors: Vec::new(),
        }
    }

    pub fn subscribed(&self) -> bool {
        self.subscribe.as_ref().is_some_and(|s| s.success)
    }

    pub fn to_json(&self) -> Result<String, AuditError> {
        serde_json::to_string_pretty(self).map_err(|e| AuditError::Report(e.into()))
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let m = &self.metadata;
        let _ = writeln!(md, "# Stratum Audit Report: {}:{}\n", m.target_host, m.target_port);
        let _ = writeln!(md, "**Audit Date:** {}  ", m.audit_timestamp);
        let _ = writeln!(md, "**Tool Version:** {}\n", m.tool_version);

        let c = &self.connection;
        md.push_str("## Connection\n\n| Metric | Value |\n|--------|-------|\n");
        let _ = writeln!(md, "| Connection Success | {} |", c.success);
        let _ = writeln!(md, "| Connect Time | {} ms |", or_na(c.connect_time_ms));
        let _ = writeln!(md, "| Remote IP | {} |", or_na(c.remote_ip));
        if let Some(error) = &c.error {
            let _ = writeln!(md, "| Error | {} |", error);
        }

        md.push_str("\n## Protocol\n\n### mining.subscribe\n");
        match &self.subscribe {
            Some(s) => {
                let _ = writeln!(md, "- **Success:** {}", s.success);
                let _ = writeln!(md, "- **Extranonce1:** `{}`", or_na(s.extranonce1.as_ref()));
                let _ = writeln!(md, "- **Extranonce2 Size:** {} bytes", or_na(s.extranonce2_size));
                if let Some(error) = &s.error {
                    let _ = writeln!(md, "- **Error:** {}", error);
                }
            }
            None => md.push_str("- not attempted\n"),
        }

        md.push_str("\n### mining.authorize\n");
        match &self.authorize {
            Some(a) => {
                let _ = writeln!(md, "- **Success:** {}", a.success);
                let _ = writeln!(md, "- **Username:** `{}`", a.username);
                if let Some(error) = &a.error {
                    let _ = writeln!(md, "- **Error:** {}", error);
                }
            }
            None => md.push_str("- not attempted\n"),
        }

        md.push_str("\n### Difficulty\n");
        let _ = writeln!(md, "- **Initial Difficulty:** {}", or_na(self.initial_difficulty));
        let _ = writeln!(md, "- **Jobs Received:** {}", self.jobs.len());

        md.push_str("\n## Coinbase\n\n");
        match &self.coinbase {
            Some(cb) => {
                let _ = writeln!(md, "### Coinbase Tag\n```\n{}\n```\n", or_na(cb.coinbase_tag.as_ref()));
                let _ = writeln!(md, "### ASCII Strings Found\n```\n{:?}\n```\n", cb.ascii_strings_found);
                let i = &cb.interpretation;
                md.push_str("### Interpretation\n");
                let _ = writeln!(md, "- **Software:** {}", i.identified_software);
                let _ = writeln!(md, "- **Is CKPool:** {}", i.is_ckpool);
                let _ = writeln!(md, "- **Custom Branding:** {}", or_na(i.branding.as_ref()));
                let _ = writeln!(md, "- **Solo:** {}", i.is_solo);
                let _ = writeln!(md, "- **Is Proxy:** {}", i.is_proxy);
            }
            None => md.push_str("No job was analyzed.\n"),
        }

        if let Some(payout) = &self.payout {
            md.push_str("\n## Payout\n\n| Output | Destination | Sats | Share |\n|--------|-------------|------|-------|\n");
            for (index, out) in payout.outputs.iter().enumerate() {
                let destination = match &out.destination {
                    Destination::Address(address) if out.to_wallet => format!("{address} (wallet)"),
                    Destination::Address(address) => address.clone(),
                    Destination::OpReturn => "OP_RETURN".to_string(),
                    Destination::Nonstandard(script) => format!("script {script}"),
                };
                let _ = writeln!(
                    md,
                    "| {} | {} | {} | {:.2}% |",
                    index,
                    destination,
                    out.value_sats,
                    out.share * 100.0
                );
            }
            let _ = writeln!(md, "\n- **Total:** {} sats", payout.total_sats);
            let _ = writeln!(
                md,
                "- **Wallet Share:** {}",
                or_na(payout.wallet_share.map(|s| format!("{:.2}%", s * 100.0)))
            );
            let _ = writeln!(
                md,
                "- **Implied Fee:** {}",
                or_na(payout.implied_fee.map(|s| format!("{:.2}%", s * 100.0)))
            );
        }

        if !self.errors.is_empty() {
            md.push_str("\n## Errors\n\n");
            for error in &self.errors {
                let _ = writeln!(md, "- {}", error);
            }
        }
        md
    }

    /// Write [`JSON_REPORT`] and [`MARKDOWN_REPORT`] into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, AuditError> {
        let json = dir.join(JSON_REPORT);
        std::fs::write(&json, self.to_json()?)?;
        let markdown = dir.join(MARKDOWN_REPORT);
        std::fs::write(&markdown, self.to_markdown())?;
        Ok(vec![json, markdown])
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| v.to_string())
}
