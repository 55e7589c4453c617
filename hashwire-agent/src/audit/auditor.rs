use serde_json::{Value, json};
use ::time::OffsetDateTime;
use tokio::time::{self, Instant};

use super::coinbase::{analyze_coinbase, analyze_payout};
use super::connection::Connection;
use super::messages::{JobNotification, Message, SubscribeResult};
use super::report::{AuditReport, AuthorizeReport, ConnectionReport, JobSummary, SubscribeReport};
use super::{AuditConfig, AuditError, USER_AGENT};
use crate::tracing::prelude::*;

const SUBSCRIBE_ID: u64 = 1;
const AUTHORIZE_ID: u64 = 2;

/// Runs one audit session against one pool.
pub struct Auditor {
    config: AuditConfig,
}

/// A reply to one of our requests.
struct Reply {
    result: Value,
    error: Option<Value>,
}

/// State accumulated over one session.
struct Session<'a> {
    config: &'a AuditConfig,
    connection: Connection,
    report: AuditReport,
    subscription: Option<SubscribeResult>,
    first_job: Option<JobNotification>,
}

impl Auditor {
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    /// Run every phase the pool lets us reach. Never fails: whatever went
    /// wrong is in the report.
    pub async fn run(&self) -> AuditReport {
        let config = &self.config;
        let mut report = AuditReport::new(config, OffsetDateTime::now_utc());

        let connection =
            match Connection::open(&config.host, config.port, config.connect_timeout).await {
                Ok((connection, connected)) => {
                    info!(
                        host = %config.host,
                        port = config.port,
                        connect_time_ms = ?connected.connect_time_ms,
                        "Connected"
                    );
                    report.connection = connected;
                    connection
                }
                Err(e) => {
                    warn!(host = %config.host, port = config.port, error = %e, "Connection failed");
                    report.connection = ConnectionReport::failed(&e);
                    return report;
                }
            };

        let mut session = Session {
            config,
            connection,
            report,
            subscription: None,
            first_job: None,
        };
        if let Err(e) = session.exchange().await {
            warn!(error = %e, "Session ended early");
            session.report.errors.push(e.to_string());
        }
        session.analyze()
    }
}

impl Session<'_> {
    async fn exchange(&mut self) -> Result<(), AuditError> {
        info!("Phase 1: mining.subscribe");
        self.connection
            .send(SUBSCRIBE_ID, "mining.subscribe", vec![json!(USER_AGENT)])
            .await?;
        let subscribe = match self.await_reply(SUBSCRIBE_ID).await? {
            None => SubscribeReport::refused("no reply"),
            Some(Reply {
                error: Some(error), ..
            }) => SubscribeReport::refused(error.to_string()),
            Some(Reply { result, .. }) => match SubscribeResult::from_result(&result) {
                Ok(subscription) => {
                    info!(
                        extranonce1 = %subscription.extranonce1,
                        extranonce2_size = subscription.extranonce2_size,
                        "Subscribed"
                    );
                    let report = SubscribeReport::accepted(&subscription);
                    self.subscription = Some(subscription);
                    report
                }
                Err(e) => SubscribeReport::refused(e.to_string()),
            },
        };
        self.report.subscribe = Some(subscribe);
        if !self.report.subscribed() {
            warn!("Subscribe failed, stopping");
            return Ok(());
        }

        info!("Phase 2: mining.authorize");
        let username = self.config.username();
        self.connection
            .send(
                AUTHORIZE_ID,
                "mining.authorize",
                vec![json!(username), json!("x")],
            )
            .await?;
        let error = match self.await_reply(AUTHORIZE_ID).await? {
            None => Some("no reply".to_string()),
            Some(Reply {
                result: Value::Bool(true),
                ..
            }) => None,
            Some(Reply { error, .. }) => {
                Some(error.map_or_else(|| "rejected".to_string(), |e| e.to_string()))
            }
        };
        match &error {
            None => info!(%username, "Authorized"),
            Some(e) => warn!(%username, error = %e, "Authorization failed"),
        }
        self.report.authorize = Some(AuthorizeReport {
            success: error.is_none(),
            username,
            error,
        });

        if self.first_job.is_none() {
            info!("Phase 3: waiting for mining.notify");
            self.await_job().await?;
        }
        Ok(())
    }

    /// Read until the reply to `id` arrives or the reply timeout passes.
    /// Notifications seen on the way are recorded.
    async fn await_reply(&mut self, id: u64) -> Result<Option<Reply>, AuditError> {
        let deadline = Instant::now() + self.config.reply_timeout;
        loop {
            let Ok(next) = time::timeout_at(deadline, self.connection.next()).await else {
                return Ok(None);
            };
            match self.absorb(next)? {
                Some(Message::Response {
                    id: Some(reply_id),
                    result,
                    error,
                }) if reply_id == id => return Ok(Some(Reply { result, error })),
                _ => {}
            }
        }
    }

    async fn await_job(&mut self) -> Result<(), AuditError> {
        let deadline = Instant::now() + self.config.job_timeout;
        while self.first_job.is_none() {
            let Ok(next) = time::timeout_at(deadline, self.connection.next()).await else {
                let waited = self.config.job_timeout;
                warn!(?waited, "No job received");
                self.report
                    .errors
                    .push(format!("no mining.notify within {waited:?}"));
                return Ok(());
            };
            self.absorb(next)?;
        }
        Ok(())
    }

    /// Record what a message tells us and hand it back. Lines that are not
    /// JSON are noted and skipped; other read errors end the session.
    fn absorb(
        &mut self,
        next: Result<Message, AuditError>,
    ) -> Result<Option<Message>, AuditError> {
        let message = match next {
            Ok(message) => message,
            Err(e @ AuditError::InvalidMessage(_)) => {
                debug!(error = %e, "Skipping line");
                self.report.errors.push(e.to_string());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Message::Notification { method, params } = &message {
            match method.as_str() {
                "mining.set_difficulty" => match params.first().and_then(Value::as_f64) {
                    Some(difficulty) => {
                        info!(difficulty, "Difficulty set");
                        self.report.initial_difficulty.get_or_insert(difficulty);
                        self.report.difficulty = Some(difficulty);
                    }
                    None => self
                        .report
                        .errors
                        .push(format!("mining.set_difficulty without a number: {params:?}")),
                },
                "mining.notify" => match JobNotification::from_stratum_params(params) {
                    Ok(job) => {
                        info!(job_id = %job.job_id, "Job received");
                        self.report.jobs.push(JobSummary::from(&job));
                        self.first_job.get_or_insert(job);
                    }
                    Err(e) => self.report.errors.push(e.to_string()),
                },
                other => debug!(method = other, "Ignoring notification"),
            }
        }
        Ok(Some(message))
    }

    /// Analyze the first job and hand back the finished report.
    fn analyze(mut self) -> AuditReport {
        let Some(job) = self.first_job.take() else {
            return self.report;
        };

        info!("Phase 4: coinbase analysis");
        match analyze_coinbase(&job) {
            Ok(analysis) => {
                info!(tag = ?analysis.coinbase_tag, "Coinbase tag");
                self.report.coinbase = Some(analysis);
            }
            Err(e) => self.report.errors.push(e.to_string()),
        }

        if let Some(subscription) = &self.subscription {
            match analyze_payout(&job, subscription, &self.config.wallet) {
                Ok(payout) => {
                    info!(
                        total_sats = payout.total_sats,
                        outputs = payout.outputs.len(),
                        wallet_share = ?payout.wallet_share,
                        "Payout split"
                    );
                    self.report.payout = Some(payout);
                }
                Err(e) => self.report.errors.push(e.to_string()),
            }
        }
        self.report
    }
}
