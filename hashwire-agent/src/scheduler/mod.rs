//! The polling loop.
//!
//! Once per interval the scheduler polls every target concurrently, sends
//! whatever records came back as one batch, and reports a [`TickSummary`].
//!
//! Failure isolation comes from the shape of a tick: each target's poll is
//! its own future with its own timeout, the scheduler waits for all of them,
//! and a failed poll simply contributes no record. Ticks never overlap; if
//! one overruns, the boundaries it covered are skipped rather than queued.

mod summary;

pub use summary::{DeviceFailure, DeviceReading, LogReporter, TickReporter, TickSummary};

use std::time::Duration;

use futures::future::join_all;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::device::{DeviceTarget, PollError, Poller};
use crate::tracing::prelude::*;
use crate::uplink::{DropReason, SendOutcome, Uplink, UplinkBatch, UplinkError};

pub struct Scheduler<P, U, R> {
    targets: Vec<DeviceTarget>,
    poller: P,
    uplink: U,
    reporter: R,
    interval: Duration,
    poll_timeout: Duration,
    failure_threshold: u32,
}

impl<P, U, R> Scheduler<P, U, R>
where
    P: Poller,
    U: Uplink,
    R: TickReporter,
{
    /// Build a scheduler from validated configuration.
    pub fn new(config: &AgentConfig, poller: P, uplink: U, reporter: R) -> Self {
        Self {
            targets: config.device_targets(),
            poller,
            uplink,
            reporter,
            interval: config.interval,
            poll_timeout: config.effective_poll_timeout(),
            failure_threshold: config.failure_threshold.max(1),
        }
    }

    pub fn targets(&self) -> &[DeviceTarget] {
        &self.targets
    }

    /// Run ticks until `cancel` fires.
    ///
    /// Cancellation stops the timer. A tick already in progress finishes its
    /// polls (each bounded by the poll timeout); a send in progress is
    /// abandoned at its next backoff wait.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            targets = self.targets.len(),
            interval_secs = self.interval.as_secs_f64(),
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "Starting collection loop"
        );

        let start = Instant::now();
        let mut next = start;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = time::sleep_until(next) => {}
            }

            let scheduled = next;
            self.tick(&cancel).await;

            next = next_boundary(start, self.interval, Instant::now());
            let periods = (next - scheduled).as_nanos() / self.interval.as_nanos().max(1);
            let skipped = periods.saturating_sub(1) as u64;
            if skipped > 0 {
                debug!(skipped, "Tick overran the interval, skipping missed ticks");
            }
        }

        info!("Collection loop stopped");
    }

    /// Run one tick: poll everything, send, report.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> TickSummary {
        let poller = &self.poller;
        let poll_timeout = self.poll_timeout;

        let polls = self.targets.iter_mut().map(|target| async move {
            let outcome = time::timeout(poll_timeout, poller.poll(target)).await;
            let result = match outcome {
                Ok(result) => result,
                Err(_) => {
                    // The poll future was dropped mid-flight, so it never
                    // recorded anything.
                    let error = PollError::TimedOut(poll_timeout);
                    target.record_failure(error.clone());
                    Err(error)
                }
            };
            (target, result)
        });
        let results = join_all(polls).await;

        let total = results.len();
        let mut records = Vec::with_capacity(total);
        let mut readings = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut escalated = Vec::new();

        for (target, result) in results {
            match result {
                Ok(record) => {
                    readings.push(DeviceReading {
                        label: record.label.clone(),
                        hashrate: record.hashrate,
                        temperature_c: record.temperature_c,
                    });
                    records.push(record);
                }
                Err(error) => {
                    let label = target.label();
                    let streak = target.consecutive_failures();

                    if streak % self.failure_threshold == 0 {
                        warn!(
                            device = %label,
                            address = target.address(),
                            error = %error,
                            "{streak} consecutive failures"
                        );
                        escalated.push(label.clone());
                    } else if streak == 1 {
                        warn!(device = %label, error = %error, "Failed to fetch metrics");
                    } else {
                        debug!(
                            device = %label,
                            error = %error,
                            streak,
                            "Failed to fetch metrics"
                        );
                    }

                    failures.push(DeviceFailure {
                        label,
                        kind: error.kind(),
                        consecutive_failures: streak,
                    });
                }
            }
        }

        let batch = UplinkBatch::new(records);
        let send = if batch.is_empty() {
            None
        } else {
            let outcome = self.uplink.send(&batch, cancel).await;
            if let SendOutcome::Dropped {
                error,
                reason,
                attempts,
            } = &outcome
            {
                log_dropped(batch.len(), error, *reason, *attempts);
            }
            Some(outcome)
        };

        let summary = TickSummary {
            total,
            readings,
            failures,
            escalated,
            send,
        };
        self.reporter.report(&summary);
        summary
    }
}

fn log_dropped(records: usize, error: &UplinkError, reason: DropReason, attempts: u32) {
    match error {
        UplinkError::AuthError(_) | UplinkError::ClientError(_) => error!(
            records,
            %reason,
            attempts,
            "Batch rejected by the write endpoint, dropped: {error}"
        ),
        _ => warn!(records, %reason, attempts, "Batch dropped: {error}"),
    }
}

/// First interval boundary strictly after `now`, counting from `start`.
fn next_boundary(start: Instant, interval: Duration, now: Instant) -> Instant {
    let period = interval.as_nanos().max(1);
    let elapsed = now.saturating_duration_since(start).as_nanos();
    let boundaries = elapsed / period + 1;
    let offset = boundaries.saturating_mul(period).min(u64::MAX as u128) as u64;
    start + Duration::from_nanos(offset)
}
