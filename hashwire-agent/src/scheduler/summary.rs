//! Per-tick outcome and how it is reported.

use crate::device::PollErrorKind;
use crate::tracing::prelude::*;
use crate::types::HashRate;
use crate::uplink::SendOutcome;

/// A device that produced a record this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub label: String,
    pub hashrate: HashRate,
    pub temperature_c: f64,
}

/// A device that did not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFailure {
    pub label: String,
    pub kind: PollErrorKind,
    pub consecutive_failures: u32,
}

/// Aggregate outcome of one tick. Built fresh each tick, then discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub total: usize,
    pub readings: Vec<DeviceReading>,
    pub failures: Vec<DeviceFailure>,

    /// Labels whose failure streak reached the warning threshold this tick.
    pub escalated: Vec<String>,

    /// `None` when there was nothing to send.
    pub send: Option<SendOutcome>,
}

impl TickSummary {
    pub fn succeeded(&self) -> usize {
        self.readings.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Receives every tick's summary.
pub trait TickReporter: Send {
    fn report(&mut self, summary: &TickSummary);
}

impl<F> TickReporter for F
where
    F: FnMut(&TickSummary) + Send,
{
    fn report(&mut self, summary: &TickSummary) {
        self(summary)
    }
}

/// Operator-facing status lines: one per reporting device, plus a summary
/// line when more than one device is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl TickReporter for LogReporter {
    fn report(&mut self, summary: &TickSummary) {
        for line in status_lines(summary) {
            info!("{line}");
        }
    }
}

/// A device only counts as reporting once its reading reached the endpoint.
fn status_lines(summary: &TickSummary) -> Vec<String> {
    let delivered = summary
        .send
        .as_ref()
        .is_some_and(SendOutcome::is_delivered);

    let mut lines = Vec::new();
    if delivered {
        lines.extend(summary.readings.iter().map(|reading| {
            format!(
                "{}: {:.1} GH/s | {:.1}°C",
                reading.label,
                reading.hashrate.as_gigahashes(),
                reading.temperature_c
            )
        }));
    }

    if summary.total > 1 {
        let reporting = if delivered { summary.succeeded() } else { 0 };
        lines.push(format!(
            "Summary: {}/{} miners reporting",
            reporting, summary.total
        ));
    }
    lines
}
