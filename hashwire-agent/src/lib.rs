//! Relay Bitaxe miner telemetry to a line-protocol write endpoint.
//!
//! The agent polls each configured miner's `/api/system/info` endpoint on a
//! fixed interval, normalizes the answer into a [`metrics::MetricsRecord`],
//! and forwards every tick's records in one authenticated write request.
//!
//! - [`device`] fetches and parses device status, one target at a time.
//! - [`uplink`] renders line protocol and runs the bounded retry policy.
//! - [`scheduler`] drives the ticks and isolates device failures.
//!
//! [`audit`] is a separate one-shot tool: it inspects the Stratum pool the
//! miners point at.

pub mod audit;
pub mod config;
pub mod device;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod tracing;
pub mod types;
pub mod uplink;
