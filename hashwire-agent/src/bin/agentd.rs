//! Bitaxe metrics relay daemon.
//!
//! Polls the configured miners on a fixed interval and forwards their
//! metrics to the remote write endpoint until SIGINT or SIGTERM.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use clap::builder::BoolishValueParser;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use hashwire_agent::config::{self, AgentConfig};
use hashwire_agent::device::DeviceClient;
use hashwire_agent::scheduler::{LogReporter, Scheduler};
use hashwire_agent::tracing::{self, prelude::*};
use hashwire_agent::uplink::UplinkSender;

#[derive(Parser, Debug)]
#[command(name = "hashwire-agentd", version, about, long_about = None)]
struct Args {
    /// Miner addresses, comma-separated (host or host:port)
    #[arg(short = 'b', long, env = "BITAXE_IP")]
    bitaxe_ip: String,

    /// Token for the write endpoint
    #[arg(short = 't', long, env = "BITAXELUCK_TOKEN", hide_env_values = true)]
    token: String,

    /// Poll interval in seconds
    #[arg(
        short = 'i',
        long,
        env = "INTERVAL",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval: u64,

    /// Log at debug level
    #[arg(short = 'v', long, env = "VERBOSE", value_parser = BoolishValueParser::new())]
    verbose: bool,

    /// Display names, comma-separated, in the same order as the addresses
    #[arg(short = 'n', long, env = "MINER_NAMES", default_value = "")]
    miner_names: String,

    /// Remote write endpoint
    #[arg(long, env = "HASHWIRE_UPLINK_URL", default_value = config::DEFAULT_UPLINK_URL)]
    uplink_url: String,

    #[arg(long, default_value = config::DEFAULT_BUCKET)]
    bucket: String,

    #[arg(long, default_value = config::DEFAULT_ORG)]
    org: String,

    /// Per-poll timeout in seconds [default: 5, or half the interval if shorter]
    #[arg(long, value_parser = parse_secs)]
    poll_timeout: Option<Duration>,

    /// Consecutive failures before a miner is reported as down
    #[arg(long, default_value_t = config::DEFAULT_FAILURE_THRESHOLD)]
    failure_threshold: u32,

    /// Write attempts per batch, including the first
    #[arg(long, default_value_t = config::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Total backoff allowed per batch, in seconds
    #[arg(long, value_parser = parse_secs, default_value = "30")]
    retry_budget: Duration,

    /// First backoff delay, in seconds
    #[arg(long, value_parser = parse_secs, default_value = "1")]
    backoff_base: Duration,

    /// Longest single backoff delay, in seconds
    #[arg(long, value_parser = parse_secs, default_value = "60")]
    backoff_cap: Duration,
}

impl Args {
    fn into_config(self) -> AgentConfig {
        let targets = AgentConfig::targets_from_lists(&self.bitaxe_ip, &self.miner_names);
        let mut config = AgentConfig::new(targets, self.token);
        config.interval = Duration::from_secs(self.interval);
        config.poll_timeout = self.poll_timeout;
        config.failure_threshold = self.failure_threshold;

        let uplink = &mut config.uplink;
        uplink.url = self.uplink_url;
        uplink.bucket = self.bucket;
        uplink.org = self.org;
        uplink.max_attempts = self.max_attempts;
        uplink.retry_budget = self.retry_budget;
        uplink.backoff_base = self.backoff_base;
        uplink.backoff_cap = self.backoff_cap;

        config
    }
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("`{value}` is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing::init(args.verbose);

    let config = args.into_config();
    config.validate().context("invalid configuration")?;

    let poller = DeviceClient::new(config.effective_poll_timeout())?;
    let uplink = UplinkSender::new(&config.uplink)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        miners = config.targets.len(),
        endpoint = %uplink.url(),
        "Starting hashwire-agentd"
    );

    let cancel = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
        shutdown.cancel();
    });

    Scheduler::new(&config, poller, uplink, LogReporter)
        .run(cancel)
        .await;

    info!("Exiting.");
    Ok(())
}
