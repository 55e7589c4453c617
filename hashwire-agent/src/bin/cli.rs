//! Command-line tools for hashwire-agent.
//!
//! `poll` polls one miner once, the same way the agent does, and prints
//! what would be sent for it. `audit` inspects a Stratum pool and writes
//! its findings to `--out` (the current directory by default).

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use hashwire_agent::audit::{self, AuditConfig, Auditor};
use hashwire_agent::config::DEFAULT_POLL_TIMEOUT;
use hashwire_agent::device::{DeviceClient, DeviceTarget, Poller};
use hashwire_agent::uplink::line_protocol;

#[derive(Parser)]
#[command(name = "hashwire-cli", version, about = "Command-line tools for hashwire-agent")]
struct Cli {
    /// Log protocol traffic.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll one miner and show its record
    Poll {
        /// Miner address, host or host:port
        address: String,
    },

    /// Audit a Stratum v1 pool: protocol, coinbase tag, payout split
    Audit {
        #[arg(long, default_value = audit::DEFAULT_HOST)]
        host: String,

        #[arg(long, default_value_t = audit::DEFAULT_PORT)]
        port: u16,

        /// Payout address to authorize with and look for in the coinbase
        #[arg(long, default_value = audit::DEFAULT_WALLET)]
        wallet: String,

        #[arg(long, default_value = audit::DEFAULT_WORKER)]
        worker: String,

        /// Directory for pool_audit.json and pool_audit.md
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Poll { address } => cmd_poll(&address).await?,
        Command::Audit {
            host,
            port,
            wallet,
            worker,
            out,
        } => {
            hashwire_agent::tracing::init(cli.verbose);
            let mut config = AuditConfig::new(host, port);
            config.wallet = wallet;
            config.worker = worker;
            cmd_audit(config, &out).await?
        }
    }

    Ok(())
}

/// Poll `address` once and print the normalized record.
async fn cmd_poll(address: &str) -> Result<()> {
    let client = DeviceClient::new(DEFAULT_POLL_TIMEOUT)?;
    let mut target = DeviceTarget::new(address);

    let record = match client.poll(&mut target).await {
        Ok(record) => record,
        Err(e) => {
            eprintln!("{}: {} ({})", target.status_url(), e, e.kind());
            std::process::exit(1);
        }
    };

    println!("Label:       {}", record.label);
    println!("Hashrate:    {}", record.hashrate);
    println!("Temperature: {:.1} °C", record.temperature_c);
    if let Some(power) = record.power_w {
        println!("Power:       {:.1} W", power);
    }
    if let (Some(accepted), Some(rejected)) = (record.shares_accepted, record.shares_rejected) {
        println!("Shares:      {} accepted, {} rejected", accepted, rejected);
    }
    if let Some(best) = &record.best_difficulty {
        println!("Best diff:   {}", best);
    }
    if !record.extra.is_empty() {
        println!("Extra:");
        for (key, value) in &record.extra {
            println!("  {}: {:?}", key, value);
        }
    }

    println!();
    match line_protocol::render_point(&record) {
        Some(point) => println!("{}", point),
        None => println!("(no fields to send)"),
    }

    Ok(())
}

/// Run one audit session, write both reports, and print a short summary.
/// Exits non-zero when the pool could not be reached or refused to
/// subscribe us.
async fn cmd_audit(config: AuditConfig, out: &Path) -> Result<()> {
    let report = Auditor::new(config).run().await;

    for path in report.write_to(out)? {
        println!("Wrote {}", path.display());
    }

    let ok = |flag: bool| if flag { "OK" } else { "FAILED" };
    println!();
    println!("Connection:   {}", ok(report.connection.success));
    println!("Protocol:     {}", ok(report.subscribed()));
    println!(
        "Coinbase tag: {}",
        report
            .coinbase
            .as_ref()
            .and_then(|c| c.coinbase_tag.as_deref())
            .unwrap_or("Not found")
    );
    if let Some(share) = report.payout.as_ref().and_then(|p| p.wallet_share) {
        println!("Wallet share: {:.2}%", share * 100.0);
    }
    for error in &report.errors {
        println!("Note:         {}", error);
    }

    if !report.subscribed() {
        std::process::exit(1);
    }
    Ok(())
}
