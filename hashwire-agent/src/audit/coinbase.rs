//! What a job's coinbase says about the pool that built it.
//!
//! The pool tag lives in the coinbase input script, which Stratum sends in
//! `coinbase1`. The outputs live in `coinbase2`. Joining the two around the
//! extranonces gives a complete transaction, so the reward split can be
//! read without ever finding a block.

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network, ScriptBuf, Transaction};
use serde::Serialize;

use super::messages::{JobNotification, SubscribeResult};
use super::AuditError;

/// Shortest printable run that counts as text.
const MIN_ASCII_RUN: usize = 3;

/// Hex fields longer than this are cut in the report.
const HEX_PREVIEW: usize = 100;

/// Substrings that mark a run as the pool tag, in priority order.
const TAG_MARKERS: &[&str] = &["bitaxeluck", "ckpool", "pool"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinbaseAnalysis {
    pub coinbase1_hex: String,
    pub coinbase2_hex: String,
    pub coinbase_tag: Option<String>,
    pub ascii_strings_found: Vec<String>,
    pub interpretation: PoolInterpretation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolInterpretation {
    pub is_ckpool: bool,
    pub is_custom_pool: bool,
    pub is_proxy: bool,
    pub is_solo: bool,
    pub identified_software: String,
    pub branding: Option<String>,
}

/// Where one coinbase output pays to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Destination {
    Address(String),
    /// Data carrier; on a coinbase usually the witness commitment.
    OpReturn,
    Nonstandard(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutOutput {
    pub value_sats: u64,
    pub destination: Destination,
    /// Fraction of the total coinbase value.
    pub share: f64,
    pub to_wallet: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutAnalysis {
    pub total_sats: u64,
    pub outputs: Vec<PayoutOutput>,
    /// Fraction paid to the audited wallet. `None` when the wallet is not a
    /// valid address or the coinbase pays nothing.
    pub wallet_share: Option<f64>,
    /// What the pool keeps, as seen from this template: `1 - wallet_share`.
    pub implied_fee: Option<f64>,
}

/// Printable ASCII runs of at least three characters, in order.
pub fn ascii_runs(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| !(b' '..=b'~').contains(b))
        .filter(|run| run.len() >= MIN_ASCII_RUN)
        .map(|run| run.iter().map(|&b| char::from(b)).collect())
        .collect()
}

/// The first run mentioning a pool marker, else the longest run (first wins
/// a tie).
fn pick_tag(runs: &[String]) -> Option<String> {
    runs.iter()
        .find(|run| {
            let lower = run.to_lowercase();
            TAG_MARKERS.iter().any(|marker| lower.contains(marker))
        })
        .or_else(|| {
            runs.iter()
                .rev()
                .max_by_key(|run| run.len())
        })
        .cloned()
}

fn interpret(runs: &[String]) -> PoolInterpretation {
    let all = runs.join(" ").to_lowercase();
    let is_ckpool = all.contains("ckpool") || all.contains("/ck");
    let is_custom_pool = all.contains("bitaxeluck");

    PoolInterpretation {
        is_ckpool,
        is_custom_pool,
        is_proxy: all.contains("proxy") || all.contains("relay"),
        is_solo: all.contains("solo"),
        identified_software: if is_ckpool { "CKPool" } else { "unknown" }.to_string(),
        branding: is_custom_pool.then(|| "pool.bitaxeluck.com".to_string()),
    }
}

fn preview(digits: &str) -> String {
    match digits.get(..HEX_PREVIEW) {
        Some(head) if digits.len() > HEX_PREVIEW => format!("{head}..."),
        _ => digits.to_string(),
    }
}

fn decode(what: &str, digits: &str) -> Result<Vec<u8>, AuditError> {
    hex::decode(digits).map_err(|e| AuditError::Coinbase(format!("{what}: {e}")))
}

/// Tag and pool fingerprint from a job's `coinbase1`.
pub fn analyze_coinbase(job: &JobNotification) -> Result<CoinbaseAnalysis, AuditError> {
    let coinbase1 = decode("coinbase1", &job.coinbase1)?;
    let runs = ascii_runs(&coinbase1);

    Ok(CoinbaseAnalysis {
        coinbase1_hex: preview(&job.coinbase1),
        coinbase2_hex: preview(&job.coinbase2),
        coinbase_tag: pick_tag(&runs),
        interpretation: interpret(&runs),
        ascii_strings_found: runs,
    })
}

/// Rebuild the coinbase with a zero extranonce2 and read its outputs.
pub fn analyze_payout(
    job: &JobNotification,
    subscription: &SubscribeResult,
    wallet: &str,
) -> Result<PayoutAnalysis, AuditError> {
    let mut raw = decode("coinbase1", &job.coinbase1)?;
    raw.extend(decode("extranonce1", &subscription.extranonce1)?);
    raw.resize(raw.len() + subscription.extranonce2_size, 0);
    raw.extend(decode("coinbase2", &job.coinbase2)?);

    let tx: Transaction = bitcoin::consensus::deserialize(&raw)
        .map_err(|e| AuditError::Coinbase(format!("transaction: {e}")))?;

    let wallet_script: Option<ScriptBuf> = wallet
        .parse::<Address<NetworkUnchecked>>()
        .ok()
        .map(|address| address.assume_checked().script_pubkey());

    let total_sats: u64 = tx.output.iter().map(|out| out.value.to_sat()).sum();
    let fraction = |sats: u64| {
        if total_sats == 0 {
            0.0
        } else {
            sats as f64 / total_sats as f64
        }
    };

    let outputs: Vec<PayoutOutput> = tx
        .output
        .iter()
        .map(|out| PayoutOutput {
            value_sats: out.value.to_sat(),
            destination: destination(&out.script_pubkey),
            share: fraction(out.value.to_sat()),
            to_wallet: wallet_script.as_ref() == Some(&out.script_pubkey),
        })
        .collect();

    let wallet_share = (wallet_script.is_some() && total_sats > 0).then(|| {
        outputs
            .iter()
            .filter(|out| out.to_wallet)
            .map(|out| out.share)
            .sum::<f64>()
    });

    Ok(PayoutAnalysis {
        total_sats,
        outputs,
        wallet_share,
        implied_fee: wallet_share.map(|share| 1.0 - share),
    })
}

fn destination(script: &ScriptBuf) -> Destination {
    if script.is_op_return() {
        return Destination::OpReturn;
    }
    match Address::from_script(script, Network::Bitcoin) {
        Ok(address) => Destination::Address(address.to_string()),
        Err(_) => Destination::Nonstandard(hex::encode(script.as_bytes())),
    }
}
