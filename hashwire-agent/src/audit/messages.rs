//! Stratum v1 JSON-RPC messages, as far as the auditor needs them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AuditError;

/// Client-to-pool request. One per line on the wire.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Value,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Value,
}

/// Pool-to-client message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Reply to one of our requests.
    Response {
        id: Option<u64>,
        result: Value,
        error: Option<Value>,
    },
    /// Anything carrying a method: `mining.notify`, `mining.set_difficulty`,
    /// `client.reconnect` and friends.
    Notification { method: String, params: Vec<Value> },
}

impl Message {
    pub fn parse(line: &str) -> Result<Self, AuditError> {
        let raw: RawMessage = serde_json::from_str(line).map_err(|e| {
            let head: String = line.chars().take(50).collect();
            AuditError::InvalidMessage(format!("{e} in {head:?}"))
        })?;

        Ok(match raw.method {
            Some(method) => Message::Notification {
                method,
                params: match raw.params {
                    Value::Array(params) => params,
                    Value::Null => Vec::new(),
                    other => vec![other],
                },
            },
            None => Message::Response {
                id: raw.id.as_u64(),
                result: raw.result,
                error: (!raw.error.is_null()).then_some(raw.error),
            },
        })
    }
}

/// Result of `mining.subscribe`:
/// `[[["mining.set_difficulty", id], ["mining.notify", id]], extranonce1, extranonce2_size]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeResult {
    pub subscriptions: Value,
    pub extranonce1: String,
    pub extranonce2_size: usize,
}

impl SubscribeResult {
    pub fn from_result(result: &Value) -> Result<Self, AuditError> {
        let invalid = || AuditError::Protocol(format!("unexpected subscribe result: {result}"));

        let items = result.as_array().filter(|a| a.len() >= 3).ok_or_else(invalid)?;
        let subscriptions = match &items[0] {
            list @ Value::Array(_) => list.clone(),
            _ => Value::Array(Vec::new()),
        };
        let extranonce1 = items[1].as_str().ok_or_else(invalid)?.to_string();
        let extranonce2_size = items[2]
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(invalid)?;

        Ok(Self {
            subscriptions,
            extranonce1,
            extranonce2_size,
        })
    }
}

/// Parameters of one `mining.notify`, still in wire (hex) form.
#[derive(Debug, Clone, PartialEq)]
pub struct JobNotification {
    pub job_id: String,
    pub prev_hash: String,
    pub coinbase1: String,
    pub coinbase2: String,
    pub merkle_branches: Vec<String>,
    pub version: String,
    pub nbits: String,
    pub ntime: String,
    pub clean_jobs: bool,
}

impl JobNotification {
    pub fn from_stratum_params(params: &[Value]) -> Result<Self, AuditError> {
        if params.len() < 8 {
            return Err(AuditError::Protocol(format!(
                "mining.notify with {} params",
                params.len()
            )));
        }

        let text = |index: usize| {
            params[index].as_str().map(str::to_string).ok_or_else(|| {
                AuditError::Protocol(format!("mining.notify param {index} is not a string"))
            })
        };

        let merkle_branches = params[4]
            .as_array()
            .and_then(|branches| {
                branches
                    .iter()
                    .map(|b| b.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or_else(|| AuditError::Protocol("mining.notify merkle branches".to_string()))?;

        Ok(Self {
            job_id: text(0)?,
            prev_hash: text(1)?,
            coinbase1: text(2)?,
            coinbase2: text(3)?,
            merkle_branches,
            version: text(5)?,
            nbits: text(6)?,
            ntime: text(7)?,
            clean_jobs: params.get(8).and_then(Value::as_bool).unwrap_or(true),
        })
    }
}
