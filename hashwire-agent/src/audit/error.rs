use std::time::Duration;

/// What can cut an audit session short, or spoil one of its analyses.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("connection timeout after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection error: {0}")]
    Connect(std::io::Error),

    #[error("pool closed the connection")]
    Closed,

    #[error("stream error: {0}")]
    Stream(#[from] tokio_util::codec::LinesCodecError),

    /// A line that was not a JSON-RPC message. The session goes on.
    #[error("invalid JSON: {0}")]
    InvalidMessage(String),

    /// A message that was JSON but not shaped the way Stratum says.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("coinbase decode error: {0}")]
    Coinbase(String),

    #[error("report could not be written: {0}")]
    Report(#[from] std::io::Error),
}
