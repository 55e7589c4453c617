//! Crate-level error type.
//!
//! Device and uplink failures are not errors at this level: they are values
//! ([`PollError`](crate::device::PollError),
//! [`SendOutcome`](crate::uplink::SendOutcome)) that the scheduler absorbs.
//! What remains is whatever can stop the agent before its loop starts.

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Render an error with its whole source chain.
///
/// reqwest's top-level message ("error sending request for url ...") hides
/// the cause; the chain is what says "connection refused".
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
