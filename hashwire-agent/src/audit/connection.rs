//! Newline-delimited JSON-RPC over TCP.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::codec::{Framed, LinesCodec};

use super::messages::{Message, Request};
use super::report::ConnectionReport;
use super::AuditError;
use crate::tracing::prelude::*;

/// Longest line accepted from a pool. A notify with a full merkle path and
/// a large coinbase stays well under this.
const MAX_LINE: usize = 64 * 1024;

pub struct Connection {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Connection {
    /// Connect, timing the TCP handshake.
    pub async fn open(
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(Self, ConnectionReport), AuditError> {
        debug!(host, port, "Connecting");
        let started = Instant::now();
        let stream = time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| AuditError::ConnectTimeout(timeout))?
            .map_err(AuditError::Connect)?;
        let elapsed = started.elapsed();

        let report = ConnectionReport::connected(
            elapsed,
            stream.peer_addr().ok().map(|addr: SocketAddr| addr.ip()),
            stream.local_addr().ok().map(|addr| addr.port()),
        );

        let codec = LinesCodec::new_with_max_length(MAX_LINE);
        Ok((
            Self {
                framed: Framed::new(stream, codec),
            },
            report,
        ))
    }

    pub async fn send(&mut self, id: u64, method: &str, params: Vec<Value>) -> Result<(), AuditError> {
        let request = Request { id, method, params };
        let line = serde_json::to_string(&request)
            .map_err(|e| AuditError::Protocol(format!("unencodable request: {e}")))?;
        trace!(%line, "Sending");
        self.framed.send(line).await?;
        debug!(method, "Sent");
        Ok(())
    }

    /// Next message from the pool. Blank lines are skipped.
    pub async fn next(&mut self) -> Result<Message, AuditError> {
        loop {
            let line = match self.framed.next().await {
                Some(line) => line?,
                None => return Err(AuditError::Closed),
            };
            if line.trim().is_empty() {
                continue;
            }
            trace!(%line, "Received");
            return Message::parse(&line);
        }
    }
}
