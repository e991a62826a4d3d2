//! Subscription adapter boundary.
//!
//! Transports push raw payloads into a bounded channel through a
//! [`TelemetryPublisher`]; a single ingest task drains the channel into the
//! [`StateAggregator`]. Delivery is at-most-once: a payload that cannot be
//! queued is dropped and never retried.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregation::StateAggregator;

/// Longest accepted line on the TCP feed, in bytes.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Why a payload could not be handed to the ingest task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("ingest channel is full")]
    Full,

    #[error("ingest channel is closed")]
    Closed,
}

/// Cloneable handle for transports delivering raw payloads.
#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    tx: mpsc::Sender<Vec<u8>>,
}

impl TelemetryPublisher {
    /// Queue one payload without waiting.
    pub fn publish(&self, payload: Vec<u8>) -> Result<(), PublishError> {
        self.tx.try_send(payload).map_err(|e| {
            let err = match e {
                TrySendError::Full(_) => PublishError::Full,
                TrySendError::Closed(_) => PublishError::Closed,
            };
            warn!(error = %err, "Telemetry message dropped before ingest");
            err
        })
    }
}

/// Create the ingest channel.
pub fn channel(capacity: usize) -> (TelemetryPublisher, mpsc::Receiver<Vec<u8>>) {
    let (tx, rx) = mpsc::channel(capacity);
    (TelemetryPublisher { tx }, rx)
}

/// Spawn the task that feeds every queued payload to the aggregator.
///
/// The task ends when all publishers are dropped or `cancel` fires.
pub fn spawn_ingest_loop(
    aggregator: Arc<StateAggregator>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Ingest loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Ingest loop cancelled");
                    break;
                }
                payload = rx.recv() => match payload {
                    Some(payload) => aggregator.ingest(&payload),
                    None => {
                        info!("All telemetry publishers closed; ingest loop stopping");
                        break;
                    }
                },
            }
        }
    })
}

/// Newline-delimited TCP telemetry feed. Each line is one raw payload.
pub struct TcpLineFeed {
    listener: TcpListener,
}

impl TcpLineFeed {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept feed connections until `cancel` fires.
    pub fn spawn(self, publisher: TelemetryPublisher, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(run_accept_loop(self.listener, publisher, cancel))
    }
}

#[instrument(name = "tcp_feed", skip_all)]
async fn run_accept_loop(
    listener: TcpListener,
    publisher: TelemetryPublisher,
    cancel: CancellationToken,
) {
    info!("TCP telemetry feed accepting connections");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Closing TCP telemetry feed");
                break;
            }
            client = listener.accept() => match client {
                Ok((stream, addr)) => {
                    info!(%addr, "Feed client connected");
                    let publisher = publisher.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        match read_lines(stream, publisher, cancel).await {
                            Ok(lines) => info!(%addr, lines, "Feed client disconnected"),
                            Err(e) => warn!(%addr, error = %e, "Feed connection closed with error"),
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept feed connection");
                    if is_transient_error(&e) {
                        sleep(Duration::from_millis(100)).await;
                    } else {
                        break;
                    }
                }
            },
        }
    }
}

async fn read_lines(
    stream: TcpStream,
    publisher: TelemetryPublisher,
    cancel: CancellationToken,
) -> std::io::Result<u64> {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let mut delivered = 0;

    loop {
        line.clear();
        // At most one byte past the cap is buffered per line.
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64 + 1);
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(delivered),
            read = limited.read_until(b'\n', &mut line) => read?,
        };
        if read == 0 {
            return Ok(delivered);
        }

        if line.last() != Some(&b'\n') && line.len() > MAX_LINE_BYTES {
            warn!(max = MAX_LINE_BYTES, "Feed line too long; dropped");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(delivered),
                skipped = skip_line(&mut reader) => skipped?,
            }
            continue;
        }

        let payload = trim_line(&line);
        if payload.is_empty() {
            continue;
        }

        match publisher.publish(payload.to_vec()) {
            Ok(()) => delivered += 1,
            Err(PublishError::Full) => {}
            Err(PublishError::Closed) => {
                debug!("Ingest channel closed; ending feed connection");
                return Ok(delivered);
            }
        }
    }
}

/// Discard input through the next newline or end of stream without buffering it.
async fn skip_line(reader: &mut BufReader<TcpStream>) -> std::io::Result<()> {
    loop {
        let (used, done) = {
            let buf = reader.fill_buf().await?;
            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (buf.len(), buf.is_empty()),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_transient_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionRefused | ConnectionAborted | ConnectionReset | Interrupted | WouldBlock
    )
}
