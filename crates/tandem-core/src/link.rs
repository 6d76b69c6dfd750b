//! Push link to the remote processing service.
//!
//! Frames are a 4-byte big-endian length followed by a JSON `PushMessage`.
//! Decoded messages go straight into the core queue in the order they were
//! read.  A frame that fails to decode is logged and dropped; the link stays
//! up.  Oversized frames and read errors end the session.

use std::io;
use std::time::Duration;

use futures_util::StreamExt;
use tandem_proto::config::Config;
use tandem_proto::protocol::{PushMessage, MAX_FRAME_LEN};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::LengthDelimitedCodec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{SnapshotHandle, SyncEvent};
use crate::error::{Result, SyncError};
use crate::health::{self, Backoff};
use crate::inbound::TransportEvent;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn decode_frame(frame: &[u8]) -> Result<PushMessage> {
    Ok(serde_json::from_slice(frame)?)
}

pub struct RemoteLink {
    address: String,
    connect_timeout: Duration,
    backoff: Backoff,
    event_tx: mpsc::Sender<SyncEvent>,
    snapshot: SnapshotHandle,
    cancel: CancellationToken,
}

impl RemoteLink {
    pub fn new(
        config: &Config,
        event_tx: mpsc::Sender<SyncEvent>,
        snapshot: SnapshotHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            address: config.remote.address.clone(),
            connect_timeout: CONNECT_TIMEOUT,
            backoff: Backoff::from_config(&config.reconnect),
            event_tx,
            snapshot,
            cancel,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Connect, read until the session ends, back off, repeat.  Returns when
    /// cancelled, when the reconnect budget is spent, or with `QueueClosed`
    /// once the core has stopped listening.
    pub async fn run(self) -> Result<()> {
        info!("link: starting, remote {}", self.address);
        let mut attempt: u32 = 0;

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("link: cancelled");
                    return Ok(());
                }
                outcome = self.session() => outcome,
            };

            match outcome {
                Ok(reason) => {
                    info!("link: disconnected: {}", reason);
                    attempt = 0;
                    self.send(SyncEvent::Transport(TransportEvent::Disconnected(reason)))
                        .await?;
                }
                Err(SyncError::QueueClosed) => return Err(SyncError::QueueClosed),
                Err(e) => {
                    debug!("link: connect to {} failed: {}", self.address, e);
                    self.send(SyncEvent::Transport(TransportEvent::ConnectFailed(
                        e.to_string(),
                    )))
                    .await?;
                }
            }

            let conn = self.snapshot.connection().await;
            if !health::can_reconnect(&conn) || attempt >= conn.max_reconnect_attempts {
                warn!(
                    "link: giving up after {} attempts ({})",
                    conn.reconnect_attempts.max(attempt),
                    conn.last_error.as_deref().unwrap_or("no error recorded")
                );
                return Ok(());
            }

            self.send(SyncEvent::Transport(TransportEvent::ReconnectAttempt))
                .await?;
            let delay = {
                let mut rng = rand::thread_rng();
                self.backoff.delay_with_jitter(attempt, &mut rng)
            };
            attempt += 1;
            debug!("link: attempt {} in {:?}", attempt, delay);

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("link: cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One connection.  `Err` means we never got connected; `Ok` carries why
    /// an established session ended.
    async fn session(&self) -> Result<String> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("link: set_nodelay: {}", e);
        }
        info!("link: connected to {}", self.address);
        self.send(SyncEvent::Transport(TransportEvent::Connected))
            .await?;

        let mut frames = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LEN)
            .new_read(stream);

        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => return Ok(format!("read error: {}", e)),
            };
            match decode_frame(&frame) {
                Ok(msg) => self.send(SyncEvent::Push(msg)).await?,
                Err(e) => warn!("link: dropping malformed frame ({} bytes): {}", frame.len(), e),
            }
        }
        Ok("remote closed the connection".to_string())
    }

    async fn send(&self, event: SyncEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| SyncError::QueueClosed)
    }
}
