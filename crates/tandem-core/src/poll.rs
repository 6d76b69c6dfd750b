//! Processing-parameters poller.
//!
//! Fetches the service's current processing parameters on a fixed interval
//! and reports the round-trip as latency.  A failed or slow poll is logged
//! and skipped; the next one runs on schedule.

use std::time::{Duration, Instant};

use tandem_proto::config::Config;
use tandem_proto::state::ProcessingParams;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::SyncEvent;
use crate::error::{Result, SyncError};
use crate::inbound::TransportEvent;

pub const PARAMETERS_PATH: &str = "/api/processing/parameters";

pub struct ParamsPoller {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    event_tx: mpsc::Sender<SyncEvent>,
    cancel: CancellationToken,
}

impl ParamsPoller {
    pub fn new(
        config: &Config,
        event_tx: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.polling.timeout())
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}{}",
                config.remote.api_base_url.trim_end_matches('/'),
                PARAMETERS_PATH
            ),
            interval: config.polling.interval(),
            event_tx,
            cancel,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One request.  Returns the parameters and the measured round-trip.
    pub async fn poll_once(&self) -> Result<(ProcessingParams, Duration)> {
        let started = Instant::now();
        let params = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<ProcessingParams>()
            .await?;
        Ok((params, started.elapsed()))
    }

    /// Poll until cancelled.  Fails only when the core queue is gone.
    pub async fn run(self) -> Result<()> {
        info!("poller: polling {} every {:?}", self.url, self.interval);
        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };

            match outcome {
                Ok((params, rtt)) => {
                    self.send(SyncEvent::Params(params)).await?;
                    let latency_ms = rtt.as_secs_f64() * 1_000.0;
                    self.send(SyncEvent::Transport(TransportEvent::Latency(latency_ms)))
                        .await?;
                }
                Err(e) => debug!("poller: {}", e),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("poller: stopped");
        Ok(())
    }

    async fn send(&self, event: SyncEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| SyncError::QueueClosed)
    }
}
