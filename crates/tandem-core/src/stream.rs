//! Stream lifecycle controller.
//!
//! One controller per channel.  A controller is only ever handed its own
//! `StreamChannel` slot (see `reduce` in `store.rs`), so an op addressed to
//! `baseline` has no way to reach `enhanced`.
//!
//! # Transitions
//! ```text
//!  start     any        → Buffering   (counters zeroed, error cleared)
//!  progress  Buffering  → Streaming   (first update with buffered_samples > 0)
//!  progress  Streaming | Complete | Error → unchanged (counters still land)
//!  complete  Buffering | Streaming → Complete (progress = 100)
//!  fail      any but Idle          → Error    (counters kept)
//!  reset     any        → Idle        (everything zeroed)
//! ```
//!
//! Progress data is clamped rather than rejected: percentages are held inside
//! `[0, 100]` and never move backwards, and `processed_chunks` never decreases.

use tandem_proto::state::{ChannelId, StreamChannel, StreamState};
use tracing::debug;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamController {
    channel: ChannelId,
}

impl StreamController {
    pub fn new(channel: ChannelId) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Begin a new stream.  Abandons whatever the channel was doing.
    pub fn start(&self, slot: &mut StreamChannel, track_id: i64, total_chunks: i64, intensity: f64) {
        if slot.state.is_active() {
            debug!(
                "{}: abandoning stream for track {:?} in favour of {}",
                self.channel, slot.track_id, track_id
            );
        }
        *slot = StreamChannel {
            state: StreamState::Buffering,
            track_id: Some(track_id),
            intensity: clamp_unit(intensity),
            total_chunks: total_chunks.max(0) as u64,
            ..StreamChannel::default()
        };
    }

    /// Updates may arrive reordered, after `complete` or `fail`; their
    /// counters still land but the state stays put.  Only an idle channel,
    /// which has no stream to report on, rejects them.
    pub fn progress(
        &self,
        slot: &mut StreamChannel,
        processed_chunks: i64,
        buffered_samples: i64,
        progress: f64,
    ) -> Result<()> {
        if slot.state == StreamState::Idle {
            return Err(self.rejected("progress", slot.state));
        }

        let mut processed = (processed_chunks.max(0) as u64).max(slot.processed_chunks);
        if slot.total_chunks > 0 {
            processed = processed.min(slot.total_chunks);
        }
        slot.processed_chunks = processed;
        slot.buffered_samples = buffered_samples.max(0) as u64;
        if progress.is_finite() {
            slot.progress = progress.clamp(0.0, 100.0).max(slot.progress);
        }

        if slot.state == StreamState::Buffering && slot.buffered_samples > 0 {
            debug!("{}: buffering → streaming", self.channel);
            slot.state = StreamState::Streaming;
        }
        Ok(())
    }

    pub fn complete(&self, slot: &mut StreamChannel) -> Result<()> {
        if !slot.state.is_active() {
            return Err(self.rejected("complete", slot.state));
        }
        slot.state = StreamState::Complete;
        slot.progress = 100.0;
        Ok(())
    }

    pub fn fail(&self, slot: &mut StreamChannel, message: impl Into<String>) -> Result<()> {
        if slot.state == StreamState::Idle {
            return Err(self.rejected("fail", slot.state));
        }
        slot.state = StreamState::Error;
        slot.error = Some(message.into());
        Ok(())
    }

    pub fn reset(&self, slot: &mut StreamChannel) {
        *slot = StreamChannel::default();
    }

    fn rejected(&self, op: &'static str, from: StreamState) -> SyncError {
        SyncError::InvalidTransition {
            channel: self.channel,
            op,
            from,
        }
    }
}

/// Clamp into `[0, 1]`, sanitising NaN to full intensity.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        1.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Bring a channel received wholesale from a snapshot back inside its ranges.
pub(crate) fn sanitize(mut channel: StreamChannel) -> StreamChannel {
    channel.intensity = clamp_unit(channel.intensity);
    channel.progress = if channel.progress.is_finite() {
        channel.progress.clamp(0.0, 100.0)
    } else {
        0.0
    };
    channel
}
