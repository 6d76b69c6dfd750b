//! Command journal.
//!
//! Every change to the replica, whether it came from the remote service, a
//! local intent, the connection monitor or a decay tick, is first wrapped in a
//! [`Command`] carrying the time it was constructed.  Reducers only ever look
//! at `command.timestamp()`, never at the clock, so replaying a journal against
//! a fresh store reproduces the same state regardless of when it runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tandem_proto::protocol::PartialSnapshot;
use tandem_proto::state::{ChannelId, Preset, ProcessingParams, Track};

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Source of command timestamps (epoch milliseconds).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock for replay and tests.  Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self(Arc::new(AtomicI64::new(start_ms)))
    }

    pub fn set(&self, ms: i64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Op / Command ──────────────────────────────────────────────────────────────

/// What a command does.  Serialised as `{"kind": ..., "payload": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Op {
    // ── Playback fields ─────────────────────────────────────────────────────
    SetPlaying(bool),
    SetCurrentTrack(Option<Track>),
    SetCurrentTime(f64),
    SetDuration(f64),
    SetVolume(f64),
    SetMuted(bool),
    SetPreset(Preset),
    /// Partial authoritative snapshot.
    Merge(PartialSnapshot),

    // ── Stream lifecycle ────────────────────────────────────────────────────
    StreamStart {
        channel: ChannelId,
        track_id: i64,
        total_chunks: i64,
        intensity: f64,
    },
    StreamProgress {
        channel: ChannelId,
        processed_chunks: i64,
        buffered_samples: i64,
        progress: f64,
    },
    StreamComplete {
        channel: ChannelId,
    },
    StreamFail {
        channel: ChannelId,
        error: String,
    },
    StreamReset {
        channel: ChannelId,
    },

    // ── Connection ──────────────────────────────────────────────────────────
    SetTransportConnected(bool),
    SetServiceConnected(bool),
    SetLatency(f64),
    IncrementReconnectAttempts,
    ResetReconnectAttempts,
    RecordError(String),

    // ── Misc ────────────────────────────────────────────────────────────────
    SetProcessingParams(ProcessingParams),
    /// A decay animation frame fired.  Carries the tick id it was scheduled as.
    DecayTick(u64),
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::SetPlaying(_) => "set_playing",
            Op::SetCurrentTrack(_) => "set_current_track",
            Op::SetCurrentTime(_) => "set_current_time",
            Op::SetDuration(_) => "set_duration",
            Op::SetVolume(_) => "set_volume",
            Op::SetMuted(_) => "set_muted",
            Op::SetPreset(_) => "set_preset",
            Op::Merge(_) => "merge",
            Op::StreamStart { .. } => "stream_start",
            Op::StreamProgress { .. } => "stream_progress",
            Op::StreamComplete { .. } => "stream_complete",
            Op::StreamFail { .. } => "stream_fail",
            Op::StreamReset { .. } => "stream_reset",
            Op::SetTransportConnected(_) => "set_transport_connected",
            Op::SetServiceConnected(_) => "set_service_connected",
            Op::SetLatency(_) => "set_latency",
            Op::IncrementReconnectAttempts => "increment_reconnect_attempts",
            Op::ResetReconnectAttempts => "reset_reconnect_attempts",
            Op::RecordError(_) => "record_error",
            Op::SetProcessingParams(_) => "set_processing_params",
            Op::DecayTick(_) => "decay_tick",
        }
    }

    /// The channel a stream op is addressed to.
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            Op::StreamStart { channel, .. }
            | Op::StreamProgress { channel, .. }
            | Op::StreamComplete { channel }
            | Op::StreamFail { channel, .. }
            | Op::StreamReset { channel } => Some(*channel),
            _ => None,
        }
    }
}

/// A timestamped, immutable change request.  Fields are private so the
/// timestamp cannot be rewritten after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    op: Op,
    timestamp: i64,
}

impl Command {
    /// A command with a pre-assigned timestamp (replay, tests).
    pub fn at(op: Op, timestamp: i64) -> Self {
        Self { op, timestamp }
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn kind(&self) -> &'static str {
        self.op.name()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

// ── Journal ───────────────────────────────────────────────────────────────────

/// Stamps commands and keeps a bounded history of what was applied.
pub struct Journal {
    clock: Arc<dyn Clock>,
    history: VecDeque<Command>,
    capacity: usize,
    /// Highest timestamp handed out or recorded so far.
    last_stamp: i64,
}

impl Journal {
    pub fn new(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            clock,
            history: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
            last_stamp: i64::MIN,
        }
    }

    /// Wrap `op` with the current time.  Stamps never go backwards, so
    /// submission order and timestamp order agree even if the wall clock
    /// steps back.
    pub fn stamp(&mut self, op: Op) -> Command {
        let timestamp = self.clock.now_ms().max(self.last_stamp);
        self.last_stamp = timestamp;
        Command { op, timestamp }
    }

    pub fn record(&mut self, command: &Command) {
        self.last_stamp = self.last_stamp.max(command.timestamp);
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(command.clone());
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn history(&self) -> impl Iterator<Item = &Command> {
        self.history.iter()
    }

    /// The newest `n` commands, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Command> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_uses_clock_at_call_time() {
        let clock = ManualClock::new(1_000);
        let mut journal = Journal::new(Arc::new(clock.clone()), 8);
        let a = journal.stamp(Op::SetPlaying(true));
        clock.advance(250);
        let b = journal.stamp(Op::SetPlaying(false));
        assert_eq!(a.timestamp(), 1_000);
        assert_eq!(b.timestamp(), 1_250);
        // the first command is unaffected by later clock movement
        assert_eq!(a.timestamp(), 1_000);
    }

    #[test]
    fn test_stamps_never_go_backwards() {
        let clock = ManualClock::new(5_000);
        let mut journal = Journal::new(Arc::new(clock.clone()), 8);
        let a = journal.stamp(Op::SetVolume(10.0));
        clock.set(4_000);
        let b = journal.stamp(Op::SetVolume(20.0));
        assert_eq!(a.timestamp(), 5_000);
        assert_eq!(b.timestamp(), 5_000);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut journal = Journal::new(Arc::new(ManualClock::new(0)), 3);
        for i in 0..5 {
            let cmd = journal.stamp(Op::SetCurrentTime(i as f64));
            journal.record(&cmd);
        }
        assert_eq!(journal.len(), 3);
        let times: Vec<_> = journal
            .history()
            .map(|c| match c.op() {
                Op::SetCurrentTime(t) => *t,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(times, vec![2.0, 3.0, 4.0]);
        assert_eq!(journal.recent(2).len(), 2);
        assert_eq!(journal.recent(10).len(), 3);
    }

    #[test]
    fn test_command_wire_shape() {
        let cmd = Command::at(
            Op::StreamComplete {
                channel: ChannelId::Enhanced,
            },
            42,
        );
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["op"]["kind"], "stream_complete");
        assert_eq!(json["op"]["payload"]["channel"], "enhanced");
        assert_eq!(json["timestamp"], 42);

        let unit = serde_json::to_value(Command::at(Op::IncrementReconnectAttempts, 1)).unwrap();
        assert_eq!(unit["op"]["kind"], "increment_reconnect_attempts");

        let back: Command = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_op_channel() {
        let op = Op::StreamFail {
            channel: ChannelId::Baseline,
            error: "boom".into(),
        };
        assert_eq!(op.channel(), Some(ChannelId::Baseline));
        assert_eq!(Op::SetMuted(true).channel(), None);
    }
}
