//! Synchronization store: the one place the replica is mutated.
//!
//! `reduce`/`apply` are pure functions of `(SyncState, Command)`; the store
//! wraps them with the journal (stamping + history) and the decay scheduler,
//! whose timers are the only side effect.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tandem_proto::config::Config;
use tandem_proto::state::{
    ChannelId, ConnectionHealth, ConnectionState, DecayState, PlaybackState, ProcessingParams,
    StreamChannel, DEFAULT_MAX_RECONNECT_ATTEMPTS,
};
use tracing::{debug, warn};

use crate::decay::{DecayScheduler, DecayTiming, TickSink};
use crate::error::{Result, SyncError};
use crate::health;
use crate::journal::{Clock, Command, Journal, Op};
use crate::merge;
use crate::playback;
use crate::stream::StreamController;

/// Everything the journal replays.  Decay is deliberately absent: it is a
/// function of time, not of commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    pub playback: PlaybackState,
    pub connection: ConnectionState,
    pub processing: Option<ProcessingParams>,
}

impl SyncState {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            playback: PlaybackState::default(),
            connection: ConnectionState::new(max_reconnect_attempts),
            processing: None,
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }
}

/// Apply `command` in place.  A rejected stream transition leaves the state
/// untouched and is returned as an error for the caller to log.
pub fn reduce(state: &mut SyncState, command: &Command) -> Result<()> {
    let ts = command.timestamp();
    let playback_state = &mut state.playback;
    let conn = &mut state.connection;

    match command.op() {
        Op::SetPlaying(v) => playback::set_playing(playback_state, *v),
        Op::SetCurrentTrack(t) => playback::set_current_track(playback_state, t.clone()),
        Op::SetCurrentTime(t) => playback::set_current_time(playback_state, *t),
        Op::SetDuration(d) => playback::set_duration(playback_state, *d),
        Op::SetVolume(v) => playback::set_volume(playback_state, *v),
        Op::SetMuted(m) => playback::set_muted(playback_state, *m),
        Op::SetPreset(p) => playback::set_preset(playback_state, *p),
        Op::Merge(snapshot) => {
            merge::merge_into(playback_state, snapshot, ts);
            return Ok(());
        }

        Op::StreamStart {
            channel,
            track_id,
            total_chunks,
            intensity,
        } => {
            let slot = playback_state.streaming.channel_mut(*channel);
            StreamController::new(*channel).start(slot, *track_id, *total_chunks, *intensity);
        }
        Op::StreamProgress {
            channel,
            processed_chunks,
            buffered_samples,
            progress,
        } => {
            let slot = playback_state.streaming.channel_mut(*channel);
            StreamController::new(*channel).progress(
                slot,
                *processed_chunks,
                *buffered_samples,
                *progress,
            )?;
        }
        Op::StreamComplete { channel } => {
            let slot = playback_state.streaming.channel_mut(*channel);
            StreamController::new(*channel).complete(slot)?;
        }
        Op::StreamFail { channel, error } => {
            let slot = playback_state.streaming.channel_mut(*channel);
            StreamController::new(*channel).fail(slot, error.clone())?;
        }
        Op::StreamReset { channel } => {
            let slot = playback_state.streaming.channel_mut(*channel);
            StreamController::new(*channel).reset(slot);
        }

        Op::SetTransportConnected(v) => {
            health::set_transport_connected(conn, *v, ts);
            return Ok(());
        }
        Op::SetServiceConnected(v) => {
            health::set_service_connected(conn, *v, ts);
            return Ok(());
        }
        Op::SetLatency(ms) => {
            health::set_latency(conn, *ms, ts);
            return Ok(());
        }
        Op::IncrementReconnectAttempts => {
            health::increment_reconnect_attempts(conn, ts);
            return Ok(());
        }
        Op::ResetReconnectAttempts => {
            health::reset_reconnect_attempts(conn, ts);
            return Ok(());
        }
        Op::RecordError(message) => {
            health::record_error(conn, message.clone(), ts);
            return Ok(());
        }

        Op::SetProcessingParams(params) => {
            state.processing = Some(params.clone());
            return Ok(());
        }
        // handled by the store's decay scheduler
        Op::DecayTick(_) => return Ok(()),
    }

    playback_state.last_updated = ts;
    Ok(())
}

/// Pure `(State, Command) -> State`.
pub fn apply(state: &SyncState, command: &Command) -> SyncState {
    let mut next = state.clone();
    if reduce(&mut next, command).is_err() {
        return state.clone();
    }
    next
}

/// Fold a command sequence over `initial`.
pub fn replay<'a>(initial: SyncState, commands: impl IntoIterator<Item = &'a Command>) -> SyncState {
    commands
        .into_iter()
        .fold(initial, |state, command| apply(&state, command))
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreOptions {
    pub max_reconnect_attempts: u32,
    pub journal_capacity: usize,
    pub decay: DecayTiming,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            journal_capacity: 1_024,
            decay: DecayTiming::default(),
        }
    }
}

impl From<&Config> for StoreOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_reconnect_attempts: config.reconnect.max_attempts,
            journal_capacity: config.journal.capacity,
            decay: DecayTiming::from(&config.decay),
        }
    }
}

pub struct SyncStore {
    journal: Journal,
    state: SyncState,
    decay: DecayScheduler,
    /// Bumped whenever `state` or the decay signal changes.
    rev: u64,
    torn_down: bool,
}

impl SyncStore {
    pub fn new(options: StoreOptions, clock: Arc<dyn Clock>, sink: Box<dyn TickSink>) -> Self {
        Self {
            journal: Journal::new(clock, options.journal_capacity),
            state: SyncState::new(options.max_reconnect_attempts),
            decay: DecayScheduler::new(sink, options.decay),
            rev: 0,
            torn_down: false,
        }
    }

    /// Stamp `op` now and apply it.
    pub fn submit(&mut self, op: Op) -> Result<Command> {
        let command = self.journal.stamp(op);
        self.dispatch(command.clone())?;
        Ok(command)
    }

    /// Apply an already-stamped command.  Every state command that reaches a
    /// live store is journaled, including rejected transitions, so a replay
    /// of the history rejects them the same way.  Decay frames are not: they
    /// never touch `SyncState` and would crowd everything else out.
    pub fn dispatch(&mut self, command: Command) -> Result<()> {
        if self.torn_down {
            debug!("store: {} after teardown dropped", command.kind());
            return Err(SyncError::TornDown);
        }
        let ts = command.timestamp();

        if let Op::DecayTick(tick) = command.op() {
            if self.decay.on_tick(*tick, ts).is_some() {
                self.rev += 1;
            }
            return Ok(());
        }
        self.journal.record(&command);

        let before = self.state.clone();
        let outcome = reduce(&mut self.state, &command);
        if let Err(e) = &outcome {
            warn!("store: rejected {}: {}", command.kind(), e);
        }

        let decay_changed = self.decay.set_playing(self.state.playback.is_playing, ts);
        if decay_changed || self.state != before {
            self.rev += 1;
        }
        outcome
    }

    /// Cancel timers and refuse all further commands.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.decay.teardown();
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // ── Read surface ──────────────────────────────────────────────────────────

    pub fn rev(&self) -> u64 {
        self.rev
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.state.playback
    }

    pub fn channel(&self, id: ChannelId) -> &StreamChannel {
        self.state.playback.streaming.channel(id)
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.state.connection
    }

    pub fn health(&self) -> ConnectionHealth {
        health::classify(&self.state.connection)
    }

    pub fn processing(&self) -> Option<&ProcessingParams> {
        self.state.processing.as_ref()
    }

    /// Decay signal as of the last processed frame.
    pub fn decay(&self) -> DecayState {
        self.decay.state()
    }

    pub fn pending_decay_tick(&self) -> Option<u64> {
        self.decay.pending_tick()
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}
