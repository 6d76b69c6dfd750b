//! Intensity decay scheduler.
//!
//! Drives the "liveness" glow shown next to the player.  While playing the
//! intensity sits at 1.  When playback stops it fades to 0 over
//! `duration_ms` along an ease-out cubic curve, one animation frame at a time.
//! Resuming snaps straight back to 1.
//!
//! Frames are real timers owned through [`PendingTick`]; dropping the handle
//! aborts the timer task, so every exit path (resume, completion, teardown,
//! the scheduler itself being dropped) releases it.  At most one tick is ever
//! pending.  Once [`DecayScheduler::teardown`] has run, ticks are ignored
//! even if their timer had already fired and the event is still queued.

use std::time::Duration;

use tandem_proto::config::DecayConfig;
use tandem_proto::state::DecayState;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

pub const DECAY_DURATION_MS: i64 = 2_500;
pub const DEFAULT_FRAME: Duration = Duration::from_millis(16);

/// Where animation frames are scheduled.  The returned handle, if any, is
/// aborted when the tick is cancelled.
pub trait TickSink: Send {
    fn schedule(&self, tick: u64, after: Duration) -> Option<AbortHandle>;
}

/// An armed animation frame.
#[derive(Debug)]
pub struct PendingTick {
    id: u64,
    timer: Option<AbortHandle>,
}

impl PendingTick {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Idempotent.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for PendingTick {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayTiming {
    pub duration_ms: i64,
    pub frame: Duration,
}

impl Default for DecayTiming {
    fn default() -> Self {
        Self {
            duration_ms: DECAY_DURATION_MS,
            frame: DEFAULT_FRAME,
        }
    }
}

impl From<&DecayConfig> for DecayTiming {
    fn from(config: &DecayConfig) -> Self {
        Self {
            duration_ms: config.duration_ms.max(1) as i64,
            frame: config.frame(),
        }
    }
}

pub fn ease_out_cubic(progress: f64) -> f64 {
    1.0 - (1.0 - progress).powi(3)
}

/// Fraction of the fade elapsed at `now`, in `[0, 1]`.
pub fn decay_progress(decay_start: i64, now: i64, duration_ms: i64) -> f64 {
    let elapsed = now.saturating_sub(decay_start).max(0) as f64;
    (elapsed / duration_ms.max(1) as f64).min(1.0)
}

/// Remaining intensity for a given fade progress.
pub fn intensity_at(progress: f64) -> f64 {
    (1.0 - ease_out_cubic(progress.clamp(0.0, 1.0))).clamp(0.0, 1.0)
}

pub struct DecayScheduler {
    sink: Box<dyn TickSink>,
    timing: DecayTiming,
    is_playing: bool,
    decay_start: Option<i64>,
    state: DecayState,
    pending: Option<PendingTick>,
    next_tick: u64,
    mounted: bool,
}

impl DecayScheduler {
    pub fn new(sink: Box<dyn TickSink>, timing: DecayTiming) -> Self {
        Self {
            sink,
            timing,
            is_playing: false,
            decay_start: None,
            state: DecayState::default(),
            pending: None,
            next_tick: 0,
            mounted: true,
        }
    }

    /// Feed the current play flag.  Only transitions do anything.  Returns
    /// whether the decay state changed.
    pub fn set_playing(&mut self, playing: bool, now: i64) -> bool {
        if !self.mounted || playing == self.is_playing {
            return false;
        }
        self.is_playing = playing;

        if playing {
            self.cancel();
            self.decay_start = None;
            self.state = DecayState {
                is_animating: true,
                intensity: 1.0,
                is_playing: true,
            };
        } else {
            debug!("decay: starting fade at {}", now);
            self.decay_start = Some(now);
            self.state = DecayState {
                is_animating: true,
                intensity: 1.0,
                is_playing: false,
            };
            self.schedule_next();
        }
        true
    }

    /// Handle a fired frame.  Returns the new state, or `None` when the tick
    /// was stale, cancelled, or arrived after teardown.
    pub fn on_tick(&mut self, tick: u64, now: i64) -> Option<DecayState> {
        if !self.mounted {
            trace!("decay: tick {} after teardown ignored", tick);
            return None;
        }
        match &self.pending {
            Some(pending) if pending.id() == tick => {}
            _ => {
                trace!("decay: stale tick {} ignored", tick);
                return None;
            }
        }
        // fired; nothing left to abort
        self.pending = None;

        let start = self.decay_start?;
        let progress = decay_progress(start, now, self.timing.duration_ms);
        if progress < 1.0 {
            // never brighten mid-fade, even if ticks arrive with odd stamps
            self.state.intensity = intensity_at(progress).min(self.state.intensity);
            self.state.is_animating = true;
            self.schedule_next();
        } else {
            debug!("decay: fade finished");
            self.state.intensity = 0.0;
            self.state.is_animating = false;
            self.decay_start = None;
        }
        Some(self.state)
    }

    /// Last state produced by a transition or tick.
    pub fn state(&self) -> DecayState {
        self.state
    }

    /// Drop the pending frame, if any.  Safe to call repeatedly.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(mut pending) => {
                pending.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop for good: cancel the pending frame and refuse all further updates.
    pub fn teardown(&mut self) {
        if self.mounted {
            debug!("decay: teardown");
        }
        self.mounted = false;
        self.cancel();
    }

    pub fn pending_tick(&self) -> Option<u64> {
        self.pending.as_ref().map(PendingTick::id)
    }

    fn schedule_next(&mut self) {
        // replacing the handle drops (and aborts) any previous one
        self.cancel();
        self.next_tick += 1;
        let id = self.next_tick;
        let timer = self.sink.schedule(id, self.timing.frame);
        self.pending = Some(PendingTick { id, timer });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records scheduled ticks instead of arming timers.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink(pub Arc<Mutex<Vec<u64>>>);

    impl TickSink for RecordingSink {
        fn schedule(&self, tick: u64, _after: Duration) -> Option<AbortHandle> {
            self.0.lock().unwrap().push(tick);
            None
        }
    }

    fn scheduler() -> (DecayScheduler, RecordingSink) {
        let sink = RecordingSink::default();
        (
            DecayScheduler::new(Box::new(sink.clone()), DecayTiming::default()),
            sink,
        )
    }

    #[test]
    fn test_curve_endpoints() {
        assert_eq!(intensity_at(0.0), 1.0);
        assert_eq!(intensity_at(1.0), 0.0);
        let mid = intensity_at(decay_progress(0, 500, DECAY_DURATION_MS));
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn test_resume_snaps_to_full() {
        let (mut decay, _) = scheduler();
        decay.set_playing(true, 0);
        decay.set_playing(false, 100);
        let tick = decay.pending_tick().unwrap();
        decay.on_tick(tick, 900).unwrap();
        assert!(decay.state().intensity < 1.0);

        decay.set_playing(true, 1_000);
        assert_eq!(decay.state().intensity, 1.0);
        assert!(decay.state().is_animating);
        assert_eq!(decay.pending_tick(), None);
    }

    #[test]
    fn test_fade_runs_to_zero() {
        let (mut decay, sink) = scheduler();
        decay.set_playing(true, 0);
        decay.set_playing(false, 0);

        let tick = decay.pending_tick().unwrap();
        let at_500 = decay.on_tick(tick, 500).unwrap();
        assert!(at_500.intensity > 0.0 && at_500.intensity < 1.0);
        assert!(at_500.is_animating);

        let tick = decay.pending_tick().unwrap();
        let at_3000 = decay.on_tick(tick, 3_000).unwrap();
        assert_eq!(at_3000.intensity, 0.0);
        assert!(!at_3000.is_animating);
        assert_eq!(decay.pending_tick(), None);
        assert_eq!(sink.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_stale_tick_ignored() {
        let (mut decay, _) = scheduler();
        decay.set_playing(true, 0);
        decay.set_playing(false, 0);
        let first = decay.pending_tick().unwrap();
        decay.set_playing(true, 10);
        decay.set_playing(false, 20);
        let before = decay.state();
        assert_eq!(decay.on_tick(first, 30), None);
        assert_eq!(decay.state(), before);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (mut decay, _) = scheduler();
        decay.set_playing(true, 0);
        decay.set_playing(false, 0);
        assert!(decay.cancel());
        assert!(!decay.cancel());
        assert!(!decay.cancel());
    }

    #[test]
    fn test_teardown_blocks_ticks() {
        let (mut decay, _) = scheduler();
        decay.set_playing(true, 0);
        decay.set_playing(false, 0);
        let tick = decay.pending_tick().unwrap();
        decay.teardown();
        assert_eq!(decay.pending_tick(), None);
        let frozen = decay.state();
        assert_eq!(decay.on_tick(tick, 500), None);
        assert!(!decay.set_playing(true, 600));
        assert_eq!(decay.state(), frozen);
    }

    #[test]
    fn test_tick_follows_curve() {
        let (mut decay, _) = scheduler();
        decay.set_playing(true, 0);
        decay.set_playing(false, 1_000);
        let tick = decay.pending_tick().unwrap();
        let s = decay.on_tick(tick, 1_000 + 1_250).unwrap();
        assert!((s.intensity - intensity_at(0.5)).abs() < 1e-12);
        assert!(s.is_animating);
    }
}
