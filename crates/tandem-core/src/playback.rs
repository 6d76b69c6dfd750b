//! Field-level writes to `PlaybackState`.  Each setter keeps the record's
//! invariants: `current_time` within `[0, duration]`, `volume` within
//! `[0, 100]`, and a non-zero volume unmutes.

use tandem_proto::state::{PlaybackState, Preset, Track};

pub const MAX_VOLUME: f64 = 100.0;

pub fn set_playing(state: &mut PlaybackState, playing: bool) {
    state.is_playing = playing;
}

pub fn set_current_track(state: &mut PlaybackState, track: Option<Track>) {
    state.current_track = track;
}

pub fn set_duration(state: &mut PlaybackState, duration: f64) {
    if !duration.is_finite() {
        return;
    }
    state.duration = duration.max(0.0);
    // shrinking the duration must drag the playhead with it
    state.current_time = state.current_time.min(state.duration);
}

pub fn set_current_time(state: &mut PlaybackState, time: f64) {
    if !time.is_finite() {
        return;
    }
    state.current_time = time.clamp(0.0, state.duration.max(0.0));
}

pub fn set_volume(state: &mut PlaybackState, volume: f64) {
    if !volume.is_finite() {
        return;
    }
    state.volume = volume.clamp(0.0, MAX_VOLUME);
    if state.volume > 0.0 {
        state.is_muted = false;
    }
}

pub fn set_muted(state: &mut PlaybackState, muted: bool) {
    state.is_muted = muted;
}

pub fn set_preset(state: &mut PlaybackState, preset: Preset) {
    state.preset = preset;
}
