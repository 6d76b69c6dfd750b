//! Reconciliation of partial authoritative snapshots.
//!
//! A snapshot is a shallow overwrite: each top-level field it carries replaces
//! the local one, every field it omits is left alone.  In particular a
//! snapshot without `streaming` must not touch either channel; a past version
//! replaced the whole `streaming` record with its default whenever the
//! service pushed a playback-only update, wiping live progress.

use tandem_proto::protocol::PartialSnapshot;
use tandem_proto::state::{ChannelId, PlaybackState};

use crate::playback;
use crate::stream;

pub fn merge(current: &PlaybackState, snapshot: &PartialSnapshot, timestamp: i64) -> PlaybackState {
    let mut next = current.clone();
    merge_into(&mut next, snapshot, timestamp);
    next
}

pub fn merge_into(state: &mut PlaybackState, snapshot: &PartialSnapshot, timestamp: i64) {
    if snapshot.is_empty() {
        return;
    }

    // duration before current_time so the clamp sees the new bound
    if let Some(duration) = snapshot.duration {
        playback::set_duration(state, duration);
    }
    if let Some(track) = &snapshot.current_track {
        playback::set_current_track(state, track.clone());
    }
    if let Some(time) = snapshot.current_time {
        playback::set_current_time(state, time);
    }
    if let Some(volume) = snapshot.volume {
        playback::set_volume(state, volume);
    }
    if let Some(muted) = snapshot.is_muted {
        playback::set_muted(state, muted);
    }
    if let Some(preset) = snapshot.preset {
        playback::set_preset(state, preset);
    }
    if let Some(playing) = snapshot.is_playing {
        playback::set_playing(state, playing);
    }

    if let Some(streaming) = &snapshot.streaming {
        for id in ChannelId::ALL {
            if let Some(channel) = streaming.channel(id) {
                *state.streaming.channel_mut(id) = stream::sanitize(channel.clone());
            }
        }
    }

    state.last_updated = timestamp;
}
