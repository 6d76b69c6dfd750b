//! Translation of everything that enters the core queue into journal ops.

use tandem_proto::protocol::{PlayerStateUpdate, PushMessage, PROTOCOL_VERSION};
use tandem_proto::state::{ChannelId, PlaybackState, Preset};
use tracing::warn;

use crate::journal::Op;

/// Local user intents.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Play,
    Pause,
    TogglePlay,
    Seek(f64),
    Volume(f64),
    ToggleMute,
    Preset(Preset),
    ResetChannel(ChannelId),
}

/// Events about the push link itself, reported by the link and the poller.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected(String),
    ConnectFailed(String),
    ReconnectAttempt,
    Latency(f64),
}

pub fn ops_from_push(msg: PushMessage) -> Vec<Op> {
    match msg {
        PushMessage::Hello {
            protocol_version,
            state,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                warn!(
                    "service speaks protocol {} (we speak {}), continuing",
                    protocol_version, PROTOCOL_VERSION
                );
            }
            let mut ops = vec![Op::SetServiceConnected(true)];
            if !state.is_empty() {
                ops.push(Op::Merge(state));
            }
            ops
        }
        PushMessage::PlayerState { data } => ops_from_player_state(data),
        PushMessage::StateSnapshot { data } => vec![Op::Merge(data)],
        PushMessage::StreamStart {
            channel,
            track_id,
            total_chunks,
            intensity,
        } => vec![Op::StreamStart {
            channel,
            track_id,
            total_chunks,
            intensity,
        }],
        PushMessage::StreamProgress {
            channel,
            processed_chunks,
            buffered_samples,
            progress,
        } => vec![Op::StreamProgress {
            channel,
            processed_chunks,
            buffered_samples,
            progress,
        }],
        PushMessage::StreamComplete { channel } => vec![Op::StreamComplete { channel }],
        PushMessage::StreamError { channel, error } => vec![Op::StreamFail { channel, error }],
        PushMessage::StreamReset { channel } => vec![Op::StreamReset { channel }],
        PushMessage::ServiceStatus { connected, error } => {
            let mut ops = vec![Op::SetServiceConnected(connected)];
            if let (false, Some(error)) = (connected, error) {
                ops.push(Op::RecordError(error));
            }
            ops
        }
    }
}

/// One op per present field.  `duration` goes before `current_time` so the
/// playhead clamp sees the new bound.
pub fn ops_from_player_state(update: PlayerStateUpdate) -> Vec<Op> {
    let mut ops = Vec::new();
    if let Some(track) = update.current_track {
        ops.push(Op::SetCurrentTrack(track));
    }
    if let Some(duration) = update.duration {
        ops.push(Op::SetDuration(duration));
    }
    if let Some(time) = update.current_time {
        ops.push(Op::SetCurrentTime(time));
    }
    if let Some(volume) = update.volume {
        ops.push(Op::SetVolume(volume));
    }
    if let Some(muted) = update.is_muted {
        ops.push(Op::SetMuted(muted));
    }
    if let Some(preset) = update.current_preset {
        ops.push(Op::SetPreset(preset));
    }
    if let Some(playing) = update.is_playing {
        ops.push(Op::SetPlaying(playing));
    }
    ops
}

/// Toggles resolve against the replica as it is when the intent is dequeued.
pub fn ops_from_intent(intent: Intent, current: &PlaybackState) -> Vec<Op> {
    match intent {
        Intent::Play => vec![Op::SetPlaying(true)],
        Intent::Pause => vec![Op::SetPlaying(false)],
        Intent::TogglePlay => vec![Op::SetPlaying(!current.is_playing)],
        Intent::Seek(secs) => vec![Op::SetCurrentTime(secs)],
        Intent::Volume(v) => vec![Op::SetVolume(v)],
        Intent::ToggleMute => vec![Op::SetMuted(!current.is_muted)],
        Intent::Preset(p) => vec![Op::SetPreset(p)],
        Intent::ResetChannel(channel) => vec![Op::StreamReset { channel }],
    }
}

pub fn ops_from_transport(event: TransportEvent) -> Vec<Op> {
    match event {
        TransportEvent::Connected => vec![Op::SetTransportConnected(true)],
        TransportEvent::Disconnected(reason) => {
            vec![Op::SetTransportConnected(false), Op::RecordError(reason)]
        }
        TransportEvent::ConnectFailed(reason) => vec![Op::RecordError(reason)],
        TransportEvent::ReconnectAttempt => vec![Op::IncrementReconnectAttempts],
        TransportEvent::Latency(ms) => vec![Op::SetLatency(ms)],
    }
}
