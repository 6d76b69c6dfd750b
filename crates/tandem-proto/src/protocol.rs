use serde::{Deserialize, Deserializer, Serialize};

use crate::state::{ChannelId, Preset, StreamChannel, Track};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  The service announces its version in `Hello`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame body.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Messages pushed by the remote playback service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// Sent immediately on connect: service version + snapshot.
    Hello {
        protocol_version: u32,
        #[serde(default)]
        state: PartialSnapshot,
    },
    PlayerState {
        data: PlayerStateUpdate,
    },
    StateSnapshot {
        data: PartialSnapshot,
    },
    StreamStart {
        channel: ChannelId,
        track_id: i64,
        #[serde(default)]
        total_chunks: i64,
        #[serde(default = "default_intensity")]
        intensity: f64,
    },
    StreamProgress {
        channel: ChannelId,
        #[serde(default)]
        processed_chunks: i64,
        #[serde(default)]
        buffered_samples: i64,
        #[serde(default)]
        progress: f64,
    },
    StreamComplete {
        channel: ChannelId,
    },
    StreamError {
        channel: ChannelId,
        error: String,
    },
    StreamReset {
        channel: ChannelId,
    },
    /// Whether the service's own playback backend is reachable.
    ServiceStatus {
        connected: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

fn default_intensity() -> f64 {
    1.0
}

/// `player_state` payload.  Every field is optional; absent fields must not
/// touch local state.  `current_track: null` clears the track, while an
/// absent `current_track` leaves it alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlayerStateUpdate {
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_track: Option<Option<Track>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_preset: Option<Preset>,
}

/// Any subset of the top-level playback fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PartialSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_track: Option<Option<Track>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<Preset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<PartialStreaming>,
}

impl PartialSnapshot {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Channels present here replace the local channel wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PartialStreaming {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<StreamChannel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced: Option<StreamChannel>,
}

impl PartialStreaming {
    pub fn channel(&self, id: ChannelId) -> Option<&StreamChannel> {
        match id {
            ChannelId::Baseline => self.baseline.as_ref(),
            ChannelId::Enhanced => self.enhanced.as_ref(),
        }
    }
}

/// Present-but-null deserializes to `Some(None)`; absent (via `default`) to `None`.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl PushMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::Hello { .. } => "hello",
            PushMessage::PlayerState { .. } => "player_state",
            PushMessage::StateSnapshot { .. } => "state_snapshot",
            PushMessage::StreamStart { .. } => "stream_start",
            PushMessage::StreamProgress { .. } => "stream_progress",
            PushMessage::StreamComplete { .. } => "stream_complete",
            PushMessage::StreamError { .. } => "stream_error",
            PushMessage::StreamReset { .. } => "stream_reset",
            PushMessage::ServiceStatus { .. } => "service_status",
        }
    }

    /// Length-prefixed frame: 4-byte big-endian body length, then JSON.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_FRAME_LEN {
            anyhow::bail!("frame too large: {} bytes", json.len());
        }
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }
}
