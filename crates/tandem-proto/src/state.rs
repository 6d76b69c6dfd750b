//! The synchronized state model.
//!
//! Everything here is plain data.  The reducers that move it between states
//! live in `tandem-core`; consumers only ever see clones of these values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Playback ──────────────────────────────────────────────────────────────────

/// Processing preset applied by the remote service to the enhanced rendition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Adaptive,
    Gentle,
    Warm,
    Bright,
    Punchy,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Adaptive,
        Preset::Gentle,
        Preset::Warm,
        Preset::Bright,
        Preset::Punchy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Adaptive => "adaptive",
            Preset::Gentle => "gentle",
            Preset::Warm => "warm",
            Preset::Bright => "bright",
            Preset::Punchy => "punchy",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown preset '{}'", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Track {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    /// Seconds; 0 when unknown.
    #[serde(default)]
    pub duration: f64,
}

/// Aggregate root of the synchronized replica.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_track: Option<Track>,
    /// Seconds, always `<= duration`.
    pub current_time: f64,
    /// Seconds.
    pub duration: f64,
    /// 0..=100.
    pub volume: f64,
    pub is_muted: bool,
    pub preset: Preset,
    /// Timestamp (epoch ms) of the last command that touched playback fields.
    pub last_updated: i64,
    pub streaming: Streaming,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_track: None,
            current_time: 0.0,
            duration: 0.0,
            volume: 50.0,
            is_muted: false,
            preset: Preset::default(),
            last_updated: 0,
            streaming: Streaming::default(),
        }
    }
}

// ── Streaming channels ────────────────────────────────────────────────────────

/// One of the two content-delivery pipelines being compared.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelId {
    /// Unprocessed rendition.  Older clients call it `normal`.
    #[serde(alias = "normal")]
    Baseline,
    Enhanced,
}

impl ChannelId {
    pub const ALL: [ChannelId; 2] = [ChannelId::Baseline, ChannelId::Enhanced];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelId::Baseline => "baseline",
            ChannelId::Enhanced => "enhanced",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" | "normal" => Ok(ChannelId::Baseline),
            "enhanced" => Ok(ChannelId::Enhanced),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

/// Lifecycle of one channel.
///
/// ```text
///   Idle → Buffering → Streaming → Complete
///              │           │
///              └───────────┴────→ Error
/// ```
/// `Complete` and `Error` are terminal until an explicit reset or a new start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    #[default]
    Idle,
    Buffering,
    Streaming,
    Complete,
    Error,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::Buffering => "buffering",
            StreamState::Streaming => "streaming",
            StreamState::Complete => "complete",
            StreamState::Error => "error",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, StreamState::Buffering | StreamState::Streaming)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StreamChannel {
    pub state: StreamState,
    pub track_id: Option<i64>,
    /// 0..=1.
    pub intensity: f64,
    /// 0..=100.
    pub progress: f64,
    pub buffered_samples: u64,
    pub total_chunks: u64,
    pub processed_chunks: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Streaming {
    pub baseline: StreamChannel,
    pub enhanced: StreamChannel,
}

impl Streaming {
    pub fn channel(&self, id: ChannelId) -> &StreamChannel {
        match id {
            ChannelId::Baseline => &self.baseline,
            ChannelId::Enhanced => &self.enhanced,
        }
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> &mut StreamChannel {
        match id {
            ChannelId::Baseline => &mut self.baseline,
            ChannelId::Enhanced => &mut self.enhanced,
        }
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionState {
    pub transport_connected: bool,
    pub service_connected: bool,
    pub latency_ms: f64,
    /// Always `<= max_reconnect_attempts`.
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub last_reconnect_time: i64,
    pub last_updated: i64,
}

impl ConnectionState {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            transport_connected: false,
            service_connected: false,
            latency_ms: 0.0,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            last_error: None,
            last_reconnect_time: 0,
            last_updated: 0,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }
}

/// Qualitative link classification, derived on read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionHealth {
    Disconnected,
    Slow,
    Moderate,
    Good,
}

// ── Decay ─────────────────────────────────────────────────────────────────────

/// Visual liveness signal.  Never journaled; sampled from the decay scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct DecayState {
    pub is_animating: bool,
    /// 0..=1.
    pub intensity: f64,
    pub is_playing: bool,
}

// ── Processing parameters ─────────────────────────────────────────────────────

/// Body of `GET /api/processing/parameters`.  Unknown keys are kept verbatim
/// so a newer service can add parameters without breaking the replica.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProcessingParams {
    #[serde(default)]
    pub preset: Option<Preset>,
    #[serde(default)]
    pub intensity: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
