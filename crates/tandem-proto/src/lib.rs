//! Shared types for the tandem playback synchronization engine: the state
//! model, the push-message wire protocol, configuration and platform paths.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;
