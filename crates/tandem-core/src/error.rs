use tandem_proto::state::{ChannelId, StreamState};

/// Errors surfaced by the engine.  None of them are fatal: the core loop logs
/// them and carries on with the state it already has.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{channel}: cannot {op} while {from}")]
    InvalidTransition {
        channel: ChannelId,
        op: &'static str,
        from: StreamState,
    },

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("event queue closed")]
    QueueClosed,

    #[error("store has been torn down")]
    TornDown,
}

pub type Result<T> = std::result::Result<T, SyncError>;
