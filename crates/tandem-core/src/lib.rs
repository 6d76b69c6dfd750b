pub mod core;
pub mod decay;
pub mod error;
pub mod health;
pub mod inbound;
pub mod journal;
pub mod link;
pub mod merge;
pub mod playback;
pub mod poll;
pub mod store;
pub mod stream;

pub use crate::core::{Snapshot, SnapshotHandle, SyncBroadcast, SyncCore, SyncEvent};
pub use error::{Result, SyncError};
pub use inbound::{Intent, TransportEvent};
pub use journal::{Clock, Command, ManualClock, Op, SystemClock};
pub use store::{SyncState, SyncStore};
