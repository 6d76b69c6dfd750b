/// SyncCore: single-owner event loop for the replica.
///
/// The push link, the parameters poller, the HTTP surface and the decay
/// timers all send `SyncEvent` messages into one queue.  SyncCore owns the
/// `SyncStore` exclusively and drains the queue strictly in arrival order,
/// so no two commands are ever applied concurrently.
///
/// After each event that changes the replica, SyncCore copies a read view
/// into the shared `SnapshotHandle` and broadcasts
/// `SyncBroadcast::StateUpdated` to every listener.
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tandem_proto::config::Config;
use tandem_proto::protocol::PushMessage;
use tandem_proto::state::{
    ChannelId, ConnectionHealth, ConnectionState, DecayState, PlaybackState, ProcessingParams,
    StreamState,
};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use crate::decay::TickSink;
use crate::inbound::{self, Intent, TransportEvent};
use crate::journal::{Clock, Command, Op};
use crate::store::{StoreOptions, SyncStore};

/// How many journal entries a snapshot carries.
pub const SNAPSHOT_RECENT: usize = 32;

// ── SyncEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the SyncCore loop.
#[derive(Debug)]
pub enum SyncEvent {
    /// Decoded frame from the push link.
    Push(PushMessage),
    /// Fresh processing parameters from the poller.
    Params(ProcessingParams),
    /// Link / latency report.
    Transport(TransportEvent),
    /// Local user intent (HTTP API).
    Intent(Intent),
    /// A decay animation frame fired.
    DecayTick(u64),
    Shutdown,
}

/// Notifications for listeners.  Carry no state; read the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncBroadcast {
    StateUpdated { rev: u64 },
    StreamStateChanged { channel: ChannelId, state: StreamState },
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Read view published after every change.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub rev: u64,
    pub playback: PlaybackState,
    pub connection: ConnectionState,
    pub health: ConnectionHealth,
    pub decay: DecayState,
    pub processing: Option<ProcessingParams>,
    pub recent: Vec<Command>,
}

impl Snapshot {
    pub fn of(store: &SyncStore) -> Self {
        Self {
            rev: store.rev(),
            playback: store.playback().clone(),
            connection: store.connection().clone(),
            health: store.health(),
            decay: store.decay(),
            processing: store.processing().cloned(),
            recent: store.journal().recent(SNAPSHOT_RECENT),
        }
    }
}

/// Shared, read-only access to the latest snapshot.
#[derive(Clone)]
pub struct SnapshotHandle(Arc<RwLock<Snapshot>>);

impl SnapshotHandle {
    fn new(snapshot: Snapshot) -> Self {
        Self(Arc::new(RwLock::new(snapshot)))
    }

    pub async fn get(&self) -> Snapshot {
        self.0.read().await.clone()
    }

    pub async fn connection(&self) -> ConnectionState {
        self.0.read().await.connection.clone()
    }

    pub async fn rev(&self) -> u64 {
        self.0.read().await.rev
    }

    async fn replace(&self, snapshot: Snapshot) {
        *self.0.write().await = snapshot;
    }
}

// ── Decay timers ──────────────────────────────────────────────────────────────

/// Arms decay frames as tokio sleeps that post `DecayTick` back into the
/// core queue.  Holds a weak sender: armed frames must not keep the queue
/// open once every real producer is gone.
pub struct ChannelTickSink {
    tx: mpsc::WeakSender<SyncEvent>,
}

impl ChannelTickSink {
    pub fn new(tx: &mpsc::Sender<SyncEvent>) -> Self {
        Self { tx: tx.downgrade() }
    }
}

impl TickSink for ChannelTickSink {
    fn schedule(&self, tick: u64, after: Duration) -> Option<AbortHandle> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!("decay: no runtime, frame {} not armed", tick);
                return None;
            }
        };
        let weak = self.tx.clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            // no upgrade or a closed queue both mean the core is gone
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(SyncEvent::DecayTick(tick)).await;
            }
        });
        Some(timer.abort_handle())
    }
}

// ── SyncCore ──────────────────────────────────────────────────────────────────

pub struct SyncCore {
    store: SyncStore,
    snapshot: SnapshotHandle,
    broadcast_tx: broadcast::Sender<SyncBroadcast>,
    /// Last rev copied into `snapshot`.
    published_rev: u64,
}

impl SyncCore {
    pub fn new(
        config: &Config,
        clock: Arc<dyn Clock>,
        event_tx: mpsc::Sender<SyncEvent>,
        broadcast_tx: broadcast::Sender<SyncBroadcast>,
    ) -> Self {
        let store = SyncStore::new(
            StoreOptions::from(config),
            clock,
            Box::new(ChannelTickSink::new(&event_tx)),
        );
        Self::with_store(store, broadcast_tx)
    }

    pub fn with_store(store: SyncStore, broadcast_tx: broadcast::Sender<SyncBroadcast>) -> Self {
        let snapshot = SnapshotHandle::new(Snapshot::of(&store));
        let published_rev = store.rev();
        Self {
            store,
            snapshot,
            broadcast_tx,
            published_rev,
        }
    }

    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender has gone away (armed decay frames do not count).  Either way the decay scheduler is torn
    /// down before returning, so no frame outlives the loop.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SyncEvent>) {
        info!("SyncCore: starting event loop");

        loop {
            match event_rx.recv().await {
                None => {
                    info!("SyncCore: event channel closed, shutting down");
                    break;
                }
                Some(SyncEvent::Shutdown) => {
                    info!("SyncCore: shutdown requested");
                    break;
                }
                Some(event) => self.handle_event(event).await,
            }
        }

        self.store.teardown();
        self.publish().await;
        info!("SyncCore: stopped at rev {}", self.store.rev());
    }

    /// Translate one event into commands, apply them in order, publish.
    pub async fn handle_event(&mut self, event: SyncEvent) {
        let ops = match event {
            SyncEvent::Push(msg) => {
                debug!("SyncCore: push {}", msg.kind());
                inbound::ops_from_push(msg)
            }
            SyncEvent::Params(params) => vec![Op::SetProcessingParams(params)],
            SyncEvent::Transport(evt) => {
                debug!("SyncCore: transport {:?}", evt);
                inbound::ops_from_transport(evt)
            }
            SyncEvent::Intent(intent) => {
                info!("SyncCore: intent {:?}", intent);
                inbound::ops_from_intent(intent, self.store.playback())
            }
            SyncEvent::DecayTick(tick) => vec![Op::DecayTick(tick)],
            SyncEvent::Shutdown => {
                self.store.teardown();
                Vec::new()
            }
        };

        for op in ops {
            self.apply(op);
        }
        self.publish().await;
    }

    fn apply(&mut self, op: Op) {
        let channel = op.channel();
        let before = channel.map(|id| self.store.channel(id).state);

        match self.store.submit(op) {
            Ok(cmd) => trace!("SyncCore: applied {} @ {}", cmd.kind(), cmd.timestamp()),
            // rejections are logged by the store and leave the replica as is
            Err(_) => return,
        }

        if let (Some(id), Some(before)) = (channel, before) {
            let after = self.store.channel(id).state;
            if after != before {
                debug!("SyncCore: {} {} -> {}", id, before.as_str(), after.as_str());
                let _ = self.broadcast_tx.send(SyncBroadcast::StreamStateChanged {
                    channel: id,
                    state: after,
                });
            }
        }
    }

    async fn publish(&mut self) {
        let rev = self.store.rev();
        if rev == self.published_rev {
            return;
        }
        let snapshot = Snapshot::of(&self.store);
        self.snapshot.replace(snapshot).await;
        self.published_rev = rev;
        // no receivers is fine
        let _ = self.broadcast_tx.send(SyncBroadcast::StateUpdated { rev });
    }
}
