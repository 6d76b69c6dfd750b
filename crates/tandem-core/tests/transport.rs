//! Push link, parameters poller and decay timers against real sockets and
//! tokio timers.
//!
//! Each test spins up its own loopback server on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tandem_core::decay::DecayTiming;
use tandem_core::health::Backoff;
use tandem_core::link::RemoteLink;
use tandem_core::poll::{ParamsPoller, PARAMETERS_PATH};
use tandem_core::core::ChannelTickSink;
use tandem_core::store::{StoreOptions, SyncStore};
use tandem_core::{Op, SyncBroadcast, SyncCore, SyncError, SyncEvent, SystemClock, TransportEvent};
use tandem_proto::config::Config;
use tandem_proto::protocol::{PartialSnapshot, PushMessage, PROTOCOL_VERSION};
use tandem_proto::state::{ChannelId, Preset, StreamState};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn fast_backoff() -> Backoff {
    Backoff {
        base: Duration::from_millis(10),
        max: Duration::from_millis(20),
        jitter: 0.0,
    }
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Core + queue wired the way the daemon wires them.
struct Harness {
    event_tx: mpsc::Sender<SyncEvent>,
    snapshot: tandem_core::SnapshotHandle,
    core_task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(config: &Config) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (broadcast_tx, _) = broadcast::channel::<SyncBroadcast>(64);
        let core = SyncCore::new(config, Arc::new(SystemClock), event_tx.clone(), broadcast_tx);
        let snapshot = core.snapshot_handle();
        let core_task = tokio::spawn(core.run(event_rx));
        Self {
            event_tx,
            snapshot,
            core_task,
        }
    }

    async fn stop(self) -> tandem_core::Snapshot {
        self.event_tx.send(SyncEvent::Shutdown).await.unwrap();
        self.core_task.await.unwrap();
        self.snapshot.get().await
    }
}

// ── Push link ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_link_forwards_frames_and_skips_garbage() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let hello = PushMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            state: PartialSnapshot {
                volume: Some(35.0),
                preset: Some(Preset::Warm),
                ..Default::default()
            },
        };
        sock.write_all(&hello.encode().unwrap()).await.unwrap();

        let garbage = b"{not json";
        sock.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        sock.write_all(garbage).await.unwrap();

        let start = PushMessage::StreamStart {
            channel: ChannelId::Enhanced,
            track_id: 42,
            total_chunks: 10,
            intensity: 0.9,
        };
        sock.write_all(&start.encode().unwrap()).await.unwrap();
        sock.shutdown().await.unwrap();
    });

    let mut config = Config::default();
    config.remote.address = addr.to_string();
    config.reconnect.max_attempts = 0;

    let harness = Harness::start(&config);
    let link = RemoteLink::new(
        &config,
        harness.event_tx.clone(),
        harness.snapshot.clone(),
        CancellationToken::new(),
    );
    tokio::time::timeout(TEST_TIMEOUT, link.run())
        .await
        .expect("link did not give up")
        .unwrap();

    let snap = harness.stop().await;
    assert!(snap.connection.service_connected);
    assert!(!snap.connection.transport_connected);
    assert_eq!(
        snap.connection.last_error.as_deref(),
        Some("remote closed the connection")
    );
    assert_eq!(snap.playback.volume, 35.0);
    assert_eq!(snap.playback.preset, Preset::Warm);
    let enhanced = &snap.playback.streaming.enhanced;
    assert_eq!(enhanced.state, StreamState::Buffering);
    assert_eq!(enhanced.track_id, Some(42));
}

#[tokio::test]
async fn test_link_backs_off_then_gives_up() {
    // grab a free port, then close it so every connect is refused
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut config = Config::default();
    config.remote.address = addr.to_string();
    config.reconnect.max_attempts = 2;

    let harness = Harness::start(&config);
    let link = RemoteLink::new(
        &config,
        harness.event_tx.clone(),
        harness.snapshot.clone(),
        CancellationToken::new(),
    )
    .with_backoff(fast_backoff());
    tokio::time::timeout(TEST_TIMEOUT, link.run())
        .await
        .expect("link kept retrying")
        .unwrap();

    let snap = harness.stop().await;
    assert_eq!(snap.connection.reconnect_attempts, 2);
    assert_eq!(snap.connection.max_reconnect_attempts, 2);
    assert!(snap.connection.last_error.is_some());
    assert!(!snap.connection.transport_connected);
}

#[tokio::test]
async fn test_link_stops_on_cancel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // accept and hold the socket open without sending anything
    tokio::spawn(async move {
        let (_sock, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let mut config = Config::default();
    config.remote.address = addr.to_string();

    let (event_tx, mut event_rx) = mpsc::channel(16);
    let (broadcast_tx, _) = broadcast::channel(4);
    let core = SyncCore::new(&config, Arc::new(SystemClock), event_tx.clone(), broadcast_tx);
    let cancel = CancellationToken::new();
    let link = RemoteLink::new(&config, event_tx, core.snapshot_handle(), cancel.clone());
    let task = tokio::spawn(link.run());

    let first = tokio::time::timeout(TEST_TIMEOUT, event_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        first,
        SyncEvent::Transport(TransportEvent::Connected)
    ));

    cancel.cancel();
    let result = tokio::time::timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert!(result.is_ok());
}

// ── Parameters poller ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_poll_once_reads_parameters() {
    let app = Router::new().route(
        PARAMETERS_PATH,
        get(|| async { Json(json!({"preset": "warm", "intensity": 0.7, "eq_low": 3})) }),
    );
    let base = serve(app).await;

    let mut config = Config::default();
    config.remote.api_base_url = format!("{}/", base);
    let (event_tx, _event_rx) = mpsc::channel(4);
    let poller = ParamsPoller::new(&config, event_tx, CancellationToken::new()).unwrap();
    assert_eq!(poller.url(), format!("{}{}", base, PARAMETERS_PATH));

    let (params, rtt) = poller.poll_once().await.unwrap();
    assert_eq!(params.preset, Some(Preset::Warm));
    assert_eq!(params.intensity, Some(0.7));
    assert_eq!(params.extra.get("eq_low"), Some(&json!(3)));
    assert!(rtt < TEST_TIMEOUT);
}

#[tokio::test]
async fn test_poll_times_out() {
    let app = Router::new().route(
        PARAMETERS_PATH,
        get(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!({}))
        }),
    );
    let base = serve(app).await;

    let mut config = Config::default();
    config.remote.api_base_url = base;
    config.polling.timeout_ms = 200;
    let (event_tx, _event_rx) = mpsc::channel(4);
    let poller = ParamsPoller::new(&config, event_tx, CancellationToken::new()).unwrap();

    match poller.poll_once().await {
        Err(SyncError::Http(e)) => assert!(e.is_timeout()),
        other => panic!("expected a timeout, got {:?}", other.map(|(p, _)| p)),
    }
}

#[tokio::test]
async fn test_poller_reports_params_and_latency() {
    let app = Router::new().route(
        PARAMETERS_PATH,
        get(|| async { Json(json!({"preset": "punchy"})) }),
    );
    let base = serve(app).await;

    let mut config = Config::default();
    config.remote.api_base_url = base;
    let (event_tx, mut event_rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let poller = ParamsPoller::new(&config, event_tx, cancel.clone()).unwrap();
    let task = tokio::spawn(poller.run());

    let params = tokio::time::timeout(TEST_TIMEOUT, event_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match params {
        SyncEvent::Params(p) => assert_eq!(p.preset, Some(Preset::Punchy)),
        other => panic!("unexpected event {:?}", other),
    }
    let latency = tokio::time::timeout(TEST_TIMEOUT, event_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match latency {
        SyncEvent::Transport(TransportEvent::Latency(ms)) => assert!(ms >= 0.0),
        other => panic!("unexpected event {:?}", other),
    }

    cancel.cancel();
    let result = tokio::time::timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert!(result.is_ok());
}

// ── Decay timers ──────────────────────────────────────────────────────────────

fn timer_store(tx: &mpsc::Sender<SyncEvent>) -> SyncStore {
    let options = StoreOptions {
        decay: DecayTiming {
            duration_ms: 2_500,
            frame: Duration::from_millis(30),
        },
        ..StoreOptions::default()
    };
    SyncStore::new(
        options,
        Arc::new(SystemClock),
        Box::new(ChannelTickSink::new(tx)),
    )
}

#[tokio::test]
async fn test_decay_frame_fires_into_queue() {
    let (tx, mut rx) = mpsc::channel(8);
    let mut store = timer_store(&tx);
    store.submit(Op::SetPlaying(true)).unwrap();
    store.submit(Op::SetPlaying(false)).unwrap();
    let armed = store.pending_decay_tick().unwrap();

    let fired = tokio::time::timeout(TEST_TIMEOUT, rx.recv())
        .await
        .unwrap()
        .unwrap();
    match fired {
        SyncEvent::DecayTick(tick) => {
            assert_eq!(tick, armed);
            store.submit(Op::DecayTick(tick)).unwrap();
        }
        other => panic!("unexpected event {:?}", other),
    }
    // the next frame is armed while the fade runs
    assert!(store.pending_decay_tick().is_some());
    assert!(store.decay().is_animating);
    store.teardown();
}

#[tokio::test]
async fn test_teardown_aborts_armed_frame() {
    let (tx, mut rx) = mpsc::channel(8);
    let mut store = timer_store(&tx);
    store.submit(Op::SetPlaying(true)).unwrap();
    store.submit(Op::SetPlaying(false)).unwrap();
    assert!(store.pending_decay_tick().is_some());

    store.teardown();
    // well past the 30 ms frame: nothing may arrive
    let waited = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(waited.is_err(), "aborted frame still fired");
}

#[tokio::test]
async fn test_resume_aborts_armed_frame() {
    let (tx, mut rx) = mpsc::channel(8);
    let mut store = timer_store(&tx);
    store.submit(Op::SetPlaying(true)).unwrap();
    store.submit(Op::SetPlaying(false)).unwrap();
    store.submit(Op::SetPlaying(true)).unwrap();
    assert_eq!(store.pending_decay_tick(), None);
    assert_eq!(store.decay().intensity, 1.0);

    let waited = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(waited.is_err(), "aborted frame still fired");
}

#[tokio::test]
async fn test_rapid_toggles_leave_one_live_frame() {
    let (tx, mut rx) = mpsc::channel(8);
    let mut store = timer_store(&tx);
    for _ in 0..50 {
        store.submit(Op::SetPlaying(true)).unwrap();
        store.submit(Op::SetPlaying(false)).unwrap();
    }
    let latest = store.pending_decay_tick().unwrap();

    // frames are not fed back, so only the last armed timer may fire
    let mut fired = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Some(SyncEvent::DecayTick(tick))) => fired.push(tick),
            Ok(other) => panic!("unexpected event {:?}", other),
            Err(_) => break,
        }
    }
    assert_eq!(fired, vec![latest]);

    let rev = store.rev();
    store.submit(Op::DecayTick(latest)).unwrap();
    assert!(store.rev() > rev);
    store.teardown();
}

#[tokio::test]
async fn test_armed_frame_does_not_hold_queue_open() {
    let (tx, mut rx) = mpsc::channel(8);
    let mut store = timer_store(&tx);
    store.submit(Op::SetPlaying(true)).unwrap();
    store.submit(Op::SetPlaying(false)).unwrap();
    assert!(store.pending_decay_tick().is_some());

    drop(tx);
    let closed = tokio::time::timeout(TEST_TIMEOUT, rx.recv()).await.unwrap();
    assert!(closed.is_none());
    store.teardown();
}
