mod http;

use std::sync::Arc;

use tandem_core::link::RemoteLink;
use tandem_core::poll::ParamsPoller;
use tandem_core::{SyncBroadcast, SyncCore, SyncEvent, SystemClock};
use tandem_proto::config::Config;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // File logging
    let data_dir = tandem_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,tandem_core=debug,tandem_daemon=debug")
            }),
        )
        .init();

    eprintln!("tandemd: logging to {}", log_path.display());
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Event channel: every input funnels into SyncCore
    let (event_tx, event_rx) = mpsc::channel::<SyncEvent>(256);
    let (broadcast_tx, _) = broadcast::channel::<SyncBroadcast>(100);
    let cancel = CancellationToken::new();

    let core = SyncCore::new(
        &config,
        Arc::new(SystemClock),
        event_tx.clone(),
        broadcast_tx.clone(),
    );
    let snapshot = core.snapshot_handle();
    let core_handle = tokio::spawn(core.run(event_rx));

    // Stream-state changes are worth a line in the log
    let mut updates = broadcast_tx.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(SyncBroadcast::StreamStateChanged { channel, state }) => {
                    info!("{} stream is now {}", channel, state)
                }
                Ok(SyncBroadcast::StateUpdated { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("state listener lagged by {} updates", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let link = RemoteLink::new(&config, event_tx.clone(), snapshot.clone(), cancel.clone());
    let link_handle = tokio::spawn(async move {
        if let Err(e) = link.run().await {
            warn!("link stopped: {}", e);
        }
    });

    let poller = ParamsPoller::new(&config, event_tx.clone(), cancel.clone())?;
    let poll_handle = tokio::spawn(async move {
        if let Err(e) = poller.run().await {
            warn!("poller stopped: {}", e);
        }
    });

    let http_handle = if config.http.enabled {
        Some(http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState {
                snapshot: snapshot.clone(),
                event_tx: event_tx.clone(),
            },
            cancel.clone(),
        ))
    } else {
        None
    };

    info!("Daemon initialised, waiting for Ctrl-C");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutting down");
    cancel.cancel();
    let _ = link_handle.await;
    let _ = poll_handle.await;
    if let Some(handle) = http_handle {
        let _ = handle.await;
    }

    if event_tx.send(SyncEvent::Shutdown).await.is_err() {
        warn!("core already stopped");
    }
    core_handle.await?;

    let last = snapshot.get().await;
    info!("Final rev {}, health {:?}", last.rev, last.health);
    Ok(())
}
