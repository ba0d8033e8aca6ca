use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::timeout;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vitals_hub::config::Config;
use vitals_hub::engine::{Engine, EngineConfig, HubHandle};
use vitals_hub::events::ConnectivityEvent;
use vitals_hub::model::DeviceCategory;
use vitals_hub::store::{PairedStore, SqliteStore};
use vitals_hub::transport::BtleTransport;

const RESUME_ATTEMPT_WINDOW: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vitals_hub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting vitals hub");

    let config = Config::from_file_or_default("config.toml");
    info!(
        "Configuration: database={}, rssi_threshold={} dBm",
        config.database.path, config.bluetooth.rssi_threshold_dbm
    );

    let database_url = format!("sqlite://{}?mode=rwc", config.database.path);
    let store = Arc::new(SqliteStore::new(&database_url).await?);
    info!("Database initialized at {}", config.database.path);

    let (transport, events) = BtleTransport::new(64).await?;
    let hub = Engine::spawn(
        transport,
        store.clone(),
        events,
        EngineConfig {
            rssi_threshold_dbm: config.bluetooth.rssi_threshold_dbm,
            ..Default::default()
        },
    );

    // Log every lifecycle event; measurement consumers subscribe to the
    // clinical and fitness channels the same way.
    let mut connectivity = hub.subscribe_connectivity();
    tokio::spawn(async move {
        while let Ok(event) = connectivity.recv().await {
            info!("connectivity: {:?}", event);
        }
    });

    // Resume previously paired devices. The engine holds one reconnect
    // intent at a time, so attempts run sequentially, each advancing on its
    // connected/failed outcome or after a timeout.
    let recorded: Vec<DeviceCategory> = {
        let records = store.load_all().await?;
        DeviceCategory::CONCRETE
            .into_iter()
            .filter(|category| records.contains_key(category))
            .collect()
    };
    let resume_hub = hub.clone();
    tokio::spawn(async move {
        for category in recorded {
            resume_device(&resume_hub, category).await;
        }
    });

    info!("Hub is running, press Ctrl+C to stop");
    signal::ctrl_c().await?;

    hub.disconnect(DeviceCategory::AllDevices).await;
    info!("Vitals hub stopped");
    Ok(())
}

/// Issue one reconnect and wait for its outcome before the caller moves on
/// to the next category.
async fn resume_device(hub: &HubHandle, category: DeviceCategory) {
    // Subscribe before issuing the connect so the outcome cannot be missed.
    let mut connectivity = hub.subscribe_connectivity();
    hub.connect(category).await;

    let outcome = timeout(RESUME_ATTEMPT_WINDOW, async {
        loop {
            match connectivity.recv().await {
                Ok(ConnectivityEvent::DeviceConnected { category: c, .. }) if c == category => {
                    break true;
                }
                Ok(ConnectivityEvent::DeviceConnectFailed { category: c }) if c == category => {
                    break false;
                }
                Ok(_) => continue,
                Err(_) => break false,
            }
        }
    })
    .await;

    match outcome {
        Ok(true) => info!("{:?} resumed", category),
        Ok(false) => info!("{:?} reconnect failed", category),
        Err(_) => info!("{:?} not seen, moving on", category),
    }
}
