// Debate hub entry point.
//
// Startup sequence:
// 1. Initialize tracing
// 2. Load config
// 3. Open database (seeds the singleton timer/stats rows on first run)
// 4. Build the broadcaster and hub, spawn the hub event loop
// 5. Spawn the WebSocket listener
// 6. Serve HTTP until shutdown
// 7. Cleanup

use std::sync::Arc;

use debate_hub::broadcast::Broadcaster;
use debate_hub::config;
use debate_hub::db::Database;
use debate_hub::http::{self, AppContext};
use debate_hub::hub::{self, Hub, HubHandle};
use debate_hub::resource::ResourceRegistry;
use debate_hub::storage::ObjectStorage;
use debate_hub::ws_server;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Debate hub starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: http port {}, ws port {}, database {}",
        config.http_port, config.ws_port, config.db_path
    );

    // 3. Open database
    let db = Arc::new(Database::open(&config.db_path).context("failed to open database")?);
    info!("Database opened at {}", config.db_path);

    // 4. Hub: the single writer for timer and speech state
    let broadcaster = Arc::new(Broadcaster::new());
    let hub =
        Hub::new(db.clone(), broadcaster.clone()).context("failed to restore timer state")?;
    let (hub_tx, hub_rx) = mpsc::channel(64);
    let handle = HubHandle::new(hub_tx);
    let hub_task = tokio::spawn(hub::run(hub, hub_rx));

    // 5. WebSocket listener
    let ws_listener = ws_server::bind(config.ws_port).await?;
    let ws_task = {
        let handle = handle.clone();
        let broadcaster = broadcaster.clone();
        tokio::spawn(async move {
            if let Err(e) = ws_server::run(ws_listener, handle, broadcaster).await {
                error!("WebSocket server error: {e:#}");
            }
        })
    };

    // 6. HTTP server (runs until ctrl-c)
    let storage = ObjectStorage::from_config(&config.storage);
    match &storage {
        ObjectStorage::Supabase(_) => info!("Object storage configured"),
        ObjectStorage::Disabled => info!("Object storage disabled (no supabase_url set)"),
    }
    let ctx = AppContext {
        hub: handle.clone(),
        db: db.clone(),
        resources: Arc::new(ResourceRegistry::new(db, storage)),
        static_dir: config.static_dir.clone(),
    };
    http::serve(ctx, config.http_port).await?;

    // 7. Cleanup: stop accepting realtime sessions, then let the hub drain.
    ws_task.abort();
    drop(handle);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), hub_task).await;

    info!("Debate hub shut down cleanly");
    Ok(())
}

/// Initialize tracing to stdout. `RUST_LOG` overrides the default filter.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debate_hub=info,warn")),
        )
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
