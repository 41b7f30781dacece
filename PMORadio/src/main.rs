use std::{env, path::PathBuf};

use pmoconfig::get_config;
use pmoradio::{RadioConfigExt, RadioServerExt};
use pmoserver::{LoggingOptions, ServerBuilder};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Serveur et logs ==========

    let mut server = ServerBuilder::new_configured().build();
    server.init_logging(LoggingOptions::from_config()).await?;

    server
        .add_route("/info", || async {
            serde_json::json!({
                "name": "PMORadio",
                "version": env!("CARGO_PKG_VERSION"),
            })
        })
        .await;

    // ========== PHASE 2 : Stations ==========

    // Le premier argument remplace radio.directory
    let mut settings = get_config().get_radio_settings()?;
    if let Some(dir) = env::args_os().nth(1) {
        settings.root = PathBuf::from(dir);
    }

    info!("📻 Initializing stations from {}...", settings.root.display());
    let engine = server.init_radio_with_settings(settings).await?;

    let stations = engine.list_stations();
    info!("✅ {} station(s) registered", stations.len());
    for station in &stations {
        info!("  - {} → /api/radio/channels/{}/stream", station.name, station.id);
    }

    // ========== PHASE 3 : Démarrage du serveur ==========

    // L'arrêt gracieux attend la fin des flux, qui ne finissent qu'avec les stations
    let shutdown = server.shutdown_token();
    let stations_engine = engine.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        stations_engine.shutdown();
    });

    info!("🌐 Starting HTTP server...");
    server.start().await?;

    info!("✅ PMORadio is ready!");
    info!("Press Ctrl+C to stop...");
    server.wait().await;
    info!("Stations stopped");
    Ok(())
}
