//! Extension pmoserver pour la radio
//!
//! `pmoradio` ajoute ses routes à `pmoserver::Server` sans que pmoserver dépende
//! de pmoradio.
//!
//! ```rust,no_run
//! use pmoradio::RadioServerExt;
//! use pmoserver::ServerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new_configured().build();
//!     server.init_radio().await?;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use pmoconfig::get_config;
use pmoserver::Server;
use tracing::info;
use utoipa::OpenApi;

use crate::{
    api_rest::{create_api_router, RadioApiDoc, RadioState},
    config_ext::RadioConfigExt,
    engine::{BroadcastEngine, EngineSettings},
};

/// Trait d'extension pour pmoserver::Server
pub trait RadioServerExt {
    /// Démarre les stations décrites par la configuration et enregistre l'API.
    ///
    /// # Routes créées
    ///
    /// - API: `/api/radio/*`
    ///   - `/channels`
    ///   - `/channels/{id}`
    ///   - `/channels/{id}/stream`
    /// - Swagger: `/swagger-ui/radio`
    async fn init_radio(&mut self) -> Result<Arc<BroadcastEngine>>;

    /// Comme `init_radio()` avec des réglages explicites.
    async fn init_radio_with_settings(
        &mut self,
        settings: EngineSettings,
    ) -> Result<Arc<BroadcastEngine>>;
}

impl RadioServerExt for Server {
    async fn init_radio(&mut self) -> Result<Arc<BroadcastEngine>> {
        let settings = get_config().get_radio_settings()?;
        self.init_radio_with_settings(settings).await
    }

    async fn init_radio_with_settings(
        &mut self,
        settings: EngineSettings,
    ) -> Result<Arc<BroadcastEngine>> {
        info!("Initializing radio from {}...", settings.root.display());

        let engine = Arc::new(BroadcastEngine::start(settings)?);
        let router = create_api_router(RadioState::new(engine.clone()));
        self.add_openapi(router, RadioApiDoc::openapi(), "radio")
            .await;

        info!(
            "Radio initialized with {} station(s), API at /api/radio/*",
            engine.list_stations().len()
        );
        Ok(engine)
    }
}
