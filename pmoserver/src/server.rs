//! # Module Server - API de haut niveau pour Axum
//!
//! - 🚀 **Routes JSON simples** : `add_route()`
//! - 🎯 **Handlers personnalisés** : streaming, SSE… avec `add_handler_with_state()`
//! - 📚 **Documentation API** : OpenAPI/Swagger avec `add_openapi()`
//! - ⚡ **Arrêt gracieux** : sur Ctrl+C ou via [`Server::shutdown_token`]

use crate::logs::{
    LogState, LoggingOptions, LogsApiDoc, create_logs_router, init_logging, log_dump, log_sse,
};
use anyhow::{Context, Result};
use axum::handler::Handler;
use axum::routing::get;
use axum::{Json, Router};
use pmoconfig::get_config;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

const DEFAULT_SERVER_NAME: &str = "PMO-Radio-Server";

/// Info serveur sérialisable
#[derive(Clone, Serialize, utoipa::ToSchema)]
pub struct ServerInfo {
    pub name: String,
    pub base_url: String,
    pub http_port: u16,
}

/// Serveur principal
pub struct Server {
    name: String,
    base_url: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    join_handle: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    log_state: Option<LogState>,
}

impl Server {
    /// Crée une nouvelle instance de serveur
    ///
    /// ```rust
    /// # use pmoserver::Server;
    /// let server = Server::new("MyAPI", "localhost", 3000);
    /// ```
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            join_handle: None,
            shutdown: CancellationToken::new(),
            log_state: None,
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        Self::new(DEFAULT_SERVER_NAME, config.get_base_url(), config.get_http_port())
    }

    /// Fusionne ou imbrique `route` dans le router principal
    async fn mount(&mut self, path: &str, route: Router) {
        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            let normalized = format!("/{}", path.trim_start_matches('/'));
            std::mem::take(&mut *r).nest(&normalized, route)
        };
    }

    /// Ajoute une route JSON dynamique
    ///
    /// ```rust,no_run
    /// # use pmoserver::Server;
    /// # #[tokio::main]
    /// # async fn main() {
    /// # let mut server = Server::new("Test", "localhost", 3000);
    /// server.add_route("/api/status", || async {
    ///     serde_json::json!({ "status": "online" })
    /// }).await;
    /// # }
    /// ```
    pub async fn add_route<F, Fut, T>(&mut self, path: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = move || {
            let f = f.clone();
            async move { Json(f().await) }
        };
        self.mount(path, Router::new().route("/", get(handler))).await;
    }

    /// Ajoute un handler Axum standard (GET)
    pub async fn add_handler<H, T>(&mut self, path: &str, handler: H)
    where
        H: Handler<T, ()> + Clone + 'static,
        T: 'static,
    {
        self.mount(path, Router::new().route("/", get(handler))).await;
    }

    /// Ajoute un handler GET avec état
    pub async fn add_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", get(handler)).with_state(state);
        self.mount(path, route).await;
    }

    /// Ajoute une API documentée avec OpenAPI et Swagger UI
    ///
    /// - les routes de `api_router` sont servies sous `/api/{name}` ;
    /// - Swagger UI sous `/swagger-ui/{name}` ;
    /// - la spécification sous `/api-docs/{name}.json`.
    ///
    /// Les chemins déclarés dans `openapi` sont relatifs à `/api/{name}`.
    pub async fn add_openapi(
        &mut self,
        api_router: Router,
        mut openapi: utoipa::openapi::OpenApi,
        name: &str,
    ) {
        let base_path = format!("/api/{}", name);
        openapi.servers = Some(vec![utoipa::openapi::Server::new(base_path.clone())]);

        // SwaggerUi attend des chemins 'static ; une API n'est montée qu'une fois
        let swagger_path: &'static str = Box::leak(format!("/swagger-ui/{}", name).into_boxed_str());
        let openapi_json_path: &'static str =
            Box::leak(format!("/api-docs/{}.json", name).into_boxed_str());
        let swagger = SwaggerUi::new(swagger_path).url(openapi_json_path, openapi);

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r)
            .nest(&base_path, api_router)
            .merge(swagger);
    }

    /// Ajoute un sous-router au serveur
    ///
    /// - Si `path` est "/", merge directement au router principal
    /// - Sinon, nest le router sous le chemin donné
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        self.mount(path, sub_router).await;
    }

    /// Copie du router courant, pour les tests sans socket
    pub async fn router(&self) -> Router {
        self.router.read().await.clone()
    }

    /// Jeton annulé à l'arrêt du serveur (Ctrl+C ou [`Server::stop`])
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Demande l'arrêt gracieux
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Démarre le serveur HTTP
    ///
    /// Les routes ajoutées après le démarrage ne sont pas servies.
    ///
    /// # Errors
    ///
    /// Échoue si le port ne peut pas être ouvert.
    pub async fn start(&mut self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Cannot listen on {}", addr))?;
        info!(
            "Server {} running at http://{}:{}",
            self.name, self.base_url, self.http_port
        );

        let router = self.router.read().await.clone();
        let shutdown = self.shutdown.clone();
        let serve_shutdown = shutdown.clone();
        let server_task = tokio::spawn(async move {
            let result = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
        });

        tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("Ctrl+C reçu, arrêt gracieux"),
                        Err(e) => error!("Cannot listen for Ctrl+C: {}", e),
                    }
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        self.join_handle = Some(server_task);
        Ok(())
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    /// Récupère les infos du serveur
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            http_port: self.http_port,
        }
    }

    pub fn log_state(&self) -> Option<&LogState> {
        self.log_state.as_ref()
    }

    /// Initialise le logging et enregistre ses routes
    ///
    /// - `/log-sse` et `/log-dump`
    /// - `/api/logs/log_setup` (Swagger : `/swagger-ui/logs`)
    ///
    /// ```rust,no_run
    /// # use pmoserver::{ServerBuilder, logs::LoggingOptions};
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// let mut server = ServerBuilder::new_configured().build();
    /// server.init_logging(LoggingOptions::from_config()).await?;
    /// server.start().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn init_logging(&mut self, options: LoggingOptions) -> Result<LogState> {
        let log_state = init_logging(options).context("Logging already initialized")?;

        self.add_handler_with_state("/log-sse", log_sse, log_state.clone())
            .await;
        self.add_handler_with_state("/log-dump", log_dump, log_state.clone())
            .await;
        self.add_openapi(
            create_logs_router(log_state.clone()),
            LogsApiDoc::openapi(),
            "logs",
        )
        .await;

        self.log_state = Some(log_state.clone());
        Ok(log_state)
    }
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    base_url: String,
    http_port: u16,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
        }
    }

    /// Nom par défaut, hôte et port lus dans la configuration
    pub fn new_configured() -> Self {
        let config = get_config();
        Self::new(DEFAULT_SERVER_NAME, config.get_base_url(), config.get_http_port())
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn http_port(mut self, http_port: u16) -> Self {
        self.http_port = http_port;
        self
    }

    pub fn build(self) -> Server {
        Server::new(self.name, self.base_url, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn test_add_route_nested() {
        let mut server = ServerBuilder::new("Test", "localhost", 0).build();
        server
            .add_route("/info", || async { serde_json::json!({"ok": true}) })
            .await;

        let (status, body) = get_json(server.router().await, "/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[derive(utoipa::OpenApi)]
    #[openapi(paths(ping))]
    struct PingDoc;

    #[utoipa::path(get, path = "/ping", responses((status = 200, description = "pong")))]
    async fn ping() -> &'static str {
        "pong"
    }

    #[tokio::test]
    async fn test_add_openapi_mounts_api_and_docs() {
        let mut server = ServerBuilder::new("Test", "localhost", 0).build();
        server
            .add_openapi(Router::new().route("/ping", get(ping)), PingDoc::openapi(), "demo")
            .await;
        let router = server.router().await;

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/api/demo/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (status, spec) = get_json(router, "/api-docs/demo.json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(spec["paths"]["/ping"].is_object());
        assert_eq!(spec["servers"][0]["url"], "/api/demo");
    }

    #[tokio::test]
    async fn test_add_router_nest_and_merge() {
        let mut server = ServerBuilder::new("Test", "localhost", 0).build();
        server
            .add_router("/demo", Router::new().route("/ping", get(ping)))
            .await;
        server
            .add_router("/", Router::new().route("/health", get(ping)))
            .await;
        let router = server.router().await;

        for uri in ["/demo/ping", "/health"] {
            let response = router
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
    }

    #[test]
    fn test_stop_cancels_shutdown_token() {
        let server = ServerBuilder::new("Test", "localhost", 0).build();
        let token = server.shutdown_token();
        assert!(!token.is_cancelled());
        server.stop();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_info() {
        let server = ServerBuilder::new("Test", "radio.local", 8181)
            .name("Radio")
            .build();
        let info = server.info();
        assert_eq!(info.name, "Radio");
        assert_eq!(info.http_port, 8181);
    }
}
