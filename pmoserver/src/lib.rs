//! # pmoserver - Serveur web haut niveau basé sur Axum
//!
//! Enveloppe un `axum::Router` derrière une API d'ajout de routes, avec :
//!
//! - 📡 **Logs en direct** : buffer mémoire + Server-Sent Events ([`logs`])
//! - 📚 **Documentation OpenAPI** : une Swagger UI par API montée
//! - ⚡ **Arrêt gracieux** : Ctrl+C ou jeton d'annulation
//!
//! Les crates métier (comme `pmoradio`) ajoutent leurs routes via des traits
//! d'extension sur [`Server`] : pmoserver ne dépend d'aucune d'elles.
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use pmoserver::{ServerBuilder, logs::LoggingOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new("MyServer", "localhost", 8080).build();
//!     server.init_logging(LoggingOptions::default()).await?;
//!
//!     server.add_route("/api/status", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogState, LoggingOptions, SseLayer, log_dump, log_sse};
pub use server::{Server, ServerBuilder, ServerInfo};
