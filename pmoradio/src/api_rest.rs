//! Endpoints API REST de la radio
//!
//! Montés sous `/api/radio` par [`RadioServerExt`](crate::RadioServerExt) :
//!
//! - `GET /channels` : liste des stations
//! - `GET /channels/{id}` : état d'une station
//! - `GET /channels/{id}/stream` : flux audio continu

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};
use utoipa::{OpenApi, ToSchema};

use crate::{
    engine::{BroadcastEngine, StationInfo, StationStatus},
    error::Error,
    producer::ProducerState,
};

/// État partagé des handlers
#[derive(Clone)]
pub struct RadioState {
    engine: Arc<BroadcastEngine>,
}

impl RadioState {
    pub fn new(engine: Arc<BroadcastEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<BroadcastEngine> {
        &self.engine
    }
}

// ============ Gestion des erreurs ============

/// Corps JSON des réponses d'erreur
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::StationNotFound(_) => StatusCode::NOT_FOUND,
            Error::StationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Radio API error ({}): {}", status, self.0);
        }

        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

/// Crée le router pour l'API radio
pub fn create_api_router(state: RadioState) -> Router {
    Router::new()
        .route("/channels", get(list_channels))
        .route("/channels/{id}", get(get_channel))
        .route("/channels/{id}/stream", get(stream_channel))
        .with_state(state)
}

// ============================================================================
// Route Handlers
// ============================================================================

/// GET /channels - Liste des stations
#[utoipa::path(
    get,
    path = "/channels",
    responses(
        (status = 200, description = "Stations dans l'ordre de découverte", body = [StationInfo])
    ),
    tag = "radio"
)]
async fn list_channels(State(state): State<RadioState>) -> Json<Vec<StationInfo>> {
    Json(state.engine.list_stations())
}

/// GET /channels/{id} - État d'une station
#[utoipa::path(
    get,
    path = "/channels/{id}",
    params(
        ("id" = String, Path, description = "Identifiant de la station")
    ),
    responses(
        (status = 200, description = "État de la station", body = StationStatus),
        (status = 404, description = "Station inconnue", body = ErrorResponse)
    ),
    tag = "radio"
)]
async fn get_channel(
    State(state): State<RadioState>,
    Path(id): Path<String>,
) -> Result<Json<StationStatus>, AppError> {
    Ok(Json(state.engine.station_status(&id)?))
}

/// GET /channels/{id}/stream - Flux audio de la station
///
/// L'auditeur reçoit d'abord le contenu du replay buffer puis le direct. Le
/// flux ne se termine que si la station tombe en panne ; la déconnexion du
/// client détache l'auditeur.
#[utoipa::path(
    get,
    path = "/channels/{id}/stream",
    params(
        ("id" = String, Path, description = "Identifiant de la station")
    ),
    responses(
        (status = 200, description = "Flux audio continu", content_type = "audio/mpeg"),
        (status = 404, description = "Station inconnue", body = ErrorResponse),
        (status = 503, description = "Station indisponible", body = ErrorResponse)
    ),
    tag = "radio"
)]
async fn stream_channel(
    State(state): State<RadioState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let stream = state.engine.open_stream(&id)?;
    info!(
        station = %stream.station_id(),
        listener = stream.subscriber().id(),
        backlog = stream.backlog_len(),
        "🎧 Listener connected"
    );

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(stream.content_type()));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));

    let body = Body::from_stream(stream.into_byte_stream());
    Ok((headers, body).into_response())
}

/// Documentation OpenAPI de l'API radio
#[derive(OpenApi)]
#[openapi(
    info(
        title = "PMO Radio API",
        version = "0.1.0",
        description = "Stations de radio construites à partir de répertoires de fichiers audio"
    ),
    paths(list_channels, get_channel, stream_channel),
    components(schemas(StationInfo, StationStatus, ProducerState, ErrorResponse)),
    tags(
        (name = "radio", description = "Stations et flux audio")
    )
)]
pub struct RadioApiDoc;
