//! HTTP routes of the reference server.
//!
//! Speaks the same five endpoints as the real counterpart so the sync core
//! can be exercised without a 3D tool running. Failures answer with a JSON
//! `{error, message}` body.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use rigsync_core::transport::protocol::{
    ArmatureList, ErrorBody, ImportAck, ANIMATION_STATUS_PATH, BONE_REST_PATH,
    EXPORT_ANIMATION_PATH, IMPORT_ANIMATION_PATH, LIST_ARMATURES_PATH,
};
use rigsync_core::{AnimationCodec, AnimationStatus, BoneRest, Fingerprint, JsonCodec};

use super::storage::{AnimationStore, StorageError};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    store: AnimationStore,
}

/// Handler failure, rendered as `{error, message}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(&'static str, String),
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidArmature(_) => {
                ApiError::BadRequest("invalid_armature", e.to_string())
            }
            e => ApiError::Storage(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            ApiError::BadRequest(error, message) => (StatusCode::BAD_REQUEST, error, message),
            ApiError::Storage(e) => {
                tracing::error!("Storage failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    e.to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: Some(error.to_string()),
            message: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

/// Builds the router for a store.
pub fn router(store: AnimationStore) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(LIST_ARMATURES_PATH, get(list_armatures))
        .route(
            &format!("{}/{{armature}}", EXPORT_ANIMATION_PATH),
            get(export_animation),
        )
        .route(IMPORT_ANIMATION_PATH, post(import_animation))
        .route(ANIMATION_STATUS_PATH, get(animation_status))
        .route(&format!("{}/{{armature}}", BONE_REST_PATH), get(bone_rest))
        .with_state(AppState { store })
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_armatures(State(state): State<AppState>) -> Result<Json<ArmatureList>, ApiError> {
    let armatures = state.store.list()?;
    Ok(Json(ArmatureList { armatures }))
}

fn load_animation(store: &AnimationStore, armature: &str) -> Result<Vec<u8>, ApiError> {
    store
        .load(armature)?
        .ok_or_else(|| ApiError::NotFound(format!("No animation stored for '{}'", armature)))
}

async fn export_animation(
    State(state): State<AppState>,
    Path(armature): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = load_animation(&state.store, &armature)?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

#[derive(Debug, Deserialize)]
struct ImportQuery {
    armature: Option<String>,
}

async fn import_animation(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> Result<Json<ImportAck>, ApiError> {
    let animation = JsonCodec
        .decode(&body)
        .map_err(|e| ApiError::BadRequest("invalid_animation", e.to_string()))?;

    let armature = query
        .armature
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| animation.name.clone());

    state.store.save(&armature, &body)?;
    tracing::info!(
        armature = %armature,
        frames = animation.frame_count(),
        "Stored animation"
    );

    Ok(Json(ImportAck { success: true }))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    armature: String,
    #[serde(default)]
    last_known_hash: String,
}

async fn animation_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<AnimationStatus>, ApiError> {
    let bytes = load_animation(&state.store, &query.armature)?;
    let hash = Fingerprint::of(&bytes);
    let has_changed = query.last_known_hash != hash.as_str();

    Ok(Json(AnimationStatus::new(has_changed, hash)))
}

async fn bone_rest(
    State(state): State<AppState>,
    Path(armature): Path<String>,
) -> Result<Json<BoneRest>, ApiError> {
    Ok(Json(state.store.rest_pose(&armature)?))
}
