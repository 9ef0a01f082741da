use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use esprit_contracts::catalog::DEFAULT_STYLE;
use esprit_engine::{GenerateError, LocalAssetStore, Orchestrator};
use serde::Deserialize;
use serde_json::json;

pub const ENGINE_NAME: &str = "L'Esprit";

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    assets: LocalAssetStore,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, assets: LocalAssetStore) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            assets,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    #[serde(default = "default_style", alias = "styleId")]
    pub style_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(alias = "entityName")]
    pub entity_name: String,
    #[serde(default = "default_style", alias = "styleId")]
    pub style_id: String,
}

fn default_style() -> String {
    DEFAULT_STYLE.to_string()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/preview/:entity_name", get(preview))
        .route("/generate", post(generate))
        .route("/generated_images/:file_name", get(generated_image))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, provider = state.orchestrator.provider_name(), "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn health(State(state): State<AppState>) -> Response {
    let stats = match on_engine(&state, |engine| engine.stats()).await {
        Ok(stats) => stats,
        Err(response) => return response,
    };
    Json(json!({
        "status": "alive",
        "engine": ENGINE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "stats": {
            "total_entities": stats.total_entities,
            "missing_images": stats.missing_images,
        },
    }))
    .into_response()
}

async fn preview(
    State(state): State<AppState>,
    Path(entity_name): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Response {
    let (name, style_id) = (entity_name.clone(), query.style_id.clone());
    match on_engine(&state, move |engine| engine.preview(&name, &style_id)).await {
        Ok(Ok(resolved)) => Json(json!({
            "entity": entity_name,
            "style_id": query.style_id,
            "prompt": resolved.prompt,
        }))
        .into_response(),
        Ok(Err(err)) => error_response(err),
        Err(response) => response,
    }
}

async fn generate(State(state): State<AppState>, Json(request): Json<GenerateRequest>) -> Response {
    let GenerateRequest {
        entity_name,
        style_id,
    } = request;
    match on_engine(&state, move |engine| engine.generate(&entity_name, &style_id)).await {
        Ok(Ok(result)) => Json(json!({
            "status": "success",
            "image_url": result.image_url,
            "style_id": result.style_id,
            "prompt_used": result.prompt_used,
        }))
        .into_response(),
        Ok(Err(err)) => error_response(err),
        Err(response) => response,
    }
}

/// Runs `task` on the blocking pool. The orchestrator's catalog lock can be
/// held across a full document write, so no handler takes it on a runtime
/// worker.
async fn on_engine<T, F>(state: &AppState, task: F) -> Result<T, Response>
where
    F: FnOnce(&Orchestrator) -> T + Send + 'static,
    T: Send + 'static,
{
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::task::spawn_blocking(move || task(&orchestrator))
        .await
        .map_err(|join_err| {
            tracing::error!(error = %join_err, "engine task aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": format!("Internal Server Error: {join_err}")})),
            )
                .into_response()
        })
}

async fn generated_image(State(state): State<AppState>, Path(file_name): Path<String>) -> Response {
    let Some(path) = state.assets.resolve(&file_name) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"detail": "Invalid path"}))).into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(contents) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.to_string())], contents).into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, Json(json!({"detail": "Not Found"}))).into_response(),
    }
}

fn error_response(err: GenerateError) -> Response {
    let (status, body) = match &err {
        GenerateError::EntityNotFound(_) => {
            (StatusCode::NOT_FOUND, json!({"detail": "Entity not found"}))
        }
        GenerateError::StyleUnavailable { style_id, .. } => (
            StatusCode::BAD_REQUEST,
            json!({"detail": format!("No prompt available for style '{style_id}'")}),
        ),
        GenerateError::RateLimited(_) => (
            StatusCode::TOO_MANY_REQUESTS,
            json!({
                "status": "error",
                "error": "quota_exceeded",
                "message": "Quota reached. Try again later.",
            }),
        ),
        GenerateError::NoImageProduced => (
            StatusCode::BAD_GATEWAY,
            json!({
                "status": "error",
                "message": "No image returned from generation service. The prompt may have triggered a safety filter.",
            }),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"detail": format!("Internal Server Error: {err}")}),
        ),
    };
    (status, Json(body)).into_response()
}
