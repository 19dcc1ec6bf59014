//! HTTP service: upload PDFs, poll jobs, manage agents, play lectures.
//!
//! One process runs everything: the axum router, the event bus and a single
//! pipeline worker task. State is shared through [`AppState`]; swapping the
//! in-memory stores for on-disk ones (or S3 objects) changes durability
//! without touching a handler.

mod handlers;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bus::EventBus;
use crate::config::PipelineConfig;
use crate::error::LectureError;
use crate::store::{seed_builtin_agents, Stores};
use crate::worker;

/// Everything the handlers share.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub bus: EventBus,
    pub config: PipelineConfig,
}

/// Service-level settings, separate from the per-job [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Artefact/record directory. `None` keeps everything in memory, which
    /// is fine for development and loses all jobs on restart.
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: None,
        }
    }
}

impl ServerConfig {
    /// Read service settings from `PDF2LECTURE_ADDR` and
    /// `PDF2LECTURE_DATA_DIR`.
    pub fn from_env() -> Result<Self, LectureError> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("PDF2LECTURE_ADDR") {
            if !addr.is_empty() {
                config.addr = addr.parse().map_err(|e| {
                    LectureError::InvalidConfig(format!("PDF2LECTURE_ADDR '{addr}': {e}"))
                })?;
            }
        }
        if let Ok(dir) = std::env::var("PDF2LECTURE_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(config)
    }
}

/// Build the API router over the given state.
pub fn router(state: Arc<AppState>) -> Router {
    // Multipart framing adds overhead on top of the PDF itself.
    let body_limit = state.config.max_pdf_bytes + 64 * 1024;

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/v1/lectures",
            post(handlers::upload_lecture).get(handlers::list_lectures),
        )
        .route("/v1/lectures/:id", get(handlers::get_lecture))
        .route("/v1/lectures/:id/playback", get(handlers::playback_manifest))
        .route(
            "/v1/lectures/:id/playback/position",
            get(handlers::playback_position),
        )
        .route("/v1/lectures/:id/audio", get(handlers::lecture_audio))
        .route("/v1/lectures/:id/pdf", get(handlers::lecture_pdf))
        .route("/v1/lectures/:id/pages/:page", get(handlers::lecture_page))
        .route(
            "/v1/agents",
            post(handlers::create_agent).get(handlers::list_agents),
        )
        .route(
            "/v1/agents/:id",
            get(handlers::get_agent)
                .put(handlers::put_agent)
                .delete(handlers::delete_agent),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build the shared state, including seeding the built-in agents.
pub async fn build_state(
    server: &ServerConfig,
    pipeline: PipelineConfig,
) -> Result<Arc<AppState>, LectureError> {
    let stores = match &server.data_dir {
        Some(dir) => Stores::on_disk(dir.clone()),
        None => Stores::in_memory(),
    };
    seed_builtin_agents(stores.agents.as_ref()).await?;
    Ok(Arc::new(AppState {
        stores,
        bus: EventBus::default(),
        config: pipeline,
    }))
}

/// Run the service until the process is stopped.
pub async fn serve(server: ServerConfig, pipeline: PipelineConfig) -> Result<(), LectureError> {
    let state = build_state(&server, pipeline).await?;

    tokio::spawn(worker::run(
        state.stores.clone(),
        state.bus.clone(),
        state.config.clone(),
    ));

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(server.addr)
        .await
        .map_err(|e| LectureError::Internal(format!("cannot bind {}: {e}", server.addr)))?;
    info!(
        "pdf2lecture {} listening on {} ({})",
        env!("CARGO_PKG_VERSION"),
        server.addr,
        match server.data_dir {
            Some(ref d) => format!("data dir {}", d.display()),
            None => "in-memory stores".to_string(),
        }
    );
    axum::serve(listener, app)
        .await
        .map_err(|e| LectureError::Internal(format!("server error: {e}")))
}
