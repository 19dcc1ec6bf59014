//! Request handlers.
//!
//! Every fallible handler returns `Result<_, LectureError>`; the error's
//! `IntoResponse` impl maps it to the right status and a structured JSON
//! body, so handlers stay free of status-code bookkeeping.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::LectureAgent;
use crate::error::LectureError;
use crate::job::{Job, JobStatus};
use crate::pipeline::ingest;
use crate::playback;
use crate::server::AppState;

/// A job as the API presents it: the record plus its derived status.
#[derive(Serialize)]
pub struct JobView {
    pub status: JobStatus,
    #[serde(flatten)]
    pub job: Job,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            status: job.status(),
            job,
        }
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "pdf2lecture",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Lectures ──────────────────────────────────────────────────────────────

/// `POST /v1/lectures` — multipart upload with a required `file` part and
/// optional `agent` and `mode` parts. Returns 202 with the queued job.
pub async fn upload_lecture(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobView>), LectureError> {
    let mut file: Option<(Vec<u8>, String)> = None;
    let mut agent_id = crate::agent::DEFAULT_AGENT_ID.to_string();
    let mut mode = state.config.mode;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| LectureError::InvalidInput {
            input: format!("multipart body: {e}"),
        })?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                let filename = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("upload.pdf")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| LectureError::InvalidInput {
                    input: format!("file part: {e}"),
                })?;
                file = Some((bytes.to_vec(), filename));
            }
            "agent" => {
                agent_id = field.text().await.map_err(|e| LectureError::InvalidInput {
                    input: format!("agent part: {e}"),
                })?;
            }
            "mode" => {
                let text = field.text().await.map_err(|e| LectureError::InvalidInput {
                    input: format!("mode part: {e}"),
                })?;
                mode = text.parse()?;
            }
            other => {
                info!("Ignoring unknown upload part '{other}'");
            }
        }
    }

    let (bytes, filename) = file.ok_or_else(|| LectureError::InvalidInput {
        input: "multipart body without a 'file' part".into(),
    })?;

    let job = ingest::create_job(
        &state.stores,
        &state.bus,
        &state.config,
        &bytes,
        &filename,
        &agent_id,
        mode,
    )
    .await?;

    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// `GET /v1/lectures` — all jobs, newest first.
pub async fn list_lectures(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<JobView>>, LectureError> {
    let jobs = state.stores.jobs.list_jobs().await?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

/// `GET /v1/lectures/:id` — one job with stage detail.
pub async fn get_lecture(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, LectureError> {
    let job = state.stores.jobs.get_job(&id).await?;
    Ok(Json(job.into()))
}

// ── Playback ──────────────────────────────────────────────────────────────

pub async fn playback_manifest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<playback::PlaybackManifest>, LectureError> {
    Ok(Json(playback::manifest(&state.stores, &id).await?))
}

#[derive(Deserialize)]
pub struct PositionQuery {
    /// Playback offset in milliseconds.
    t: u64,
}

pub async fn playback_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PositionQuery>,
) -> Result<Json<playback::PlaybackPosition>, LectureError> {
    Ok(Json(playback::position(&state.stores, &id, query.t).await?))
}

pub async fn lecture_audio(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, LectureError> {
    let (bytes, content_type) = playback::audio_object(&state.stores, &id).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

pub async fn lecture_pdf(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, LectureError> {
    let bytes = playback::pdf_object(&state.stores, &id).await?;
    Ok(([(header::CONTENT_TYPE, "application/pdf")], bytes))
}

pub async fn lecture_page(
    State(state): State<Arc<AppState>>,
    Path((id, page)): Path<(String, usize)>,
) -> Result<impl IntoResponse, LectureError> {
    let bytes = playback::page_object(&state.stores, &id, page).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

// ── Agents ────────────────────────────────────────────────────────────────

/// `POST /v1/agents` — create or replace an agent from the body.
pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(agent): Json<LectureAgent>,
) -> Result<(StatusCode, Json<LectureAgent>), LectureError> {
    agent.validate()?;
    state.stores.agents.put_agent(&agent).await?;
    info!("Agent '{}' created", agent.id);
    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LectureAgent>>, LectureError> {
    Ok(Json(state.stores.agents.list_agents().await?))
}

pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LectureAgent>, LectureError> {
    Ok(Json(state.stores.agents.get_agent(&id).await?))
}

/// `PUT /v1/agents/:id` — update an existing agent. The path id wins over
/// whatever id the body carries.
pub async fn put_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut agent): Json<LectureAgent>,
) -> Result<Json<LectureAgent>, LectureError> {
    state.stores.agents.get_agent(&id).await?;
    agent.id = id;
    agent.validate()?;
    state.stores.agents.put_agent(&agent).await?;
    Ok(Json(agent))
}

pub async fn delete_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, LectureError> {
    state.stores.agents.get_agent(&id).await?;
    state.stores.agents.delete_agent(&id).await?;
    info!("Agent '{id}' deleted");
    Ok(StatusCode::NO_CONTENT)
}
