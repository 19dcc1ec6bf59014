//! HTTP API tests against the in-process router.
//!
//! Each test builds the router over fresh in-memory stores and drives it
//! with `tower::ServiceExt::oneshot` — no listener, no network, and no
//! worker task, so job records stay exactly where the test put them.

#![cfg(feature = "server")]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use pdf2lecture::config::{AnalysisMode, PipelineConfig};
use pdf2lecture::content::{AudioFormat, BlockKind, LectureScript, ScriptBlock};
use pdf2lecture::job::{Job, StageKind};
use pdf2lecture::server::{build_state, router, AppState, ServerConfig};
use pdf2lecture::store::keys;
use pdf2lecture::timing::{TimingTrack, WordTiming};

async fn test_state() -> Arc<AppState> {
    build_state(&ServerConfig::default(), PipelineConfig::default())
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Minimal multipart body with the given named parts.
fn multipart_body(parts: &[(&str, &str, &[u8])]) -> (String, Vec<u8>) {
    let boundary = "x-test-boundary";
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        if filename.is_empty() {
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
        } else {
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

fn upload(parts: &[(&str, &str, &[u8])]) -> Request<Body> {
    let (content_type, body) = multipart_body(parts);
    Request::builder()
        .method("POST")
        .uri("/v1/lectures")
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap()
}

// ── Health and lectures ──────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_service_and_version() {
    let app = router(test_state().await);
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "pdf2lecture");
}

#[tokio::test]
async fn lectures_start_empty_and_unknown_ids_are_404() {
    let state = test_state().await;

    let response = router(state.clone()).oneshot(get("/v1/lectures")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));

    let response = router(state)
        .oneshot(get("/v1/lectures/no-such-job"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "job_not_found");
}

#[tokio::test]
async fn upload_queues_a_job_and_returns_202() {
    let state = test_state().await;
    let request = upload(&[
        ("file", "paper.pdf", b"%PDF-1.7 fake body"),
        ("agent", "", b"coach"),
        ("mode", "", b"legacy"),
    ]);

    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    assert_eq!(json["status"], "queued");
    assert_eq!(json["filename"], "paper.pdf");
    assert_eq!(json["agent_id"], "coach");
    assert_eq!(json["mode"], "legacy");

    // The job is visible in the listing and the PDF was stored.
    let id = json["id"].as_str().unwrap();
    let listed = router(state.clone()).oneshot(get("/v1/lectures")).await.unwrap();
    let jobs = body_json(listed).await;
    assert_eq!(jobs.as_array().unwrap().len(), 1);
    assert!(state
        .stores
        .objects
        .exists(&keys::original_pdf(id))
        .await
        .unwrap());
}

#[tokio::test]
async fn upload_without_a_file_part_is_rejected() {
    let request = upload(&[("agent", "", b"professor")]);
    let response = router(test_state().await).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_input");
}

#[tokio::test]
async fn upload_rejects_non_pdf_bytes() {
    let request = upload(&[("file", "notes.txt", b"just some text")]);
    let response = router(test_state().await).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "not_a_pdf");
}

#[tokio::test]
async fn upload_rejects_an_unknown_mode() {
    let request = upload(&[
        ("file", "paper.pdf", b"%PDF-1.7 fake"),
        ("mode", "", b"turbo"),
    ]);
    let response = router(test_state().await).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_rejects_an_unknown_agent() {
    let request = upload(&[
        ("file", "paper.pdf", b"%PDF-1.7 fake"),
        ("agent", "", b"nobody"),
    ]);
    let response = router(test_state().await).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "agent_not_found");
}

// ── Playback ─────────────────────────────────────────────────────────────

/// Seed a finished job with script, timings and audio artefacts.
async fn seed_finished_job(state: &AppState) -> Job {
    let mut job = Job::new("paper.pdf", "professor", AnalysisMode::Vision);
    job.page_count = Some(1);
    for kind in StageKind::ALL {
        job.begin_stage(kind);
        job.finish_stage(kind, vec![]);
    }
    state.stores.jobs.put_job(&job).await.unwrap();

    let script = LectureScript {
        agent_id: "professor".into(),
        title: "paper".into(),
        blocks: vec![ScriptBlock {
            id: 0,
            kind: BlockKind::Intro,
            segment_id: None,
            heading: "Introduction".into(),
            text: "Welcome along.".into(),
            degraded: false,
        }],
    };
    let track = TimingTrack {
        format: AudioFormat::Wav,
        duration_ms: 1_000,
        estimated: true,
        words: vec![WordTiming {
            word: "Welcome".into(),
            start_ms: 0,
            end_ms: 400,
            block_id: 0,
        }],
    };
    let objects = &state.stores.objects;
    objects
        .put(&keys::script(&job.id), &serde_json::to_vec(&script).unwrap())
        .await
        .unwrap();
    objects
        .put(&keys::timings(&job.id), &serde_json::to_vec(&track).unwrap())
        .await
        .unwrap();
    objects
        .put(&keys::audio(&job.id, "wav"), b"RIFFfake")
        .await
        .unwrap();
    objects
        .put(&keys::original_pdf(&job.id), b"%PDF-1.7 fake")
        .await
        .unwrap();
    objects
        .put(&keys::page_image(&job.id, 1), b"\x89PNGfake")
        .await
        .unwrap();
    job
}

#[tokio::test]
async fn playback_endpoints_serve_a_finished_job() {
    let state = test_state().await;
    let job = seed_finished_job(&state).await;

    let response = router(state.clone())
        .oneshot(get(&format!("/v1/lectures/{}/playback", job.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let manifest = body_json(response).await;
    assert_eq!(manifest["agent"]["id"], "professor");
    assert_eq!(manifest["audio"]["content_type"], "audio/wav");
    assert_eq!(manifest["timings"].as_array().unwrap().len(), 1);

    let response = router(state.clone())
        .oneshot(get(&format!(
            "/v1/lectures/{}/playback/position?t=100",
            job.id
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let position = body_json(response).await;
    assert_eq!(position["word"]["word"], "Welcome");
    assert_eq!(position["heading"], "Introduction");

    let response = router(state.clone())
        .oneshot(get(&format!("/v1/lectures/{}/audio", job.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "audio/wav"
    );

    let response = router(state)
        .oneshot(get(&format!("/v1/lectures/{}/pages/1", job.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
}

#[tokio::test]
async fn playback_on_an_unfinished_job_is_a_conflict() {
    let state = test_state().await;
    let job = Job::new("paper.pdf", "professor", AnalysisMode::Vision);
    state.stores.jobs.put_job(&job).await.unwrap();

    let response = router(state)
        .oneshot(get(&format!("/v1/lectures/{}/playback", job.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"], "not_ready");
}

#[tokio::test]
async fn page_out_of_range_is_404() {
    let state = test_state().await;
    let job = seed_finished_job(&state).await;

    let response = router(state)
        .oneshot(get(&format!("/v1/lectures/{}/pages/7", job.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ── Agents ───────────────────────────────────────────────────────────────

fn custom_agent() -> Value {
    serde_json::json!({
        "id": "tutor",
        "name": "The Tutor",
        "persona": "You are a friendly maths tutor.",
        "audience": "secondary school students",
        "style": "short sentences, frequent recaps",
        "verbosity": "brief",
        "language": "en",
        "voice": { "voice_id": "Amy", "engine": "neural" }
    })
}

#[tokio::test]
async fn builtin_agents_are_seeded() {
    let response = router(test_state().await)
        .oneshot(get("/v1/agents"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let agents = body_json(response).await;
    let ids: Vec<&str> = agents
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"professor"));
    assert!(ids.contains(&"coach"));
    assert!(ids.contains(&"narrator"));
}

#[tokio::test]
async fn agent_crud_round_trip() {
    let state = test_state().await;

    let response = router(state.clone())
        .oneshot(post_json("/v1/agents", &custom_agent()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router(state.clone())
        .oneshot(get("/v1/agents/tutor"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["name"], "The Tutor");

    // Update through PUT; the path id wins over the body id.
    let mut renamed = custom_agent();
    renamed["id"] = "ignored".into();
    renamed["name"] = "The Patient Tutor".into();
    let request = Request::builder()
        .method("PUT")
        .uri("/v1/agents/tutor")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(renamed.to_string()))
        .unwrap();
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["id"], "tutor");
    assert_eq!(updated["name"], "The Patient Tutor");

    let request = Request::builder()
        .method("DELETE")
        .uri("/v1/agents/tutor")
        .body(Body::empty())
        .unwrap();
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router(state).oneshot(get("/v1/agents/tutor")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_agents_are_rejected() {
    let mut agent = custom_agent();
    agent["id"] = "has spaces".into();
    let response = router(test_state().await)
        .oneshot(post_json("/v1/agents", &agent))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_config");
}

#[tokio::test]
async fn updating_a_missing_agent_is_404() {
    let request = Request::builder()
        .method("PUT")
        .uri("/v1/agents/ghost")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(custom_agent().to_string()))
        .unwrap();
    let response = router(test_state().await).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
