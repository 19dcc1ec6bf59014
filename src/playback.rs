//! Playback manifests and position lookup.
//!
//! The manifest is the one document a player needs: where the audio, PDF
//! and page images live, the full script with block headings, and the word
//! timing table. Position lookup answers "which word is being spoken at
//! t milliseconds" server-side for thin clients that do not want to hold
//! the timing table.

use serde::Serialize;

use crate::error::LectureError;
use crate::job::{Job, JobStatus, StageKind};
use crate::store::{keys, Stores};
use crate::timing::{word_index_at, TimingTrack, WordTiming};

/// Everything a playback client needs for one lecture.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackManifest {
    pub job_id: String,
    pub title: String,
    pub filename: String,
    pub status: JobStatus,
    pub agent: AgentSummary,
    pub pdf_url: String,
    /// One URL per rendered page, in page order.
    pub page_urls: Vec<String>,
    pub audio: AudioInfo,
    pub script: crate::content::LectureScript,
    /// Flat word-timing table, ascending by `start_ms`.
    pub timings: Vec<WordTiming>,
}

/// The slice of the agent a player displays.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub voice_id: String,
}

/// Where the track lives and what it is.
#[derive(Debug, Clone, Serialize)]
pub struct AudioInfo {
    pub url: String,
    pub content_type: &'static str,
    pub duration_ms: u64,
    /// True when the word timings are estimates rather than engine marks.
    pub estimated_timings: bool,
}

/// Fail with [`LectureError::NotReady`] unless the job's audio stage is
/// done, naming the stage currently in the way.
pub fn ensure_ready(job: &Job) -> Result<(), LectureError> {
    if job.is_ready() {
        return Ok(());
    }
    let blocking = StageKind::ALL
        .iter()
        .find(|k| !job.stage(**k).status.is_done())
        .copied()
        .unwrap_or(StageKind::Audio);
    let state = job.stage(blocking);
    let detail = match &state.error {
        Some(e) => format!("{} stage failed: {e}", blocking.label()),
        None => format!("{} stage is {:?}", blocking.label(), state.status),
    };
    Err(LectureError::NotReady {
        job: job.id.clone(),
        detail,
    })
}

/// Build the playback manifest for a finished job.
pub async fn manifest(stores: &Stores, job_id: &str) -> Result<PlaybackManifest, LectureError> {
    let job = stores.jobs.get_job(job_id).await?;
    ensure_ready(&job)?;

    // An agent deleted after the job finished should not break playback.
    let agent = match stores.agents.get_agent(&job.agent_id).await {
        Ok(agent) => AgentSummary {
            id: agent.id,
            name: agent.name,
            voice_id: agent.voice.voice_id,
        },
        Err(_) => AgentSummary {
            id: job.agent_id.clone(),
            name: job.agent_id.clone(),
            voice_id: String::new(),
        },
    };

    let script: crate::content::LectureScript =
        serde_json::from_slice(&stores.objects.get(&keys::script(job_id)).await?)?;
    let track: TimingTrack =
        serde_json::from_slice(&stores.objects.get(&keys::timings(job_id)).await?)?;

    let page_urls = (1..=job.page_count.unwrap_or(0))
        .map(|n| format!("/v1/lectures/{job_id}/pages/{n}"))
        .collect();

    Ok(PlaybackManifest {
        job_id: job_id.to_string(),
        title: crate::worker::lecture_title(&job),
        filename: job.filename.clone(),
        status: job.status(),
        agent,
        pdf_url: format!("/v1/lectures/{job_id}/pdf"),
        page_urls,
        audio: AudioInfo {
            url: format!("/v1/lectures/{job_id}/audio"),
            content_type: track.format.content_type(),
            duration_ms: track.duration_ms,
            estimated_timings: track.estimated,
        },
        script,
        timings: track.words,
    })
}

/// The playback position at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackPosition {
    pub t_ms: u64,
    /// Index into the manifest's timing table; `None` before the first word.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word: Option<WordTiming>,
    /// Heading of the block the current word belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
}

/// Which word is being spoken at `t_ms`, with its block heading.
pub async fn position(
    stores: &Stores,
    job_id: &str,
    t_ms: u64,
) -> Result<PlaybackPosition, LectureError> {
    let job = stores.jobs.get_job(job_id).await?;
    ensure_ready(&job)?;

    let track: TimingTrack =
        serde_json::from_slice(&stores.objects.get(&keys::timings(job_id)).await?)?;
    let script: crate::content::LectureScript =
        serde_json::from_slice(&stores.objects.get(&keys::script(job_id)).await?)?;

    let word_index = word_index_at(&track.words, t_ms);
    let word = word_index.map(|i| track.words[i].clone());
    let heading = word.as_ref().and_then(|w| {
        script
            .blocks
            .iter()
            .find(|b| b.id == w.block_id)
            .map(|b| b.heading.clone())
    });

    Ok(PlaybackPosition {
        t_ms,
        word_index,
        word,
        heading,
    })
}

/// The assembled audio track plus its content type.
pub async fn audio_object(
    stores: &Stores,
    job_id: &str,
) -> Result<(Vec<u8>, &'static str), LectureError> {
    let job = stores.jobs.get_job(job_id).await?;
    ensure_ready(&job)?;

    let track: TimingTrack =
        serde_json::from_slice(&stores.objects.get(&keys::timings(job_id)).await?)?;
    let bytes = stores
        .objects
        .get(&keys::audio(job_id, track.format.extension()))
        .await?;
    Ok((bytes, track.format.content_type()))
}

/// The original uploaded PDF.
pub async fn pdf_object(stores: &Stores, job_id: &str) -> Result<Vec<u8>, LectureError> {
    stores.jobs.get_job(job_id).await?;
    stores.objects.get(&keys::original_pdf(job_id)).await
}

/// One rendered page image. Available as soon as the render stage is done,
/// before the rest of the pipeline finishes.
pub async fn page_object(
    stores: &Stores,
    job_id: &str,
    page: usize,
) -> Result<Vec<u8>, LectureError> {
    let job = stores.jobs.get_job(job_id).await?;
    if let Some(total) = job.page_count {
        if page < 1 || page > total {
            return Err(LectureError::PageOutOfRange { page, total });
        }
    }
    stores.objects.get(&keys::page_image(job_id, page)).await
}
