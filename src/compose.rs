//! One-shot composition: a PDF in, a finished lecture out, no server.
//!
//! `compose` spins up the same pipeline the service runs — in-memory
//! stores, an event bus nobody listens to, the four worker stages in order —
//! so a CLI run and a server job produce byte-identical artefacts.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::agent::DEFAULT_AGENT_ID;
use crate::bus::EventBus;
use crate::config::PipelineConfig;
use crate::content::{DocumentMetadata, Segment};
use crate::error::LectureError;
use crate::output::{LectureOutput, LectureStats};
use crate::pipeline::{ingest, render};
use crate::store::{keys, seed_builtin_agents, Stores};
use crate::timing::TimingTrack;
use crate::worker;

/// Produce a lecture from a file path or URL with the default agent.
pub async fn compose(input: &str, config: &PipelineConfig) -> Result<LectureOutput, LectureError> {
    compose_with_agent(input, DEFAULT_AGENT_ID, config).await
}

/// Produce a lecture narrated by the named agent.
pub async fn compose_with_agent(
    input: &str,
    agent_id: &str,
    config: &PipelineConfig,
) -> Result<LectureOutput, LectureError> {
    let (bytes, filename) = ingest::fetch_input(input, config).await?;
    compose_bytes(bytes, &filename, agent_id, config).await
}

/// Produce a lecture from PDF bytes already in memory.
pub async fn compose_bytes(
    bytes: Vec<u8>,
    filename: &str,
    agent_id: &str,
    config: &PipelineConfig,
) -> Result<LectureOutput, LectureError> {
    let stores = Stores::in_memory();
    seed_builtin_agents(stores.agents.as_ref()).await?;
    let bus = EventBus::default();

    let job = ingest::create_job(
        &stores, &bus, config, &bytes, filename, agent_id, config.mode,
    )
    .await?;
    let job = worker::process_job(&stores, &bus, config, &job.id).await?;

    let segments: Vec<Segment> =
        serde_json::from_slice(&stores.objects.get(&keys::segments(&job.id)).await?)?;
    let script = serde_json::from_slice(&stores.objects.get(&keys::script(&job.id)).await?)?;
    let timings: TimingTrack =
        serde_json::from_slice(&stores.objects.get(&keys::timings(&job.id)).await?)?;
    let audio = stores
        .objects
        .get(&keys::audio(&job.id, timings.format.extension()))
        .await?;

    let output = LectureOutput {
        stats: stats_for(&job, &segments, &script, &timings),
        job,
        segments,
        script,
        audio,
        timings,
    };
    info!("Composed lecture: {}", output.stats.summary());
    Ok(output)
}

fn stats_for(
    job: &crate::job::Job,
    segments: &[Segment],
    script: &crate::content::LectureScript,
    timings: &TimingTrack,
) -> LectureStats {
    LectureStats {
        page_count: job.page_count.unwrap_or(0),
        segment_count: segments.len(),
        block_count: script.blocks.len(),
        word_count: script.word_count(),
        duration_ms: timings.duration_ms,
        degraded_blocks: script.blocks.iter().filter(|b| b.degraded).count(),
        warning_count: crate::job::StageKind::ALL
            .iter()
            .map(|k| job.stage(*k).warnings.len())
            .sum(),
    }
}

/// Compose and write the artefacts into `dir`.
///
/// Writes `script.json`, `timings.json`, `segments.json` and
/// `lecture.<ext>`, creating the directory if needed. Returns the output
/// plus the paths written.
pub async fn compose_to_dir(
    input: &str,
    agent_id: &str,
    dir: &Path,
    config: &PipelineConfig,
) -> Result<(LectureOutput, Vec<PathBuf>), LectureError> {
    let output = compose_with_agent(input, agent_id, config).await?;

    std::fs::create_dir_all(dir).map_err(|e| LectureError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut written = Vec::with_capacity(4);
    written.push(write_file(
        dir.join("script.json"),
        &serde_json::to_vec_pretty(&output.script)?,
    )?);
    written.push(write_file(
        dir.join("timings.json"),
        &serde_json::to_vec_pretty(&output.timings)?,
    )?);
    written.push(write_file(
        dir.join("segments.json"),
        &serde_json::to_vec_pretty(&output.segments)?,
    )?);
    written.push(write_file(
        dir.join(format!("lecture.{}", output.format().extension())),
        &output.audio,
    )?);

    Ok((output, written))
}

/// Write via a temp file in the same directory, then rename, so a crash
/// never leaves a half-written artefact under the final name.
fn write_file(path: PathBuf, data: &[u8]) -> Result<PathBuf, LectureError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data).map_err(|e| LectureError::OutputWriteFailed {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, &path).map_err(|e| LectureError::OutputWriteFailed {
        path: path.clone(),
        source: e,
    })?;
    Ok(path)
}

/// Read a PDF's metadata without running the pipeline.
pub async fn inspect(
    input: &str,
    config: &PipelineConfig,
) -> Result<DocumentMetadata, LectureError> {
    let (bytes, filename) = ingest::fetch_input(input, config).await?;
    ingest::validate_pdf(&bytes, &filename, config.max_pdf_bytes)?;
    render::inspect(bytes, config.password.clone()).await
}
