//! Event-driven pipeline worker.
//!
//! The worker subscribes to the [`EventBus`] and advances jobs one stage per
//! event: `JobCreated` triggers rendering, `PagesRendered` analysis, and so
//! on down the chain. Every stage transition is written to the job store
//! *before* the next event is published, so observers polling the job record
//! never see an event arrive ahead of the state it announces.
//!
//! Delivery is at-most-once and the bus may redeliver nothing after a lag,
//! so each stage handler re-reads the job and runs only when its stage is
//! still `Pending`. A stale or duplicate event is a no-op, not a crash.

use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, JobEvent};
use crate::config::{AnalysisMode, PipelineConfig};
use crate::content::{LectureScript, Segment};
use crate::error::LectureError;
use crate::job::{Job, StageKind, StageStatus};
use crate::model::resolve_model;
use crate::pipeline::{analyze, audio, extract, order, render, script};
use crate::store::{keys, Stores};
use crate::timing::TimingTrack;
use crate::tts::resolve_synthesizer;

/// Run the worker loop until the bus closes.
///
/// Spawn this once per process; concurrency within a stage comes from the
/// pipeline config, not from multiple workers.
pub async fn run(stores: Stores, bus: EventBus, config: PipelineConfig) {
    let mut events = bus.subscribe();
    info!("Pipeline worker started");
    loop {
        match events.recv().await {
            Ok(event) => {
                let job_id = event.job_id().to_string();
                let name = event.detail_type();
                if let Err(e) = dispatch(&stores, &bus, &config, &event).await {
                    error!("Job {job_id}: handling {name} failed: {e}");
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("Worker lagged, {n} events lost; affected jobs stay at their last stage");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    info!("Pipeline worker stopped");
}

/// Advance the job the event belongs to by one stage.
async fn dispatch(
    stores: &Stores,
    bus: &EventBus,
    config: &PipelineConfig,
    event: &JobEvent,
) -> Result<(), LectureError> {
    match event {
        JobEvent::JobCreated { job_id } => run_render(stores, bus, config, job_id).await,
        JobEvent::PagesRendered { job_id, .. } => run_analyze(stores, bus, config, job_id).await,
        JobEvent::AnalysisCompleted { job_id, .. } => {
            run_script(stores, bus, config, job_id).await
        }
        JobEvent::ScriptGenerated { job_id, .. } => run_audio(stores, bus, config, job_id).await,
        JobEvent::AudioSynthesized { .. } | JobEvent::StageFailed { .. } => Ok(()),
    }
}

/// Run every stage of one job in order. The one-shot entry point
/// ([`crate::compose`]) uses this instead of the event loop.
pub async fn process_job(
    stores: &Stores,
    bus: &EventBus,
    config: &PipelineConfig,
    job_id: &str,
) -> Result<Job, LectureError> {
    run_render(stores, bus, config, job_id).await?;
    run_analyze(stores, bus, config, job_id).await?;
    run_script(stores, bus, config, job_id).await?;
    run_audio(stores, bus, config, job_id).await?;
    stores.jobs.get_job(job_id).await
}

/// True when the stage should run now; logs and declines on redelivery.
fn claim_stage(job: &Job, kind: StageKind) -> bool {
    let status = job.stage(kind).status;
    if status == StageStatus::Pending {
        true
    } else {
        debug!(
            "Job {}: {} stage already {:?}, ignoring event",
            job.id,
            kind.label(),
            status
        );
        false
    }
}

/// Record a fatal stage error on the job and announce it.
async fn record_failure(
    stores: &Stores,
    bus: &EventBus,
    mut job: Job,
    kind: StageKind,
    error: LectureError,
) -> Result<(), LectureError> {
    error!("Job {}: {} stage failed: {error}", job.id, kind.label());
    job.fail_stage(kind, error.to_string());
    stores.jobs.put_job(&job).await?;
    bus.publish(JobEvent::StageFailed {
        job_id: job.id.clone(),
        stage: kind,
        error: error.to_string(),
    });
    Err(error)
}

/// Render stage: rasterise pages, record metadata.
pub async fn run_render(
    stores: &Stores,
    bus: &EventBus,
    config: &PipelineConfig,
    job_id: &str,
) -> Result<(), LectureError> {
    let mut job = stores.jobs.get_job(job_id).await?;
    if !claim_stage(&job, StageKind::Render) {
        return Ok(());
    }
    job.begin_stage(StageKind::Render);
    stores.jobs.put_job(&job).await?;

    let work = async {
        let bytes = stores.objects.get(&keys::original_pdf(job_id)).await?;
        render::render_to_store(&stores.objects, job_id, bytes, config).await
    };

    match work.await {
        Ok(rendered) => {
            job.page_count = Some(rendered.page_count);
            if config.extract_metadata {
                job.title = rendered.metadata.title.clone();
            }
            job.finish_stage(StageKind::Render, vec![]);
            stores.jobs.put_job(&job).await?;
            bus.publish(JobEvent::PagesRendered {
                job_id: job_id.to_string(),
                page_count: rendered.rendered.len(),
                image_prefix: keys::page_prefix(job_id),
            });
            Ok(())
        }
        Err(e) => record_failure(stores, bus, job, StageKind::Render, e).await,
    }
}

/// Analyze stage: pages become ordered segments via the job's mode.
pub async fn run_analyze(
    stores: &Stores,
    bus: &EventBus,
    config: &PipelineConfig,
    job_id: &str,
) -> Result<(), LectureError> {
    let mut job = stores.jobs.get_job(job_id).await?;
    if !claim_stage(&job, StageKind::Analyze) {
        return Ok(());
    }
    job.begin_stage(StageKind::Analyze);
    stores.jobs.put_job(&job).await?;

    let mode = job.mode;
    let work = async {
        let model = resolve_model(config)?;
        let total = job.page_count.ok_or_else(|| {
            LectureError::Internal("analyze ran before render set the page count".into())
        })?;
        let pages: Vec<usize> = config
            .pages
            .to_indices(total)
            .into_iter()
            .map(|i| i + 1)
            .collect();

        let (segments, warnings) = match mode {
            AnalysisMode::Vision => {
                let outcome =
                    analyze::analyze_pages(&model, &stores.objects, config, job_id, &pages)
                        .await?;
                // Vision segments carry their own prerequisite edges; no
                // second model call needed to order them.
                let ordered = order::topological_order(outcome.segments, &[], &[]);
                (ordered, outcome.warnings)
            }
            AnalysisMode::Legacy => {
                let bytes = stores.objects.get(&keys::original_pdf(job_id)).await?;
                let outcome = extract::legacy_analyze(
                    &model,
                    &stores.objects,
                    config,
                    job_id,
                    bytes,
                    pages,
                )
                .await?;
                let ordered = order::order_segments(&model, config, outcome.segments).await;
                (ordered, outcome.warnings)
            }
        };

        stores
            .objects
            .put(&keys::segments(job_id), &serde_json::to_vec_pretty(&segments)?)
            .await?;
        Ok::<_, LectureError>((segments, warnings))
    };

    match work.await {
        Ok((segments, warnings)) => {
            job.finish_stage(StageKind::Analyze, warnings);
            stores.jobs.put_job(&job).await?;
            bus.publish(JobEvent::AnalysisCompleted {
                job_id: job_id.to_string(),
                segment_count: segments.len(),
            });
            Ok(())
        }
        Err(e) => record_failure(stores, bus, job, StageKind::Analyze, e).await,
    }
}

/// Script stage: ordered segments become agent-voiced narration blocks.
pub async fn run_script(
    stores: &Stores,
    bus: &EventBus,
    config: &PipelineConfig,
    job_id: &str,
) -> Result<(), LectureError> {
    let mut job = stores.jobs.get_job(job_id).await?;
    if !claim_stage(&job, StageKind::Script) {
        return Ok(());
    }
    job.begin_stage(StageKind::Script);
    stores.jobs.put_job(&job).await?;

    let title = lecture_title(&job);
    let agent_id = job.agent_id.clone();
    let work = async {
        let model = resolve_model(config)?;
        let agent = stores.agents.get_agent(&agent_id).await?;
        let raw = stores.objects.get(&keys::segments(job_id)).await?;
        let segments: Vec<Segment> = serde_json::from_slice(&raw)?;

        let outcome =
            script::generate_script(&model, config, &agent, &title, None, &segments).await?;
        stores
            .objects
            .put(
                &keys::script(job_id),
                &serde_json::to_vec_pretty(&outcome.script)?,
            )
            .await?;
        Ok::<_, LectureError>(outcome)
    };

    match work.await {
        Ok(outcome) => {
            let block_count = outcome.script.blocks.len();
            job.finish_stage(StageKind::Script, outcome.warnings);
            stores.jobs.put_job(&job).await?;
            bus.publish(JobEvent::ScriptGenerated {
                job_id: job_id.to_string(),
                block_count,
            });
            Ok(())
        }
        Err(e) => record_failure(stores, bus, job, StageKind::Script, e).await,
    }
}

/// Audio stage: script blocks become one track plus word timings.
pub async fn run_audio(
    stores: &Stores,
    bus: &EventBus,
    config: &PipelineConfig,
    job_id: &str,
) -> Result<(), LectureError> {
    let mut job = stores.jobs.get_job(job_id).await?;
    if !claim_stage(&job, StageKind::Audio) {
        return Ok(());
    }
    job.begin_stage(StageKind::Audio);
    stores.jobs.put_job(&job).await?;

    let agent_id = job.agent_id.clone();
    let work = async {
        let agent = stores.agents.get_agent(&agent_id).await?;
        let raw = stores.objects.get(&keys::script(job_id)).await?;
        let lecture: LectureScript = serde_json::from_slice(&raw)?;

        let tts = resolve_synthesizer(config).await;
        let outcome = audio::synthesize_script(&tts, config, &agent.voice, &lecture).await?;

        stores
            .objects
            .put(
                &keys::audio(job_id, outcome.format.extension()),
                &outcome.audio,
            )
            .await?;
        let track = TimingTrack {
            format: outcome.format,
            duration_ms: outcome.duration_ms,
            estimated: outcome.estimated,
            words: outcome.timings,
        };
        stores
            .objects
            .put(&keys::timings(job_id), &serde_json::to_vec(&track)?)
            .await?;
        Ok::<_, LectureError>(track)
    };

    match work.await {
        Ok(track) => {
            job.finish_stage(StageKind::Audio, vec![]);
            if track.estimated {
                // Estimated word timings are usable but imprecise; surface
                // that the same way skipped pages are surfaced.
                job.stage_mut(StageKind::Audio).status = StageStatus::Degraded;
            }
            stores.jobs.put_job(&job).await?;
            bus.publish(JobEvent::AudioSynthesized {
                job_id: job_id.to_string(),
                duration_ms: track.duration_ms,
            });
            Ok(())
        }
        Err(e) => record_failure(stores, bus, job, StageKind::Audio, e).await,
    }
}

/// Lecture title: PDF metadata title when the render stage found one, else
/// the upload filename without its extension.
pub fn lecture_title(job: &Job) -> String {
    job.title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| {
            job.filename
                .trim_end_matches(".pdf")
                .trim_end_matches(".PDF")
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::SegmentKind;
    use crate::model::{ChatModel, ChatReply};
    use crate::store::seed_builtin_agents;
    use crate::tts::mock::MockSynthesizer;
    use async_trait::async_trait;
    use edgequake_llm::{ChatMessage, CompletionOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for CountingModel {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<ChatReply, LectureError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatReply {
                content: "Narration for this part.".into(),
                ..Default::default()
            })
        }
    }

    async fn seeded_stores() -> Stores {
        let stores = Stores::in_memory();
        seed_builtin_agents(stores.agents.as_ref()).await.unwrap();
        stores
    }

    fn segments_fixture() -> Vec<Segment> {
        vec![Segment {
            id: "seg-001".into(),
            title: "Topic".into(),
            summary: "What the topic says.".into(),
            narration_notes: "Cover the topic.".into(),
            kind: SegmentKind::Concept,
            pages: vec![1],
            prerequisites: Vec::new(),
        }]
    }

    /// A job whose render and analyze stages already completed, with
    /// segments stored.
    async fn job_after_analysis(stores: &Stores) -> Job {
        let mut job = Job::new("paper.pdf", "professor", AnalysisMode::Vision);
        job.page_count = Some(1);
        for kind in [StageKind::Render, StageKind::Analyze] {
            job.begin_stage(kind);
            job.finish_stage(kind, vec![]);
        }
        stores.jobs.put_job(&job).await.unwrap();
        stores
            .objects
            .put(
                &keys::segments(&job.id),
                &serde_json::to_vec(&segments_fixture()).unwrap(),
            )
            .await
            .unwrap();
        job
    }

    fn config_with(model: Arc<dyn ChatModel>) -> PipelineConfig {
        PipelineConfig::builder()
            .chat_model(model)
            .synthesizer(Arc::new(MockSynthesizer::new()))
            .retry(crate::retry::Backoff::none())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn script_and_audio_stages_run_end_to_end() {
        let stores = seeded_stores().await;
        let bus = EventBus::default();
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let config = config_with(model.clone());
        let job = job_after_analysis(&stores).await;

        run_script(&stores, &bus, &config, &job.id).await.unwrap();
        run_audio(&stores, &bus, &config, &job.id).await.unwrap();

        let done = stores.jobs.get_job(&job.id).await.unwrap();
        assert!(done.is_ready());
        assert!(stores.objects.exists(&keys::script(&job.id)).await.unwrap());
        assert!(stores
            .objects
            .exists(&keys::timings(&job.id))
            .await
            .unwrap());
        // Mock timings are estimated, which degrades the audio stage.
        assert_eq!(done.audio.status, StageStatus::Degraded);

        let raw = stores.objects.get(&keys::timings(&job.id)).await.unwrap();
        let track: TimingTrack = serde_json::from_slice(&raw).unwrap();
        assert!(track.estimated);
        assert!(!track.words.is_empty());
    }

    #[tokio::test]
    async fn redelivered_events_do_not_rerun_a_stage() {
        let stores = seeded_stores().await;
        let bus = EventBus::default();
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let config = config_with(model.clone());
        let job = job_after_analysis(&stores).await;

        run_script(&stores, &bus, &config, &job.id).await.unwrap();
        let calls_after_first = model.calls.load(Ordering::SeqCst);
        run_script(&stores, &bus, &config, &job.id).await.unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn missing_segments_fail_the_script_stage_and_announce_it() {
        let stores = seeded_stores().await;
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let config = config_with(model);

        let mut job = Job::new("paper.pdf", "professor", AnalysisMode::Vision);
        for kind in [StageKind::Render, StageKind::Analyze] {
            job.begin_stage(kind);
            job.finish_stage(kind, vec![]);
        }
        stores.jobs.put_job(&job).await.unwrap();

        let err = run_script(&stores, &bus, &config, &job.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LectureError::ObjectNotFound { .. }));

        let failed = stores.jobs.get_job(&job.id).await.unwrap();
        assert_eq!(failed.script.status, StageStatus::Failed);
        assert_eq!(failed.status(), crate::job::JobStatus::Failed);

        match events.recv().await.unwrap() {
            JobEvent::StageFailed { stage, .. } => assert_eq!(stage, StageKind::Script),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn title_falls_back_to_the_filename() {
        let mut job = Job::new("attention.pdf", "professor", AnalysisMode::Vision);
        assert_eq!(lecture_title(&job), "attention");
        job.title = Some("Attention Is All You Need".into());
        assert_eq!(lecture_title(&job), "Attention Is All You Need");
    }
}
