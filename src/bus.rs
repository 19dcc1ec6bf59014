//! In-process job event bus.
//!
//! Stages announce what they finished; the worker and any number of
//! observers subscribe. Delivery is broadcast, at-most-once per subscriber:
//! a receiver that falls behind loses the oldest events (and is told so),
//! which is why the worker re-reads job state instead of trusting event
//! history.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::job::StageKind;

/// Everything that can happen to a lecture job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A PDF was accepted and a job record created.
    JobCreated { job_id: String },
    /// Every selected page was rasterised and uploaded.
    PagesRendered {
        job_id: String,
        page_count: usize,
        image_prefix: String,
    },
    /// Segments are merged, ordered and stored.
    AnalysisCompleted {
        job_id: String,
        segment_count: usize,
    },
    /// The narration script is stored.
    ScriptGenerated { job_id: String, block_count: usize },
    /// Audio and word timings are stored; the lecture is playable.
    AudioSynthesized { job_id: String, duration_ms: u64 },
    /// A stage hit a fatal error; the job is parked.
    StageFailed {
        job_id: String,
        stage: StageKind,
        error: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::JobCreated { job_id }
            | JobEvent::PagesRendered { job_id, .. }
            | JobEvent::AnalysisCompleted { job_id, .. }
            | JobEvent::ScriptGenerated { job_id, .. }
            | JobEvent::AudioSynthesized { job_id, .. }
            | JobEvent::StageFailed { job_id, .. } => job_id,
        }
    }

    /// Event name used in logs.
    pub fn detail_type(&self) -> &'static str {
        match self {
            JobEvent::JobCreated { .. } => "JobCreated",
            JobEvent::PagesRendered { .. } => "PagesRendered",
            JobEvent::AnalysisCompleted { .. } => "AnalysisCompleted",
            JobEvent::ScriptGenerated { .. } => "ScriptGenerated",
            JobEvent::AudioSynthesized { .. } => "AudioSynthesized",
            JobEvent::StageFailed { .. } => "StageFailed",
        }
    }
}

/// Cloneable handle to the broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Silently dropped when nobody is subscribed, which
    /// is normal during one-shot CLI runs.
    pub fn publish(&self, event: JobEvent) {
        debug!(
            job_id = event.job_id(),
            event = event.detail_type(),
            "publishing job event"
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(JobEvent::JobCreated {
            job_id: "j1".into(),
        });

        assert_eq!(a.recv().await.unwrap().job_id(), "j1");
        assert_eq!(b.recv().await.unwrap().job_id(), "j1");
    }

    #[tokio::test]
    async fn publishing_with_no_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(JobEvent::AudioSynthesized {
            job_id: "j1".into(),
            duration_ms: 1234,
        });
    }

    #[tokio::test]
    async fn slow_subscriber_is_told_it_lagged() {
        let bus = EventBus::new(1);
        let mut rx = bus.subscribe();
        for i in 0..3 {
            bus.publish(JobEvent::JobCreated {
                job_id: format!("j{i}"),
            });
        }
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped >= 1),
            other => panic!("expected lag, got {other:?}"),
        }
    }
}
