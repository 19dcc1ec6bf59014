//! Lecture job records.
//!
//! A [`Job`] tracks one uploaded PDF through the four pipeline stages. The
//! overall status is always derived from the per-stage records rather than
//! stored, so the two can never disagree after a crash or a redelivered
//! event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AnalysisMode;
use crate::error::StageError;

/// Pipeline stages a job moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Rasterise pages to PNG and extract document metadata.
    Render,
    /// Turn pages into ordered lecture segments (vision or legacy path).
    Analyze,
    /// Generate the narration script from the segments.
    Script,
    /// Synthesise speech and word timings from the script.
    Audio,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Render,
        StageKind::Analyze,
        StageKind::Script,
        StageKind::Audio,
    ];

    /// Short name used in logs and progress output.
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Render => "render",
            StageKind::Analyze => "analyze",
            StageKind::Script => "script",
            StageKind::Audio => "audio",
        }
    }

    /// The stage that runs after this one, if any.
    pub fn next(&self) -> Option<StageKind> {
        match self {
            StageKind::Render => Some(StageKind::Analyze),
            StageKind::Analyze => Some(StageKind::Script),
            StageKind::Script => Some(StageKind::Audio),
            StageKind::Audio => None,
        }
    }
}

/// Lifecycle of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    /// Completed, but some units were skipped or fell back (see `warnings`).
    Degraded,
    Failed,
}

impl StageStatus {
    /// Completed or Degraded: the stage produced usable output.
    pub fn is_done(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Degraded)
    }
}

/// Per-stage record on a [`Job`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageState {
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Fatal error that stopped the stage, as a display string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal unit failures the stage worked around.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<StageError>,
}

/// Overall job status, derived from the four stage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    /// Finished, but at least one stage degraded (pages skipped, fallback
    /// narration, estimated timings).
    Degraded,
    Failed,
}

/// One uploaded PDF moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Original filename as uploaded (display only, never a storage path).
    pub filename: String,
    /// Lecture agent chosen at upload time.
    pub agent_id: String,
    pub mode: AnalysisMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Document title from PDF metadata, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Set once the render stage has opened the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    pub render: StageState,
    pub analyze: StageState,
    pub script: StageState,
    pub audio: StageState,
}

impl Job {
    pub fn new(
        filename: impl Into<String>,
        agent_id: impl Into<String>,
        mode: AnalysisMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            agent_id: agent_id.into(),
            mode,
            created_at: now,
            updated_at: now,
            title: None,
            page_count: None,
            render: StageState::default(),
            analyze: StageState::default(),
            script: StageState::default(),
            audio: StageState::default(),
        }
    }

    pub fn stage(&self, kind: StageKind) -> &StageState {
        match kind {
            StageKind::Render => &self.render,
            StageKind::Analyze => &self.analyze,
            StageKind::Script => &self.script,
            StageKind::Audio => &self.audio,
        }
    }

    pub fn stage_mut(&mut self, kind: StageKind) -> &mut StageState {
        match kind {
            StageKind::Render => &mut self.render,
            StageKind::Analyze => &mut self.analyze,
            StageKind::Script => &mut self.script,
            StageKind::Audio => &mut self.audio,
        }
    }

    /// Mark a stage as running.
    pub fn begin_stage(&mut self, kind: StageKind) {
        let now = Utc::now();
        let state = self.stage_mut(kind);
        state.status = StageStatus::Running;
        state.started_at = Some(now);
        state.error = None;
        self.updated_at = now;
    }

    /// Mark a stage finished. Non-empty `warnings` downgrade it to Degraded.
    pub fn finish_stage(&mut self, kind: StageKind, warnings: Vec<StageError>) {
        let now = Utc::now();
        let state = self.stage_mut(kind);
        state.status = if warnings.is_empty() {
            StageStatus::Completed
        } else {
            StageStatus::Degraded
        };
        state.finished_at = Some(now);
        state.warnings = warnings;
        self.updated_at = now;
    }

    /// Mark a stage failed with a fatal error.
    pub fn fail_stage(&mut self, kind: StageKind, error: impl Into<String>) {
        let now = Utc::now();
        let state = self.stage_mut(kind);
        state.status = StageStatus::Failed;
        state.finished_at = Some(now);
        state.error = Some(error.into());
        self.updated_at = now;
    }

    /// Derive the overall status from the stage records.
    pub fn status(&self) -> JobStatus {
        let stages = StageKind::ALL.map(|k| self.stage(k).status);

        if stages.iter().any(|s| *s == StageStatus::Failed) {
            return JobStatus::Failed;
        }
        if stages.iter().all(|s| s.is_done()) {
            if stages.iter().any(|s| *s == StageStatus::Degraded) {
                return JobStatus::Degraded;
            }
            return JobStatus::Completed;
        }
        if stages.iter().all(|s| *s == StageStatus::Pending) {
            return JobStatus::Queued;
        }
        JobStatus::Processing
    }

    /// True once the audio stage (and therefore everything before it) is done.
    pub fn is_ready(&self) -> bool {
        self.audio.status.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("paper.pdf", "prof", AnalysisMode::Vision)
    }

    #[test]
    fn fresh_job_is_queued() {
        assert_eq!(job().status(), JobStatus::Queued);
    }

    #[test]
    fn running_stage_means_processing() {
        let mut j = job();
        j.begin_stage(StageKind::Render);
        assert_eq!(j.status(), JobStatus::Processing);
    }

    #[test]
    fn all_stages_done_means_completed() {
        let mut j = job();
        for kind in StageKind::ALL {
            j.begin_stage(kind);
            j.finish_stage(kind, vec![]);
        }
        assert_eq!(j.status(), JobStatus::Completed);
        assert!(j.is_ready());
    }

    #[test]
    fn warnings_degrade_the_job() {
        let mut j = job();
        for kind in StageKind::ALL {
            j.begin_stage(kind);
            let warnings = if kind == StageKind::Analyze {
                vec![StageError::AnalysisFailed {
                    page: 2,
                    retries: 3,
                    detail: "timeout".into(),
                }]
            } else {
                vec![]
            };
            j.finish_stage(kind, warnings);
        }
        assert_eq!(j.status(), JobStatus::Degraded);
        assert_eq!(j.analyze.status, StageStatus::Degraded);
    }

    #[test]
    fn any_failed_stage_fails_the_job() {
        let mut j = job();
        j.begin_stage(StageKind::Render);
        j.fail_stage(StageKind::Render, "pdf corrupt");
        assert_eq!(j.status(), JobStatus::Failed);
        assert!(!j.is_ready());
    }

    #[test]
    fn stage_order_is_render_analyze_script_audio() {
        assert_eq!(StageKind::Render.next(), Some(StageKind::Analyze));
        assert_eq!(StageKind::Audio.next(), None);
    }
}
