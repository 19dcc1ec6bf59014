//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn LectureProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline works through each stage.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a broadcast channel, a WebSocket, a database record, or
//! a terminal progress bar — without the library knowing anything about how
//! the host application communicates. The trait is `Send + Sync` so it works
//! correctly when units are processed concurrently.
//!
//! The HTTP service does not use this trait; it watches the event bus
//! ([`crate::bus`]) instead. The callback exists for in-process callers,
//! chiefly the CLI.

use std::sync::Arc;

use crate::job::StageKind;

/// Called by the pipeline as it works through stages and their units
/// (pages, segments, audio blocks).
///
/// Implementations must be `Send + Sync` (units within a stage can be
/// processed concurrently). All methods have default no-op implementations
/// so callers only override what they care about.
pub trait LectureProgressCallback: Send + Sync {
    /// Called when a stage starts, with the number of units it will process.
    fn on_stage_start(&self, stage: StageKind, total_units: usize) {
        let _ = (stage, total_units);
    }

    /// Called when one unit of the stage finishes successfully.
    ///
    /// `unit` is 1-indexed within the stage. May be called concurrently and
    /// out of order.
    fn on_unit_complete(&self, stage: StageKind, unit: usize, total_units: usize) {
        let _ = (stage, unit, total_units);
    }

    /// Called when a unit fails after all retries.
    fn on_unit_error(&self, stage: StageKind, unit: usize, error: &str) {
        let _ = (stage, unit, error);
    }

    /// Called when the stage has attempted every unit.
    fn on_stage_complete(&self, stage: StageKind, succeeded: usize, total_units: usize) {
        let _ = (stage, succeeded, total_units);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl LectureProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn LectureProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        units: AtomicUsize,
        errors: AtomicUsize,
        last_stage_total: AtomicUsize,
    }

    impl LectureProgressCallback for TrackingCallback {
        fn on_unit_complete(&self, _stage: StageKind, _unit: usize, _total: usize) {
            self.units.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_error(&self, _stage: StageKind, _unit: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, _stage: StageKind, succeeded: usize, _total: usize) {
            self.last_stage_total.store(succeeded, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(StageKind::Render, 5);
        cb.on_unit_complete(StageKind::Render, 1, 5);
        cb.on_unit_error(StageKind::Analyze, 2, "some error");
        cb.on_stage_complete(StageKind::Render, 5, 5);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            units: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            last_stage_total: AtomicUsize::new(0),
        };

        tracker.on_stage_start(StageKind::Analyze, 3);
        tracker.on_unit_complete(StageKind::Analyze, 1, 3);
        tracker.on_unit_complete(StageKind::Analyze, 2, 3);
        tracker.on_unit_error(StageKind::Analyze, 3, "VLM timeout");
        tracker.on_stage_complete(StageKind::Analyze, 2, 3);

        assert_eq!(tracker.units.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.last_stage_total.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start(StageKind::Audio, 10);
        cb.on_unit_complete(StageKind::Audio, 1, 10);
    }
}
