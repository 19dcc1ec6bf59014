//! The result of a one-shot composition run.

use serde::Serialize;

use crate::content::{AudioFormat, LectureScript, Segment};
use crate::job::{Job, JobStatus};
use crate::timing::TimingTrack;

/// Everything a finished lecture consists of, held in memory.
///
/// Produced by [`crate::compose`]; the server-mode equivalent lives in the
/// stores and is assembled per request by [`crate::playback::manifest`].
#[derive(Debug, Clone)]
pub struct LectureOutput {
    /// The job record with its per-stage history and warnings.
    pub job: Job,
    /// Ordered segments the script was generated from.
    pub segments: Vec<Segment>,
    pub script: LectureScript,
    /// The assembled audio track.
    pub audio: Vec<u8>,
    /// Word timings plus track format and duration.
    pub timings: TimingTrack,
    pub stats: LectureStats,
}

impl LectureOutput {
    pub fn status(&self) -> JobStatus {
        self.job.status()
    }

    pub fn format(&self) -> AudioFormat {
        self.timings.format
    }
}

/// Headline numbers for logs and the CLI summary line.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LectureStats {
    pub page_count: usize,
    pub segment_count: usize,
    pub block_count: usize,
    pub word_count: usize,
    pub duration_ms: u64,
    /// Blocks that fell back to the segment summary.
    pub degraded_blocks: usize,
    /// Non-fatal warnings across all stages.
    pub warning_count: usize,
}

impl LectureStats {
    /// One human-readable line, e.g.
    /// `12 pages → 7 segments → 9 blocks, 1432 words, 10m 52s of audio`.
    pub fn summary(&self) -> String {
        let secs = self.duration_ms / 1000;
        format!(
            "{} pages → {} segments → {} blocks, {} words, {}m {:02}s of audio",
            self.page_count,
            self.segment_count,
            self.block_count,
            self.word_count,
            secs / 60,
            secs % 60,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line_formats_the_duration() {
        let stats = LectureStats {
            page_count: 12,
            segment_count: 7,
            block_count: 9,
            word_count: 1432,
            duration_ms: 652_000,
            degraded_blocks: 0,
            warning_count: 0,
        };
        assert_eq!(
            stats.summary(),
            "12 pages → 7 segments → 9 blocks, 1432 words, 10m 52s of audio"
        );
    }
}
