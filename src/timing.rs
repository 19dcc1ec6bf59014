//! Word timings: the bridge between the audio track and the script text.
//!
//! A lecture's timing table is a single flat array covering every block, in
//! track order, with millisecond offsets from the start of the assembled
//! audio. The array is sorted by `start_ms`; playback position lookups rely
//! on that to stay a single binary search.

use serde::{Deserialize, Serialize};

use crate::content::AudioFormat;

/// One spoken word's position in the track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    /// Offset from the start of the assembled track.
    pub start_ms: u64,
    pub end_ms: u64,
    /// The [`crate::content::ScriptBlock`] this word belongs to.
    pub block_id: usize,
}

/// True when the array satisfies the timing invariants: non-decreasing
/// `start_ms` and `end_ms >= start_ms` for every word.
pub fn is_monotonic(timings: &[WordTiming]) -> bool {
    timings.windows(2).all(|w| w[0].start_ms <= w[1].start_ms)
        && timings.iter().all(|w| w.end_ms >= w.start_ms)
}

/// Index of the word being spoken at `t_ms`.
///
/// Returns the last word whose `start_ms` is at or before `t_ms`, so a word
/// stays "current" through the silence after it until the next word starts.
/// Returns `None` strictly before the first word. When several words share a
/// start time the last of them wins.
///
/// Requires the array to be sorted by `start_ms` (see [`is_monotonic`]).
pub fn word_index_at(timings: &[WordTiming], t_ms: u64) -> Option<usize> {
    let started = timings.partition_point(|w| w.start_ms <= t_ms);
    started.checked_sub(1)
}

/// The word being spoken at `t_ms`, if any.
pub fn word_at(timings: &[WordTiming], t_ms: u64) -> Option<&WordTiming> {
    word_index_at(timings, t_ms).map(|i| &timings[i])
}

/// Rebase block-local timings onto the track clock.
pub fn shift(timings: &mut [WordTiming], offset_ms: u64) {
    for t in timings {
        t.start_ms += offset_ms;
        t.end_ms += offset_ms;
    }
}

/// The timing document persisted next to the audio track
/// (`{job_id}/timings.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingTrack {
    /// Container format of the track the words index into.
    pub format: AudioFormat,
    pub duration_ms: u64,
    /// True when any block's timings were estimated rather than reported by
    /// the speech engine.
    pub estimated: bool,
    /// Flat, ascending by `start_ms`, covering every block.
    pub words: Vec<WordTiming>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(word: &str, start_ms: u64, end_ms: u64) -> WordTiming {
        WordTiming {
            word: word.into(),
            start_ms,
            end_ms,
            block_id: 0,
        }
    }

    fn sample() -> Vec<WordTiming> {
        vec![
            w("hello", 100, 400),
            w("there", 450, 700),
            w("world", 900, 1200),
        ]
    }

    #[test]
    fn lookup_before_first_word_is_none() {
        assert_eq!(word_index_at(&sample(), 0), None);
        assert_eq!(word_index_at(&sample(), 99), None);
    }

    #[test]
    fn lookup_at_exact_start_returns_that_word() {
        assert_eq!(word_index_at(&sample(), 100), Some(0));
        assert_eq!(word_index_at(&sample(), 450), Some(1));
    }

    #[test]
    fn lookup_mid_word() {
        assert_eq!(word_index_at(&sample(), 250), Some(0));
        assert_eq!(word_index_at(&sample(), 1000), Some(2));
    }

    #[test]
    fn word_stays_current_through_the_gap_after_it() {
        // "there" ends at 700; "world" starts at 900.
        assert_eq!(word_index_at(&sample(), 800), Some(1));
    }

    #[test]
    fn lookup_past_the_end_returns_last_word() {
        assert_eq!(word_index_at(&sample(), 60_000), Some(2));
    }

    #[test]
    fn lookup_on_empty_track_is_none() {
        assert_eq!(word_index_at(&[], 500), None);
    }

    #[test]
    fn equal_start_times_resolve_to_the_later_word() {
        let timings = vec![w("a", 100, 100), w("b", 100, 300)];
        assert_eq!(word_index_at(&timings, 100), Some(1));
    }

    #[test]
    fn shift_moves_both_edges() {
        let mut timings = sample();
        shift(&mut timings, 5000);
        assert_eq!(timings[0].start_ms, 5100);
        assert_eq!(timings[0].end_ms, 5400);
        assert!(is_monotonic(&timings));
    }

    #[test]
    fn monotonic_detects_out_of_order_words() {
        let mut timings = sample();
        assert!(is_monotonic(&timings));
        timings.swap(0, 2);
        assert!(!is_monotonic(&timings));
    }

    #[test]
    fn monotonic_detects_inverted_word() {
        let timings = vec![w("a", 100, 50)];
        assert!(!is_monotonic(&timings));
    }
}
