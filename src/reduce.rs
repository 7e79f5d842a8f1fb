//! Selection → interval reduction.
//!
//! This pure function is the contract between the selection editor and the
//! clip surgeon: it defines what "selected" means in terms of source time.
//! Runs of consecutive selected segments collapse into one buffered
//! interval; intervals that land close together merge so the surgeon never
//! cuts on a sub-half-second seam.

use std::collections::BTreeSet;

use crate::error::{Result, SupercutError};
use crate::models::Interval;
use crate::transcript::segment::Segment;

/// Reduce a set of selected segment indices to retained time intervals.
///
/// - Each run of consecutive indices becomes `[first.start - buffer,
///   last.end + buffer]`, lower-clamped to 0.
/// - Two intervals separated by less than `merge_gap` after buffering are
///   merged into one.
/// - Output is strictly increasing.
///
/// Deterministic and idempotent for a fixed segment list: reducing the
/// same selection twice yields the same intervals.
pub fn reduce_selection(
    segments: &[Segment],
    selection: &BTreeSet<usize>,
    buffer: f64,
    merge_gap: f64,
) -> Result<Vec<Interval>> {
    if selection.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(&max) = selection.iter().next_back()
        && max >= segments.len()
    {
        return Err(SupercutError::Validation(format!(
            "selected segment {max} out of range ({} segments)",
            segments.len()
        )));
    }

    // BTreeSet iteration is ordered, so runs are found in one pass.
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &index in selection {
        match runs.last_mut() {
            Some((_, last)) if *last + 1 == index => *last = index,
            _ => runs.push((index, index)),
        }
    }

    let mut intervals: Vec<Interval> = Vec::with_capacity(runs.len());
    for (first, last) in runs {
        let start = (segments[first].start() - buffer).max(0.0);
        let end = segments[last].end() + buffer;
        match intervals.last_mut() {
            Some(previous) if start - previous.end < merge_gap => {
                previous.end = end.max(previous.end);
            }
            _ => intervals.push(Interval { start, end }),
        }
    }

    Ok(intervals)
}

/// Total retained duration across intervals.
pub fn total_duration(intervals: &[Interval]) -> f64 {
    intervals.iter().map(Interval::duration).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Word;
    use crate::transcript::segment::build_segments;

    const BUFFER: f64 = 0.15;
    const MERGE_GAP: f64 = 0.5;

    fn word(text: &str, start: f64, end: f64) -> Word {
        Word { text: text.to_string(), start, end, confidence: 0.95 }
    }

    /// The announcer call used across these tests: four words starting at
    /// 0.5 s in a 10 s clip. The 0.5 s of leading silence becomes two gap
    /// segments, so the words occupy segment indices 2..=5.
    fn call_segments() -> Vec<Segment> {
        let words = vec![
            word("home", 0.50, 0.80),
            word("run", 0.80, 1.10),
            word("by", 1.10, 1.30),
            word("smith", 1.30, 1.70),
        ];
        build_segments(&words, 10.0)
    }

    #[test]
    fn consecutive_run_collapses_to_one_buffered_interval() {
        // "home run" selected: one interval [0.35, 1.25].
        let segments = call_segments();
        let selection = BTreeSet::from([2, 3]);
        let intervals = reduce_selection(&segments, &selection, BUFFER, MERGE_GAP).unwrap();

        assert_eq!(intervals.len(), 1);
        assert!((intervals[0].start - 0.35).abs() < 1e-9);
        assert!((intervals[0].end - 1.25).abs() < 1e-9);
        assert!((total_duration(&intervals) - 0.90).abs() < 1e-9);
    }

    #[test]
    fn near_intervals_merge() {
        // "home" and "smith": [0.35, 0.95] and [1.15, 1.85] sit 0.20 s
        // apart, under the 0.5 s merge threshold, so they fuse.
        let segments = call_segments();
        let selection = BTreeSet::from([2, 5]);
        let intervals = reduce_selection(&segments, &selection, BUFFER, MERGE_GAP).unwrap();

        assert_eq!(intervals.len(), 1);
        assert!((intervals[0].start - 0.35).abs() < 1e-9);
        assert!((intervals[0].end - 1.85).abs() < 1e-9);
        assert!((total_duration(&intervals) - 1.50).abs() < 1e-9);
    }

    #[test]
    fn distant_selections_stay_separate() {
        let words = vec![word("strike", 0.5, 0.9), word("out", 4.0, 4.5)];
        let segments = build_segments(&words, 6.0);
        let word_positions: Vec<usize> = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_word())
            .map(|(i, _)| i)
            .collect();
        let selection: BTreeSet<usize> = word_positions.into_iter().collect();
        let intervals = reduce_selection(&segments, &selection, BUFFER, MERGE_GAP).unwrap();

        assert_eq!(intervals.len(), 2);
        assert!(intervals[0].end < intervals[1].start);
    }

    #[test]
    fn selected_gap_slices_span_exactly_their_silence() {
        // 1.2 s of silence slices into 4 gaps; keeping the middle two
        // (no buffer) retains exactly those 0.6 s.
        let words = vec![word("going", 0.0, 0.8), word("gone", 2.0, 2.5)];
        let segments = build_segments(&words, 2.5);
        let gap_positions: Vec<usize> = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_word())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(gap_positions.len(), 4);

        let selection = BTreeSet::from([gap_positions[1], gap_positions[2]]);
        let intervals = reduce_selection(&segments, &selection, 0.0, MERGE_GAP).unwrap();

        assert_eq!(intervals.len(), 1);
        assert!((intervals[0].start - 1.1).abs() < 1e-9);
        assert!((intervals[0].end - 1.7).abs() < 1e-9);
    }

    #[test]
    fn buffer_never_pushes_start_below_zero() {
        let words = vec![word("crack", 0.05, 0.40)];
        let segments = build_segments(&words, 1.0);
        let selection = BTreeSet::from([0]);
        let intervals = reduce_selection(&segments, &selection, BUFFER, MERGE_GAP).unwrap();
        assert_eq!(intervals[0].start, 0.0);
    }

    #[test]
    fn out_of_range_selection_is_rejected() {
        let segments = call_segments();
        let selection = BTreeSet::from([2, 99]);
        assert!(matches!(
            reduce_selection(&segments, &selection, BUFFER, MERGE_GAP),
            Err(SupercutError::Validation(_))
        ));
    }

    #[test]
    fn empty_selection_reduces_to_nothing() {
        let segments = call_segments();
        let intervals =
            reduce_selection(&segments, &BTreeSet::new(), BUFFER, MERGE_GAP).unwrap();
        assert!(intervals.is_empty());
    }

    #[test]
    fn reduction_is_idempotent_under_repeat() {
        let segments = call_segments();
        let selection = BTreeSet::from([2, 4, 5]);
        let first = reduce_selection(&segments, &selection, BUFFER, MERGE_GAP).unwrap();
        let second = reduce_selection(&segments, &selection, BUFFER, MERGE_GAP).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn buffered_total_never_exceeds_naive_sum_plus_run_buffers() {
        let segments = call_segments();
        // Three runs: {2}, {4}, {5} — but 4 and 5 are consecutive, so two runs.
        let selection = BTreeSet::from([2, 4, 5]);
        let intervals = reduce_selection(&segments, &selection, BUFFER, MERGE_GAP).unwrap();

        let naive: f64 = selection
            .iter()
            .map(|&i| segments[i].end() - segments[i].start())
            .sum();
        let runs = 2.0;
        assert!(total_duration(&intervals) <= naive + 2.0 * BUFFER * runs + 1e-9);
    }

    #[test]
    fn output_is_strictly_increasing() {
        let words: Vec<Word> = (0..8)
            .map(|i| word("w", i as f64 * 1.5, i as f64 * 1.5 + 0.4))
            .collect();
        let segments = build_segments(&words, 12.0);
        let selection: BTreeSet<usize> = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_word())
            .map(|(i, _)| i)
            .step_by(2)
            .collect();
        let intervals = reduce_selection(&segments, &selection, BUFFER, MERGE_GAP).unwrap();
        for pair in intervals.windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
    }
}
