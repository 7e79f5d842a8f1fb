//! The unified word ∪ gap segment list.
//!
//! Segments are the smallest editable units of a clip's audio: each
//! transcribed word, plus silence sliced into ~0.3 s pieces. Gaps are
//! first-class so a user can deliberately keep silence (for a dramatic
//! pause) or excise it; both must be representable.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SupercutError};
use crate::models::Word;

/// Smallest selectable unit of silence, in seconds. Silence shorter than
/// this produces no segment at all.
pub const GAP_UNIT_SECONDS: f64 = 0.3;

/// One editable unit: a spoken word or a slice of silence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Word {
        text: String,
        start: f64,
        end: f64,
        /// Index into the clip's original word list.
        original_word_index: usize,
    },
    Gap { start: f64, end: f64 },
}

impl Segment {
    pub fn start(&self) -> f64 {
        match self {
            Segment::Word { start, .. } | Segment::Gap { start, .. } => *start,
        }
    }

    pub fn end(&self) -> f64 {
        match self {
            Segment::Word { end, .. } | Segment::Gap { end, .. } => *end,
        }
    }

    pub fn is_word(&self) -> bool {
        matches!(self, Segment::Word { .. })
    }
}

/// Build the segment list for a clip from its words and total duration.
///
/// Rules:
/// - every word becomes one `Word` segment, in order;
/// - silence of duration `d >= 0.3` (leading, between words, or trailing)
///   is split into `round(d / 0.3)` consecutive `Gap` segments of equal
///   fractional length;
/// - silence shorter than 0.3 s yields no segment.
pub fn build_segments(words: &[Word], total_duration: f64) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(words.len() * 2);

    let leading_end = words.first().map(|w| w.start).unwrap_or(total_duration);
    push_gap_slices(&mut segments, 0.0, leading_end);

    for (index, word) in words.iter().enumerate() {
        segments.push(Segment::Word {
            text: word.text.clone(),
            start: word.start,
            end: word.end,
            original_word_index: index,
        });

        let silence_end = words.get(index + 1).map(|w| w.start).unwrap_or(total_duration);
        push_gap_slices(&mut segments, word.end, silence_end);
    }

    segments
}

fn push_gap_slices(segments: &mut Vec<Segment>, start: f64, end: f64) {
    let duration = end - start;
    if duration < GAP_UNIT_SECONDS {
        return;
    }
    let count = (duration / GAP_UNIT_SECONDS).round().max(1.0) as usize;
    let slice = duration / count as f64;
    for i in 0..count {
        segments.push(Segment::Gap {
            start: start + slice * i as f64,
            // Last slice lands exactly on `end`, avoiding float drift.
            end: if i + 1 == count { end } else { start + slice * (i + 1) as f64 },
        });
    }
}

/// Translate original word indices to segment indices.
///
/// Bijective on the word subset: every word index maps to exactly one
/// `Word` segment. An index with no corresponding segment violates an
/// internal invariant.
pub fn word_indices_to_segment_indices(
    segments: &[Segment],
    word_indices: &[usize],
) -> Result<Vec<usize>> {
    word_indices
        .iter()
        .map(|&word_index| {
            segments
                .iter()
                .position(|segment| {
                    matches!(
                        segment,
                        Segment::Word { original_word_index, .. }
                            if *original_word_index == word_index
                    )
                })
                .ok_or_else(|| {
                    SupercutError::Invariant(format!(
                        "word index {word_index} has no segment"
                    ))
                })
        })
        .collect()
}

/// Translate segment indices back to original word indices.
///
/// Gap segments have no word counterpart and are dropped; callers that
/// need gaps must keep segment indices (the richer representation).
pub fn segment_indices_to_word_indices(
    segments: &[Segment],
    segment_indices: &[usize],
) -> Result<Vec<usize>> {
    let mut word_indices = Vec::with_capacity(segment_indices.len());
    for &segment_index in segment_indices {
        let segment = segments.get(segment_index).ok_or_else(|| {
            SupercutError::Invariant(format!("segment index {segment_index} out of range"))
        })?;
        if let Segment::Word { original_word_index, .. } = segment {
            word_indices.push(*original_word_index);
        }
    }
    Ok(word_indices)
}
