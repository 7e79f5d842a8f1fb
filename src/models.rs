//! Domain model: words, clips, rundowns, transitions, action analyses.
//!
//! A rundown is the user's ordered specification of the output: plays with
//! word selections, inning transitions, and an optional title card. It is
//! transient per request; validation of its structural invariants lives
//! here so every consumer sees the same rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::{Result, SupercutError};

/// One transcribed word with its time span in the clip's audio.
///
/// Within a clip's word list, `words[i].end <= words[i+1].start` — words
/// never overlap but gaps between them are permitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    /// Seconds from clip start.
    pub start: f64,
    /// Seconds from clip start; `end >= start`.
    pub end: f64,
    /// Recognition confidence in `[0, 1]`.
    pub confidence: f64,
}

/// A contiguous span of source time to retain, `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

impl Interval {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Camera feed a clip was sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feed {
    Network,
    Cms,
    Home,
    Away,
}

/// Half of an inning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HalfInning {
    Top,
    Bot,
}

impl std::fmt::Display for HalfInning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HalfInning::Top => "top",
            HalfInning::Bot => "bot",
        })
    }
}

/// Key of a pre-rendered inning-transition graphic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionKey {
    pub half: HalfInning,
    /// `1..=9`; extra innings have no pre-rendered graphics.
    pub inning: u8,
}

impl TransitionKey {
    /// File stem of the pre-rendered graphic, e.g. `top-1`.
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.half, self.inning)
    }
}

impl std::fmt::Display for TransitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_stem())
    }
}

/// Inning position of a play, from the play catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InningMark {
    pub half: HalfInning,
    pub inning: u8,
}

/// A short self-contained video with its own audio, typically one at-bat.
///
/// Feed is immutable per instance; switching feeds produces a new `Clip`
/// (see [`Clip::with_feed`]) whose transcript state starts over, because
/// each feed carries different commentary audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    /// Source URL for the active feed.
    pub source: String,
    pub feed: Feed,
    #[serde(default)]
    pub available_feeds: BTreeSet<Feed>,
    /// Seconds, when known from the catalogue.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Inning position, when known from the catalogue.
    #[serde(default)]
    pub inning: Option<InningMark>,
}

impl Clip {
    /// Switch to another feed: a new clip with the same identity, the new
    /// source URL, and no carried-over transcript-derived state.
    pub fn with_feed(&self, feed: Feed, source: String) -> Clip {
        Clip {
            id: self.id.clone(),
            source,
            feed,
            available_feeds: self.available_feeds.clone(),
            duration: None,
            inning: self.inning,
        }
    }
}

/// One entry of a rundown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RundownItem {
    /// A play clip with the set of selected segment indices to keep.
    Play {
        clip: Clip,
        selection: BTreeSet<usize>,
    },
    /// A pre-rendered half-inning graphic.
    Transition { key: TransitionKey },
    /// A brief opening card cut from an external highlight reel.
    /// At most one, and only at position 0.
    TitleCard { source_url: String },
}

/// Per-clip action-window analysis, supplied by the vision analyser.
///
/// All fields are seconds within `[0, total_duration]`, ordered
/// `action_start <= action_peak <= action_end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionAnalysis {
    pub action_start: f64,
    pub action_peak: f64,
    pub action_end: f64,
    pub total_duration: f64,
}

impl ActionAnalysis {
    pub fn validate(&self) -> Result<()> {
        let ordered = 0.0 <= self.action_start
            && self.action_start <= self.action_peak
            && self.action_peak <= self.action_end
            && self.action_end <= self.total_duration;
        if !ordered {
            return Err(SupercutError::Validation(format!(
                "action analysis out of order: start={} peak={} end={} total={}",
                self.action_start, self.action_peak, self.action_end, self.total_duration
            )));
        }
        Ok(())
    }
}

/// Where a narration lands relative to its clip's action peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationTiming {
    BeforeAction,
    DuringAction,
    AfterAction,
    Bridge,
}

/// One generated narration utterance to overlay on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationSegment {
    pub clip_id: String,
    /// Local path of the synthesized audio (MP3).
    pub audio_path: PathBuf,
    /// Seconds.
    pub duration: f64,
    pub timing: NarrationTiming,
    /// Extra post-roll seconds added to this narration's ducking window.
    #[serde(default)]
    pub buffer: f64,
}

/// The user's ordered specification of the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rundown {
    pub game_id: String,
    pub items: Vec<RundownItem>,
}

impl Rundown {
    /// Validate structural invariants.
    ///
    /// Selection indices can only be range-checked once the clip's segment
    /// list exists; that happens per clip inside the pipeline. Everything
    /// positional is checked here.
    pub fn validate(&self) -> Result<()> {
        if self.game_id.trim().is_empty() {
            return Err(SupercutError::Validation("game_id is empty".into()));
        }
        if self.items.is_empty() {
            return Err(SupercutError::Validation("rundown has no items".into()));
        }

        for (position, item) in self.items.iter().enumerate() {
            match item {
                RundownItem::TitleCard { .. } if position != 0 => {
                    return Err(SupercutError::Validation(format!(
                        "title card at position {position}; only position 0 is allowed"
                    )));
                }
                RundownItem::Play { clip, selection } => {
                    if selection.is_empty() {
                        return Err(SupercutError::Validation(format!(
                            "play {} at position {position} has an empty selection",
                            clip.id
                        )));
                    }
                    if clip.source.trim().is_empty() {
                        return Err(SupercutError::Validation(format!(
                            "play {} at position {position} has no source URL",
                            clip.id
                        )));
                    }
                }
                RundownItem::Transition { key } => {
                    if !(1..=9).contains(&key.inning) {
                        return Err(SupercutError::Validation(format!(
                            "transition {key} at position {position}: inning must be 1..=9"
                        )));
                    }
                }
                _ => {}
            }
        }

        let title_cards = self
            .items
            .iter()
            .filter(|item| matches!(item, RundownItem::TitleCard { .. }))
            .count();
        if title_cards > 1 {
            return Err(SupercutError::Validation(format!(
                "{title_cards} title cards; at most one is allowed"
            )));
        }

        self.validate_transition_order()
    }

    /// A transition for inning `I` must precede every play whose clip sits
    /// in the same half-inning.
    fn validate_transition_order(&self) -> Result<()> {
        for (position, item) in self.items.iter().enumerate() {
            let RundownItem::Transition { key } = item else {
                continue;
            };
            let out_of_order = self.items[..position].iter().any(|earlier| {
                matches!(
                    earlier,
                    RundownItem::Play { clip, .. }
                        if clip.inning
                            == Some(InningMark { half: key.half, inning: key.inning })
                )
            });
            if out_of_order {
                return Err(SupercutError::Validation(format!(
                    "transition {key} at position {position} appears after a play from that half-inning"
                )));
            }
        }
        Ok(())
    }

    /// Number of plays in the rundown.
    pub fn play_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, RundownItem::Play { .. }))
            .count()
    }
}

/// Check the word-list invariant: ordered, non-overlapping, sane spans.
pub fn validate_words(words: &[Word]) -> Result<()> {
    for (i, word) in words.iter().enumerate() {
        if word.start < 0.0 || word.end < word.start {
            return Err(SupercutError::Invariant(format!(
                "word {i} ({:?}) has span {}..{}",
                word.text, word.start, word.end
            )));
        }
        if !(0.0..=1.0).contains(&word.confidence) {
            return Err(SupercutError::Invariant(format!(
                "word {i} ({:?}) has confidence {}",
                word.text, word.confidence
            )));
        }
        if let Some(next) = words.get(i + 1)
            && word.end > next.start
        {
            return Err(SupercutError::Invariant(format!(
                "words {i} and {} overlap: {}..{} vs {}..{}",
                i + 1,
                word.start,
                word.end,
                next.start,
                next.end
            )));
        }
    }
    Ok(())
}
