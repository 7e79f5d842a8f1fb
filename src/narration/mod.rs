//! Synced-narration assembly: the alternative terminal stage.
//!
//! Instead of preserving original commentary, each clip is cut down to
//! its action window, the trimmed clips are butt-joined (no crossfade —
//! the cumulative-offset math must stay exact), and generated narration
//! is overlaid at positions derived from each clip's action peak while
//! the original audio ducks underneath.

pub mod tts;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Result, SupercutError};
use crate::media::MediaTool;
use crate::models::{ActionAnalysis, NarrationSegment, NarrationTiming};

/// Seconds of source retained either side of the action window.
const ACTION_WINDOW_PAD_SECONDS: f64 = 1.5;
/// Lead time so a `before_action` narration lands clear of the peak.
const BEFORE_ACTION_LEAD_SECONDS: f64 = 0.5;
/// Breathing room after the peak for `after_action` narrations.
const AFTER_ACTION_DELAY_SECONDS: f64 = 1.0;
/// Ducking holds this long past each narration's end.
const DUCK_RELEASE_SECONDS: f64 = 0.5;

/// One fetched clip entering the narration path, with its analysis when
/// the vision analyser produced one.
#[derive(Debug, Clone)]
pub struct SourceClip {
    pub clip_id: String,
    pub path: PathBuf,
    pub analysis: Option<ActionAnalysis>,
}

/// A narration pinned to its start second on the final timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationPlacement {
    pub path: PathBuf,
    pub start: f64,
    pub duration: f64,
    /// Extra post-roll seconds for this narration's ducking window.
    pub buffer: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MixReport {
    /// Clip ids excluded for missing or inconsistent analyses.
    pub excluded_clips: Vec<String>,
    /// Narrations dropped because their clip never made the timeline.
    pub dropped_narrations: usize,
    pub placed_narrations: usize,
}

#[derive(Debug, Clone)]
pub struct NarrationMixer {
    media: MediaTool,
    ducking_floor: f64,
    ducking_ceiling: f64,
    narration_gain: f64,
    final_gain: f64,
}

impl NarrationMixer {
    pub fn new(media: MediaTool, config: &Config) -> Self {
        Self {
            media,
            ducking_floor: config.ducking_floor,
            ducking_ceiling: config.ducking_ceiling,
            narration_gain: config.narration_gain,
            final_gain: config.final_gain,
        }
    }

    /// Trim, join, and overlay. `clips` arrive in timeline order.
    pub async fn mix(
        &self,
        clips: &[SourceClip],
        narrations: &[NarrationSegment],
        work_dir: &Path,
        output: &Path,
    ) -> Result<MixReport> {
        let mut report = MixReport::default();

        // A clip without a consistent analysis never leaves the Fetched
        // state and is excluded from the timeline.
        let mut analysed: Vec<(&SourceClip, ActionAnalysis)> = Vec::with_capacity(clips.len());
        for clip in clips {
            match clip.analysis {
                Some(analysis) if analysis.validate().is_ok() => {
                    analysed.push((clip, analysis));
                }
                _ => {
                    warn!("excluding clip {} with no usable analysis", clip.clip_id);
                    report.excluded_clips.push(clip.clip_id.clone());
                }
            }
        }
        if analysed.is_empty() {
            return Err(SupercutError::Validation(
                "no clip in the rundown has an action analysis".into(),
            ));
        }

        // Trim each clip to its padded action window, tracking where it
        // lands on the final timeline and where its peak sits inside it.
        let mut parts: Vec<PathBuf> = Vec::with_capacity(analysed.len());
        let mut placed: Vec<(String, f64, f64)> = Vec::with_capacity(analysed.len());
        let mut cursor = 0.0;
        for (index, (clip, analysis)) in analysed.iter().enumerate() {
            let (trim_start, trim_end) = action_window(analysis);
            let part = work_dir.join(format!("action-{index:02}.mp4"));
            self.media
                .trim(&clip.path, &part, trim_start, trim_end, false)
                .await?;

            placed.push((
                clip.clip_id.clone(),
                cursor,
                analysis.action_peak - trim_start,
            ));
            cursor += trim_end - trim_start;
            parts.push(part);
        }

        let placements = place_narrations(narrations, &placed, &mut report);

        if placements.is_empty() {
            // Nothing to overlay: the joined timeline is the result.
            self.media.concat_reencode(&parts, output).await?;
            return Ok(report);
        }

        let base = work_dir.join("narration-base.mp4");
        self.media.concat_reencode(&parts, &base).await?;

        let (graph, mappings) = build_ducking_graph(
            &placements,
            self.ducking_floor,
            self.ducking_ceiling,
            self.narration_gain,
            self.final_gain,
        );
        let mut inputs = vec![base];
        inputs.extend(placements.iter().map(|p| p.path.clone()));

        info!(
            "mixing {} narrations over {:.2}s timeline",
            placements.len(),
            cursor
        );
        self.media
            .exec_filter_graph(&inputs, &graph, &mappings, &mix_output_args(), output)
            .await?;

        report.placed_narrations = placements.len();
        Ok(report)
    }
}

/// The retained span of a clip: its action window padded by 1.5 s each
/// side, clamped to the clip bounds.
fn action_window(analysis: &ActionAnalysis) -> (f64, f64) {
    let start = (analysis.action_start - ACTION_WINDOW_PAD_SECONDS).max(0.0);
    let end = (analysis.action_end + ACTION_WINDOW_PAD_SECONDS).min(analysis.total_duration);
    (start, end)
}

/// Start second of a narration on the final timeline, clamped to ≥ 0.
fn narration_start(
    timing: NarrationTiming,
    start_in_final: f64,
    action_peak_in_clip: f64,
    narration_duration: f64,
) -> f64 {
    let start = match timing {
        NarrationTiming::BeforeAction => {
            start_in_final + action_peak_in_clip - narration_duration - BEFORE_ACTION_LEAD_SECONDS
        }
        NarrationTiming::DuringAction => start_in_final + action_peak_in_clip,
        NarrationTiming::AfterAction => {
            start_in_final + action_peak_in_clip + AFTER_ACTION_DELAY_SECONDS
        }
        NarrationTiming::Bridge => start_in_final,
    };
    start.max(0.0)
}

/// Pin each narration to the timeline; narrations for clips that never
/// made it are dropped with a count in the report.
fn place_narrations(
    narrations: &[NarrationSegment],
    placed_clips: &[(String, f64, f64)],
    report: &mut MixReport,
) -> Vec<NarrationPlacement> {
    let mut placements = Vec::with_capacity(narrations.len());
    for narration in narrations {
        let Some((_, start_in_final, peak_in_clip)) = placed_clips
            .iter()
            .find(|(clip_id, _, _)| *clip_id == narration.clip_id)
        else {
            warn!("dropping narration for absent clip {}", narration.clip_id);
            report.dropped_narrations += 1;
            continue;
        };

        placements.push(NarrationPlacement {
            path: narration.audio_path.clone(),
            start: narration_start(
                narration.timing,
                *start_in_final,
                *peak_in_clip,
                narration.duration,
            ),
            duration: narration.duration,
            buffer: narration.buffer,
        });
    }
    placements
}

/// Audio graph: the original bed ducks to the floor inside any narration
/// window and rides at the ceiling elsewhere; each narration is delayed
/// into place and boosted; everything mixes without automatic amplitude
/// reduction, then a limiter catches the worst-case overlap that the
/// post-mix gain could otherwise push into clipping.
fn build_ducking_graph(
    placements: &[NarrationPlacement],
    floor: f64,
    ceiling: f64,
    narration_gain: f64,
    final_gain: f64,
) -> (String, Vec<String>) {
    let windows = placements
        .iter()
        .map(|p| {
            let end = p.start + p.duration + DUCK_RELEASE_SECONDS + p.buffer;
            format!("between(t,{:.3},{:.3})", p.start, end)
        })
        .collect::<Vec<_>>()
        .join("+");

    let mut parts = vec![format!(
        "[0:a]volume='if({windows},{floor},{ceiling})':eval=frame[bed]"
    )];

    for (i, placement) in placements.iter().enumerate() {
        let delay_ms = (placement.start * 1000.0).round() as u64;
        parts.push(format!(
            "[{input}:a]adelay={delay_ms}|{delay_ms},volume={narration_gain}[n{i}]",
            input = i + 1,
        ));
    }

    let narration_labels: String = (0..placements.len()).map(|i| format!("[n{i}]")).collect();
    parts.push(format!(
        "[bed]{narration_labels}amix=inputs={}:duration=first:dropout_transition=0:normalize=0[mixed]",
        placements.len() + 1,
    ));
    parts.push(format!(
        "[mixed]volume={final_gain},alimiter=limit=0.95[aout]"
    ));

    let graph = parts.join(";");
    let mappings = vec!["0:v".to_string(), "[aout]".to_string()];
    (graph, mappings)
}

/// The narration mix keeps the joined video untouched and re-encodes
/// only the audio.
fn mix_output_args() -> Vec<String> {
    [
        "-c:v", "copy",
        "-c:a", "aac",
        "-b:a", "192k",
        "-ar", "48000",
        "-movflags", "+faststart",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis() -> ActionAnalysis {
        ActionAnalysis {
            action_start: 4.0,
            action_peak: 6.0,
            action_end: 7.0,
            total_duration: 12.0,
        }
    }

    #[test]
    fn action_window_pads_both_sides() {
        let (start, end) = action_window(&analysis());
        assert_eq!(start, 2.5);
        assert_eq!(end, 8.5);
    }

    #[test]
    fn action_window_clamps_to_clip_bounds() {
        let tight = ActionAnalysis {
            action_start: 0.5,
            action_peak: 1.0,
            action_end: 9.5,
            total_duration: 10.0,
        };
        let (start, end) = action_window(&tight);
        assert_eq!(start, 0.0);
        assert_eq!(end, 10.0);
    }

    #[test]
    fn narration_start_per_timing_mode() {
        // Clip lands at 10.0 on the final timeline, peak 2.0 s in.
        let before = narration_start(NarrationTiming::BeforeAction, 10.0, 2.0, 3.0);
        let during = narration_start(NarrationTiming::DuringAction, 10.0, 2.0, 3.0);
        let after = narration_start(NarrationTiming::AfterAction, 10.0, 2.0, 3.0);
        let bridge = narration_start(NarrationTiming::Bridge, 10.0, 2.0, 3.0);

        assert!((before - 8.5).abs() < 1e-9);
        assert!((during - 12.0).abs() < 1e-9);
        assert!((after - 13.0).abs() < 1e-9);
        assert!((bridge - 10.0).abs() < 1e-9);
    }

    #[test]
    fn narration_start_clamps_to_zero() {
        // A long narration before an early peak would start in negative
        // time; it pins to the timeline head instead.
        let start = narration_start(NarrationTiming::BeforeAction, 0.0, 0.5, 3.0);
        assert_eq!(start, 0.0);
    }

    #[test]
    fn narrations_for_absent_clips_are_dropped() {
        let mut report = MixReport::default();
        let narrations = vec![NarrationSegment {
            clip_id: "ghost".into(),
            audio_path: PathBuf::from("ghost.mp3"),
            duration: 2.0,
            timing: NarrationTiming::Bridge,
            buffer: 0.0,
        }];
        let placements =
            place_narrations(&narrations, &[("real".into(), 0.0, 2.0)], &mut report);
        assert!(placements.is_empty());
        assert_eq!(report.dropped_narrations, 1);
    }

    fn placements() -> Vec<NarrationPlacement> {
        vec![
            NarrationPlacement {
                path: PathBuf::from("n0.mp3"),
                start: 8.5,
                duration: 3.0,
                buffer: 0.0,
            },
            NarrationPlacement {
                path: PathBuf::from("n1.mp3"),
                start: 20.0,
                duration: 2.0,
                buffer: 0.5,
            },
        ]
    }

    #[test]
    fn ducking_windows_cover_narrations_plus_release() {
        let (graph, _) = build_ducking_graph(&placements(), 0.2, 0.7, 2.0, 1.5);
        assert!(graph.contains("between(t,8.500,12.000)"));
        // Second window: 20.0 → 20 + 2 + 0.5 release + 0.5 buffer.
        assert!(graph.contains("between(t,20.000,23.000)"));
        assert!(graph.contains("'if(between(t,8.500,12.000)+between(t,20.000,23.000),0.2,0.7)'"));
    }

    #[test]
    fn narrations_are_delayed_and_boosted() {
        let (graph, _) = build_ducking_graph(&placements(), 0.2, 0.7, 2.0, 1.5);
        assert!(graph.contains("[1:a]adelay=8500|8500,volume=2[n0]"));
        assert!(graph.contains("[2:a]adelay=20000|20000,volume=2[n1]"));
    }

    #[test]
    fn mix_disables_normalisation_and_limits_the_bus() {
        let (graph, mappings) = build_ducking_graph(&placements(), 0.2, 0.7, 2.0, 1.5);
        assert!(graph.contains("amix=inputs=3:duration=first:dropout_transition=0:normalize=0"));
        assert!(graph.contains("volume=1.5,alimiter=limit=0.95"));
        assert_eq!(mappings, vec!["0:v".to_string(), "[aout]".to_string()]);
    }
}
