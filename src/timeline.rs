//! Final timeline assembly with audio-aware dissolves.
//!
//! Joins per-clip fragments, transition graphics, and the optional title
//! card into one MP4. Every input is normalised to a common timebase and
//! frame rate before an (n−1)-stage crossfade chain; each crossfade
//! shortens the timeline by one fade duration, which the offset
//! arithmetic accounts for.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, SupercutError};
use crate::media::{MediaTool, encode_args};

/// All timeline video is conformed to this rate before crossfading.
pub const TIMELINE_FPS: u32 = 30;

/// Title cards are this many seconds cut from the head of the source reel.
pub const TITLE_CARD_SECONDS: f64 = 1.5;

/// Tail of the title card audio faded to silence.
pub const TITLE_CARD_FADE_SECONDS: f64 = 0.3;

/// One input to the final join, in rundown order.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    /// Human-readable label for status reporting ("play a-123", "top-1").
    pub label: String,
    pub path: PathBuf,
}

/// Labels of entries the assembler had to exclude, for the status report.
#[derive(Debug, Clone, Default)]
pub struct AssemblyReport {
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TimelineAssembler {
    media: MediaTool,
    crossfade_seconds: f64,
}

impl TimelineAssembler {
    pub fn new(media: MediaTool, crossfade_frames: u32) -> Self {
        Self {
            media,
            crossfade_seconds: crossfade_frames as f64 / TIMELINE_FPS as f64,
        }
    }

    /// Join `entries` into `output` with dissolves between neighbours.
    ///
    /// Unreadable entries are excluded and reported rather than failing
    /// the run — unless nothing readable remains.
    pub async fn assemble(
        &self,
        entries: &[TimelineEntry],
        output: &Path,
    ) -> Result<AssemblyReport> {
        let mut report = AssemblyReport::default();
        let mut readable: Vec<(String, PathBuf, f64)> = Vec::with_capacity(entries.len());

        for entry in entries {
            match self.media.probe(&entry.path).await {
                Ok(info) => readable.push((entry.label.clone(), entry.path.clone(), info.duration)),
                Err(e) => {
                    warn!("excluding unreadable timeline entry {}: {}", entry.label, e);
                    report.excluded.push(entry.label.clone());
                }
            }
        }

        if readable.is_empty() {
            return Err(SupercutError::Validation(
                "timeline has no readable inputs".into(),
            ));
        }

        let durations: Vec<f64> = readable.iter().map(|(_, _, d)| *d).collect();
        info!(
            "assembling {} entries, predicted duration {:.2}s",
            readable.len(),
            predicted_duration(&durations, self.crossfade_seconds)
        );

        if readable.len() == 1 {
            // A single entry still goes through a re-encode so the output
            // container matches the multi-entry path.
            let inputs = vec![readable[0].1.clone()];
            self.media.concat_reencode(&inputs, output).await?;
            return Ok(report);
        }

        let inputs: Vec<PathBuf> = readable.iter().map(|(_, p, _)| p.clone()).collect();
        let (graph, mappings) = build_crossfade_graph(&durations, self.crossfade_seconds);
        self.media
            .exec_filter_graph(&inputs, &graph, &mappings, &encode_args(), output)
            .await?;

        Ok(report)
    }

    /// Cut the opening title card from a source highlight reel: the first
    /// 1.5 s, with the last 300 ms of audio faded to silence.
    pub async fn title_card_fragment(&self, source: &Path, output: &Path) -> Result<()> {
        let head = output.with_extension("head.mp4");
        self.media
            .trim(source, &head, 0.0, TITLE_CARD_SECONDS, false)
            .await?;

        let fade_start = TITLE_CARD_SECONDS - TITLE_CARD_FADE_SECONDS;
        let graph =
            format!("[0:a]afade=t=out:st={fade_start}:d={TITLE_CARD_FADE_SECONDS}[aout]");
        let result = self
            .media
            .exec_filter_graph(
                &[head.clone()],
                &graph,
                &["0:v".to_string(), "[aout]".to_string()],
                &encode_args(),
                output,
            )
            .await;

        let _ = tokio::fs::remove_file(&head).await;
        result
    }
}

/// Expected output duration: every join eats one crossfade.
pub fn predicted_duration(durations: &[f64], crossfade: f64) -> f64 {
    let sum: f64 = durations.iter().sum();
    sum - crossfade * durations.len().saturating_sub(1) as f64
}

/// Build the normalisation + crossfade filter graph for `durations.len()`
/// inputs, returning the graph and the output stream mappings.
///
/// Stage `s` (1-based) dissolves the accumulated timeline into input `s`
/// at `offset = Σ durations[..s] − s·crossfade`: the sum of prior real
/// durations minus the timeline shrink from every fade so far, including
/// this one.
pub fn build_crossfade_graph(durations: &[f64], crossfade: f64) -> (String, Vec<String>) {
    let n = durations.len();
    let mut parts: Vec<String> = Vec::with_capacity(n * 4);

    for i in 0..n {
        parts.push(format!(
            "[{i}:v]settb=AVTB,fps={TIMELINE_FPS},setsar=1[v{i}]"
        ));
        parts.push(format!("[{i}:a]aresample=48000:async=1[a{i}]"));
    }

    let mut video_label = "v0".to_string();
    let mut audio_label = "a0".to_string();
    let mut cumulative = 0.0;

    for stage in 1..n {
        cumulative += durations[stage - 1];
        let offset = (cumulative - crossfade * stage as f64).max(0.0);

        let video_out = format!("xv{stage}");
        parts.push(format!(
            "[{video_label}][v{stage}]xfade=transition=fade:duration={crossfade:.3}:offset={offset:.3}[{video_out}]"
        ));
        video_label = video_out;

        let audio_out = format!("xa{stage}");
        parts.push(format!(
            "[{audio_label}][a{stage}]acrossfade=d={crossfade:.3}:c1=tri:c2=tri[{audio_out}]"
        ));
        audio_label = audio_out;
    }

    let graph = parts.join(";");
    let mappings = vec![format!("[{video_label}]"), format!("[{audio_label}]")];
    (graph, mappings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FADE: f64 = 10.0 / 30.0;

    #[test]
    fn predicted_duration_loses_one_fade_per_join() {
        // Title card + transition + two plays + transition + play,
        // five joins at a third of a second each.
        let durations = [1.5, 2.0, 0.9, 1.5, 2.0, 2.0];
        let predicted = predicted_duration(&durations, FADE);
        assert!((predicted - 8.2333).abs() < 0.01);
    }

    #[test]
    fn predicted_duration_of_single_entry_is_its_own() {
        assert_eq!(predicted_duration(&[4.2], FADE), 4.2);
    }

    #[test]
    fn graph_normalises_every_input() {
        let (graph, _) = build_crossfade_graph(&[2.0, 3.0, 4.0], FADE);
        for i in 0..3 {
            assert!(graph.contains(&format!("[{i}:v]settb=AVTB,fps=30,setsar=1[v{i}]")));
            assert!(graph.contains(&format!("[{i}:a]aresample=48000:async=1[a{i}]")));
        }
    }

    #[test]
    fn offsets_accumulate_durations_minus_fades() {
        let (graph, _) = build_crossfade_graph(&[2.0, 3.0, 4.0], FADE);
        // Stage 1: 2.0 − 1·fade ≈ 1.667; stage 2: 5.0 − 2·fade ≈ 4.333.
        assert!(graph.contains("offset=1.667"));
        assert!(graph.contains("offset=4.333"));
    }

    #[test]
    fn chain_has_n_minus_one_stages_and_maps_the_last() {
        let (graph, mappings) = build_crossfade_graph(&[1.0, 1.0, 1.0, 1.0], FADE);
        assert_eq!(graph.matches("xfade=transition=fade").count(), 3);
        assert_eq!(graph.matches("acrossfade=").count(), 3);
        assert_eq!(mappings, vec!["[xv3]".to_string(), "[xa3]".to_string()]);
    }

    #[test]
    fn audio_crossfades_are_triangular() {
        let (graph, _) = build_crossfade_graph(&[2.0, 2.0], FADE);
        assert!(graph.contains("acrossfade=d=0.333:c1=tri:c2=tri"));
    }

    #[test]
    fn short_first_clip_never_yields_negative_offset() {
        let (graph, _) = build_crossfade_graph(&[0.2, 3.0], FADE);
        assert!(graph.contains("offset=0.000"));
    }
}
