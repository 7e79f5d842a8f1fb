//! Frame-accurate clip surgery.
//!
//! Turns one fetched clip plus its retained intervals into a single MP4
//! containing exactly those intervals, with micro-fades at every cut so
//! word-level edits never click. Re-encoding (not stream copy) is
//! required: the per-interval fades introduce filter-graph state that a
//! stream copy cannot represent, and identical encode parameters across
//! intervals keep the joins frame- and sample-clean.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SupercutError};
use crate::media::MediaTool;
use crate::models::Interval;

#[derive(Debug, Clone)]
pub struct ClipSurgeon {
    media: MediaTool,
}

impl ClipSurgeon {
    pub fn new(media: MediaTool) -> Self {
        Self { media }
    }

    /// Extract `intervals` from `input` into one MP4 at `output`.
    ///
    /// Returns the retained duration; the written file matches it to
    /// within one frame period.
    pub async fn excise(
        &self,
        input: &Path,
        intervals: &[Interval],
        output: &Path,
    ) -> Result<f64> {
        if intervals.is_empty() {
            return Err(SupercutError::Invariant(format!(
                "no intervals to extract from {}",
                input.display()
            )));
        }

        let info = self.media.probe(input).await?;
        let intervals = clamp_to_duration(intervals, info.duration);
        if intervals.is_empty() {
            return Err(SupercutError::Invariant(format!(
                "every interval lies beyond the {:.2}s clip {}",
                info.duration,
                input.display()
            )));
        }

        if let [only] = intervals.as_slice() {
            self.media
                .trim(input, output, only.start, only.end, true)
                .await?;
            return Ok(only.duration());
        }

        let mut parts: Vec<PathBuf> = Vec::with_capacity(intervals.len());
        for (index, interval) in intervals.iter().enumerate() {
            let part = part_path(output, index);
            self.media
                .trim(input, &part, interval.start, interval.end, true)
                .await?;
            parts.push(part);
        }

        let result = self.media.concat_reencode(&parts, output).await;

        for part in &parts {
            if let Err(e) = tokio::fs::remove_file(part).await {
                debug!("leaving temp part {}: {}", part.display(), e);
            }
        }
        result?;

        Ok(intervals.iter().map(Interval::duration).sum())
    }
}

/// Buffered interval ends may overrun the source; cut them back to the
/// probed duration and drop anything that starts past the end.
fn clamp_to_duration(intervals: &[Interval], duration: f64) -> Vec<Interval> {
    intervals
        .iter()
        .filter(|interval| interval.start < duration)
        .map(|interval| Interval {
            start: interval.start,
            end: interval.end.min(duration),
        })
        .filter(|interval| interval.duration() > 0.0)
        .collect()
}

fn part_path(output: &Path, index: usize) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("fragment");
    output.with_file_name(format!("{stem}-part{index:02}.mp4"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_trims_overrunning_ends() {
        let intervals = vec![
            Interval { start: 0.35, end: 1.25 },
            Interval { start: 9.5, end: 10.4 },
        ];
        let clamped = clamp_to_duration(&intervals, 10.0);
        assert_eq!(clamped.len(), 2);
        assert_eq!(clamped[1].end, 10.0);
    }

    #[test]
    fn clamping_drops_intervals_past_the_end() {
        let intervals = vec![
            Interval { start: 2.0, end: 3.0 },
            Interval { start: 11.0, end: 12.0 },
        ];
        let clamped = clamp_to_duration(&intervals, 10.0);
        assert_eq!(clamped.len(), 1);
        assert_eq!(clamped[0].start, 2.0);
    }

    #[test]
    fn part_names_stay_beside_the_output() {
        let part = part_path(Path::new("/work/run-1/play-3.mp4"), 1);
        assert_eq!(part, Path::new("/work/run-1/play-3-part01.mp4"));
    }
}
