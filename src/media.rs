//! Typed adapter over the external frame-accurate media tool.
//!
//! The only component that knows the ffmpeg/ffprobe command-line surface;
//! every other component speaks in semantic operations (probe, trim,
//! concat, filter graph, audio extraction). All filter-graph strings a
//! caller supplies are passed through opaque. Operations spawn a fresh
//! child process, block until it exits, and never retry — retries are the
//! orchestrator's decision.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::Config;
use crate::error::{MediaStage, Result, SupercutError};

/// Stream facts for a local media file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub duration: f64,
    pub fps: f64,
    pub frame_count: u64,
}

/// Handle on the external tool. Cheap to clone; no shared process state.
#[derive(Debug, Clone)]
pub struct MediaTool {
    ffmpeg: String,
    ffprobe: String,
    timeout: Duration,
    edge_fade: f64,
}

impl MediaTool {
    pub fn new(config: &Config) -> Self {
        Self {
            ffmpeg: config.ffmpeg_bin.clone(),
            ffprobe: config.ffprobe_bin.clone(),
            timeout: config.media_timeout,
            edge_fade: config.edge_fade_seconds,
        }
    }

    /// Read duration, frame rate, and frame count.
    ///
    /// Unreadable input surfaces [`SupercutError::MediaCorrupt`].
    pub async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let args = probe_args(path);
        let output = self.spawn(&self.ffprobe, &args, MediaStage::Probe).await?;

        if !output.status.success() {
            return Err(SupercutError::MediaCorrupt {
                path: path.to_path_buf(),
                detail: stderr_tail(&output.stderr),
            });
        }

        parse_probe_output(&output.stdout).map_err(|detail| SupercutError::MediaCorrupt {
            path: path.to_path_buf(),
            detail,
        })
    }

    /// Read only the container duration. Works for audio-only files,
    /// which [`MediaTool::probe`] rejects for having no video stream.
    pub async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let args = vec![
            "-v".into(),
            "error".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            path.display().to_string(),
        ];
        let output = self.spawn(&self.ffprobe, &args, MediaStage::Probe).await?;
        if !output.status.success() {
            return Err(SupercutError::MediaCorrupt {
                path: path.to_path_buf(),
                detail: stderr_tail(&output.stderr),
            });
        }
        parse_duration_output(&output.stdout).map_err(|detail| SupercutError::MediaCorrupt {
            path: path.to_path_buf(),
            detail,
        })
    }

    /// Re-encode the span `[start, end)` of `input` into `output`.
    ///
    /// With `audio_fade`, a linear fade-in at the cut-in and fade-out
    /// before the cut-out (the configured edge-fade length) soften the
    /// boundary so word-level cuts never click.
    pub async fn trim(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        end: f64,
        audio_fade: bool,
    ) -> Result<()> {
        let args = trim_args(input, output, start, end, audio_fade, self.edge_fade);
        self.run_ffmpeg(&args, MediaStage::Trim).await
    }

    /// Concatenate via the concat demuxer and re-encode, normalising
    /// timebase and codec parameters. The async audio resample keeps the
    /// output audio track contiguous across joins.
    pub async fn concat_reencode(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let list_path = output.with_extension("concat.txt");
        tokio::fs::write(&list_path, concat_list(inputs)).await?;

        let args = concat_args(&list_path, output);
        let result = self.run_ffmpeg(&args, MediaStage::Concat).await;

        // Best-effort; the working directory is deleted at run end anyway.
        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }

    /// Run a caller-declared complex filter graph over `inputs`.
    ///
    /// `mappings` select output streams (`[vout]`, `0:v`, …);
    /// `output_args` supply the codec/container arguments.
    pub async fn exec_filter_graph(
        &self,
        inputs: &[PathBuf],
        graph: &str,
        mappings: &[String],
        output_args: &[String],
        output: &Path,
    ) -> Result<()> {
        let args = filter_graph_args(inputs, graph, mappings, output_args, output);
        self.run_ffmpeg(&args, MediaStage::FilterGraph).await
    }

    /// Extract a mono 16 kHz WAV rendering for transcription.
    pub async fn extract_audio(&self, input: &Path, output: &Path) -> Result<()> {
        let args = extract_audio_args(input, output);
        self.run_ffmpeg(&args, MediaStage::AudioExtract).await
    }

    async fn run_ffmpeg(&self, args: &[String], stage: MediaStage) -> Result<()> {
        let output = self.spawn(&self.ffmpeg, args, stage).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(SupercutError::MediaFailure {
            stage,
            exit_code: output.status.code(),
            stderr_tail: stderr_tail(&output.stderr),
        })
    }

    async fn spawn(&self, binary: &str, args: &[String], stage: MediaStage) -> Result<Output> {
        debug!("{} {}", binary, args.join(" "));
        let child = Command::new(binary)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(SupercutError::MediaFailure {
                stage,
                exit_code: None,
                stderr_tail: format!("failed to spawn {binary}: {e}"),
            }),
            Err(_) => Err(SupercutError::MediaFailure {
                stage,
                exit_code: None,
                stderr_tail: format!("timed out after {}s", self.timeout.as_secs()),
            }),
        }
    }
}

/// Shared encode parameters for trim and concat outputs.
///
/// Every intermediate fragment uses the same video/audio parameters so
/// demuxer joins are frame- and sample-clean, and the final container is
/// H.264/AAC MP4.
pub fn encode_args() -> Vec<String> {
    [
        "-c:v", "libx264",
        "-preset", "veryfast",
        "-crf", "23",
        "-pix_fmt", "yuv420p",
        "-r", "30",
        "-c:a", "aac",
        "-b:a", "192k",
        "-ar", "48000",
        "-ac", "2",
        "-movflags", "+faststart",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn probe_args(path: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-print_format".into(),
        "json".into(),
        "-show_format".into(),
        "-show_streams".into(),
        path.display().to_string(),
    ]
}

fn trim_args(
    input: &Path,
    output: &Path,
    start: f64,
    end: f64,
    audio_fade: bool,
    edge_fade: f64,
) -> Vec<String> {
    let duration = end - start;
    // -ss before -i: with re-encode this seeks precisely, not to the
    // previous keyframe.
    let mut args = vec![
        "-y".into(),
        "-ss".into(),
        format!("{start:.3}"),
        "-i".into(),
        input.display().to_string(),
        "-t".into(),
        format!("{duration:.3}"),
    ];
    if audio_fade {
        let fade_out_start = (duration - edge_fade).max(0.0);
        args.push("-af".into());
        args.push(format!(
            "afade=t=in:st=0:d={edge_fade},afade=t=out:st={fade_out_start:.3}:d={edge_fade}"
        ));
    }
    args.extend(encode_args());
    args.push(output.display().to_string());
    args
}

fn concat_args(list_path: &Path, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list_path.display().to_string(),
        "-af".into(),
        "aresample=async=1:first_pts=0".into(),
    ];
    args.extend(encode_args());
    args.push(output.display().to_string());
    args
}

fn filter_graph_args(
    inputs: &[PathBuf],
    graph: &str,
    mappings: &[String],
    output_args: &[String],
    output: &Path,
) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    for input in inputs {
        args.push("-i".into());
        args.push(input.display().to_string());
    }
    args.push("-filter_complex".into());
    args.push(graph.to_string());
    for mapping in mappings {
        args.push("-map".into());
        args.push(mapping.clone());
    }
    args.extend(output_args.iter().cloned());
    args.push(output.display().to_string());
    args
}

fn extract_audio_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        input.display().to_string(),
        "-vn".into(),
        "-ac".into(),
        "1".into(),
        "-ar".into(),
        "16000".into(),
        "-c:a".into(),
        "pcm_s16le".into(),
        output.display().to_string(),
    ]
}

/// Concat-demuxer list body; single quotes in paths are escaped the way
/// the demuxer expects.
fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|path| {
            let escaped = path.display().to_string().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let tail_start = lines.len().saturating_sub(12);
    lines[tail_start..].join("\n")
}

// ── ffprobe JSON parsing ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

fn parse_probe_output(stdout: &[u8]) -> std::result::Result<MediaInfo, String> {
    let probe: ProbeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("unparsable probe output: {e}"))?;

    let duration: f64 = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse().ok())
        .ok_or("no duration in probe output")?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or("no video stream")?;

    let fps = video
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .ok_or("no frame rate")?;

    let frame_count = video
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse().ok())
        .unwrap_or_else(|| (duration * fps).round() as u64);

    Ok(MediaInfo { duration, fps, frame_count })
}

fn parse_duration_output(stdout: &[u8]) -> std::result::Result<f64, String> {
    let probe: ProbeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("unparsable probe output: {e}"))?;
    probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| "no duration in probe output".to_string())
}

/// ffprobe reports rates as a fraction, e.g. `30000/1001`.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then_some(num / den)
        }
        None => rate.parse().ok(),
    }
}
