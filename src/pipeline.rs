//! Top-level pipeline driver.
//!
//! Owns the run: validates the rundown, creates the scoped working
//! directory, fans per-clip work out with bounded concurrency, sequences
//! surgery into assembly (or the narration mix), moves the result into
//! place, and deletes the working directory on every exit path.
//!
//! Per-clip failures are captured into a status map and the run proceeds
//! as long as any clip survives; assembly-stage failures are fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Result, SupercutError};
use crate::fetch::AssetFetcher;
use crate::media::MediaTool;
use crate::models::{
    ActionAnalysis, Clip, NarrationSegment, Rundown, RundownItem,
};
use crate::narration::{NarrationMixer, SourceClip};
use crate::reduce::reduce_selection;
use crate::surgeon::ClipSurgeon;
use crate::timeline::{TimelineAssembler, TimelineEntry};
use crate::transcript::TranscriptionService;
use crate::transcript::segment::build_segments;
use crate::transitions;

/// Inputs for the synced-narration variant: per-clip analyses plus the
/// pre-generated narration audio.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct NarrationInput {
    pub analyses: HashMap<String, ActionAnalysis>,
    pub narrations: Vec<NarrationSegment>,
}

/// Caller knobs for one run.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Where the finished MP4 lands.
    pub output_path: PathBuf,
    /// When present, the run takes the narration path instead of
    /// preserving original commentary.
    pub narration: Option<NarrationInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Completed,
    Skipped { reason: String },
}

/// Machine-readable per-item result, in rundown order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemStatus {
    pub position: usize,
    pub label: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug)]
pub struct AssembleReport {
    pub output_path: PathBuf,
    pub statuses: Vec<ItemStatus>,
}

/// Results of the per-play fan-out, keyed by rundown position.
#[derive(Debug, Default)]
struct PlayResults {
    fragments: HashMap<usize, PathBuf>,
    failures: HashMap<usize, String>,
}

pub struct Pipeline {
    config: Config,
    media: MediaTool,
    fetcher: AssetFetcher,
    transcription: Arc<TranscriptionService>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .expect("failed to build HTTP client");

        let media = MediaTool::new(&config);
        let fetcher = AssetFetcher::new(client.clone(), &config);
        let transcription = Arc::new(TranscriptionService::from_config(
            &config,
            client,
            fetcher.clone(),
            media.clone(),
        ));

        Self { config, media, fetcher, transcription }
    }

    /// Run the pipeline for one rundown.
    ///
    /// Cancellation stops new work from being issued, lets in-flight
    /// external-tool calls finish (they cannot be safely interrupted
    /// mid-write), and deletes the working directory.
    pub async fn assemble(
        &self,
        rundown: &Rundown,
        options: &AssembleOptions,
        cancel: CancellationToken,
    ) -> Result<AssembleReport> {
        rundown.validate()?;

        let work_dir = self.create_work_dir(&rundown.game_id).await?;
        info!("run working directory: {}", work_dir.display());

        let result = self
            .assemble_in_work_dir(rundown, options, &cancel, &work_dir)
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            warn!("failed to delete working directory {}: {}", work_dir.display(), e);
        }
        result
    }

    async fn assemble_in_work_dir(
        &self,
        rundown: &Rundown,
        options: &AssembleOptions,
        cancel: &CancellationToken,
        work_dir: &Path,
    ) -> Result<AssembleReport> {
        let staged = work_dir.join("final.mp4");

        let statuses = match &options.narration {
            Some(narration) => {
                self.run_narration_variant(rundown, narration, cancel, work_dir, &staged)
                    .await?
            }
            None => {
                self.run_commentary_path(rundown, cancel, work_dir, &staged)
                    .await?
            }
        };

        if cancel.is_cancelled() {
            return Err(SupercutError::Cancelled);
        }

        let output_path = deliver(&staged, &options.output_path).await?;
        info!("assembled {} items into {}", statuses.len(), output_path.display());
        Ok(AssembleReport { output_path, statuses })
    }

    // ── Standard path: commentary selections ────────────────────────────────

    async fn run_commentary_path(
        &self,
        rundown: &Rundown,
        cancel: &CancellationToken,
        work_dir: &Path,
        staged: &Path,
    ) -> Result<Vec<ItemStatus>> {
        let plays = self.surge_plays(rundown, cancel, work_dir).await?;

        if plays.fragments.is_empty() {
            let reason = plays
                .failures
                .into_values()
                .next()
                .unwrap_or_else(|| "rundown contains no plays".to_string());
            return Err(SupercutError::Validation(format!(
                "no clip survived surgery: {reason}"
            )));
        }

        let assembler = TimelineAssembler::new(self.media.clone(), self.config.crossfade_frames);
        let title_fragment = self
            .prepare_title_card(rundown, &assembler, cancel, work_dir)
            .await;

        let (entries, mut statuses) = plan_entries(
            rundown,
            &plays,
            title_fragment.as_deref(),
            &self.config.transitions_dir,
        );

        if cancel.is_cancelled() {
            return Err(SupercutError::Cancelled);
        }

        let report = assembler.assemble(&entries, staged).await?;
        mark_excluded(&mut statuses, &report.excluded, "unreadable media");
        Ok(statuses)
    }

    /// Fetch, transcribe, reduce, and cut every play concurrently,
    /// bounded by the configured parallelism.
    async fn surge_plays(
        &self,
        rundown: &Rundown,
        cancel: &CancellationToken,
        work_dir: &Path,
    ) -> Result<PlayResults> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks: JoinSet<(usize, Result<PathBuf>)> = JoinSet::new();

        for (position, item) in rundown.items.iter().enumerate() {
            let RundownItem::Play { clip, selection } = item else {
                continue;
            };

            let clip = clip.clone();
            let selection = selection.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let fetcher = self.fetcher.clone();
            let transcription = self.transcription.clone();
            let surgeon = ClipSurgeon::new(self.media.clone());
            let work_dir = work_dir.to_path_buf();
            let buffer = self.config.segment_buffer_seconds;
            let merge_gap = self.config.merge_gap_seconds;

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return (position, Err(SupercutError::Cancelled)),
                    },
                    _ = cancel.cancelled() => return (position, Err(SupercutError::Cancelled)),
                };
                if cancel.is_cancelled() {
                    return (position, Err(SupercutError::Cancelled));
                }

                let result = surge_one_play(
                    &clip,
                    &selection,
                    &fetcher,
                    &transcription,
                    &surgeon,
                    &work_dir,
                    position,
                    buffer,
                    merge_gap,
                )
                .await;
                (position, result)
            });
        }

        let mut results = PlayResults::default();
        while let Some(joined) = tasks.join_next().await {
            let (position, outcome) = joined
                .map_err(|e| SupercutError::Invariant(format!("clip task panicked: {e}")))?;
            match outcome {
                Ok(path) => {
                    results.fragments.insert(position, path);
                }
                Err(SupercutError::Cancelled) => return Err(SupercutError::Cancelled),
                Err(e) if e.is_per_clip_recoverable() => {
                    warn!("dropping play at position {position}: {e}");
                    results.failures.insert(position, e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        if cancel.is_cancelled() {
            return Err(SupercutError::Cancelled);
        }
        Ok(results)
    }

    async fn prepare_title_card(
        &self,
        rundown: &Rundown,
        assembler: &TimelineAssembler,
        cancel: &CancellationToken,
        work_dir: &Path,
    ) -> Option<PathBuf> {
        let source_url = rundown.items.iter().find_map(|item| match item {
            RundownItem::TitleCard { source_url } => Some(source_url.clone()),
            _ => None,
        })?;
        if cancel.is_cancelled() {
            return None;
        }

        let fragment = work_dir.join("title-card.mp4");
        let result = async {
            let source = fetch_with_retry(&self.fetcher, &source_url, work_dir).await?;
            assembler.title_card_fragment(&source, &fragment).await
        }
        .await;

        match result {
            Ok(()) => Some(fragment),
            Err(e) => {
                // The reel is garnish; its loss never sinks the run.
                warn!("dropping title card: {e}");
                None
            }
        }
    }

    // ── Synced-narration variant ────────────────────────────────────────────

    async fn run_narration_variant(
        &self,
        rundown: &Rundown,
        narration: &NarrationInput,
        cancel: &CancellationToken,
        work_dir: &Path,
        staged: &Path,
    ) -> Result<Vec<ItemStatus>> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks: JoinSet<(usize, String, Result<PathBuf>)> = JoinSet::new();

        for (position, item) in rundown.items.iter().enumerate() {
            let RundownItem::Play { clip, .. } = item else {
                continue;
            };
            let clip_id = clip.id.clone();
            let source = clip.source.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let fetcher = self.fetcher.clone();
            let work_dir = work_dir.to_path_buf();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return (position, clip_id, Err(SupercutError::Cancelled)),
                    },
                    _ = cancel.cancelled() => {
                        return (position, clip_id, Err(SupercutError::Cancelled));
                    }
                };
                let result = fetch_with_retry(&fetcher, &source, &work_dir).await;
                (position, clip_id, result)
            });
        }

        let mut fetched: Vec<(usize, String, PathBuf)> = Vec::new();
        let mut statuses: Vec<ItemStatus> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (position, clip_id, outcome) = joined
                .map_err(|e| SupercutError::Invariant(format!("fetch task panicked: {e}")))?;
            match outcome {
                Ok(path) => fetched.push((position, clip_id, path)),
                Err(SupercutError::Cancelled) => return Err(SupercutError::Cancelled),
                Err(e) if e.is_per_clip_recoverable() => {
                    warn!("dropping clip {clip_id}: {e}");
                    statuses.push(ItemStatus {
                        position,
                        label: format!("play {clip_id}"),
                        outcome: ItemOutcome::Skipped { reason: e.to_string() },
                    });
                }
                Err(e) => return Err(e),
            }
        }
        if cancel.is_cancelled() {
            return Err(SupercutError::Cancelled);
        }

        fetched.sort_by_key(|(position, _, _)| *position);
        let clips: Vec<SourceClip> = fetched
            .iter()
            .map(|(_, clip_id, path)| SourceClip {
                clip_id: clip_id.clone(),
                path: path.clone(),
                analysis: narration.analyses.get(clip_id).copied(),
            })
            .collect();

        let mixer = NarrationMixer::new(self.media.clone(), &self.config);
        let report = mixer.mix(&clips, &narration.narrations, work_dir, staged).await?;

        for (position, clip_id, _) in &fetched {
            let excluded = report.excluded_clips.contains(clip_id);
            statuses.push(ItemStatus {
                position: *position,
                label: format!("play {clip_id}"),
                outcome: if excluded {
                    ItemOutcome::Skipped { reason: "no action analysis".into() }
                } else {
                    ItemOutcome::Completed
                },
            });
        }
        statuses.sort_by_key(|status| status.position);

        if report.dropped_narrations > 0 {
            warn!("{} narrations had no clip on the timeline", report.dropped_narrations);
        }
        Ok(statuses)
    }

    async fn create_work_dir(&self, game_id: &str) -> Result<PathBuf> {
        let token = chrono::Utc::now().timestamp_millis();
        let dir = self.config.working_dir_root.join(format!("{game_id}-{token}"));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

/// One play through the full chain: fetch → transcribe → segment →
/// reduce → cut. Any step may fail per-clip recoverably.
#[allow(clippy::too_many_arguments)]
async fn surge_one_play(
    clip: &Clip,
    selection: &std::collections::BTreeSet<usize>,
    fetcher: &AssetFetcher,
    transcription: &TranscriptionService,
    surgeon: &ClipSurgeon,
    work_dir: &Path,
    position: usize,
    buffer: f64,
    merge_gap: f64,
) -> Result<PathBuf> {
    let local = fetch_with_retry(fetcher, &clip.source, work_dir).await?;
    let transcript = transcription.transcribe(&clip.source, work_dir).await?;

    let segments = build_segments(&transcript.words, transcript.duration);
    let intervals = reduce_selection(&segments, selection, buffer, merge_gap)?;

    let fragment = work_dir.join(format!("play-{position:03}.mp4"));
    let retained = surgeon.excise(&local, &intervals, &fragment).await?;
    info!("play {} cut to {:.2}s across {} intervals", clip.id, retained, intervals.len());
    Ok(fragment)
}

/// The fetcher itself never retries; the pipeline grants each asset one
/// more attempt before declaring the clip dropped.
async fn fetch_with_retry(
    fetcher: &AssetFetcher,
    source_url: &str,
    dest_dir: &Path,
) -> Result<PathBuf> {
    match fetcher.fetch(source_url, dest_dir).await {
        Ok(path) => Ok(path),
        Err(e) if e.is_per_clip_recoverable() => {
            warn!("retrying fetch of {source_url} after: {e}");
            fetcher.fetch(source_url, dest_dir).await
        }
        Err(e) => Err(e),
    }
}

/// Map the rundown onto concrete timeline entries plus per-item statuses.
///
/// Pure with respect to the filesystem except for the transition lookup,
/// so the ordering and skip-reporting rules are directly testable.
fn plan_entries(
    rundown: &Rundown,
    plays: &PlayResults,
    title_fragment: Option<&Path>,
    transitions_dir: &Path,
) -> (Vec<TimelineEntry>, Vec<ItemStatus>) {
    let mut entries = Vec::new();
    let mut statuses = Vec::new();

    for (position, item) in rundown.items.iter().enumerate() {
        match item {
            RundownItem::TitleCard { .. } => {
                let label = "title-card".to_string();
                match title_fragment {
                    Some(path) => {
                        entries.push(TimelineEntry { label: label.clone(), path: path.to_path_buf() });
                        statuses.push(ItemStatus {
                            position,
                            label,
                            outcome: ItemOutcome::Completed,
                        });
                    }
                    None => statuses.push(ItemStatus {
                        position,
                        label,
                        outcome: ItemOutcome::Skipped {
                            reason: "title card unavailable".into(),
                        },
                    }),
                }
            }
            RundownItem::Transition { key } => {
                let label = key.to_string();
                match transitions::resolve(transitions_dir, *key) {
                    Some(path) => {
                        entries.push(TimelineEntry { label: label.clone(), path });
                        statuses.push(ItemStatus {
                            position,
                            label,
                            outcome: ItemOutcome::Completed,
                        });
                    }
                    None => statuses.push(ItemStatus {
                        position,
                        label,
                        outcome: ItemOutcome::Skipped {
                            reason: "missing transition file".into(),
                        },
                    }),
                }
            }
            RundownItem::Play { clip, .. } => {
                let label = format!("play {}", clip.id);
                match plays.fragments.get(&position) {
                    Some(path) => {
                        entries.push(TimelineEntry {
                            label: label.clone(),
                            path: path.clone(),
                        });
                        statuses.push(ItemStatus {
                            position,
                            label,
                            outcome: ItemOutcome::Completed,
                        });
                    }
                    None => {
                        let reason = plays
                            .failures
                            .get(&position)
                            .cloned()
                            .unwrap_or_else(|| "clip dropped".into());
                        statuses.push(ItemStatus {
                            position,
                            label,
                            outcome: ItemOutcome::Skipped { reason },
                        });
                    }
                }
            }
        }
    }

    (entries, statuses)
}

fn mark_excluded(statuses: &mut [ItemStatus], excluded_labels: &[String], reason: &str) {
    for status in statuses {
        if excluded_labels.contains(&status.label) {
            status.outcome = ItemOutcome::Skipped { reason: reason.to_string() };
        }
    }
}

/// Move the staged result to the caller's path, falling back to
/// copy-and-delete when the destination sits on another filesystem.
async fn deliver(staged: &Path, output_path: &Path) -> Result<PathBuf> {
    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(staged, output_path).await.is_err() {
        tokio::fs::copy(staged, output_path).await?;
        let _ = tokio::fs::remove_file(staged).await;
    }
    Ok(output_path.to_path_buf())
}
