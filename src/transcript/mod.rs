//! Transcription: clip audio → time-aligned word list, with a durable
//! result cache and provider fallback.

pub mod cache;
pub mod provider;
pub mod segment;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{Config, ProviderKind};
use crate::error::{Result, SupercutError};
use crate::fetch::AssetFetcher;
use crate::media::MediaTool;
use crate::models::{Word, validate_words};
use self::cache::TranscriptCache;
use self::provider::{DeepgramProvider, TranscriptionProvider, WhisperServerProvider};

/// Pause between the two submission attempts against one provider.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// A clip's normalised transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub words: Vec<Word>,
    /// Seconds, measured from the audio rendering itself.
    pub duration: f64,
}

/// Produces the mono 16 kHz audio rendering submitted to providers.
///
/// The production implementation fetches the clip and runs the media
/// tool; tests substitute canned audio.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Returns the rendering bytes and its measured duration in seconds.
    async fn render(&self, source_url: &str, work_dir: &Path) -> Result<(Vec<u8>, f64)>;
}

/// Fetch the clip, extract mono 16 kHz WAV, measure its duration.
pub struct MediaAudioSource {
    fetcher: AssetFetcher,
    media: MediaTool,
}

impl MediaAudioSource {
    pub fn new(fetcher: AssetFetcher, media: MediaTool) -> Self {
        Self { fetcher, media }
    }
}

#[async_trait]
impl AudioSource for MediaAudioSource {
    async fn render(&self, source_url: &str, work_dir: &Path) -> Result<(Vec<u8>, f64)> {
        let video = self.fetcher.fetch(source_url, work_dir).await?;
        let audio = video.with_extension("wav");
        self.media.extract_audio(&video, &audio).await?;
        let duration = self.media.probe_duration(&audio).await?;
        let bytes = tokio::fs::read(&audio).await?;
        Ok((bytes, duration))
    }
}

/// The transcription front door: cache, single-flight, provider chain.
pub struct TranscriptionService {
    cache: Arc<TranscriptCache>,
    audio: Arc<dyn AudioSource>,
    providers: Vec<Arc<dyn TranscriptionProvider>>,
    /// URL → in-progress guard, so concurrent misses for the same clip
    /// coalesce into a single provider submission.
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl TranscriptionService {
    pub fn new(
        cache: Arc<TranscriptCache>,
        audio: Arc<dyn AudioSource>,
        providers: Vec<Arc<dyn TranscriptionProvider>>,
    ) -> Self {
        Self { cache, audio, providers, inflight: DashMap::new() }
    }

    /// Wire the production service from configuration: providers in the
    /// configured order, the first being primary.
    pub fn from_config(
        config: &Config,
        client: Client,
        fetcher: AssetFetcher,
        media: MediaTool,
    ) -> Self {
        let providers: Vec<Arc<dyn TranscriptionProvider>> = config
            .transcription_providers
            .iter()
            .map(|kind| match kind {
                ProviderKind::WhisperServer => Arc::new(WhisperServerProvider::new(
                    client.clone(),
                    config,
                )) as Arc<dyn TranscriptionProvider>,
                ProviderKind::Deepgram => {
                    Arc::new(DeepgramProvider::new(client.clone(), config))
                        as Arc<dyn TranscriptionProvider>
                }
            })
            .collect();

        Self::new(
            Arc::new(TranscriptCache::new(config)),
            Arc::new(MediaAudioSource::new(fetcher, media)),
            providers,
        )
    }

    /// Transcribe the clip at `source_url`, consulting the cache first.
    ///
    /// Each provider gets at most one retry; when every configured
    /// provider fails, the caller receives
    /// [`SupercutError::TranscriptionUnavailable`] and degrades by
    /// skipping the clip.
    pub async fn transcribe(&self, source_url: &str, work_dir: &Path) -> Result<Transcript> {
        let flight = self
            .inflight
            .entry(source_url.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = flight.lock().await;

        let result = self.transcribe_coalesced(source_url, work_dir).await;

        drop(guard);
        self.inflight.remove(source_url);
        result
    }

    async fn transcribe_coalesced(
        &self,
        source_url: &str,
        work_dir: &Path,
    ) -> Result<Transcript> {
        // A waiter that queued behind the first miss finds the entry here.
        if let Some((words, duration)) = self.cache.get(source_url).await? {
            return Ok(Transcript { words, duration });
        }

        let (audio, duration) = self.audio.render(source_url, work_dir).await?;

        for provider in &self.providers {
            if !provider.is_configured() {
                warn!("skipping unconfigured transcription provider {}", provider.name());
                continue;
            }
            for attempt in 1..=2u32 {
                match provider.transcribe(audio.clone(), "audio/wav", "en").await {
                    Ok(transcript) => {
                        let mut words = transcript.words;
                        words.sort_by(|a, b| a.start.total_cmp(&b.start));
                        if let Err(e) = validate_words(&words) {
                            // Malformed provider output counts as a failed
                            // attempt, not a fatal invariant breach.
                            warn!(
                                "provider {} returned inconsistent words: {e}",
                                provider.name()
                            );
                            if attempt == 1 {
                                tokio::time::sleep(RETRY_BACKOFF).await;
                            }
                            continue;
                        }

                        info!(
                            "transcribed {} words via {} ({:.1}s audio)",
                            words.len(),
                            provider.name(),
                            duration
                        );
                        self.cache.put(source_url, &words, duration).await?;
                        return Ok(Transcript { words, duration });
                    }
                    Err(e) => {
                        warn!(
                            "provider {} failed (attempt {attempt}/2): {e}",
                            provider.name()
                        );
                        if attempt == 1 {
                            tokio::time::sleep(RETRY_BACKOFF).await;
                        }
                    }
                }
            }
        }

        Err(SupercutError::TranscriptionUnavailable { source_url: source_url.to_string() })
    }
}
