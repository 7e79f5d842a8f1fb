use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Transcription backends selectable by configuration.
///
/// The first entry in [`Config::transcription_providers`] is the primary;
/// the rest are tried in order when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    WhisperServer,
    Deepgram,
}

impl ProviderKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "whisper" | "whisper-server" => Some(ProviderKind::WhisperServer),
            "deepgram" => Some(ProviderKind::Deepgram),
            _ => None,
        }
    }
}

/// Runtime configuration, resolved once at startup and passed by handle.
///
/// Every option has a `SUPERCUT_*` environment variable and a default
/// that works for local development.
#[derive(Debug, Clone)]
pub struct Config {
    /// Max parallel per-clip tasks.
    pub concurrency: usize,
    /// Dissolve length in frames at the timeline frame rate.
    pub crossfade_frames: u32,
    /// Reducer buffer added around each selected run, in seconds.
    pub segment_buffer_seconds: f64,
    /// Two intervals closer than this merge into one, in seconds.
    pub merge_gap_seconds: f64,
    /// Linear audio fade applied at interval cut boundaries, in seconds.
    pub edge_fade_seconds: f64,

    /// Transcript cache TTL in days.
    pub transcript_ttl_days: i64,
    /// Soft cap on cached transcripts before eviction.
    pub cache_max_entries: usize,
    /// Ordered transcription backends; first is primary.
    pub transcription_providers: Vec<ProviderKind>,
    /// Directory holding persisted transcript entries.
    pub transcript_cache_dir: PathBuf,

    /// Mixer gain for original audio inside a narration window.
    pub ducking_floor: f64,
    /// Mixer gain for original audio outside narration windows.
    pub ducking_ceiling: f64,
    /// Gain applied to each narration track.
    pub narration_gain: f64,
    /// Gain applied after the mix stage.
    pub final_gain: f64,

    /// Parent directory of per-run scratch directories.
    pub working_dir_root: PathBuf,
    /// Directory of pre-rendered `{top|bot}-{1..9}.mp4` transition files.
    pub transitions_dir: PathBuf,

    /// External media tool binaries.
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,

    /// Headers required by the upstream media host.
    pub upstream_user_agent: String,
    pub upstream_origin: String,
    pub upstream_referer: String,

    /// Primary transcription endpoint (OpenAI-compatible audio API).
    pub whisper_endpoint: String,
    pub whisper_api_key: Option<String>,
    /// Fallback transcription endpoint.
    pub deepgram_endpoint: String,
    pub deepgram_api_key: Option<String>,
    /// Speech-synthesis endpoint for the narration variant.
    pub tts_endpoint: String,
    pub tts_api_key: Option<String>,

    /// Per-call timeouts.
    pub fetch_timeout: Duration,
    pub transcription_timeout: Duration,
    pub media_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 4,
            crossfade_frames: 10,
            segment_buffer_seconds: 0.15,
            merge_gap_seconds: 0.5,
            edge_fade_seconds: 0.05,
            transcript_ttl_days: 7,
            cache_max_entries: 50,
            transcription_providers: vec![ProviderKind::WhisperServer, ProviderKind::Deepgram],
            transcript_cache_dir: default_cache_dir(),
            ducking_floor: 0.2,
            ducking_ceiling: 0.7,
            narration_gain: 2.0,
            final_gain: 1.5,
            working_dir_root: env::temp_dir().join("supercut"),
            transitions_dir: PathBuf::from("transitions"),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            upstream_user_agent: concat!(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) ",
                "AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
            )
            .to_string(),
            upstream_origin: "https://www.mlb.com".to_string(),
            upstream_referer: "https://www.mlb.com/video/".to_string(),
            whisper_endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            whisper_api_key: None,
            deepgram_endpoint: "https://api.deepgram.com/v1/listen".to_string(),
            deepgram_api_key: None,
            tts_endpoint: "https://api.elevenlabs.io/v1/text-to-speech".to_string(),
            tts_api_key: None,
            fetch_timeout: Duration::from_secs(60),
            transcription_timeout: Duration::from_secs(120),
            media_timeout: Duration::from_secs(300),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("supercut")
        .join("transcripts")
}

impl Config {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Numeric variables that fail to parse are reported as errors rather
    /// than silently ignored.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Config::default();

        if let Ok(v) = env::var("SUPERCUT_CONCURRENCY") {
            config.concurrency = v.parse().map_err(|_| "SUPERCUT_CONCURRENCY must be a number")?;
        }
        if let Ok(v) = env::var("SUPERCUT_CROSSFADE_FRAMES") {
            config.crossfade_frames = v
                .parse()
                .map_err(|_| "SUPERCUT_CROSSFADE_FRAMES must be a number")?;
        }
        if let Ok(v) = env::var("SUPERCUT_SEGMENT_BUFFER_SECONDS") {
            config.segment_buffer_seconds = v
                .parse()
                .map_err(|_| "SUPERCUT_SEGMENT_BUFFER_SECONDS must be a number")?;
        }
        if let Ok(v) = env::var("SUPERCUT_MERGE_GAP_SECONDS") {
            config.merge_gap_seconds = v
                .parse()
                .map_err(|_| "SUPERCUT_MERGE_GAP_SECONDS must be a number")?;
        }
        if let Ok(v) = env::var("SUPERCUT_EDGE_FADE_SECONDS") {
            config.edge_fade_seconds = v
                .parse()
                .map_err(|_| "SUPERCUT_EDGE_FADE_SECONDS must be a number")?;
        }
        if let Ok(v) = env::var("SUPERCUT_TRANSCRIPT_TTL_DAYS") {
            config.transcript_ttl_days = v
                .parse()
                .map_err(|_| "SUPERCUT_TRANSCRIPT_TTL_DAYS must be a number")?;
        }
        if let Ok(v) = env::var("SUPERCUT_CACHE_MAX_ENTRIES") {
            config.cache_max_entries = v
                .parse()
                .map_err(|_| "SUPERCUT_CACHE_MAX_ENTRIES must be a number")?;
        }
        if let Ok(v) = env::var("SUPERCUT_TRANSCRIPTION_PROVIDERS") {
            let providers: Vec<ProviderKind> =
                v.split(',').filter_map(ProviderKind::parse).collect();
            if providers.is_empty() {
                return Err("SUPERCUT_TRANSCRIPTION_PROVIDERS names no known provider".into());
            }
            config.transcription_providers = providers;
        }
        if let Ok(v) = env::var("SUPERCUT_TRANSCRIPT_CACHE_DIR") {
            config.transcript_cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("SUPERCUT_DUCKING_FLOOR") {
            config.ducking_floor =
                v.parse().map_err(|_| "SUPERCUT_DUCKING_FLOOR must be a number")?;
        }
        if let Ok(v) = env::var("SUPERCUT_DUCKING_CEILING") {
            config.ducking_ceiling = v
                .parse()
                .map_err(|_| "SUPERCUT_DUCKING_CEILING must be a number")?;
        }
        if let Ok(v) = env::var("SUPERCUT_NARRATION_GAIN") {
            config.narration_gain = v
                .parse()
                .map_err(|_| "SUPERCUT_NARRATION_GAIN must be a number")?;
        }
        if let Ok(v) = env::var("SUPERCUT_FINAL_GAIN") {
            config.final_gain = v.parse().map_err(|_| "SUPERCUT_FINAL_GAIN must be a number")?;
        }
        if let Ok(v) = env::var("SUPERCUT_WORKING_DIR_ROOT") {
            config.working_dir_root = PathBuf::from(v);
        }
        if let Ok(v) = env::var("SUPERCUT_TRANSITIONS_DIR") {
            config.transitions_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("SUPERCUT_FFMPEG_BIN") {
            config.ffmpeg_bin = v;
        }
        if let Ok(v) = env::var("SUPERCUT_FFPROBE_BIN") {
            config.ffprobe_bin = v;
        }
        if let Ok(v) = env::var("SUPERCUT_UPSTREAM_USER_AGENT") {
            config.upstream_user_agent = v;
        }
        if let Ok(v) = env::var("SUPERCUT_UPSTREAM_ORIGIN") {
            config.upstream_origin = v;
        }
        if let Ok(v) = env::var("SUPERCUT_UPSTREAM_REFERER") {
            config.upstream_referer = v;
        }
        if let Ok(v) = env::var("SUPERCUT_WHISPER_ENDPOINT") {
            config.whisper_endpoint = v;
        }
        config.whisper_api_key = env::var("SUPERCUT_WHISPER_API_KEY").ok();
        if let Ok(v) = env::var("SUPERCUT_DEEPGRAM_ENDPOINT") {
            config.deepgram_endpoint = v;
        }
        config.deepgram_api_key = env::var("SUPERCUT_DEEPGRAM_API_KEY").ok();
        if let Ok(v) = env::var("SUPERCUT_TTS_ENDPOINT") {
            config.tts_endpoint = v;
        }
        config.tts_api_key = env::var("SUPERCUT_TTS_API_KEY").ok();
        if let Ok(v) = env::var("SUPERCUT_FETCH_TIMEOUT_SECS") {
            let secs: u64 =
                v.parse().map_err(|_| "SUPERCUT_FETCH_TIMEOUT_SECS must be a number")?;
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Ok(v) = env::var("SUPERCUT_TRANSCRIPTION_TIMEOUT_SECS") {
            let secs: u64 = v
                .parse()
                .map_err(|_| "SUPERCUT_TRANSCRIPTION_TIMEOUT_SECS must be a number")?;
            config.transcription_timeout = Duration::from_secs(secs);
        }
        if let Ok(v) = env::var("SUPERCUT_MEDIA_TIMEOUT_SECS") {
            let secs: u64 =
                v.parse().map_err(|_| "SUPERCUT_MEDIA_TIMEOUT_SECS must be a number")?;
            config.media_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Crossfade duration in seconds at the fixed timeline frame rate.
    pub fn crossfade_seconds(&self) -> f64 {
        self.crossfade_frames as f64 / crate::timeline::TIMELINE_FPS as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.crossfade_frames, 10);
        assert_eq!(config.segment_buffer_seconds, 0.15);
        assert_eq!(config.merge_gap_seconds, 0.5);
        assert_eq!(config.transcript_ttl_days, 7);
        assert_eq!(config.cache_max_entries, 50);
        assert_eq!(config.ducking_floor, 0.2);
        assert_eq!(config.ducking_ceiling, 0.7);
        assert_eq!(config.narration_gain, 2.0);
        assert_eq!(config.final_gain, 1.5);
    }

    #[test]
    fn crossfade_seconds_at_30fps() {
        let config = Config::default();
        assert!((config.crossfade_seconds() - 0.333).abs() < 0.001);
    }

    #[test]
    fn provider_parse_accepts_known_names() {
        assert_eq!(ProviderKind::parse("whisper"), Some(ProviderKind::WhisperServer));
        assert_eq!(ProviderKind::parse(" Deepgram "), Some(ProviderKind::Deepgram));
        assert_eq!(ProviderKind::parse("azure"), None);
    }
}
