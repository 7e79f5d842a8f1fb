//! Word-timestamp transcription providers.
//!
//! Two backends are selectable by configuration; the service tries them
//! in configured order. Both normalise to the same [`Word`] shape so the
//! rest of the pipeline never sees provider-specific payloads.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, SupercutError};
use crate::models::Word;

/// Raw provider result before the service fills in a probed duration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTranscript {
    pub words: Vec<Word>,
    /// Audio duration when the provider reports one.
    pub duration: Option<f64>,
}

/// A speech-to-text backend returning word-level timestamps.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this backend has the configuration it needs to be called
    /// at all. Unconfigured providers are skipped without a submission.
    fn is_configured(&self) -> bool;

    async fn transcribe(
        &self,
        audio: Vec<u8>,
        mime_type: &str,
        language: &str,
    ) -> Result<ProviderTranscript>;
}

// ── Whisper-compatible server ────────────────────────────────────────────────

/// OpenAI-compatible `/v1/audio/transcriptions` endpoint, hosted or
/// self-hosted (whisper.cpp server, vLLM, …).
pub struct WhisperServerProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl WhisperServerProvider {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            endpoint: config.whisper_endpoint.clone(),
            api_key: config.whisper_api_key.clone(),
            timeout: config.transcription_timeout,
        }
    }
}

#[derive(Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    words: Vec<WhisperWord>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct WhisperWord {
    word: String,
    start: f64,
    end: f64,
    /// Some servers report per-word probability; the hosted API does not.
    probability: Option<f64>,
}

#[derive(Deserialize)]
struct WhisperSegment {
    avg_logprob: Option<f64>,
}

#[async_trait]
impl TranscriptionProvider for WhisperServerProvider {
    fn name(&self) -> &'static str {
        "whisper-server"
    }

    fn is_configured(&self) -> bool {
        // The hosted API needs a key; a self-hosted endpoint does not.
        self.api_key.is_some() || !self.endpoint.starts_with("https://api.openai.com")
    }

    async fn transcribe(
        &self,
        audio: Vec<u8>,
        mime_type: &str,
        language: &str,
    ) -> Result<ProviderTranscript> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str(mime_type)
            .map_err(|e| SupercutError::Validation(format!("bad mime type {mime_type:?}: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", "whisper-1")
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word")
            .text("language", language.to_string());

        let mut request = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SupercutError::UpstreamRejected { status: status.as_u16() });
        }

        let body: WhisperResponse = response.json().await?;

        // Word-level probability when the server reports it, otherwise the
        // mean segment log-probability mapped back to a [0,1] confidence.
        let segment_confidence = mean_logprob_confidence(&body.segments);
        let words = body
            .words
            .into_iter()
            .map(|w| Word {
                text: w.word.trim().to_string(),
                start: w.start,
                end: w.end,
                confidence: w
                    .probability
                    .map(|p| p.clamp(0.0, 1.0))
                    .unwrap_or(segment_confidence),
            })
            .collect::<Vec<_>>();

        debug!("whisper-server returned {} words", words.len());
        Ok(ProviderTranscript { words, duration: body.duration })
    }
}

fn mean_logprob_confidence(segments: &[WhisperSegment]) -> f64 {
    let logprobs: Vec<f64> = segments.iter().filter_map(|s| s.avg_logprob).collect();
    if logprobs.is_empty() {
        return 1.0;
    }
    let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
    mean.exp().clamp(0.0, 1.0)
}

// ── Deepgram ─────────────────────────────────────────────────────────────────

/// Deepgram prerecorded-audio endpoint; word confidence comes straight
/// off the response.
pub struct DeepgramProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl DeepgramProvider {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            endpoint: config.deepgram_endpoint.clone(),
            api_key: config.deepgram_api_key.clone(),
            timeout: config.transcription_timeout,
        }
    }
}

#[derive(Deserialize)]
struct DeepgramResponse {
    metadata: Option<DeepgramMetadata>,
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramMetadata {
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    #[serde(default)]
    words: Vec<DeepgramWord>,
}

#[derive(Deserialize)]
struct DeepgramWord {
    word: String,
    start: f64,
    end: f64,
    confidence: Option<f64>,
}

#[async_trait]
impl TranscriptionProvider for DeepgramProvider {
    fn name(&self) -> &'static str {
        "deepgram"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some() || !self.endpoint.starts_with("https://api.deepgram.com")
    }

    async fn transcribe(
        &self,
        audio: Vec<u8>,
        mime_type: &str,
        language: &str,
    ) -> Result<ProviderTranscript> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .query(&[("model", "nova-2"), ("language", language), ("punctuate", "true")])
            .header("Content-Type", mime_type)
            .body(audio)
            .timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Token {key}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SupercutError::UpstreamRejected { status: status.as_u16() });
        }

        let body: DeepgramResponse = response.json().await?;
        let words = body
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|channel| channel.alternatives.into_iter().next())
            .map(|alternative| alternative.words)
            .unwrap_or_default()
            .into_iter()
            .map(|w| Word {
                text: w.word,
                start: w.start,
                end: w.end,
                confidence: w.confidence.map(|c| c.clamp(0.0, 1.0)).unwrap_or(1.0),
            })
            .collect::<Vec<_>>();

        debug!("deepgram returned {} words", words.len());
        Ok(ProviderTranscript {
            words,
            duration: body.metadata.and_then(|m| m.duration),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_with(endpoint: &str, which: &str) -> Config {
        let mut config = Config::default();
        match which {
            "whisper" => {
                config.whisper_endpoint = endpoint.to_string();
                config.whisper_api_key = Some("sk-test".into());
            }
            _ => {
                config.deepgram_endpoint = endpoint.to_string();
                config.deepgram_api_key = Some("dg-test".into());
            }
        }
        config
    }

    #[tokio::test]
    async fn whisper_words_normalise_with_probability() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{
                    "duration": 10.0,
                    "words": [
                        {"word": " home", "start": 0.5, "end": 0.8, "probability": 0.93},
                        {"word": "run", "start": 0.8, "end": 1.1}
                    ],
                    "segments": [{"avg_logprob": -0.223}]
                }"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let provider =
            WhisperServerProvider::new(Client::new(), &config_with(&server.uri(), "whisper"));
        let transcript = provider
            .transcribe(b"wav".to_vec(), "audio/wav", "en")
            .await
            .unwrap();

        assert_eq!(transcript.duration, Some(10.0));
        assert_eq!(transcript.words[0].text, "home");
        assert_eq!(transcript.words[0].confidence, 0.93);
        // exp(-0.223) ≈ 0.80 backfills the word with no probability.
        assert!((transcript.words[1].confidence - 0.80).abs() < 0.01);
    }

    #[tokio::test]
    async fn whisper_provider_error_status_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider =
            WhisperServerProvider::new(Client::new(), &config_with(&server.uri(), "whisper"));
        assert!(matches!(
            provider.transcribe(b"wav".to_vec(), "audio/wav", "en").await,
            Err(SupercutError::UpstreamRejected { status: 500 })
        ));
    }

    #[tokio::test]
    async fn deepgram_parses_nested_channels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("model", "nova-2"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{
                    "metadata": {"duration": 9.98},
                    "results": {"channels": [{"alternatives": [{"words": [
                        {"word": "home", "start": 0.5, "end": 0.8, "confidence": 0.99},
                        {"word": "run", "start": 0.8, "end": 1.1, "confidence": 0.97}
                    ]}]}]}
                }"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let provider =
            DeepgramProvider::new(Client::new(), &config_with(&server.uri(), "deepgram"));
        let transcript = provider
            .transcribe(b"wav".to_vec(), "audio/wav", "en")
            .await
            .unwrap();

        assert_eq!(transcript.words.len(), 2);
        assert_eq!(transcript.words[1].text, "run");
        assert_eq!(transcript.duration, Some(9.98));
    }

    #[test]
    fn hosted_endpoints_require_keys() {
        let config = Config::default();
        let whisper = WhisperServerProvider::new(Client::new(), &config);
        let deepgram = DeepgramProvider::new(Client::new(), &config);
        assert!(!whisper.is_configured());
        assert!(!deepgram.is_configured());

        let mut local = Config::default();
        local.whisper_endpoint = "http://localhost:8080/v1/audio/transcriptions".into();
        assert!(WhisperServerProvider::new(Client::new(), &local).is_configured());
    }

    #[test]
    fn empty_segment_list_defaults_confidence_to_one() {
        assert_eq!(mean_logprob_confidence(&[]), 1.0);
    }
}
