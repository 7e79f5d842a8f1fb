//! Speech synthesis for the narration overlay.
//!
//! The script text itself comes from an external generator; this module
//! only turns finished text into MP3 audio. One HTTP implementation is
//! provided; the trait is the seam for tests and alternative vendors.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, SupercutError};

/// Turns narration text into MP3 bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str, style: &str) -> Result<Vec<u8>>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    style: &'a str,
    output_format: &'a str,
}

/// JSON-in, MP3-out speech endpoint.
pub struct HttpSpeechSynthesizer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpSpeechSynthesizer {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            endpoint: config.tts_endpoint.clone(),
            api_key: config.tts_api_key.clone(),
            timeout: config.transcription_timeout,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: &str, style: &str) -> Result<Vec<u8>> {
        debug!("synthesizing {} chars with voice {voice_id}", text.len());

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&SynthesisRequest { text, voice_id, style, output_format: "mp3" })
            .timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.header("xi-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SupercutError::UpstreamRejected { status: status.as_u16() });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
