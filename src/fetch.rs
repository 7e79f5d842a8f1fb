//! Asset download into the run's working directory.
//!
//! The upstream media host only answers requests that look like they come
//! from its own web player, so every request carries a browser-like
//! user agent plus the site's origin and referer. Some catalogue URLs
//! arrive wrapped in a `video-proxy?url=…` indirection used by the editor
//! UI; the fetcher unwraps those before downloading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::{Result, SupercutError};

#[derive(Debug, Clone)]
pub struct AssetFetcher {
    client: Client,
    user_agent: String,
    origin: String,
    referer: String,
    timeout: Duration,
}

impl AssetFetcher {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            user_agent: config.upstream_user_agent.clone(),
            origin: config.upstream_origin.clone(),
            referer: config.upstream_referer.clone(),
            timeout: config.fetch_timeout,
        }
    }

    /// Download `source_url` into `dest_dir`, returning the local path.
    ///
    /// Downloads are deduplicated within the directory by URL hash, and
    /// written atomically (`.part` then rename) so a crashed run never
    /// leaves a half-written file that a later step would trust.
    pub async fn fetch(&self, source_url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let normalized = normalize_source_url(source_url)?;
        let dest = dest_dir.join(cached_file_name(&normalized));

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!("asset already fetched: {}", dest.display());
            return Ok(dest);
        }

        debug!("fetching {}", normalized);
        let response = self
            .client
            .get(&normalized)
            .header("User-Agent", &self.user_agent)
            .header("Origin", &self.origin)
            .header("Referer", &self.referer)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(SupercutError::UpstreamRejected { status: status.as_u16() });
        }

        let part = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&part).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part, &dest).await?;
        Ok(dest)
    }
}

/// Unwrap editor `video-proxy?url=…` indirections down to the real
/// upstream URL. Anything else passes through unchanged (after a parse
/// check).
pub fn normalize_source_url(source_url: &str) -> Result<String> {
    let mut current = source_url.to_string();
    loop {
        let parsed = Url::parse(&current)
            .map_err(|e| SupercutError::Validation(format!("bad source URL {current:?}: {e}")))?;

        let is_proxy = parsed.path().ends_with("video-proxy");
        let inner = is_proxy
            .then(|| {
                parsed
                    .query_pairs()
                    .find(|(key, _)| key == "url")
                    .map(|(_, value)| value.into_owned())
            })
            .flatten();

        match inner {
            Some(url) => current = url,
            None => return Ok(current),
        }
    }
}

/// Stable local name for a source URL: short URL hash plus the upstream
/// extension.
fn cached_file_name(normalized_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_url.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let extension = Url::parse(normalized_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
        })
        .and_then(|name| {
            name.rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
        })
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()) && ext.len() <= 4)
        .unwrap_or_else(|| "mp4".to_string());

    format!("{}.{extension}", &hash[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn plain_urls_pass_through() {
        let url = "https://mediadownloads.mlb.com/mlbam/mp4/2025/06/14/highlight.mp4";
        assert_eq!(normalize_source_url(url).unwrap(), url);
    }

    #[test]
    fn proxy_wrapper_is_unwrapped() {
        let wrapped = "https://editor.example.com/api/video-proxy?url=https%3A%2F%2Fmediadownloads.mlb.com%2Fclip.mp4";
        assert_eq!(
            normalize_source_url(wrapped).unwrap(),
            "https://mediadownloads.mlb.com/clip.mp4"
        );
    }

    #[test]
    fn nested_proxy_wrappers_unwrap_fully() {
        let inner = "https://editor.example.com/api/video-proxy?url=https%3A%2F%2Fcdn.example.com%2Fclip.mp4";
        let outer = format!(
            "https://editor.example.com/api/video-proxy?url={}",
            url::form_urlencoded::byte_serialize(inner.as_bytes()).collect::<String>()
        );
        assert_eq!(
            normalize_source_url(&outer).unwrap(),
            "https://cdn.example.com/clip.mp4"
        );
    }

    #[test]
    fn garbage_url_is_a_validation_error() {
        assert!(matches!(
            normalize_source_url("not a url"),
            Err(SupercutError::Validation(_))
        ));
    }

    #[test]
    fn cached_names_are_stable_and_carry_extension() {
        let a = cached_file_name("https://cdn.example.com/a/b/clip.mp4");
        let b = cached_file_name("https://cdn.example.com/a/b/clip.mp4");
        let c = cached_file_name("https://cdn.example.com/a/b/other.mp4");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".mp4"));
    }

    #[test]
    fn extension_defaults_to_mp4() {
        assert!(cached_file_name("https://cdn.example.com/stream").ends_with(".mp4"));
        assert!(cached_file_name("https://cdn.example.com/clip.notanext").ends_with(".mp4"));
    }

    #[tokio::test]
    async fn fetch_sends_upstream_headers_and_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .and(header("Origin", "https://www.mlb.com"))
            .and(header("Referer", "https://www.mlb.com/video/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = AssetFetcher::new(Client::new(), &Config::default());
        let url = format!("{}/clip.mp4", server.uri());

        let local = fetcher.fetch(&url, dir.path()).await.unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"mp4-bytes");
        assert!(!local.with_extension("part").exists());
    }

    #[tokio::test]
    async fn second_fetch_reuses_the_downloaded_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = AssetFetcher::new(Client::new(), &Config::default());
        let url = format!("{}/clip.mp4", server.uri());

        let first = fetcher.fetch(&url, dir.path()).await.unwrap();
        let second = fetcher.fetch(&url, dir.path()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn upstream_error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = AssetFetcher::new(Client::new(), &Config::default());
        let url = format!("{}/clip.mp4", server.uri());

        assert!(matches!(
            fetcher.fetch(&url, dir.path()).await,
            Err(SupercutError::UpstreamRejected { status: 403 })
        ));
    }
}
