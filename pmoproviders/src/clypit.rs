//! Clyp audio uploads, through the public JSON API

use once_cell::sync::Lazy;
use pmosource::http::fetch_json;
use pmosource::{
    AudioItem, MediaContainer, Result, SourceError, SourceProvider, StreamDescriptor, Track,
};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

/// Source name
pub const NAME: &str = "clypit";

/// JSON API root
pub const DEFAULT_BASE_URL: &str = "https://api.clyp.it";

const AUTHOR: &str = "Unknown artist";

static CLIP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.)?clyp\.it/(?P<id>[a-zA-Z0-9]{8})(?:[/?#].*)?$")
        .expect("static Clyp regex")
});

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Upload {
    title: String,
    duration: Option<f64>,
    mp3_url: Option<String>,
    secure_mp3_url: Option<String>,
    artwork_picture_url: Option<String>,
}

impl Upload {
    fn mp3(self) -> Option<String> {
        self.secure_mp3_url
            .or(self.mp3_url)
            .filter(|url| !url.is_empty())
    }
}

/// Resolves `https://clyp.it/<id>` links
#[derive(Debug, Clone)]
pub struct ClypitProvider {
    client: Client,
    base_url: String,
}

impl ClypitProvider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch(&self, id: &str) -> Result<Upload> {
        let url = format!("{}/{}", self.base_url, id);
        debug!(url = %url, "Fetching Clyp upload");
        fetch_json(NAME, self.client.get(&url)).await
    }
}

#[async_trait::async_trait]
impl SourceProvider for ClypitProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn can_handle(&self, query: &str) -> bool {
        CLIP_REGEX.is_match(query)
    }

    async fn load_item(&self, query: &str) -> Result<AudioItem> {
        let id = CLIP_REGEX
            .captures(query)
            .map(|caps| caps["id"].to_string())
            .ok_or_else(|| SourceError::parse(NAME, format!("not a Clyp URL: {}", query)))?;
        let upload = self.fetch(&id).await?;

        let mut builder = Track::builder(NAME, id.as_str())
            .title(upload.title.as_str())
            .author(AUTHOR)
            .uri(format!("https://clyp.it/{}", id));
        if let Some(duration) = upload.duration {
            builder = builder.duration_secs(duration);
        }
        if let Some(artwork) = upload.artwork_picture_url.as_deref() {
            builder = builder.artwork_url(artwork);
        }

        Ok(builder.build().into())
    }

    async fn get_stream(&self, track: &Track) -> Result<StreamDescriptor> {
        let url = self
            .fetch(&track.identifier)
            .await?
            .mp3()
            .ok_or_else(|| SourceError::parse(NAME, "upload has no MP3 URL"))?;
        Ok(StreamDescriptor::new(url, MediaContainer::Mp3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_handle() {
        let provider = ClypitProvider::new(Client::new());
        assert!(provider.can_handle("https://clyp.it/ab12cd34"));
        assert!(provider.can_handle("https://clyp.it/ab12cd34?autoplay=true"));
        assert!(!provider.can_handle("https://clyp.it/user/ab12cd34"));
        assert!(!provider.can_handle("https://clyp.it/short"));
    }

    #[test]
    fn test_prefers_secure_mp3() {
        let upload: Upload = serde_json::from_str(
            r#"{"Title":"t","Mp3Url":"http://a/x.mp3","SecureMp3Url":"https://a/x.mp3"}"#,
        )
        .unwrap();
        assert_eq!(upload.mp3().as_deref(), Some("https://a/x.mp3"));

        let upload: Upload = serde_json::from_str(r#"{"Title":"t","Mp3Url":"http://a/x.mp3"}"#).unwrap();
        assert_eq!(upload.mp3().as_deref(), Some("http://a/x.mp3"));
    }
}
