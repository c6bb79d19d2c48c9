//! Getyarn movie and TV clips

use crate::page;
use once_cell::sync::Lazy;
use pmosource::http::{fake_chrome, fetch_text};
use pmosource::{
    AudioItem, MediaContainer, Result, SourceError, SourceProvider, StreamDescriptor, Track,
};
use regex::Regex;
use reqwest::Client;
use tracing::debug;

/// Source name
pub const NAME: &str = "getyarn";

pub const DEFAULT_BASE_URL: &str = "https://getyarn.io";

/// Host serving the clip files
pub const DEFAULT_MEDIA_URL: &str = "https://y.yarn.co";

const AUTHOR: &str = "getyarn.io";

static CLIP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.)?getyarn\.io/yarn-clip/(?P<id>[a-zA-Z0-9-]+)(?:[/?#].*)?$")
        .expect("static Getyarn regex")
});

/// Resolves `https://getyarn.io/yarn-clip/<id>` links
#[derive(Debug, Clone)]
pub struct GetyarnProvider {
    client: Client,
    base_url: String,
    media_url: String,
}

impl GetyarnProvider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            media_url: DEFAULT_MEDIA_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_media_url(mut self, media_url: impl Into<String>) -> Self {
        self.media_url = media_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait::async_trait]
impl SourceProvider for GetyarnProvider {
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
            .ok_or_else(|| SourceError::parse(NAME, format!("not a Getyarn clip URL: {}", query)))?;

        let url = format!("{}/yarn-clip/{}", self.base_url, id);
        debug!(url = %url, "Fetching Getyarn clip page");
        let html = fetch_text(fake_chrome(self.client.get(&url))).await?;

        let title = page::meta_content(&html, "og:title")
            .ok_or_else(|| SourceError::parse(NAME, "clip page has no og:title"))?;

        let mut builder = Track::builder(NAME, id.as_str())
            .title(title)
            .author(AUTHOR)
            .uri(format!("{}/yarn-clip/{}", DEFAULT_BASE_URL, id));
        if let Some(image) = page::meta_content(&html, "og:image") {
            builder = builder.artwork_url(image);
        }

        Ok(builder.build().into())
    }

    async fn get_stream(&self, track: &Track) -> Result<StreamDescriptor> {
        Ok(StreamDescriptor::new(
            format!("{}/{}.mp4?v=0", self.media_url, track.identifier),
            MediaContainer::Mpeg4,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_handle() {
        let provider = GetyarnProvider::new(Client::new());
        assert!(provider.can_handle(
            "https://getyarn.io/yarn-clip/0a1b2c3d-1111-2222-3333-444455556666"
        ));
        assert!(provider.can_handle("https://www.getyarn.io/yarn-clip/abc?autoplay=1"));
        assert!(!provider.can_handle("https://getyarn.io/yarn-find?text=hello"));
    }

    #[tokio::test]
    async fn test_stream_url() {
        let provider = GetyarnProvider::new(Client::new()).with_media_url("http://media.test/");
        let track = Track::builder(NAME, "abc-123").build();
        let descriptor = provider.get_stream(&track).await.unwrap();
        assert_eq!(descriptor.url, "http://media.test/abc-123.mp4?v=0");
    }
}
