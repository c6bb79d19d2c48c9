//! OverClocked ReMix
//!
//! Accepts both remix page URLs and bare `OCRnnnnn` ids. Remix pages carry a
//! direct MP3 download link, which is scraped again for every playback.

use crate::page;
use once_cell::sync::Lazy;
use pmosource::http::{fake_chrome, fetch_text};
use pmosource::{
    AudioItem, MediaContainer, Result, SourceError, SourceProvider, StreamDescriptor, Track,
};
use regex::Regex;
use reqwest::Client;
use tracing::debug;
use url::Url;

/// Source name
pub const NAME: &str = "ocremix";

pub const DEFAULT_BASE_URL: &str = "https://ocremix.org";

const DEFAULT_AUTHOR: &str = "OverClocked ReMix";

static REMIX_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://(?:www\.)?ocremix\.org/remix/)?(?P<id>OCR\d{5})(?:[/?#].*)?$")
        .expect("static OC ReMix regex")
});

static TITLE_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*[-|]\s*(?:OverClocked ReMix|OC ReMix)\s*$").expect("static title regex")
});

/// What a remix page tells us
#[derive(Debug)]
struct RemixPage {
    title: String,
    artist: Option<String>,
    mp3_url: Option<String>,
}

/// Resolves `https://ocremix.org/remix/OCRnnnnn` links and `OCRnnnnn` ids
#[derive(Debug, Clone)]
pub struct OcRemixProvider {
    client: Client,
    base_url: String,
}

impl OcRemixProvider {
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

    async fn fetch_page(&self, id: &str) -> Result<RemixPage> {
        let url = format!("{}/remix/{}", self.base_url, id);
        debug!(url = %url, "Fetching OC ReMix page");
        let html = fetch_text(fake_chrome(self.client.get(&url))).await?;
        parse_page(&html, &url)
    }
}

#[async_trait::async_trait]
impl SourceProvider for OcRemixProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn can_handle(&self, query: &str) -> bool {
        REMIX_REGEX.is_match(query)
    }

    async fn load_item(&self, query: &str) -> Result<AudioItem> {
        let id = REMIX_REGEX
            .captures(query)
            .map(|caps| caps["id"].to_string())
            .ok_or_else(|| SourceError::parse(NAME, format!("not an OC ReMix id: {}", query)))?;
        let page = self.fetch_page(&id).await?;

        if page.mp3_url.is_none() {
            return Err(SourceError::parse(NAME, format!("{} has no MP3 download", id)));
        }

        Ok(Track::builder(NAME, id.as_str())
            .title(page.title)
            .author(page.artist.unwrap_or_else(|| DEFAULT_AUTHOR.to_string()))
            .uri(format!("{}/remix/{}", DEFAULT_BASE_URL, id))
            .build()
            .into())
    }

    async fn get_stream(&self, track: &Track) -> Result<StreamDescriptor> {
        let url = self
            .fetch_page(&track.identifier)
            .await?
            .mp3_url
            .ok_or_else(|| SourceError::parse(NAME, "remix page has no MP3 download"))?;
        Ok(StreamDescriptor::new(url, MediaContainer::Mp3))
    }
}

fn parse_page(html: &str, page_url: &str) -> Result<RemixPage> {
    let title = page::first_text(html, "title")
        .map(|t| TITLE_SUFFIX.replace(&t, "").trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SourceError::parse(NAME, "remix page has no title"))?;

    let artist = page::first_text(html, r#"a[href*="/artist/"]"#);

    // download links may be relative to the page
    let mp3_url = page::first_attr(html, r#"a[href$=".mp3"]"#, "href").and_then(|href| {
        Url::parse(page_url)
            .and_then(|base| base.join(&href))
            .ok()
            .map(String::from)
    });

    Ok(RemixPage {
        title,
        artist,
        mp3_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_handle() {
        let provider = OcRemixProvider::new(Client::new());
        assert!(provider.can_handle("OCR03310"));
        assert!(provider.can_handle("https://ocremix.org/remix/OCR03310"));
        assert!(provider.can_handle("https://www.ocremix.org/remix/OCR03310/"));
        assert!(!provider.can_handle("OCR123"));
        assert!(!provider.can_handle("https://ocremix.org/game/123"));
    }

    #[test]
    fn test_parse_page() {
        let html = r#"<html><head><title>ReMix: Sonic 2 "Chemical Plant" - OC ReMix</title></head>
            <body><a href="/artist/1/someone">Someone</a>
            <a href="/files/music/remixes/Sonic2_Chemical_OC_ReMix.mp3">Download</a></body></html>"#;
        let page = parse_page(html, "https://ocremix.org/remix/OCR03310").unwrap();
        assert_eq!(page.title, r#"ReMix: Sonic 2 "Chemical Plant""#);
        assert_eq!(page.artist.as_deref(), Some("Someone"));
        assert_eq!(
            page.mp3_url.as_deref(),
            Some("https://ocremix.org/files/music/remixes/Sonic2_Chemical_OC_ReMix.mp3")
        );

        assert!(parse_page("<html></html>", "https://ocremix.org/").is_err());
    }
}
