//! TikTok videos
//!
//! Metadata comes from the `__NEXT_DATA__` JSON embedded in the video page.
//! The media URL found there is short-lived and only served to a client that
//! presents the page's cookies, the TikTok referer and the same User-Agent,
//! so [`SourceProvider::get_stream`] scrapes the page again and forwards all
//! three in the descriptor.

use crate::page;
use once_cell::sync::Lazy;
use pmosource::http::{HttpClientBuilder, check_status, fake_browser};
use pmosource::{
    AudioItem, MediaContainer, ProviderState, Result, SourceError, SourceProvider,
    StreamDescriptor, Track, TransportKind,
};
use rand::Rng;
use regex::Regex;
use reqwest::Client;
use reqwest::header::SET_COOKIE;
use serde::Deserialize;
use tracing::{debug, info};

/// Source name
pub const NAME: &str = "tiktok";

/// Public site, also used for canonical track URIs
pub const DEFAULT_BASE_URL: &str = "https://www.tiktok.com";

const REFERER: &str = "https://www.tiktok.com/";

static VIDEO_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https?://(?:www\.|m\.)?tiktok\.com/@(?P<user>[a-zA-Z0-9_.-]+)/video/(?P<video>[0-9]+)(?:[/?#].*)?$",
    )
    .expect("static TikTok regex")
});

const PLATFORMS: &[&str] = &[
    "Macintosh; Intel Mac OS X 10_15_7",
    "Macintosh; Intel Mac OS X 10_15_5",
    "Macintosh; Intel Mac OS X 10_11_6",
    "Macintosh; Intel Mac OS X 10_9_5",
    "Macintosh; Intel Mac OS X 10_10_5",
    "Windows NT 10.0; Win64; x64",
    "Windows NT 10.0; WOW64",
    "Windows NT 10.0",
];

#[derive(Debug, Deserialize)]
struct ItemStruct {
    #[serde(default)]
    desc: String,
    video: VideoInfo,
    author: AuthorInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoInfo {
    id: String,
    #[serde(default)]
    cover: String,
    #[serde(default)]
    play_addr: String,
    #[serde(default)]
    duration: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorInfo {
    unique_id: String,
}

/// A scraped video page
#[derive(Debug)]
struct VideoPage {
    item: ItemStruct,
    cookies: Vec<String>,
    user_agent: String,
}

/// Resolves `https://www.tiktok.com/@user/video/<id>` links
#[derive(Debug, Clone)]
pub struct TikTokProvider {
    client: Client,
    base_url: String,
}

impl TikTokProvider {
    /// Build the provider with its own cookie-keeping, non-redirecting client
    pub fn new(builder: HttpClientBuilder) -> Result<Self> {
        let client = builder.cookie_store(true).follow_redirects(false).build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_page(&self, user: &str, video: &str) -> Result<VideoPage> {
        let url = format!("{}/@{}/video/{}", self.base_url, user, video);
        let user_agent = fake_user_agent();
        debug!(url = %url, "Fetching TikTok video page");

        let response = fake_browser(self.client.get(&url), &user_agent)
            .header("Referer", REFERER)
            .send()
            .await?;

        let status = response.status();
        if status.is_redirection() {
            // TikTok redirects unknown videos instead of answering 404
            return Err(SourceError::Transport {
                kind: TransportKind::Permanent,
                status: Some(status.as_u16()),
                message: format!("TikTok video {} not found", video),
            });
        }

        let cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|c| c.split(';').next())
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let html = check_status(response).await?.text().await?;
        let item = parse_item(&html)?;

        Ok(VideoPage {
            item,
            cookies,
            user_agent,
        })
    }

    /// Visit the homepage so the cookie jar holds a session
    async fn warm_cookies(&self) -> Result<()> {
        let url = format!("{}/", self.base_url);
        let response = fake_browser(self.client.get(&url), &fake_user_agent())
            .send()
            .await?;
        debug!(status = response.status().as_u16(), "TikTok homepage visited");
        Ok(())
    }
}

#[async_trait::async_trait]
impl SourceProvider for TikTokProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn can_handle(&self, query: &str) -> bool {
        VIDEO_REGEX.is_match(query)
    }

    async fn load_item(&self, query: &str) -> Result<AudioItem> {
        let (user, video) = parse_query(query)?;
        let page = self.fetch_page(&user, &video).await?;
        let item = page.item;

        let title = if item.desc.trim().is_empty() {
            format!("TikTok video by {}", item.author.unique_id)
        } else {
            item.desc.trim().to_string()
        };

        info!(video = %item.video.id, author = %item.author.unique_id, "TikTok video resolved");

        Ok(Track::builder(NAME, item.video.id.clone())
            .title(title)
            .author(item.author.unique_id.clone())
            .duration_secs(item.video.duration)
            .uri(format!(
                "{}/@{}/video/{}",
                DEFAULT_BASE_URL, item.author.unique_id, item.video.id
            ))
            .artwork_url(item.video.cover)
            .state(ProviderState::from_text(&item.author.unique_id))
            .build()
            .into())
    }

    fn supports_authentication(&self) -> bool {
        true
    }

    async fn load_item_authenticated(&self, query: &str) -> Result<AudioItem> {
        self.warm_cookies().await?;
        self.load_item(query).await
    }

    async fn get_stream(&self, track: &Track) -> Result<StreamDescriptor> {
        let user = match track.state.as_text().filter(|s| !s.is_empty()) {
            Some(user) => user.to_string(),
            None => track
                .uri
                .as_deref()
                .and_then(|uri| parse_query(uri).ok())
                .map(|(user, _)| user)
                .ok_or_else(|| SourceError::parse(NAME, "track has no author handle"))?,
        };

        let page = self.fetch_page(&user, &track.identifier).await?;
        if page.item.video.play_addr.is_empty() {
            return Err(SourceError::parse(NAME, "video page has no playAddr"));
        }

        let mut descriptor = StreamDescriptor::new(page.item.video.play_addr, MediaContainer::Mpeg4)
            .with_header("Referer", REFERER)
            .with_header("User-Agent", page.user_agent);
        if !page.cookies.is_empty() {
            descriptor = descriptor.with_header("Cookie", page.cookies.join("; "));
        }
        Ok(descriptor)
    }
}

fn parse_query(query: &str) -> Result<(String, String)> {
    let caps = VIDEO_REGEX
        .captures(query)
        .ok_or_else(|| SourceError::parse(NAME, format!("not a TikTok video URL: {}", query)))?;
    Ok((caps["user"].to_string(), caps["video"].to_string()))
}

fn parse_item(html: &str) -> Result<ItemStruct> {
    let raw = page::first_text(html, "script#__NEXT_DATA__")
        .ok_or_else(|| SourceError::parse(NAME, "page has no __NEXT_DATA__ script"))?;
    let data: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| SourceError::parse(NAME, e.to_string()))?;

    let Some(item) = data.pointer("/props/pageProps/itemInfo/itemStruct") else {
        let code = data
            .pointer("/props/pageProps/statusCode")
            .and_then(|c| c.as_i64())
            .unwrap_or(0);
        if code != 0 {
            return Err(SourceError::permanent(format!(
                "TikTok reports status {} for this video",
                code
            )));
        }
        return Err(SourceError::parse(NAME, "missing props.pageProps.itemInfo.itemStruct"));
    };

    let item: ItemStruct = serde_json::from_value(item.clone())
        .map_err(|e| SourceError::parse(NAME, e.to_string()))?;
    if item.video.id.is_empty() {
        return Err(SourceError::parse(NAME, "video id is empty"));
    }
    Ok(item)
}

/// Random desktop Chrome User-Agent
fn fake_user_agent() -> String {
    let mut rng = rand::rng();
    let platform = PLATFORMS[rng.random_range(0..PLATFORMS.len())];
    format!(
        "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{}.0.{}.{} Safari/537.36",
        platform,
        rng.random_range(85..88),
        rng.random_range(4100..4290),
        rng.random_range(140..190)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmosource::ErrorKind;

    fn next_data(json: &str) -> String {
        format!(
            r#"<html><body><script id="__NEXT_DATA__" type="application/json">{}</script></body></html>"#,
            json
        )
    }

    #[test]
    fn test_can_handle() {
        let provider = TikTokProvider::new(HttpClientBuilder::new()).unwrap();
        assert!(provider.can_handle("https://www.tiktok.com/@scout2015/video/6718335390845095173"));
        assert!(provider.can_handle("https://m.tiktok.com/@a.b_c/video/123?lang=en"));
        assert!(!provider.can_handle("https://www.tiktok.com/@scout2015"));
        assert!(!provider.can_handle("https://vm.tiktok.com/ZMabc/"));
    }

    #[test]
    fn test_parse_item() {
        let html = next_data(
            r#"{"props":{"pageProps":{"itemInfo":{"itemStruct":{
                "desc":"Scramble up ur name","author":{"uniqueId":"scout2015"},
                "video":{"id":"6718335390845095173","cover":"https://p16.example/cover.jpg",
                         "playAddr":"https://v16.example/video.mp4","duration":9}}}}}}"#,
        );
        let item = parse_item(&html).unwrap();
        assert_eq!(item.video.id, "6718335390845095173");
        assert_eq!(item.author.unique_id, "scout2015");
        assert_eq!(item.video.duration, 9.0);
    }

    #[test]
    fn test_parse_item_errors() {
        let err = parse_item("<html></html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);

        let err = parse_item(&next_data(r#"{"props":{"pageProps":{"statusCode":10204}}}"#))
            .unwrap_err();
        assert!(!err.is_transient());
        assert_ne!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn test_fake_user_agent_shape() {
        let ua = fake_user_agent();
        assert!(ua.starts_with("Mozilla/5.0 ("));
        assert!(ua.ends_with("Safari/537.36"));
    }
}
