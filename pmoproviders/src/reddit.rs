//! Reddit video posts (`v.redd.it`)

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
pub const NAME: &str = "reddit";

pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com";

/// Host serving the media of video posts
pub const DEFAULT_MEDIA_URL: &str = "https://v.redd.it";

static POST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https?://(?:www\.|old\.|new\.)?reddit\.com/r/(?P<sub>[A-Za-z0-9_]+)/comments/(?P<post>[a-z0-9]+)(?:/[^?#]*)?(?:[?#].*)?$",
    )
    .expect("static Reddit regex")
});

static VIDEO_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"v\.redd\.it/(?P<id>[A-Za-z0-9]+)").expect("static v.redd.it regex"));

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    secure_media: Option<Media>,
    #[serde(default)]
    media: Option<Media>,
    #[serde(default)]
    crosspost_parent_list: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct Media {
    reddit_video: Option<RedditVideo>,
}

#[derive(Debug, Deserialize)]
struct RedditVideo {
    fallback_url: String,
    duration: Option<f64>,
}

impl Post {
    /// The hosted video of the post or of the post it crossposts
    fn video(&self) -> Option<(&RedditVideo, Option<&str>)> {
        let own = self
            .secure_media
            .as_ref()
            .or(self.media.as_ref())
            .and_then(|m| m.reddit_video.as_ref());
        match own {
            Some(video) => Some((video, self.url.as_deref())),
            None => self.crosspost_parent_list.iter().find_map(Post::video),
        }
    }
}

/// Resolves `https://www.reddit.com/r/<sub>/comments/<id>/...` video posts
#[derive(Debug, Clone)]
pub struct RedditProvider {
    client: Client,
    base_url: String,
    media_url: String,
}

impl RedditProvider {
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
impl SourceProvider for RedditProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn can_handle(&self, query: &str) -> bool {
        POST_REGEX.is_match(query)
    }

    async fn load_item(&self, query: &str) -> Result<AudioItem> {
        let caps = POST_REGEX
            .captures(query)
            .ok_or_else(|| SourceError::parse(NAME, format!("not a Reddit post URL: {}", query)))?;
        let url = format!(
            "{}/r/{}/comments/{}.json",
            self.base_url, &caps["sub"], &caps["post"]
        );
        debug!(url = %url, "Fetching Reddit post");

        let listings: Vec<Listing> = fetch_json(NAME, self.client.get(&url)).await?;
        let post = listings
            .into_iter()
            .next()
            .and_then(|l| l.data.children.into_iter().next())
            .map(|c| c.data)
            .ok_or_else(|| SourceError::parse(NAME, "listing has no post"))?;

        let (video, post_url) = post
            .video()
            .ok_or_else(|| SourceError::permanent(format!("Reddit post {} has no video", &caps["post"])))?;

        let id = video_id(&video.fallback_url)
            .or_else(|| post_url.and_then(video_id))
            .ok_or_else(|| SourceError::parse(NAME, "cannot find the v.redd.it id"))?;

        let mut builder = Track::builder(NAME, id)
            .title(post.title.as_str())
            .author(post.author.as_str())
            .uri(format!("{}{}", DEFAULT_BASE_URL, post.permalink));
        if let Some(duration) = video.duration {
            builder = builder.duration_secs(duration);
        }
        if let Some(thumbnail) = post.thumbnail.as_deref().filter(|t| t.starts_with("http")) {
            builder = builder.artwork_url(thumbnail);
        }

        Ok(builder.build().into())
    }

    async fn get_stream(&self, track: &Track) -> Result<StreamDescriptor> {
        Ok(StreamDescriptor::new(
            format!("{}/{}/audio?source=fallback", self.media_url, track.identifier),
            MediaContainer::Mpeg4,
        ))
    }
}

fn video_id(url: &str) -> Option<String> {
    VIDEO_ID_REGEX
        .captures(url)
        .map(|caps| caps["id"].to_string())
}
