//! Mixcloud cloudcasts, through the public GraphQL endpoint

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use pmosource::http::{decrypt_xor, fetch_json, url_decode};
use pmosource::{
    AudioItem, MediaContainer, Result, SourceError, SourceProvider,
    StreamDescriptor, Track, TransportKind,
};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

/// Source name
pub const NAME: &str = "mixcloud";

pub const DEFAULT_BASE_URL: &str = "https://www.mixcloud.com";

/// Key the stream URLs are XOR-ed with
const DECRYPTION_KEY: &[u8] = b"IFYOUWANTTHEARTISTSTOGETPAIDDONOTDOWNLOADFROMMIXCLOUD";

/// Profile sub-pages that look like `/<user>/<slug>/` but are not cloudcasts
const RESERVED_SLUGS: &[&str] = &["stream", "uploads", "favorites", "listens", "playlists"];

static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:(?:www|beta|m)\.)?mixcloud\.com/([^/?#]+)/([^/?#]+)/?(?:[?#].*)?$")
        .expect("static Mixcloud regex")
});

const REQUEST_STRUCTURE: &str = "audioLength
    name
    owner {
      username
    }
    streamInfo {
      dashUrl
      hlsUrl
      url
    }";

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<LookupData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupData {
    cloudcast_lookup: Option<Cloudcast>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cloudcast {
    name: String,
    audio_length: Option<f64>,
    owner: Owner,
    stream_info: Option<StreamInfo>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    username: String,
}

#[derive(Debug, Deserialize)]
struct StreamInfo {
    url: Option<String>,
}

/// Resolves `https://www.mixcloud.com/<user>/<slug>/` links
#[derive(Debug, Clone)]
pub struct MixcloudProvider {
    client: Client,
    base_url: String,
}

impl MixcloudProvider {
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

    /// Run the `cloudcastLookup` query for one cloudcast
    async fn lookup(&self, username: &str, slug: &str) -> Result<Cloudcast> {
        let query = format!(
            "{{\n  cloudcastLookup(lookup: {{username: {}, slug: {}}}) {{\n    {}\n  }}\n}}",
            graphql_string(username),
            graphql_string(slug),
            REQUEST_STRUCTURE
        );
        let url = format!("{}/graphql", self.base_url);
        debug!(username, slug, "Mixcloud cloudcast lookup");

        let response: GraphQlResponse =
            fetch_json(NAME, self.client.get(&url).query(&[("query", query.as_str())])).await?;

        response
            .data
            .ok_or_else(|| SourceError::parse(NAME, "GraphQL answer has no data"))?
            .cloudcast_lookup
            .ok_or_else(|| SourceError::Transport {
                kind: TransportKind::Permanent,
                status: Some(404),
                message: format!("Mixcloud cloudcast {}/{} not found", username, slug),
            })
    }
}

#[async_trait::async_trait]
impl SourceProvider for MixcloudProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn can_handle(&self, query: &str) -> bool {
        parse_query(query).is_some()
    }

    async fn load_item(&self, query: &str) -> Result<AudioItem> {
        let (username, slug) = parse_query(query)
            .ok_or_else(|| SourceError::parse(NAME, format!("not a cloudcast URL: {}", query)))?;
        let cloudcast = self.lookup(&username, &slug).await?;

        if cloudcast.stream_info.is_none() {
            return Err(SourceError::AccessDenied(format!(
                "Mixcloud cloudcast {}/{} cannot be streamed (exclusive or region locked)",
                username, slug
            )));
        }

        let mut builder = Track::builder(NAME, track_identifier(&username, &slug))
            .title(cloudcast.name)
            .author(cloudcast.owner.username)
            .uri(format!("{}/{}/{}/", DEFAULT_BASE_URL, username, slug));
        if let Some(length) = cloudcast.audio_length {
            builder = builder.duration_secs(length);
        }

        Ok(builder.build().into())
    }

    async fn get_stream(&self, track: &Track) -> Result<StreamDescriptor> {
        let (username, slug) = split_identifier(&track.identifier)?;
        let cloudcast = self.lookup(username, slug).await?;

        let encrypted = cloudcast
            .stream_info
            .and_then(|info| info.url)
            .ok_or_else(|| {
                SourceError::AccessDenied(format!(
                    "Mixcloud returned no stream for {}",
                    track.identifier
                ))
            })?;

        Ok(StreamDescriptor::new(
            decrypt_stream_url(&encrypted)?,
            MediaContainer::Mpeg4,
        ))
    }
}

/// `(username, slug)` from a cloudcast URL, both URL-decoded
fn parse_query(query: &str) -> Option<(String, String)> {
    let caps = URL_REGEX.captures(query)?;
    let username = url_decode(&caps[1]);
    let slug = url_decode(&caps[2]);
    if RESERVED_SLUGS.contains(&slug.as_str()) {
        return None;
    }
    Some((username, slug))
}

/// Slugs are only unique per owner, so the identifier carries both
fn track_identifier(username: &str, slug: &str) -> String {
    format!("{}/{}", username, slug)
}

fn split_identifier(identifier: &str) -> Result<(&str, &str)> {
    identifier
        .split_once('/')
        .filter(|(username, slug)| !username.is_empty() && !slug.is_empty())
        .ok_or_else(|| {
            SourceError::parse(NAME, format!("identifier is not <user>/<slug>: {}", identifier))
        })
}

/// Decode a base64, XOR-encrypted stream URL
fn decrypt_stream_url(encrypted: &str) -> Result<String> {
    let bytes = BASE64
        .decode(encrypted.trim())
        .map_err(|e| SourceError::parse(NAME, format!("stream URL is not base64: {}", e)))?;
    String::from_utf8(decrypt_xor(&bytes, DECRYPTION_KEY))
        .map_err(|_| SourceError::parse(NAME, "decrypted stream URL is not UTF-8"))
}

/// Quote a value as a GraphQL string literal
fn graphql_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt_stream_url(url: &str) -> String {
        BASE64.encode(decrypt_xor(url.as_bytes(), DECRYPTION_KEY))
    }

    #[test]
    fn test_parse_query() {
        assert_eq!(
            parse_query("https://www.mixcloud.com/jazzfm/late-night-jazz/"),
            Some(("jazzfm".to_string(), "late-night-jazz".to_string()))
        );
        assert_eq!(
            parse_query("https://m.mixcloud.com/dj%20x/caf%C3%A9-mix"),
            Some(("dj x".to_string(), "café-mix".to_string()))
        );
        assert_eq!(parse_query("https://www.mixcloud.com/jazzfm/uploads/"), None);
        assert_eq!(parse_query("https://www.mixcloud.com/jazzfm/"), None);
        assert_eq!(parse_query("https://www.mixcloud.com/a/b/c/"), None);
    }

    #[test]
    fn test_same_slug_under_two_owners() {
        let a = track_identifier("jazzfm", "weekly-mix");
        let b = track_identifier("soulfm", "weekly-mix");
        assert_ne!(a, b);
        assert_eq!(split_identifier(&a).unwrap(), ("jazzfm", "weekly-mix"));
        assert_eq!(split_identifier(&b).unwrap(), ("soulfm", "weekly-mix"));
    }

    #[test]
    fn test_split_identifier_rejects_bare_slug() {
        assert!(split_identifier("weekly-mix").is_err());
        assert!(split_identifier("/weekly-mix").is_err());
        assert!(split_identifier("jazzfm/").is_err());
    }

    #[test]
    fn test_stream_url_roundtrip() {
        let url = "https://stream12.mixcloud.com/secure/c/m4a/64/a/b/c/d.m4a?sig=xyz";
        let encrypted = encrypt_stream_url(url);
        assert_ne!(encrypted, url);
        assert_eq!(decrypt_stream_url(&encrypted).unwrap(), url);
        assert!(decrypt_stream_url("%%%").is_err());
    }

    #[test]
    fn test_graphql_string_escapes_quotes() {
        assert_eq!(graphql_string(r#"a"b"#), r#""a\"b""#);
    }
}
