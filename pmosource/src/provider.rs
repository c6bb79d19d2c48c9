//! The provider contract implemented once per external platform

use crate::error::{Result, SourceError};
use crate::model::{AudioItem, Track};
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

/// Container hint for the playback engine's demuxer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaContainer {
    Mp3,
    Mpeg4,
    Unknown,
}

impl MediaContainer {
    /// Guess the container from a URL path
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".mp3") {
            MediaContainer::Mp3
        } else if path.ends_with(".mp4") || path.ends_with(".m4a") {
            MediaContainer::Mpeg4
        } else {
            MediaContainer::Unknown
        }
    }

    /// MIME type usually served for this container
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaContainer::Mp3 => "audio/mpeg",
            MediaContainer::Mpeg4 => "audio/mp4",
            MediaContainer::Unknown => "application/octet-stream",
        }
    }
}

/// Concrete, time-bounded location of a track's media bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Direct media URL
    pub url: String,
    /// Extra request headers the platform expects (Referer, cookies...)
    pub headers: Vec<(String, String)>,
    /// Container hint
    pub container: MediaContainer,
    /// Known content length; `None` lets the server tell us
    pub content_length: Option<u64>,
    /// When the URL stops working, if the platform says so
    pub expires_at: Option<DateTime<Utc>>,
}

impl StreamDescriptor {
    pub fn new(url: impl Into<String>, container: MediaContainer) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            container,
            content_length: None,
            expires_at: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// True when the descriptor carries an expiry that is already past
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// A platform-specific resolver and stream locator
///
/// Providers are registered in a [`SourceRegistry`](crate::SourceRegistry)
/// and shared between tasks, hence `Send + Sync`. Apart from configuration
/// (base URLs, HTTP client) they hold no state that a resolution mutates.
///
/// # Example
///
/// ```rust
/// use pmosource::{AudioItem, MediaContainer, Result, SourceProvider, StreamDescriptor, Track};
///
/// #[derive(Debug)]
/// struct Example;
///
/// #[async_trait::async_trait]
/// impl SourceProvider for Example {
///     fn name(&self) -> &str {
///         "example"
///     }
///
///     fn can_handle(&self, query: &str) -> bool {
///         query.starts_with("example:")
///     }
///
///     async fn load_item(&self, query: &str) -> Result<AudioItem> {
///         let id = query.trim_start_matches("example:");
///         Ok(Track::builder(self.name(), id).title(id).build().into())
///     }
///
///     async fn get_stream(&self, track: &Track) -> Result<StreamDescriptor> {
///         Ok(StreamDescriptor::new(
///             format!("https://cdn.example/{}.mp3", track.identifier),
///             MediaContainer::Mp3,
///         ))
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait SourceProvider: Debug + Send + Sync {
    /// Unique source name, stored in every track this provider creates
    fn name(&self) -> &str;

    /// Pure predicate: does this provider claim the query?
    ///
    /// Must not perform I/O.
    fn can_handle(&self, query: &str) -> bool;

    /// Resolve the query into a track or a playlist
    async fn load_item(&self, query: &str) -> Result<AudioItem>;

    /// Whether [`load_item_authenticated`](Self::load_item_authenticated) is implemented
    fn supports_authentication(&self) -> bool {
        false
    }

    /// Secondary resolution path, tried once after an `AccessDenied`
    async fn load_item_authenticated(&self, query: &str) -> Result<AudioItem> {
        let _ = query;
        Err(SourceError::AccessDenied(format!(
            "{} has no authenticated resolution path",
            self.name()
        )))
    }

    /// Derive a fresh media location from the track's identifier and state
    async fn get_stream(&self, track: &Track) -> Result<StreamDescriptor>;
}

/// Await a provider call, failing transiently once `limit` has elapsed
pub(crate) async fn bounded<T>(
    limit: Option<Duration>,
    what: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    let Some(limit) = limit else {
        return call.await;
    };

    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| SourceError::transient(format!("{} timed out after {:?}", what, limit)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_container_from_url() {
        assert_eq!(
            MediaContainer::from_url("https://x.example/a/b.MP3?token=1"),
            MediaContainer::Mp3
        );
        assert_eq!(
            MediaContainer::from_url("https://y.yarn.co/abc.mp4?v=0"),
            MediaContainer::Mpeg4
        );
        assert_eq!(
            MediaContainer::from_url("https://v.redd.it/abc/audio"),
            MediaContainer::Unknown
        );
    }

    #[test]
    fn test_descriptor_expiry() {
        let past = StreamDescriptor::new("u", MediaContainer::Mp3)
            .with_expiry(Utc::now() - Duration::seconds(5));
        assert!(past.is_expired());

        let future = StreamDescriptor::new("u", MediaContainer::Mp3)
            .with_expiry(Utc::now() + Duration::seconds(60));
        assert!(!future.is_expired());
        assert!(!StreamDescriptor::new("u", MediaContainer::Mp3).is_expired());
    }

    #[tokio::test]
    async fn test_bounded_times_out_transiently() {
        let slow = async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(())
        };
        let err = bounded(Some(std::time::Duration::from_millis(10)), "load_item", slow)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("load_item timed out"));

        let fast = async { Ok(7) };
        assert_eq!(bounded(None, "load_item", fast).await.unwrap(), 7);
    }
}
