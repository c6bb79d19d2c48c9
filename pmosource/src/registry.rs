//! Ordered registry of source providers
//!
//! The registry is a plain value: build it once (usually from the
//! configuration), share it behind an `Arc` and pass it where needed.

use crate::error::{Result, SourceError};
use crate::http::{DEFAULT_READ_TIMEOUT_SECS, HttpClientBuilder};
use crate::model::{AudioItem, Track};
use crate::provider::{SourceProvider, bounded};
use crate::stream::{RetryPolicy, StreamHandle, StreamOpener};
use anyhow::anyhow;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound for a single provider call (20 seconds)
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 20;

/// Holds the providers in priority order and dispatches queries to them
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    providers: Vec<Arc<dyn SourceProvider>>,
    opener: StreamOpener,
    resolve_timeout: Duration,
}

/// Builder for [`SourceRegistry`]
#[derive(Debug, Default)]
pub struct SourceRegistryBuilder {
    providers: Vec<Arc<dyn SourceProvider>>,
    client: Option<Client>,
    policy: RetryPolicy,
    resolve_timeout: Option<Duration>,
}

impl SourceRegistryBuilder {
    /// Append a provider; earlier providers win when several claim a query
    pub fn register(mut self, provider: impl SourceProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Append an already shared provider
    pub fn register_arc(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// HTTP client used by the stream opener
    ///
    /// Media bodies are read through it, so it should come from
    /// [`HttpClientBuilder::streaming`]: a whole-request timeout would cut
    /// long tracks.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound applied to every provider call
    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = Some(timeout);
        self
    }

    /// Build the registry
    ///
    /// Fails when two providers share the same name: tracks only carry the
    /// name, so it has to be unique.
    pub fn build(self) -> Result<SourceRegistry> {
        for (i, provider) in self.providers.iter().enumerate() {
            if self.providers[..i].iter().any(|p| p.name() == provider.name()) {
                return Err(SourceError::Config(anyhow!(
                    "provider '{}' registered twice",
                    provider.name()
                )));
            }
        }

        let client = match self.client {
            Some(client) => client,
            None => HttpClientBuilder::new()
                .streaming(Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS))
                .build()?,
        };
        let resolve_timeout = self
            .resolve_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_RESOLVE_TIMEOUT_SECS));

        info!(
            providers = ?self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Source registry ready"
        );

        Ok(SourceRegistry {
            providers: self.providers,
            opener: StreamOpener::new(client, self.policy).with_call_timeout(resolve_timeout),
            resolve_timeout,
        })
    }
}

impl SourceRegistry {
    pub fn builder() -> SourceRegistryBuilder {
        SourceRegistryBuilder::default()
    }

    /// Names of the registered providers, in priority order
    pub fn providers(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Look a provider up by its source name
    pub fn provider(&self, name: &str) -> Option<Arc<dyn SourceProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn stream_opener(&self) -> &StreamOpener {
        &self.opener
    }

    /// Resolve a query into a track or a playlist
    ///
    /// Only the first provider whose `can_handle` accepts the query is asked.
    /// Its failure is returned as [`SourceError::ResolutionFailed`]; lower
    /// priority providers are not tried.
    ///
    /// ```
    /// use pmosource::{ErrorKind, SourceRegistry};
    ///
    /// # tokio_test::block_on(async {
    /// let registry = SourceRegistry::builder().build()?;
    /// let err = registry.resolve("https://example.com/song").await.unwrap_err();
    /// assert_eq!(err.kind(), ErrorKind::NotFound);
    /// # Ok::<(), pmosource::SourceError>(())
    /// # }).unwrap();
    /// ```
    pub async fn resolve(&self, query: &str) -> Result<AudioItem> {
        let query = query.trim();
        let Some(provider) = self.providers.iter().find(|p| p.can_handle(query)) else {
            debug!(query, "No provider claimed the query");
            return Err(SourceError::NotFound(query.to_string()));
        };

        let name = provider.name();
        debug!(provider = %name, query, "Resolving");

        let limit = Some(self.resolve_timeout);
        let result = match bounded(limit, "load_item", provider.load_item(query)).await {
            Err(err) if err.is_access_denied() && provider.supports_authentication() => {
                info!(provider = %name, "Access denied, trying the authenticated path");
                bounded(limit, "load_item_authenticated", provider.load_item_authenticated(query))
                    .await
            }
            other => other,
        };

        match result {
            Ok(item) => {
                match &item {
                    AudioItem::Track(track) => {
                        info!(provider = %name, identifier = %track.identifier, "Resolved track")
                    }
                    AudioItem::Playlist(playlist) => info!(
                        provider = %name,
                        tracks = playlist.len(),
                        "Resolved playlist '{}'", playlist.name
                    ),
                }
                Ok(item)
            }
            Err(cause) => {
                warn!(provider = %name, query, "Resolution failed: {}", cause);
                Err(SourceError::ResolutionFailed {
                    provider: name.to_string(),
                    cause: Box::new(cause),
                })
            }
        }
    }

    /// [`resolve`](Self::resolve), aborted when `token` fires
    pub async fn resolve_cancellable(
        &self,
        query: &str,
        token: &CancellationToken,
    ) -> Result<AudioItem> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(query, "Resolution cancelled");
                Err(SourceError::Cancelled)
            }
            result = self.resolve(query) => result,
        }
    }

    /// Open a media stream for a track through its owning provider
    pub async fn open(&self, track: &Track) -> Result<StreamHandle> {
        let provider = self
            .provider(&track.source_name)
            .ok_or_else(|| SourceError::UnknownProvider(track.source_name.clone()))?;
        self.opener.open(provider.as_ref(), track).await
    }

    /// [`open`](Self::open), aborted when `token` fires
    ///
    /// A connection opened before cancellation is dropped.
    pub async fn open_cancellable(
        &self,
        track: &Track,
        token: &CancellationToken,
    ) -> Result<StreamHandle> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(identifier = %track.identifier, "Stream opening cancelled");
                Err(SourceError::Cancelled)
            }
            result = self.open(track) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransportKind};
    use crate::model::Playlist;
    use crate::provider::{MediaContainer, StreamDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Claims queries starting with `prefix` and records how often it was asked
    struct CountingProvider {
        name: &'static str,
        prefix: &'static str,
        outcome: fn(&str) -> Result<AudioItem>,
        auth: bool,
        loads: AtomicUsize,
        auth_loads: AtomicUsize,
    }

    impl std::fmt::Debug for CountingProvider {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("CountingProvider").field("name", &self.name).finish()
        }
    }

    impl CountingProvider {
        fn new(name: &'static str, prefix: &'static str, outcome: fn(&str) -> Result<AudioItem>) -> Self {
            Self {
                name,
                prefix,
                outcome,
                auth: false,
                loads: AtomicUsize::new(0),
                auth_loads: AtomicUsize::new(0),
            }
        }

        fn with_auth(mut self) -> Self {
            self.auth = true;
            self
        }
    }

    #[async_trait::async_trait]
    impl SourceProvider for CountingProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, query: &str) -> bool {
            query.starts_with(self.prefix)
        }

        async fn load_item(&self, query: &str) -> Result<AudioItem> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(query)
        }

        fn supports_authentication(&self) -> bool {
            self.auth
        }

        async fn load_item_authenticated(&self, query: &str) -> Result<AudioItem> {
            self.auth_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Track::builder(self.name, query).title("authenticated").build().into())
        }

        async fn get_stream(&self, track: &Track) -> Result<StreamDescriptor> {
            Ok(StreamDescriptor::new(
                format!("http://127.0.0.1:9/{}.mp3", track.identifier),
                MediaContainer::Mp3,
            ))
        }
    }

    /// Handles `https://platform.example/watch?id=<id>`
    #[derive(Debug)]
    struct PlatformProvider;

    #[async_trait::async_trait]
    impl SourceProvider for PlatformProvider {
        fn name(&self) -> &str {
            "platform"
        }

        fn can_handle(&self, query: &str) -> bool {
            query.starts_with("https://platform.example/watch?")
        }

        async fn load_item(&self, query: &str) -> Result<AudioItem> {
            let url = url::Url::parse(query)?;
            let id = url
                .query_pairs()
                .find(|(k, _)| k == "id")
                .map(|(_, v)| v.into_owned())
                .ok_or_else(|| SourceError::parse("platform", "missing id parameter"))?;
            Ok(Track::builder(self.name(), id).title("Platform video").build().into())
        }

        async fn get_stream(&self, _track: &Track) -> Result<StreamDescriptor> {
            Err(SourceError::permanent("not used"))
        }
    }

    fn ok_track(query: &str) -> Result<AudioItem> {
        Ok(Track::builder("first", query).build().into())
    }

    fn parse_failure(_: &str) -> Result<AudioItem> {
        Err(SourceError::parse("first", "missing title"))
    }

    fn denied(_: &str) -> Result<AudioItem> {
        Err(SourceError::AccessDenied("age gate".into()))
    }

    fn playlist(_: &str) -> Result<AudioItem> {
        let tracks = vec![
            Track::builder("first", "a").build(),
            Track::builder("first", "b").build(),
        ];
        Ok(Playlist::new("mix", tracks, Some(1)).into())
    }

    #[tokio::test]
    async fn test_platform_query_resolves_identifier() {
        let registry = SourceRegistry::builder().register(PlatformProvider).build().unwrap();

        let item = registry
            .resolve("https://platform.example/watch?id=abc123")
            .await
            .unwrap();
        let track = item.as_track().unwrap();
        assert_eq!(track.identifier, "abc123");
        assert_eq!(track.source_name, "platform");
    }

    #[tokio::test]
    async fn test_only_first_matching_provider_is_called() {
        let first = Arc::new(CountingProvider::new("first", "x:", ok_track));
        let second = Arc::new(CountingProvider::new("second", "x:", ok_track));
        let registry = SourceRegistry::builder()
            .register_arc(first.clone())
            .register_arc(second.clone())
            .build()
            .unwrap();

        registry.resolve("x:42").await.unwrap();
        assert_eq!(first.loads.load(Ordering::SeqCst), 1);
        assert_eq!(second.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_fall_through() {
        let first = Arc::new(CountingProvider::new("first", "x:", parse_failure));
        let second = Arc::new(CountingProvider::new("second", "x:", ok_track));
        let registry = SourceRegistry::builder()
            .register_arc(first.clone())
            .register_arc(second.clone())
            .build()
            .unwrap();

        let err = registry.resolve("x:42").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
        match err {
            SourceError::ResolutionFailed { provider, .. } => assert_eq!(provider, "first"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(first.loads.load(Ordering::SeqCst), 1);
        assert_eq!(second.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_match_is_not_found() {
        let registry = SourceRegistry::builder()
            .register(CountingProvider::new("first", "x:", ok_track))
            .build()
            .unwrap();

        let err = registry.resolve("y:1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_authenticated_path_called_once_after_access_denied() {
        let gated = Arc::new(CountingProvider::new("gated", "g:", denied).with_auth());
        let registry = SourceRegistry::builder().register_arc(gated.clone()).build().unwrap();

        let item = registry.resolve("g:1").await.unwrap();
        assert_eq!(item.as_track().unwrap().title, "authenticated");
        assert_eq!(gated.loads.load(Ordering::SeqCst), 1);
        assert_eq!(gated.auth_loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_authenticated_path_skipped_without_support() {
        let gated = Arc::new(CountingProvider::new("gated", "g:", denied));
        let registry = SourceRegistry::builder().register_arc(gated.clone()).build().unwrap();

        let err = registry.resolve("g:1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert_eq!(gated.auth_loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_playlist_passes_through() {
        let registry = SourceRegistry::builder()
            .register(CountingProvider::new("first", "p:", playlist))
            .build()
            .unwrap();

        let item = registry.resolve("p:mix").await.unwrap();
        let playlist = item.as_playlist().unwrap();
        assert_eq!(playlist.len(), 2);
        assert_eq!(playlist.selected_track().unwrap().identifier, "b");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = SourceRegistry::builder()
            .register(CountingProvider::new("first", "a:", ok_track))
            .register(CountingProvider::new("first", "b:", ok_track))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_provider_lookup_and_unknown_provider() {
        let registry = SourceRegistry::builder()
            .register(CountingProvider::new("first", "x:", ok_track))
            .build()
            .unwrap();

        assert_eq!(registry.providers(), vec!["first"]);
        assert!(registry.provider("first").is_some());
        assert!(registry.provider("missing").is_none());

        let orphan = Track::builder("missing", "1").build();
        let err = registry.open(&orphan).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownProvider);
    }

    #[derive(Debug)]
    struct SlowProvider;

    #[async_trait::async_trait]
    impl SourceProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        fn can_handle(&self, _query: &str) -> bool {
            true
        }

        async fn load_item(&self, query: &str) -> Result<AudioItem> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Track::builder("slow", query).build().into())
        }

        async fn get_stream(&self, _track: &Track) -> Result<StreamDescriptor> {
            Err(SourceError::permanent("not used"))
        }
    }

    #[tokio::test]
    async fn test_provider_call_is_bounded() {
        let registry = SourceRegistry::builder()
            .register(SlowProvider)
            .resolve_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let err = registry.resolve("anything").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportError(TransportKind::Transient));
    }

    #[tokio::test]
    async fn test_cancelled_resolution() {
        let registry = SourceRegistry::builder().register(SlowProvider).build().unwrap();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = registry.resolve_cancellable("anything", &token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
