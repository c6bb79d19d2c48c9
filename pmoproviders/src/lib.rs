//! # PMOProviders
//!
//! Source providers for the [`pmosource`] registry:
//!
//! | name       | accepts                                             |
//! |------------|-----------------------------------------------------|
//! | `tiktok`   | `https://www.tiktok.com/@user/video/<id>`           |
//! | `mixcloud` | `https://www.mixcloud.com/<user>/<slug>/`           |
//! | `reddit`   | `https://www.reddit.com/r/<sub>/comments/<id>/...`  |
//! | `getyarn`  | `https://getyarn.io/yarn-clip/<id>`                 |
//! | `clypit`   | `https://clyp.it/<id>`                              |
//! | `ocremix`  | `OCRnnnnn`, `https://ocremix.org/remix/OCRnnnnn`    |
//! | `speech`   | `speak:<text>`, `tts:<text>`                        |
//!
//! [`default_registry`] builds a registry holding the providers listed in
//! `sources.order`, in that order.
//!
//! ```rust,no_run
//! use pmoproviders::default_registry;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = pmoconfig::get_config();
//! let registry = default_registry(&config)?;
//! let item = registry.resolve("speak:hello world").await?;
//! # Ok(())
//! # }
//! ```

pub mod clypit;
pub mod config_ext;
pub mod getyarn;
pub mod mixcloud;
pub mod ocremix;
mod page;
pub mod reddit;
pub mod speech;
pub mod tiktok;

pub use clypit::ClypitProvider;
pub use config_ext::{DEFAULT_SOURCE_ORDER, SourcesConfigExt};
pub use getyarn::GetyarnProvider;
pub use mixcloud::MixcloudProvider;
pub use ocremix::OcRemixProvider;
pub use reddit::RedditProvider;
pub use speech::SpeechProvider;
pub use tiktok::TikTokProvider;

use pmoconfig::Config;
use pmosource::http::HttpClientBuilder;
use pmosource::{RetryPolicy, Result, SourceProvider, SourceRegistry};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Build a registry from the configuration
///
/// Providers are registered in `sources.order`; unknown names are logged and
/// skipped, a name listed twice is an error.
pub fn default_registry(config: &Config) -> Result<SourceRegistry> {
    let mut http = HttpClientBuilder::new().timeout(Duration::from_secs(config.get_http_timeout_secs()?));
    if let Some(user_agent) = config.get_http_user_agent() {
        http = http.user_agent(user_agent);
    }
    let client = http.clone().build()?;
    let stream_client = http
        .clone()
        .streaming(Duration::from_secs(config.get_stream_idle_timeout_secs()?))
        .build()?;

    let policy = RetryPolicy::new(
        config.get_stream_max_retries()?,
        Duration::from_millis(config.get_stream_backoff_ms()?),
        Duration::from_millis(config.get_stream_max_backoff_ms()?),
    );

    let mut builder = SourceRegistry::builder()
        .client(stream_client)
        .retry_policy(policy)
        .resolve_timeout(Duration::from_secs(config.get_resolver_timeout_secs()?));

    for name in config.get_sources_order()? {
        match build_provider(&name, config, &http, &client)? {
            Some(provider) => {
                debug!(provider = %name, "Registering source provider");
                builder = builder.register_arc(provider);
            }
            None => warn!("Unknown source '{}' in sources.order, skipped", name),
        }
    }

    builder.build()
}

fn build_provider(
    name: &str,
    config: &Config,
    http: &HttpClientBuilder,
    client: &Client,
) -> Result<Option<Arc<dyn SourceProvider>>> {
    let base_url = config.get_source_base_url(name);
    let media_url = config.get_source_media_url(name);

    let provider: Arc<dyn SourceProvider> = match name {
        tiktok::NAME => {
            let mut provider = TikTokProvider::new(http.clone())?;
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        mixcloud::NAME => {
            let mut provider = MixcloudProvider::new(client.clone());
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        reddit::NAME => {
            let mut provider = RedditProvider::new(client.clone());
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(url) = media_url {
                provider = provider.with_media_url(url);
            }
            Arc::new(provider)
        }
        getyarn::NAME => {
            let mut provider = GetyarnProvider::new(client.clone());
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(url) = media_url {
                provider = provider.with_media_url(url);
            }
            Arc::new(provider)
        }
        clypit::NAME => {
            let mut provider = ClypitProvider::new(client.clone());
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        ocremix::NAME => {
            let mut provider = OcRemixProvider::new(client.clone());
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        speech::NAME => {
            let mut provider = SpeechProvider::new(config.get_speech_language()?);
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        _ => return Ok(None),
    };

    Ok(Some(provider))
}
