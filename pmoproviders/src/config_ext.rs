//! Provider settings stored in pmoconfig
//!
//! ```yaml
//! sources:
//!   order: [tiktok, mixcloud, speech]
//!   speech:
//!     language: en-US
//!   mixcloud:
//!     base_url: https://www.mixcloud.com
//! ```

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::Value;

/// Providers enabled when `sources.order` is not set
pub const DEFAULT_SOURCE_ORDER: &[&str] = &[
    "tiktok", "mixcloud", "reddit", "getyarn", "clypit", "ocremix", "speech",
];

/// Default TTS language
pub const DEFAULT_SPEECH_LANGUAGE: &str = "en-US";

/// Extension trait adding provider settings to `pmoconfig::Config`
///
/// # Example
///
/// ```rust,no_run
/// use pmoconfig::get_config;
/// use pmoproviders::SourcesConfigExt;
///
/// let config = get_config();
/// config.set_speech_language("fr-FR")?;
/// assert_eq!(config.get_speech_language()?, "fr-FR");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub trait SourcesConfigExt {
    /// Enabled providers, highest priority first
    fn get_sources_order(&self) -> Result<Vec<String>>;

    fn set_sources_order(&self, order: &[&str]) -> Result<()>;

    /// Base URL override for a provider's platform (`sources.<name>.base_url`)
    fn get_source_base_url(&self, name: &str) -> Option<String>;

    fn set_source_base_url(&self, name: &str, url: &str) -> Result<()>;

    /// Media host override for providers that stream from a separate host
    /// (`sources.<name>.media_url`)
    fn get_source_media_url(&self, name: &str) -> Option<String>;

    /// Language used by the speech provider
    fn get_speech_language(&self) -> Result<String>;

    fn set_speech_language(&self, language: &str) -> Result<()>;
}

impl SourcesConfigExt for Config {
    fn get_sources_order(&self) -> Result<Vec<String>> {
        match self.get_value(&["sources", "order"]) {
            Ok(Value::Sequence(_)) => {
                let order: Vec<String> = self.get_typed(&["sources", "order"])?;
                Ok(order.into_iter().map(|s| s.trim().to_lowercase()).collect())
            }
            _ => Ok(DEFAULT_SOURCE_ORDER.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn set_sources_order(&self, order: &[&str]) -> Result<()> {
        let seq = order
            .iter()
            .map(|name| Value::String(name.to_string()))
            .collect();
        self.set_value(&["sources", "order"], Value::Sequence(seq))
    }

    fn get_source_base_url(&self, name: &str) -> Option<String> {
        self.get_string(&["sources", name, "base_url"])
            .map(|url| url.trim_end_matches('/').to_string())
    }

    fn set_source_base_url(&self, name: &str, url: &str) -> Result<()> {
        self.set_value(&["sources", name, "base_url"], Value::String(url.to_string()))
    }

    fn get_source_media_url(&self, name: &str) -> Option<String> {
        self.get_string(&["sources", name, "media_url"])
            .map(|url| url.trim_end_matches('/').to_string())
    }

    fn get_speech_language(&self) -> Result<String> {
        Ok(self
            .get_string(&["sources", "speech", "language"])
            .unwrap_or_else(|| DEFAULT_SPEECH_LANGUAGE.to_string()))
    }

    fn set_speech_language(&self, language: &str) -> Result<()> {
        self.set_value(
            &["sources", "speech", "language"],
            Value::String(language.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_embedded_config() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config.get_sources_order().unwrap(), DEFAULT_SOURCE_ORDER);
        assert_eq!(config.get_speech_language().unwrap(), "en-US");
        assert_eq!(config.get_source_base_url("mixcloud"), None);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_yaml(
            "sources:\n  order: [Speech, clypit]\n  clypit:\n    base_url: http://127.0.0.1:1234/\n",
        )
        .unwrap();
        assert_eq!(config.get_sources_order().unwrap(), vec!["speech", "clypit"]);
        assert_eq!(
            config.get_source_base_url("clypit").as_deref(),
            Some("http://127.0.0.1:1234")
        );

        config.set_sources_order(&["reddit"]).unwrap();
        assert_eq!(config.get_sources_order().unwrap(), vec!["reddit"]);
    }
}
