//! Text-to-speech through the Google Translate TTS endpoint
//!
//! `speak:<text>` and `tts:<text>` queries resolve without any network call;
//! the language is stored in the track state so a decoded track keeps the
//! voice it was queued with.

use crate::config_ext::DEFAULT_SPEECH_LANGUAGE;
use pmosource::{
    AudioItem, MediaContainer, ProviderState, Result, SourceError, SourceProvider,
    StreamDescriptor, Track,
};
use url::Url;

/// Source name
pub const NAME: &str = "speech";

pub const DEFAULT_BASE_URL: &str = "https://translate.google.com";

/// Longest text the endpoint accepts
pub const MAX_TEXT_LENGTH: usize = 200;

const PREFIXES: &[&str] = &["speak:", "tts:"];

const AUTHOR: &str = "Text to speech";

/// Speaks `speak:` / `tts:` queries
#[derive(Debug, Clone)]
pub struct SpeechProvider {
    base_url: String,
    language: String,
}

impl Default for SpeechProvider {
    fn default() -> Self {
        Self::new(DEFAULT_SPEECH_LANGUAGE)
    }
}

impl SpeechProvider {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            language: language.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    fn tts_url(&self, text: &str, language: &str) -> Result<String> {
        let mut url = Url::parse(&format!("{}/translate_tts", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("ie", "UTF-8")
            .append_pair("total", "1")
            .append_pair("idx", "0")
            .append_pair("textlen", &text.chars().count().to_string())
            .append_pair("client", "tw-ob")
            .append_pair("q", text)
            .append_pair("tl", language);
        Ok(url.into())
    }
}

/// The text of a speech query, without its prefix
fn strip_prefix(query: &str) -> Option<&str> {
    PREFIXES.iter().find_map(|prefix| {
        let head = query.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix)
            .then(|| &query[prefix.len()..])
    })
}

#[async_trait::async_trait]
impl SourceProvider for SpeechProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn can_handle(&self, query: &str) -> bool {
        strip_prefix(query).is_some()
    }

    async fn load_item(&self, query: &str) -> Result<AudioItem> {
        let text = strip_prefix(query)
            .map(str::trim)
            .ok_or_else(|| SourceError::parse(NAME, format!("not a speech query: {}", query)))?;

        if text.is_empty() {
            return Err(SourceError::parse(NAME, "nothing to say"));
        }
        let length = text.chars().count();
        if length > MAX_TEXT_LENGTH {
            return Err(SourceError::parse(
                NAME,
                format!("text is {} characters long, at most {} are allowed", length, MAX_TEXT_LENGTH),
            ));
        }

        Ok(Track::builder(NAME, text)
            .title(text)
            .author(AUTHOR)
            .uri(self.tts_url(text, &self.language)?)
            .state(ProviderState::from_text(&self.language))
            .build()
            .into())
    }

    async fn get_stream(&self, track: &Track) -> Result<StreamDescriptor> {
        let language = track
            .state
            .as_text()
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.language);
        Ok(StreamDescriptor::new(
            self.tts_url(&track.identifier, language)?,
            MediaContainer::Mp3,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmosource::ErrorKind;

    #[test]
    fn test_can_handle() {
        let provider = SpeechProvider::default();
        assert!(provider.can_handle("speak:hello"));
        assert!(provider.can_handle("TTS: hello"));
        assert!(!provider.can_handle("hello"));
        assert!(!provider.can_handle("https://clyp.it/ab12cd34"));
    }

    #[tokio::test]
    async fn test_load_and_stream() {
        let provider = SpeechProvider::new("fr-FR");
        let item = provider.load_item("speak: Bonjour à tous ").await.unwrap();
        let track = item.as_track().unwrap();
        assert_eq!(track.identifier, "Bonjour à tous");
        assert_eq!(track.state.as_text(), Some("fr-FR"));

        // the queued language wins over the provider's current one
        let other = SpeechProvider::new("de-DE");
        let descriptor = other.get_stream(track).await.unwrap();
        assert_eq!(descriptor.container, MediaContainer::Mp3);
        let url = Url::parse(&descriptor.url).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("q".to_string(), "Bonjour à tous".to_string())));
        assert!(pairs.contains(&("tl".to_string(), "fr-FR".to_string())));
        assert!(pairs.contains(&("textlen".to_string(), "14".to_string())));
    }

    #[tokio::test]
    async fn test_text_limits() {
        let provider = SpeechProvider::default();
        let err = provider.load_item("speak:   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);

        let long = format!("tts:{}", "a".repeat(MAX_TEXT_LENGTH + 1));
        let err = provider.load_item(&long).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);

        let max = format!("tts:{}", "a".repeat(MAX_TEXT_LENGTH));
        assert!(provider.load_item(&max).await.is_ok());
    }
}
