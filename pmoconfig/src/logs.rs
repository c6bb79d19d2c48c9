//! Logging setup
//!
//! Installs a `tracing` subscriber whose level filter comes from
//! `host.logger.min_level` and whose console output is toggled by
//! `host.logger.enable_console`. The level can be changed at runtime through
//! the returned [`LogHandle`].

use crate::Config;
use anyhow::{Result, anyhow};
use tracing_subscriber::{
    Registry, filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Handle on the installed subscriber's level filter
#[derive(Clone)]
pub struct LogHandle {
    reload_handle: reload::Handle<LevelFilter, Registry>,
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle")
            .field("level", &self.level())
            .finish()
    }
}

impl LogHandle {
    /// Change the minimum level of the running subscriber
    pub fn set_level(&self, level: &str) -> Result<()> {
        let filter =
            parse_level(level).ok_or_else(|| anyhow!("Unknown log level: {}", level))?;
        self.reload_handle
            .reload(filter)
            .map_err(|e| anyhow!("Failed to reload log level filter: {}", e))
    }

    /// Current minimum level, if the subscriber is still alive
    pub fn level(&self) -> Option<LevelFilter> {
        self.reload_handle.clone_current()
    }
}

/// Install the global `tracing` subscriber from the configuration
///
/// Fails if a global subscriber is already installed.
///
/// ```no_run
/// let config = pmoconfig::get_config();
/// let logs = pmoconfig::init_logging(&config)?;
/// logs.set_level("DEBUG")?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn init_logging(config: &Config) -> Result<LogHandle> {
    let level = config
        .get_log_min_level()
        .ok()
        .and_then(|l| parse_level(&l))
        .unwrap_or(LevelFilter::INFO);

    let (filter, reload_handle) = reload::Layer::new(level);
    let subscriber = Registry::default().with(filter);

    let enable_console = config.get_log_enable_console().unwrap_or(true);

    let installed = if enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| anyhow!("Logging already initialized: {}", e))?;

    tracing::debug!(?level, enable_console, "Logging initialized");
    Ok(LogHandle { reload_handle })
}

/// Parse a level name (case-insensitive); `OFF` disables logging
pub fn parse_level(s: &str) -> Option<LevelFilter> {
    match s.trim().to_uppercase().as_str() {
        "OFF" => Some(LevelFilter::OFF),
        "ERROR" => Some(LevelFilter::ERROR),
        "WARN" | "WARNING" => Some(LevelFilter::WARN),
        "INFO" => Some(LevelFilter::INFO),
        "DEBUG" => Some(LevelFilter::DEBUG),
        "TRACE" => Some(LevelFilter::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info"), Some(LevelFilter::INFO));
        assert_eq!(parse_level(" Warning "), Some(LevelFilter::WARN));
        assert_eq!(parse_level("off"), Some(LevelFilter::OFF));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_init_logging_once() {
        let config = Config::from_yaml("host:\n  logger:\n    min_level: WARN\n    enable_console: false\n")
            .unwrap();

        let handle = init_logging(&config).unwrap();
        assert_eq!(handle.level(), Some(LevelFilter::WARN));

        handle.set_level("debug").unwrap();
        assert_eq!(handle.level(), Some(LevelFilter::DEBUG));
        assert!(handle.set_level("nope").is_err());

        assert!(init_logging(&config).is_err());
    }
}
