//! # PMOSources Configuration Module
//!
//! This module provides configuration management for PMOSources, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//! - Logging setup driven by the configuration ([`init_logging`])
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! // Get the global configuration
//! let config = get_config();
//!
//! // Access configuration values
//! let retries = config.get_stream_max_retries()?;
//! let timeout = config.get_http_timeout_secs()?;
//!
//! // Update configuration values
//! config.set_stream_max_retries(5)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Result, anyhow};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::info;

pub mod logs;

pub use logs::{LogHandle, init_logging};

// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("pmosources.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMOSources configuration"));
}

const ENV_CONFIG_DIR: &str = "PMOSOURCES_CONFIG";
const ENV_PREFIX: &str = "PMOSOURCES_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmosources";

// Default values for configuration
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RESOLVER_TIMEOUT_SECS: u64 = 20;
const DEFAULT_STREAM_MAX_RETRIES: u32 = 3;
const DEFAULT_STREAM_BACKOFF_MS: u64 = 250;
const DEFAULT_STREAM_MAX_BACKOFF_MS: u64 = 4000;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Macro to generate getter/setter for unsigned integer values with default
macro_rules! impl_uint_config {
    ($getter:ident, $setter:ident, $ty:ty, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<$ty> {
            let path: &[&str] = $path;
            match self.get_value(path) {
                Ok(Value::Number(n)) => n
                    .as_u64()
                    .and_then(|v| <$ty>::try_from(v).ok())
                    .ok_or_else(|| anyhow!("{} is out of range: {}", path.join("."), n)),
                Ok(Value::String(s)) => s
                    .trim()
                    .parse::<$ty>()
                    .map_err(|e| anyhow!("{} is not a valid number ({}): {}", path.join("."), s, e)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: $ty) -> Result<()> {
            let n = Number::from(value);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Configuration manager for PMOSources
///
/// This structure manages the configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
///
/// # Examples
///
/// ```no_run
/// use pmoconfig::get_config;
///
/// let config = get_config();
/// let timeout = config.get_resolver_timeout_secs()?;
/// println!("Resolver timeout: {}s", timeout);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    /// Backing file, empty for in-memory configurations
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var=ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMOSOURCES_CONFIG` environment variable
    /// 3. `.pmosources` in the current directory
    /// 4. `.pmosources` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))
            .map_err(|e| anyhow!("Invalid configuration directory {}: {}", dir_path, e))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir=%config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let external = match fs::read_to_string(&path) {
            Ok(data) => {
                info!(config_file=%path, "Loaded config file");
                data
            }
            Err(_) => {
                info!(config_file=%path, "Config file not found, using default embedded config");
                String::new()
            }
        };

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(Self::build_value(&external)?),
        };

        config.save()?;
        Ok(config)
    }

    /// Builds an in-memory configuration from a YAML overlay
    ///
    /// The overlay is merged over the embedded defaults and environment
    /// overrides are applied; nothing is written to disk.
    ///
    /// ```
    /// use pmoconfig::Config;
    ///
    /// let config = Config::from_yaml("stream:\n  max_retries: 7\n")?;
    /// assert_eq!(config.get_stream_max_retries()?, 7);
    /// assert_eq!(config.get_resolver_timeout_secs()?, 20);
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(Config {
            config_dir: String::new(),
            path: String::new(),
            data: Mutex::new(Self::build_value(yaml)?),
        })
    }

    fn build_value(external: &str) -> Result<Value> {
        let mut value = Self::lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG)?);

        if !external.trim().is_empty() {
            let external_value = Self::lower_keys_value(serde_yaml::from_str(external)?);
            merge_yaml(&mut value, &external_value);
        }

        Self::apply_env_overrides(&mut value);
        Ok(value)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Value>> {
        self.data
            .lock()
            .map_err(|_| anyhow!("Configuration lock poisoned"))
    }

    /// Directory holding `config.yaml` (empty for in-memory configurations)
    pub fn get_config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        if self.path.is_empty() {
            return Ok(());
        }
        let yaml = {
            let data = self.lock()?;
            serde_yaml::to_string(&*data)?
        };
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["stream", "max_retries"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock()?;
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock()?;
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();

                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Deserializes the value at `path` into `T`
    pub fn get_typed<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T> {
        let value = self.get_value(path)?;
        serde_yaml::from_value(value).map_err(|e| anyhow!("Invalid {}: {}", path.join("."), e))
    }

    /// String value at `path`, `None` when missing or empty
    pub fn get_string(&self, path: &[&str]) -> Option<String> {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    impl_uint_config!(
        get_http_timeout_secs,
        set_http_timeout_secs,
        u64,
        &["http", "timeout_secs"],
        DEFAULT_HTTP_TIMEOUT_SECS
    );

    /// User-Agent override for outgoing requests, `None` to keep the built-in one
    pub fn get_http_user_agent(&self) -> Option<String> {
        self.get_string(&["http", "user_agent"])
    }

    pub fn set_http_user_agent(&self, user_agent: &str) -> Result<()> {
        self.set_value(&["http", "user_agent"], Value::String(user_agent.to_string()))
    }

    impl_uint_config!(
        get_resolver_timeout_secs,
        set_resolver_timeout_secs,
        u64,
        &["resolver", "timeout_secs"],
        DEFAULT_RESOLVER_TIMEOUT_SECS
    );

    impl_uint_config!(
        get_stream_max_retries,
        set_stream_max_retries,
        u32,
        &["stream", "max_retries"],
        DEFAULT_STREAM_MAX_RETRIES
    );

    impl_uint_config!(
        get_stream_backoff_ms,
        set_stream_backoff_ms,
        u64,
        &["stream", "backoff_ms"],
        DEFAULT_STREAM_BACKOFF_MS
    );

    impl_uint_config!(
        get_stream_max_backoff_ms,
        set_stream_max_backoff_ms,
        u64,
        &["stream", "max_backoff_ms"],
        DEFAULT_STREAM_MAX_BACKOFF_MS
    );

    impl_uint_config!(
        get_stream_idle_timeout_secs,
        set_stream_idle_timeout_secs,
        u64,
        &["stream", "idle_timeout_secs"],
        DEFAULT_STREAM_IDLE_TIMEOUT_SECS
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Minimum log level (`ERROR`, `WARN`, `INFO`, `DEBUG`, `TRACE`)
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Returns the global configuration instance
///
/// The instance is lazily loaded on first access.
///
/// # Panics
///
/// Panics on first access if the configuration directory cannot be
/// created or the YAML cannot be parsed.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default ones.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config.get_http_timeout_secs().unwrap(), 10);
        assert_eq!(config.get_resolver_timeout_secs().unwrap(), 20);
        assert_eq!(config.get_stream_max_retries().unwrap(), 3);
        assert_eq!(config.get_stream_backoff_ms().unwrap(), 250);
        assert_eq!(config.get_stream_max_backoff_ms().unwrap(), 4000);
        assert_eq!(config.get_stream_idle_timeout_secs().unwrap(), 30);
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
        assert!(config.get_log_enable_console().unwrap());
        assert_eq!(config.get_http_user_agent(), None);
    }

    #[test]
    fn test_overlay_merges_with_defaults() {
        let config = Config::from_yaml(
            "Stream:\n  Max_Retries: 5\nsources:\n  speech:\n    language: fr-FR\n",
        )
        .unwrap();
        assert_eq!(config.get_stream_max_retries().unwrap(), 5);
        assert_eq!(config.get_stream_backoff_ms().unwrap(), 250);
        assert_eq!(
            config.get_string(&["sources", "speech", "language"]).as_deref(),
            Some("fr-FR")
        );
        let order: Vec<String> = config.get_typed(&["sources", "order"]).unwrap();
        assert_eq!(order.first().map(String::as_str), Some("tiktok"));
    }

    #[test]
    fn test_string_numbers_and_bad_values() {
        let config = Config::from_yaml("http:\n  timeout_secs: \"15\"\n").unwrap();
        assert_eq!(config.get_http_timeout_secs().unwrap(), 15);

        let config = Config::from_yaml("stream:\n  max_retries: -2\n").unwrap();
        assert!(config.get_stream_max_retries().is_err());
    }

    #[test]
    fn test_set_value_creates_intermediate_maps() {
        let config = Config::from_yaml("").unwrap();
        config
            .set_value(&["sources", "clypit", "base_url"], Value::String("http://x".into()))
            .unwrap();
        assert_eq!(
            config.get_string(&["sources", "clypit", "base_url"]).as_deref(),
            Some("http://x")
        );
        assert!(config.get_value(&["sources", "nope", "base_url"]).is_err());
    }

    #[test]
    fn test_load_and_save_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "resolver:\n  timeout_secs: 42\n",
        )
        .unwrap();

        let dir_str = dir.path().to_string_lossy().to_string();
        let config = Config::load_config(&dir_str).unwrap();
        assert_eq!(config.get_resolver_timeout_secs().unwrap(), 42);
        assert_eq!(config.get_config_dir(), dir_str);

        config.set_stream_max_retries(9).unwrap();
        let reloaded = Config::load_config(&dir_str).unwrap();
        assert_eq!(reloaded.get_stream_max_retries().unwrap(), 9);
        assert_eq!(reloaded.get_resolver_timeout_secs().unwrap(), 42);
    }

    #[test]
    fn test_merge_yaml_replaces_sequences() {
        let mut base: Value = serde_yaml::from_str("a: [1, 2]\nb: {c: 1}").unwrap();
        let over: Value = serde_yaml::from_str("a: [3]\nb: {d: 2}").unwrap();
        merge_yaml(&mut base, &over);
        assert_eq!(base, serde_yaml::from_str::<Value>("a: [3]\nb: {c: 1, d: 2}").unwrap());
    }
}
