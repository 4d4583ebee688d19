//! Layered configuration loading.
//!
//! Defaults, then a file, then environment variables; later layers win.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, LogFormat, WaypointConfig};

/// Default environment prefix.
pub const ENV_PREFIX: &str = "WAYPOINT";

/// Configuration loader.
///
/// # Example
///
/// ```no_run
/// use waypoint_config::ConfigLoader;
///
/// # fn main() -> Result<(), waypoint_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_optional_file("waypoint.toml")?
///     .with_env_prefix("WAYPOINT")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: WaypointConfig,
    env_prefix: Option<String>,
    file_loaded: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader seeded with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: WaypointConfig::default(),
            env_prefix: None,
            file_loaded: false,
        }
    }

    /// Reset to default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = WaypointConfig::default();
        self
    }

    /// Start from the development preset.
    ///
    /// ```
    /// use waypoint_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = WaypointConfig::development();
        self
    }

    /// Start from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = WaypointConfig::production();
        self
    }

    /// Load a TOML or JSON file, chosen by extension.
    ///
    /// The file replaces the current configuration; sections it omits take
    /// their defaults.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let file_config = Self::parse_file(&content, path)?;
        self.merge_config(file_config);
        self.file_loaded = true;

        Ok(self)
    }

    /// Load a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration text in the given format (`"toml"` or `"json"`).
    ///
    /// ```
    /// use waypoint_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[work_queue]\nhigh_water_mark = 50\n", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    /// assert_eq!(config.work_queue.high_water_mark, 50);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let parsed = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };

        self.merge_config(parsed);
        Ok(self)
    }

    /// Enable `PREFIX__SECTION__KEY` environment overrides, e.g.
    /// `WAYPOINT__WORK_QUEUE__HIGH_WATER_MARK=50`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if present.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        // missing file is fine
        let _ = dotenvy::dotenv();
        Ok(self)
    }

    /// Whether a file was loaded.
    pub fn file_loaded(&self) -> bool {
        self.file_loaded
    }

    /// Apply environment overrides and validate.
    pub fn load(mut self) -> Result<WaypointConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Return the configuration without env overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> WaypointConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<WaypointConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    // Full replace; serde defaults fill whatever the source omitted.
    fn merge_config(&mut self, loaded: WaypointConfig) {
        self.config = loaded;
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();

        for (key, value) in vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let rest = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let parts: Vec<&str> = rest.split("__").collect();

        match parts.as_slice() {
            ["WORK_QUEUE", "NAME"] => {
                self.config.work_queue.name = value.to_string();
            }
            ["WORK_QUEUE", "MAX_QUEUE_SIZE"] => {
                self.config.work_queue.max_queue_size = parse_int(key, value)?;
            }
            ["WORK_QUEUE", "HIGH_WATER_MARK"] => {
                self.config.work_queue.high_water_mark = parse_int(key, value)?;
            }
            ["WORK_QUEUE", "LOW_WATER_MARK"] => {
                self.config.work_queue.low_water_mark = parse_int(key, value)?;
            }
            ["WORK_QUEUE", "DEQUEUE_TIMEOUT_MS"] => {
                self.config.work_queue.dequeue_timeout_ms = parse_int(key, value)?;
            }

            ["DISPATCH", "ONEWAY_USE_ORIGINAL_THREAD"] => {
                self.config.dispatch.oneway_use_original_thread = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }

            ["LOGGING", "ENABLED"] => {
                self.config.logging.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["LOGGING", "LEVEL"] => {
                self.config.logging.level = value.to_string();
            }
            ["LOGGING", "FORMAT"] => {
                self.config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["LOGGING", "ANSI_ENABLED"] => {
                self.config.logging.ansi_enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }

            ["METRICS", "ENABLED"] => {
                self.config.metrics.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }

            // Phase lists are file-only.
            _ => {}
        }

        Ok(())
    }
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, WaypointConfig::default());
    }

    #[test]
    fn test_loader_with_development() {
        let config = ConfigLoader::new().with_development().load().unwrap();
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_loader_with_production() {
        let config = ConfigLoader::new().with_production().load().unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_loader_with_string_toml() {
        let toml = r#"
            [phases]
            inbound = [
                { name = "receive", priority = 0 },
                { name = "unmarshal", priority = 10 },
                { name = "invoke", priority = 20 },
            ]

            [dispatch]
            oneway_use_original_thread = true
        "#;

        let config = ConfigLoader::new()
            .with_string(toml, "toml")
            .unwrap()
            .load()
            .unwrap();

        assert!(config.dispatch.oneway_use_original_thread);
        let phases = config.phase_manager().unwrap();
        assert_eq!(phases.inbound().len(), 3);
        assert_eq!(config.work_queue.high_water_mark, 25);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"work_queue": {"max_queue_size": 8, "high_water_mark": 2, "low_water_mark": 1}}"#;

        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.work_queue.max_queue_size, 8);
        assert_eq!(config.work_queue.high_water_mark, 2);
    }

    #[test]
    fn test_loader_with_string_unknown_format() {
        assert!(ConfigLoader::new().with_string("", "yaml").is_err());
    }

    #[test]
    fn test_loader_invalid_values_fail_load() {
        let toml = "[work_queue]\nhigh_water_mark = 2\nlow_water_mark = 3\n";
        let result = ConfigLoader::new().with_string(toml, "toml").unwrap().load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_loader_with_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[logging]\nlevel = \"warn\"\nformat = \"pretty\"").unwrap();

        let loader = ConfigLoader::new().with_file(file.path()).unwrap();
        assert!(loader.file_loaded());
        let config = loader.load().unwrap();

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_loader_with_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(matches!(
            ConfigLoader::new().with_file(file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_loader_with_file_not_found() {
        assert!(matches!(
            ConfigLoader::new().with_file("/nonexistent/waypoint.toml"),
            Err(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let loader = ConfigLoader::new()
            .with_optional_file("/nonexistent/waypoint.toml")
            .unwrap();
        assert!(!loader.file_loaded());
        assert_eq!(loader.load().unwrap(), WaypointConfig::default());
    }

    #[test]
    fn test_loader_load_unvalidated() {
        let toml = "[work_queue]\nhigh_water_mark = 0\nlow_water_mark = 0\n";
        let config = ConfigLoader::new()
            .with_string(toml, "toml")
            .unwrap()
            .load_unvalidated();
        assert_eq!(config.work_queue.high_water_mark, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    // Env overrides go through apply_env_var directly; set_var is avoided in
    // tests because the process environment is shared across test threads.

    #[test]
    fn test_apply_env_var_work_queue() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__WORK_QUEUE__HIGH_WATER_MARK", "50", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__WORK_QUEUE__DEQUEUE_TIMEOUT_MS", "1500", "TEST")
            .unwrap();
        assert_eq!(loader.config.work_queue.high_water_mark, 50);
        assert_eq!(loader.config.work_queue.dequeue_timeout_ms, 1500);
    }

    #[test]
    fn test_apply_env_var_dispatch_and_logging() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__DISPATCH__ONEWAY_USE_ORIGINAL_THREAD", "yes", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__LOGGING__FORMAT", "Pretty", "TEST")
            .unwrap();
        assert!(loader.config.dispatch.oneway_use_original_thread);
        assert_eq!(loader.config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_apply_env_var_invalid_values() {
        let mut loader = ConfigLoader::new();
        assert!(loader
            .apply_env_var("TEST__WORK_QUEUE__MAX_QUEUE_SIZE", "lots", "TEST")
            .is_err());
        assert!(loader
            .apply_env_var("TEST__METRICS__ENABLED", "maybe", "TEST")
            .is_err());
        assert!(loader
            .apply_env_var("TEST__LOGGING__FORMAT", "xml", "TEST")
            .is_err());
    }

    #[test]
    fn test_apply_env_var_unknown_key_ignored() {
        let mut loader = ConfigLoader::new();
        assert!(loader
            .apply_env_var("TEST__PHASES__INBOUND", "receive", "TEST")
            .is_ok());
        assert_eq!(loader.config, WaypointConfig::default());
    }
}
