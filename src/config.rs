//! Bridge configuration, read from `.foreign-proxy.toml`

use crate::logging::{parse_level, LogConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// File name searched for by `BridgeConfig::discover`
pub const CONFIG_FILE_NAME: &str = ".foreign-proxy.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub heap: HeapConfig,

    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_capacity")]
    pub initial_capacity: usize,

    /// Cap on distinct shapes, the plain shape included
    #[serde(default)]
    pub max_shapes: Option<usize>,

    /// Bitmasks synthesized up front by `runtime::init`
    #[serde(default)]
    pub prewarm: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeapConfig {
    /// Live proxy objects the host heap may hold at once
    #[serde(default)]
    pub max_live_proxies: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default)]
    pub file: Option<String>,

    #[serde(default)]
    pub spans: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_capacity(),
            max_shapes: None,
            prewarm: Vec::new(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: None,
            spans: false,
        }
    }
}

fn default_capacity() -> usize { 64 }
fn default_level() -> String { "info".to_string() }

impl LoggingSection {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            level: parse_level(&self.level),
            file_output: self.file.is_some(),
            log_path: self.file.clone(),
            json_format: self.json,
            show_spans: self.spans,
            ..LogConfig::default()
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content)
            .map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Find and load configuration file from current directory or parents
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                if let Ok(config) = Self::load(&config_path) {
                    return config;
                }
            }

            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    /// Generate default configuration file content
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .map_err(|e| format!("Failed to write config: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.registry.initial_capacity, 64);
        assert!(config.registry.max_shapes.is_none());
        assert!(config.heap.max_live_proxies.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[registry]
max_shapes = 16
prewarm = [1, 3]

[heap]
max_live_proxies = 1000

[logging]
level = "debug"
json = true
"#;

        let config = BridgeConfig::parse(toml).unwrap();
        assert_eq!(config.registry.initial_capacity, 64);
        assert_eq!(config.registry.max_shapes, Some(16));
        assert_eq!(config.registry.prewarm, vec![1, 3]);
        assert_eq!(config.heap.max_live_proxies, Some(1000));

        let log = config.logging.to_log_config();
        assert_eq!(log.level, Level::DEBUG);
        assert!(log.json_format);
        assert!(!log.file_output);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = BridgeConfig::parse("[registry]\nmax_shapes = \"many\"").unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = BridgeConfig::default();
        config.registry.prewarm = vec![0b011];
        config.logging.file = Some("bridge.log".to_string());
        config.save(&path).unwrap();

        let loaded = BridgeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.logging.to_log_config().file_output);
    }

    #[test]
    fn test_default_toml_parses_back() {
        let text = BridgeConfig::default_toml();
        assert_eq!(BridgeConfig::parse(&text).unwrap(), BridgeConfig::default());
    }
}
