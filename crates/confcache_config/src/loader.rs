//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::CacheConfig;
use std::path::Path;

/// Name of the configuration file looked up in the build root.
pub const CONFIG_FILE: &str = "confcache.toml";

/// Loads and validates `confcache.toml` from a build root directory.
///
/// A missing file is not an error: the defaults apply.
pub fn load_config(root_dir: &Path) -> Result<CacheConfig, ConfigError> {
    let config_path = root_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(CacheConfig::default());
    }
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `confcache.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<CacheConfig, ConfigError> {
    let config: CacheConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that configuration values are usable.
fn validate_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.ledger.file_name.is_empty() {
        return Err(ConfigError::ValidationError(
            "ledger.file_name must not be empty".to_string(),
        ));
    }
    if config.ledger.flush_batch == 0 {
        return Err(ConfigError::ValidationError(
            "ledger.flush_batch must be at least 1".to_string(),
        ));
    }
    if config.check.batch_size == 0 {
        return Err(ConfigError::ValidationError(
            "check.batch_size must be at least 1".to_string(),
        ));
    }
    if config.check.threads == Some(0) {
        return Err(ConfigError::ValidationError(
            "check.threads must be at least 1 when set".to_string(),
        ));
    }
    Ok(())
}
