//! Parsing and validation of `confcache.toml` configuration files.
//!
//! This crate reads the cache configuration file and produces a strongly-typed
//! [`CacheConfig`] controlling where ledgers are written, how recording is
//! batched, and how the invalidation check is scheduled.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use types::*;
