//! Configuration system — schema, loading, env var overrides, and validation.
//!
//! # Usage
//! ```no_run
//! use penbot_core::config;
//!
//! let cfg = config::load_config(None);
//! cfg.validate().expect("incomplete configuration");
//! println!("Primary model: {}", cfg.providers.openrouter.models[0]);
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{get_config_path, load_config};
pub use schema::{ChatConfig, Config, ConfigError, DiscordConfig, ProviderConfig, ProvidersConfig};
