//! # Gateway Config
//!
//! Configuration for the itinerary LLM router, loaded once at start-up from
//! an optional YAML/TOML file and the environment.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod loader;

pub use config::{
    ClassifierConfig, ExecutionConfig, HealthConfig, LogFormat, ProviderConfig,
    ProvidersConfig, RouterConfig, RoutingConfig, TelemetryConfig, MAX_KEY_SLOTS,
};
pub use error::ConfigError;
pub use loader::{apply_env_overrides, load_config, parse_config, validate_config, ConfigFormat};
