//! Configuration management for the co-host engine
//!
//! Supports loading configuration from:
//! - TOML/JSON files under `config/` (`default`, then `{env}`)
//! - Environment variables (`COHOST__` prefix, `__` separated)
//!
//! Both the agent process and the Turn Coordinator service read the same
//! [`Settings`]; each uses the sections it needs.

pub mod agent;
pub mod constants;
pub mod coordinator;
pub mod settings;

pub use agent::{AgentConfig, PipelineSettings, VadSettings};
pub use coordinator::{parse_agent_order, AgentEntry, CoordinatorConfig, SpeechToSpeechConfig};
pub use settings::{
    load_settings, load_settings_from, ObservabilityConfig, RuntimeEnvironment, ServerConfig,
    Settings, ENV_PREFIX,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
