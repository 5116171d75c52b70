//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::coordinator;
use crate::{
    AgentConfig, ConfigError, CoordinatorConfig, PipelineSettings, SpeechToSpeechConfig,
    VadSettings,
};

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// HTTP listener (coordinator service)
    #[serde(default)]
    pub server: ServerConfig,

    /// Agent identity
    #[serde(default)]
    pub agent: AgentConfig,

    /// Frame segmenter
    #[serde(default)]
    pub vad: VadSettings,

    /// Turn coordination (service and client sides)
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Alternative speech-to-speech backend
    #[serde(default)]
    pub speech_to_speech: SpeechToSpeechConfig,

    /// Reply pipeline
    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings; hard errors only
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_vad()?;
        self.validate_coordinator()?;
        self.validate_speech_to_speech()?;
        self.validate_pipeline()?;
        self.validate_server()?;
        Ok(())
    }

    /// Soft problems worth logging at startup
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.coordinator.url.is_none() {
            warnings.push(
                "coordinator.url not set; this agent will speak without turn coordination"
                    .to_string(),
            );
        }
        if self.coordinator.url.is_some() && self.agent.id.trim().is_empty() {
            warnings.push("agent.id is empty; coordinator requests will be rejected".to_string());
        }
        if self.coordinator.collection_ms > coordinator::MAX_COLLECTION_MS {
            warnings.push(format!(
                "coordinator.collection_ms {} exceeds {} and will be capped",
                self.coordinator.collection_ms,
                coordinator::MAX_COLLECTION_MS
            ));
        }
        if self.vad.aggressiveness > 3 {
            warnings.push(format!(
                "vad.aggressiveness {} is outside 0-3 and will be ignored",
                self.vad.aggressiveness
            ));
        }

        warnings
    }

    fn validate_vad(&self) -> Result<(), ConfigError> {
        if self.vad.silence_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.silence_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if !(0.0..=i16::MAX as f64).contains(&self.vad.energy_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "vad.energy_threshold".to_string(),
                message: format!(
                    "Must be between 0 and {}, got {}",
                    i16::MAX,
                    self.vad.energy_threshold
                ),
            });
        }

        Ok(())
    }

    fn validate_coordinator(&self) -> Result<(), ConfigError> {
        let c = &self.coordinator;

        if self.environment.is_strict()
            && !(coordinator::MIN_LEASE_MS..=coordinator::MAX_LEASE_MS).contains(&c.lease_ms)
        {
            return Err(ConfigError::InvalidValue {
                field: "coordinator.lease_ms".to_string(),
                message: format!(
                    "Must be between {} and {}, got {}",
                    coordinator::MIN_LEASE_MS,
                    coordinator::MAX_LEASE_MS,
                    c.lease_ms
                ),
            });
        }

        if c.max_recent_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "coordinator.max_recent_turns".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if c.poll_interval_ms == 0 || c.poll_interval_ms > c.decision_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "coordinator.poll_interval_ms".to_string(),
                message: format!(
                    "Must be in 1..={} (decision timeout), got {}",
                    c.decision_timeout_ms, c.poll_interval_ms
                ),
            });
        }

        Ok(())
    }

    fn validate_speech_to_speech(&self) -> Result<(), ConfigError> {
        let s2s = &self.speech_to_speech;
        if s2s.enabled && s2s.server_url.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "speech_to_speech.server_url".to_string(),
            ));
        }
        if s2s.turn_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "speech_to_speech.turn_timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;

        if p.max_sentence_chars < 20 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.max_sentence_chars".to_string(),
                message: format!("Too small (minimum 20), got {}", p.max_sentence_chars),
            });
        }

        if !matches!(p.output_sample_rate, 16_000 | 24_000 | 48_000) {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.output_sample_rate".to_string(),
                message: format!(
                    "Must be one of 16000, 24000, 48000, got {}",
                    p.output_sample_rate
                ),
            });
        }

        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    coordinator::PORT
}
fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_seconds: default_timeout(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Install the Prometheus recorder and serve /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Environment variable prefix (`COHOST__VAD__SILENCE_MS=700`)
pub const ENV_PREFIX: &str = "COHOST";

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (COHOST__ prefix, `__` separated)
/// 2. config/{env}.{toml,yaml,json} (if env specified)
/// 3. config/default.{toml,yaml,json}
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Like [`load_settings`] with an explicit config directory
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    let default_path = dir.join("default");
    builder = builder.add_source(File::with_name(&default_path.to_string_lossy()).required(false));

    if let Some(env_name) = env {
        let env_path = dir.join(env_name);
        builder =
            builder.add_source(File::with_name(&env_path.to_string_lossy()).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;
    tracing::debug!(
        dir = %dir.display(),
        env = env.unwrap_or("default"),
        environment = ?settings.environment,
        "Settings loaded"
    );

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::vad;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 3001);
        assert_eq!(settings.vad.silence_ms, vad::SILENCE_MS);
        assert_eq!(settings.coordinator.collection_ms, 300);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_vad_validation() {
        let mut settings = Settings::default();
        settings.vad.silence_ms = 0;
        assert!(settings.validate_vad().is_err());

        settings.vad.silence_ms = 500;
        settings.vad.energy_threshold = -1.0;
        assert!(settings.validate_vad().is_err());

        settings.vad.energy_threshold = 800.0;
        assert!(settings.validate_vad().is_ok());
    }

    #[test]
    fn test_speech_to_speech_requires_url() {
        let mut settings = Settings::default();
        settings.speech_to_speech.enabled = true;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingField(_))
        ));

        settings.speech_to_speech.server_url = "https://s2s.local:8998".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_strict_lease_validation() {
        let mut settings = Settings::default();
        settings.coordinator.lease_ms = 10;
        // Development tolerates it (clamped at use)
        assert!(settings.validate_coordinator().is_ok());

        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate_coordinator().is_err());
    }

    #[test]
    fn test_poll_interval_validation() {
        let mut settings = Settings::default();
        settings.coordinator.poll_interval_ms = 0;
        assert!(settings.validate_coordinator().is_err());

        settings.coordinator.poll_interval_ms = 10_000;
        assert!(settings.validate_coordinator().is_err());
    }

    #[test]
    fn test_warnings() {
        let mut settings = Settings::default();
        assert!(settings
            .warnings()
            .iter()
            .any(|w| w.contains("coordinator.url")));

        settings.coordinator.url = Some("http://localhost:3001".to_string());
        assert!(settings.warnings().iter().any(|w| w.contains("agent.id")));

        settings.agent.id = "alex".to_string();
        assert!(settings.warnings().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[vad]\nsilence_ms = 700\n\n[agent]\nid = \"b\"\ndisplay_name = \"Jamie\"\n",
        )
        .unwrap();

        std::fs::write(
            dir.path().join("staging.toml"),
            "[coordinator]\nagents = \"a:Alex,b:Jamie\"\n",
        )
        .unwrap();

        let loaded = load_settings_from(dir.path(), Some("staging")).unwrap();
        assert_eq!(loaded.vad.silence_ms, 700);
        assert_eq!(loaded.agent.display_name, "Jamie");
        assert_eq!(loaded.coordinator.agents.len(), 2);
    }

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_settings_from(dir.path(), None).unwrap();
        assert_eq!(loaded.pipeline.max_sentence_chars, 250);
    }
}
