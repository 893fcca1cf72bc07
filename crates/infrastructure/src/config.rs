//! Gateway configuration: YAML file, `TP_ALERT_*` environment overrides,
//! and validation.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid value '{value}' for {field}: expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerSection,
    pub engine: EngineSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS whitelist; `*` allows any origin. Comma-separated in overrides.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: String,
    /// Seconds granted to in-flight requests on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// `host:port` of the streaming engine's SQL endpoint.
    pub address: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Database the gateway operates in.
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            allowed_origins: default_allowed_origins(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_allowed_origins() -> String {
    "*".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_username() -> String {
    "default".to_string()
}

fn default_workspace() -> String {
    "default".to_string()
}

impl GatewayConfig {
    /// Load from a YAML file, apply `TP_ALERT_*` environment overrides,
    /// then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse from a YAML string, with env overrides and validation.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml_ng::from_str(yaml)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// `TP_ALERT_<SECTION>_<FIELD>` overrides, e.g. `TP_ALERT_SERVER_PORT`
    /// or `TP_ALERT_ENGINE_ADDRESS`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_var("TP_ALERT_SERVER_PORT") {
            self.server.port = value.parse().map_err(|_| ConfigError::InvalidValue {
                field: "server.port".to_string(),
                value,
                expected: "a TCP port number".to_string(),
            })?;
        }
        if let Some(value) = env_var("TP_ALERT_SERVER_ALLOWED_ORIGINS") {
            self.server.allowed_origins = value;
        }
        if let Some(value) = env_var("TP_ALERT_SERVER_SHUTDOWN_TIMEOUT") {
            self.server.shutdown_timeout =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "server.shutdown_timeout".to_string(),
                    value,
                    expected: "seconds".to_string(),
                })?;
        }
        if let Some(value) = env_var("TP_ALERT_ENGINE_ADDRESS") {
            self.engine.address = value;
        }
        if let Some(value) = env_var("TP_ALERT_ENGINE_USERNAME") {
            self.engine.username = value;
        }
        if let Some(value) = env_var("TP_ALERT_ENGINE_PASSWORD") {
            self.engine.password = value;
        }
        if let Some(value) = env_var("TP_ALERT_ENGINE_WORKSPACE") {
            self.engine.workspace = value;
        }
        if let Some(value) = env_var("TP_ALERT_LOG_LEVEL") {
            self.log.level = value.parse().map_err(|()| ConfigError::InvalidValue {
                field: "log.level".to_string(),
                value,
                expected: "error, warn, info, debug, trace".to_string(),
            })?;
        }
        if let Some(value) = env_var("TP_ALERT_LOG_FORMAT") {
            self.log.format = value.parse().map_err(|()| ConfigError::InvalidValue {
                field: "log.format".to_string(),
                value,
                expected: "json, text".to_string(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.address.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "engine.address".to_string(),
                message: "engine address is required".to_string(),
            });
        }
        if self.server.port == 0 {
            return Err(ConfigError::Validation {
                field: "server.port".to_string(),
                message: "port must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Allowed origins split on commas, trimmed.
    pub fn allowed_origins(&self) -> Vec<String> {
        self.server
            .allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Copy with sensitive values masked, safe for logging.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut sanitized = self.clone();
        if !sanitized.engine.password.is_empty() {
            sanitized.engine.password = "***".to_string();
        }
        sanitized
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ── Logging enums ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

impl std::str::FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    // `from_yaml` reads the process environment, so every test takes this
    // lock to stay hermetic under the parallel test runner.
    fn env_guard() -> MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[test]
    fn minimal_yaml_gets_defaults() {
        let _env = env_guard();
        let config = GatewayConfig::from_yaml("engine:\n  address: localhost:3218\n").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.allowed_origins, "*");
        assert_eq!(config.server.shutdown_timeout, 10);
        assert_eq!(config.engine.username, "default");
        assert_eq!(config.engine.workspace, "default");
        assert_eq!(config.log.level, LogLevel::Info);
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn full_yaml_round_trips() {
        let _env = env_guard();
        let yaml = "\
server:
  port: 9090
  allowed_origins: \"https://a.example, https://b.example\"
  shutdown_timeout: 5
engine:
  address: engine:3218
  username: alerts
  password: secret
  workspace: prod
log:
  level: debug
  format: json
";
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(
            config.allowed_origins(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(config.engine.workspace, "prod");
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn missing_engine_address_fails_validation() {
        let _env = env_guard();
        assert!(GatewayConfig::from_yaml("engine:\n  address: \"\"\n").is_err());
        assert!(GatewayConfig::from_yaml("server:\n  port: 1\n").is_err());
    }

    #[test]
    fn zero_port_fails_validation() {
        let _env = env_guard();
        let yaml = "server:\n  port: 0\nengine:\n  address: localhost:3218\n";
        let err = GatewayConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("server.port"));
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let _env = env_guard();
        let mut config: GatewayConfig =
            serde_yaml_ng::from_str("engine:\n  address: localhost:3218\n").unwrap();
        std::env::set_var("TP_ALERT_ENGINE_ADDRESS", "engine.prod:3218");
        std::env::set_var("TP_ALERT_SERVER_PORT", "9999");
        config.apply_env_overrides().unwrap();
        std::env::remove_var("TP_ALERT_ENGINE_ADDRESS");
        std::env::remove_var("TP_ALERT_SERVER_PORT");

        assert_eq!(config.engine.address, "engine.prod:3218");
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn bad_env_override_is_reported() {
        let _env = env_guard();
        let mut config: GatewayConfig =
            serde_yaml_ng::from_str("engine:\n  address: localhost:3218\n").unwrap();
        std::env::set_var("TP_ALERT_SERVER_SHUTDOWN_TIMEOUT", "soon");
        let result = config.apply_env_overrides();
        std::env::remove_var("TP_ALERT_SERVER_SHUTDOWN_TIMEOUT");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn sanitized_masks_the_password() {
        let _env = env_guard();
        let yaml = "engine:\n  address: localhost:3218\n  password: hunter2\n";
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.sanitized().engine.password, "***");
        assert_eq!(config.engine.password, "hunter2");
    }

    #[test]
    fn wildcard_origin_list() {
        let _env = env_guard();
        let config = GatewayConfig::from_yaml("engine:\n  address: localhost:3218\n").unwrap();
        assert_eq!(config.allowed_origins(), vec!["*".to_string()]);
    }
}
