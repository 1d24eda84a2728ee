//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `hearth.toml` in the working directory, or the file named by
//! `HEARTH_CONFIG`. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.

use std::time::Duration;

use hearth_adapter_rpc::PeerOptions;
use hearth_adapter_rpc::process::{ProcessSpec, SupervisorOptions};
use hearth_app::scheduler::Backoff;
use hearth_domain::script::RuleScript;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Integration toggles.
    pub integrations: IntegrationsConfig,
    /// Retry policy of provider tasks.
    pub scheduler: SchedulerConfig,
    pub rpc: RpcConfig,
    /// Out-of-process providers.
    pub bridges: Vec<BridgeConfig>,
    /// Scripted rules loaded at startup.
    pub rules: Vec<RuleScript>,
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Frames kept for slow SSE subscribers before they lag.
    pub sync_capacity: usize,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Per-integration toggles.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    /// Enable the virtual/demo provider.
    pub virtual_enabled: bool,
    /// Sampling period of the virtual power meter.
    pub meter_period_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub base_delay_ms: u64,
    pub max_exponent: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub call_timeout_ms: u64,
    /// Delay before restarting a bridge process that exited cleanly.
    pub restart_delay_ms: u64,
}

/// One child process speaking RPC on its stdio.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Provider id of the bridged services.
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Config {
    /// Load configuration from `hearth.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// result does not validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("HEARTH_CONFIG").unwrap_or_else(|_| "hearth.toml".to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HEARTH_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("HEARTH_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("HEARTH_BIND") {
            if let Some((host, port)) = val.rsplit_once(':') {
                self.server.host = host.to_string();
                if let Ok(port) = port.parse() {
                    self.server.port = port;
                }
            }
        }
        if let Ok(val) = std::env::var("HEARTH_DATABASE_URL") {
            self.database.url = val;
        }
        if let Ok(val) = std::env::var("HEARTH_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.server.sync_capacity == 0 {
            return Err(ConfigError::Validation("sync_capacity must be non-zero".to_string()));
        }
        if self.integrations.meter_period_secs == 0 {
            return Err(ConfigError::Validation("meter_period_secs must be non-zero".to_string()));
        }
        if self.rpc.call_timeout_ms == 0 {
            return Err(ConfigError::Validation("call_timeout_ms must be non-zero".to_string()));
        }
        for bridge in &self.bridges {
            if bridge.id.is_empty() || bridge.id.contains(':') {
                return Err(ConfigError::Validation(format!(
                    "bridge id {:?} must be non-empty and contain no ':'",
                    bridge.id
                )));
            }
            if self.integrations.virtual_enabled && bridge.id == "virtual" {
                return Err(ConfigError::Validation(
                    "bridge id \"virtual\" is taken by the virtual provider".to_string(),
                ));
            }
        }
        for rule in &self.rules {
            rule.validate()
                .map_err(|err| ConfigError::Validation(format!("rule {:?}: {}", rule.name, err.message())))?;
        }
        Ok(())
    }

    /// Return the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.scheduler.base_delay_ms),
            max_exponent: self.scheduler.max_exponent,
        }
    }

    #[must_use]
    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            peer: PeerOptions {
                call_timeout: Duration::from_millis(self.rpc.call_timeout_ms),
            },
            backoff: self.backoff(),
            restart_delay: Duration::from_millis(self.rpc.restart_delay_ms),
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub fn process(&self) -> ProcessSpec {
        ProcessSpec {
            command: self.command.clone(),
            args: self.args.clone(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            sync_capacity: 256,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:hearth.db?mode=rwc".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "hearthd=info,hearth=info,tower_http=debug".to_string(),
        }
    }
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            virtual_enabled: true,
            meter_period_secs: 5,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_exponent: 6,
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            restart_delay_ms: 1000,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.url, "sqlite:hearth.db?mode=rwc");
        assert!(config.integrations.virtual_enabled);
        assert!(config.bridges.is_empty());
        assert!(config.rules.is_empty());
        assert_eq!(config.backoff(), Backoff::default());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = r#"
            [server]
            host = '127.0.0.1'
            port = 9090
            sync_capacity = 64

            [database]
            url = 'sqlite:test.db'

            [logging]
            filter = 'debug'

            [integrations]
            virtual_enabled = false

            [scheduler]
            base_delay_ms = 250
            max_exponent = 3

            [rpc]
            call_timeout_ms = 2000

            [[bridges]]
            id = 'zigbee'
            command = '/usr/bin/zigbee-bridge'
            args = ['--port', '/dev/ttyUSB0']

            [[rules]]
            name = 'night light'
            when = [{ type = 'equals', service = 'virtual:switch', key = 'on', value = true }]
            then = [{ type = 'constrain', service = 'virtual:light', key = 'on', value = true, priority = 10 }]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.sync_capacity, 64);
        assert_eq!(config.database.url, "sqlite:test.db");
        assert_eq!(config.logging.filter, "debug");
        assert!(!config.integrations.virtual_enabled);
        assert_eq!(config.backoff().base, Duration::from_millis(250));
        assert_eq!(config.supervisor_options().peer.call_timeout, Duration::from_secs(2));
        assert_eq!(config.bridges[0].process().args, vec!["--port", "/dev/ttyUSB0"]);
        assert_eq!(config.rules[0].name, "night light");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn should_reject_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_accept_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn should_reject_bridge_id_with_colon() {
        let mut config = Config::default();
        config.bridges.push(BridgeConfig {
            id: "zig:bee".to_string(),
            command: "true".to_string(),
            args: Vec::new(),
        });
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_rule_without_actions() {
        let config: Config = toml::from_str("[[rules]]\nname = 'empty'\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_format_custom_bind_addr() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 9090;
        assert_eq!(config.bind_addr(), "127.0.0.1:9090");
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }
}
