//! Configuration management
//!
//! Layered: built-in defaults, then an optional TOML file, then
//! `POWERDIAL__SECTION__KEY` environment variables.

use crate::application::session::SessionSettings;
use crate::domain::ledger::CreditRate;
use crate::domain::shared::value_objects::{PhoneNumber, TenantId};
use crate::infrastructure::telephony::SimulatedBehaviour;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_VAR: &str = "POWERDIAL_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "powerdial.toml";
const ENV_PREFIX: &str = "POWERDIAL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
    pub session: SessionConfig,
    pub dialer: DialerConfig,
    pub provider: ProviderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Without a URL the stores live in memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub credits_per_minute: u64,
    pub default_max_call_seconds: u64,
    pub billing_cycle_days: u32,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            credits_per_minute: 10,
            default_max_call_seconds: 3600,
            billing_cycle_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub dial_timeout_ms: u64,
    pub end_call_timeout_ms: u64,
    pub disposition_timeout_secs: u64,
    pub command_buffer: usize,
    pub reconcile_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: 15_000,
            end_call_timeout_ms: 10_000,
            disposition_timeout_secs: 900,
            command_buffer: 64,
            reconcile_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    pub estimated_max_seconds: u64,
    /// JSON array of leads loaded into the in-process lead store
    pub leads_file: Option<String>,
    /// Caller ids registered at startup
    pub caller_ids: Vec<CallerIdConfig>,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            estimated_max_seconds: 1800,
            leads_file: None,
            caller_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerIdConfig {
    pub tenant_id: TenantId,
    pub number: PhoneNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub ring_after_ms: Option<u64>,
    pub answer_after_ms: Option<u64>,
    pub complete_after_ms: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Simulated,
            ring_after_ms: Some(1_000),
            answer_after_ms: Some(3_000),
            complete_after_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from the file named by `POWERDIAL_CONFIG` (or `powerdial.toml`) and the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// A missing file is not an error; a malformed one is
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Defaults rendered as a TOML file
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Config::default())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn credit_rate(&self) -> CreditRate {
        CreditRate::per_minute(self.billing.credits_per_minute)
    }

    pub fn billing_cycle(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.billing.billing_cycle_days))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.session.reconcile_interval_secs.max(1))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            dial_timeout: Duration::from_millis(self.session.dial_timeout_ms),
            end_call_timeout: Duration::from_millis(self.session.end_call_timeout_ms),
            disposition_timeout: Duration::from_secs(self.session.disposition_timeout_secs),
            command_buffer: self.session.command_buffer.max(1),
            default_max_call_seconds: self.billing.default_max_call_seconds,
        }
    }

    pub fn simulated_behaviour(&self) -> SimulatedBehaviour {
        SimulatedBehaviour {
            ring_after: self.provider.ring_after_ms.map(Duration::from_millis),
            answer_after: self.provider.answer_after_ms.map(Duration::from_millis),
            complete_after: self.provider.complete_after_ms.map(Duration::from_millis),
            place_delay: None,
        }
    }
}
