//! Application configuration structs
//!
//! Loads configuration from environment variables (and an optional `.env` file).

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub api: ApiConfig,
    pub gateway: GatewaySettings,
    pub reconnect: ReconnectConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// REST API settings used for the bootstrap gateway lookup
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Bot credential, sent as `Authorization: Bot <token>` and in Identify/Resume
    pub token: String,
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Gateway connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_gateway_version")]
    pub version: u8,
    /// Raw intents bitmask sent in Identify
    #[serde(default = "default_intents")]
    pub intents: u64,
    #[serde(default)]
    pub shard_id: u32,
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
    /// Capacity of the receive loop -> coordinator queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

/// Reconnect backoff settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Relative jitter applied to every delay (0.3 = +/-30%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_max_resume_attempts")]
    pub max_resume_attempts: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            version: default_gateway_version(),
            intents: default_intents(),
            shard_id: 0,
            shard_count: default_shard_count(),
            large_threshold: default_large_threshold(),
            queue_capacity: default_queue_capacity(),
            hello_timeout_ms: default_hello_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            max_resume_attempts: default_max_resume_attempts(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "gateway-client".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_api_timeout_secs() -> u64 {
    30
}

fn default_gateway_version() -> u8 {
    10
}

fn default_intents() -> u64 {
    // GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
    (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15)
}

fn default_shard_count() -> u32 {
    1
}

fn default_large_threshold() -> u32 {
    50
}

fn default_queue_capacity() -> usize {
    64
}

fn default_hello_timeout_ms() -> u64 {
    20_000
}

fn default_close_timeout_ms() -> u64 {
    5_000
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.3
}

fn default_max_resume_attempts() -> u32 {
    3
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let env = match vars.get("APP_ENV") {
            Some(raw) => Environment::parse(&raw)
                .ok_or(ConfigError::InvalidValue("APP_ENV", raw))?,
            None => default_env(),
        };

        let shard_id = vars.parse("SHARD_ID", 0)?;
        let shard_count = vars.parse("SHARD_COUNT", default_shard_count())?;
        if shard_count == 0 || shard_id >= shard_count {
            return Err(ConfigError::InvalidValue(
                "SHARD_ID",
                format!("{shard_id} (shard count {shard_count})"),
            ));
        }

        let jitter: f64 = vars.parse("RECONNECT_JITTER", default_jitter())?;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::InvalidValue("RECONNECT_JITTER", jitter.to_string()));
        }

        Ok(Self {
            app: AppSettings {
                name: vars.get("APP_NAME").unwrap_or_else(default_app_name),
                env,
            },
            api: ApiConfig {
                token: vars
                    .get("BOT_TOKEN")
                    .filter(|t| !t.trim().is_empty())
                    .ok_or(ConfigError::MissingVar("BOT_TOKEN"))?,
                base_url: vars.get("API_BASE_URL").unwrap_or_else(default_api_base_url),
                timeout_secs: vars.parse("API_TIMEOUT_SECS", default_api_timeout_secs())?,
            },
            gateway: GatewaySettings {
                version: vars.parse("GATEWAY_VERSION", default_gateway_version())?,
                intents: vars.parse("GATEWAY_INTENTS", default_intents())?,
                shard_id,
                shard_count,
                large_threshold: vars.parse("GATEWAY_LARGE_THRESHOLD", default_large_threshold())?,
                queue_capacity: vars.parse("GATEWAY_QUEUE_CAPACITY", default_queue_capacity())?,
                hello_timeout_ms: vars.parse("GATEWAY_HELLO_TIMEOUT_MS", default_hello_timeout_ms())?,
                close_timeout_ms: vars.parse("GATEWAY_CLOSE_TIMEOUT_MS", default_close_timeout_ms())?,
            },
            reconnect: ReconnectConfig {
                base_delay_ms: vars.parse("RECONNECT_BASE_DELAY_MS", default_base_delay_ms())?,
                max_delay_ms: vars.parse("RECONNECT_MAX_DELAY_MS", default_max_delay_ms())?,
                jitter,
                max_resume_attempts: vars.parse("MAX_RESUME_ATTEMPTS", default_max_resume_attempts())?,
            },
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key, raw)),
            None => Ok(default),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
