//! Configuration structs

mod app_config;

pub use app_config::{
    ApiConfig, AppConfig, AppSettings, ConfigError, Environment, GatewaySettings, ReconnectConfig,
};
