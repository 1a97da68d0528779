use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_push_url")]
    pub push_url: String,
    #[serde(default = "default_push_destination")]
    pub push_destination: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_reconnect_strategy")]
    pub reconnect_strategy: String,
    #[serde(default)]
    pub reconnect_max_attempts: Option<u32>,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default)]
    pub session_user_id: Option<String>,
    #[serde(default)]
    pub session_access_token: Option<String>,
    #[serde(default)]
    pub session_refresh_token: Option<String>,
    #[serde(default)]
    pub metrics_listen_addr: Option<String>,
    #[serde(default)]
    pub telemetry_enabled: bool,
    #[serde(default = "default_telemetry_service_name")]
    pub telemetry_service_name: String,
    #[serde(default = "default_telemetry_service_version")]
    pub telemetry_service_version: String,
    #[serde(default = "default_telemetry_environment")]
    pub telemetry_environment: String,
    #[serde(default = "default_telemetry_otlp_endpoint")]
    pub telemetry_otlp_endpoint: String,
}

fn default_api_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_push_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_push_destination() -> String {
    "/user/queue/notifications".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30000
}

fn default_reconnect_strategy() -> String {
    "fixed".to_string()
}

fn default_heartbeat_ms() -> u64 {
    10000
}

fn default_connect_timeout_ms() -> u64 {
    10000
}

fn default_http_timeout_ms() -> u64 {
    15000
}

fn default_telemetry_service_name() -> String {
    "storefront-notify".to_string()
}

fn default_telemetry_service_version() -> String {
    "0.1.0".to_string()
}

fn default_telemetry_environment() -> String {
    "production".to_string()
}

fn default_telemetry_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn channel_config(&self) -> Result<ChannelConfig, ConfigError> {
        let strategy = match self.reconnect_strategy.to_ascii_lowercase().as_str() {
            "fixed" => ReconnectStrategy::Fixed,
            "exponential" => ReconnectStrategy::Exponential,
            other => {
                return Err(ConfigError::Message(format!(
                    "unknown reconnect_strategy '{}', expected 'fixed' or 'exponential'",
                    other
                )));
            }
        };

        Ok(ChannelConfig {
            push_url: self.push_url.clone(),
            destination: self.push_destination.clone(),
            reconnect: ReconnectPolicy {
                strategy,
                base_delay: Duration::from_millis(self.reconnect_delay_ms),
                max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
                max_attempts: self.reconnect_max_attempts,
            },
            heartbeat_outgoing: Duration::from_millis(self.heartbeat_outgoing_ms),
            heartbeat_incoming: Duration::from_millis(self.heartbeat_incoming_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStrategy {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub strategy: ReconnectStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` keeps retrying for as long as the session lasts.
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub push_url: String,
    pub destination: String,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_outgoing: Duration,
    pub heartbeat_incoming: Duration,
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    /// The private delivery address for `user_id`.
    pub fn destination_for(&self, user_id: &str) -> String {
        self.destination.replace("{user_id}", user_id)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            push_url: default_push_url(),
            destination: default_push_destination(),
            reconnect: ReconnectPolicy {
                strategy: ReconnectStrategy::Fixed,
                base_delay: Duration::from_millis(default_reconnect_delay_ms()),
                max_delay: Duration::from_millis(default_reconnect_max_delay_ms()),
                max_attempts: None,
            },
            heartbeat_outgoing: Duration::from_millis(default_heartbeat_ms()),
            heartbeat_incoming: Duration::from_millis(default_heartbeat_ms()),
            connect_timeout: Duration::from_millis(default_connect_timeout_ms()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value)?;
        }
        builder.build()?.try_deserialize()
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        let channel = config.channel_config().unwrap();

        assert_eq!(channel, ChannelConfig::default());
        assert_eq!(config.http_timeout(), Duration::from_secs(15));
        assert!(config.session_user_id.is_none());
        assert!(!config.telemetry_enabled);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("push_url", "wss://shop.example/ws"),
            ("push_destination", "/user/{user_id}/queue/notifications"),
            ("reconnect_strategy", "Exponential"),
            ("reconnect_delay_ms", "250"),
            ("reconnect_max_attempts", "7"),
            ("heartbeat_incoming_ms", "0"),
        ])
        .unwrap();
        let channel = config.channel_config().unwrap();

        assert_eq!(channel.push_url, "wss://shop.example/ws");
        assert_eq!(channel.reconnect.strategy, ReconnectStrategy::Exponential);
        assert_eq!(channel.reconnect.base_delay, Duration::from_millis(250));
        assert_eq!(channel.reconnect.max_attempts, Some(7));
        assert!(channel.heartbeat_incoming.is_zero());
        assert_eq!(
            channel.destination_for("u-9"),
            "/user/u-9/queue/notifications"
        );
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let config = from_pairs(&[("reconnect_strategy", "random")]).unwrap();
        assert!(config.channel_config().is_err());
    }
}
