use secrecy::SecretString;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::Level;
use voice_relay_core::{LangflowConfig, chat_flow::DEFAULT_LANGFLOW_BASE_URL};

/// Greeting spoken by the telephony platform before the relay starts.
pub const DEFAULT_WELCOME_GREETING: &str = "Ahoy! How can I help?";

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_LANGFLOW_TIMEOUT_SECS: u64 = 30;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Public host the telephony platform reaches us on, without scheme.
    pub tunnel_domain: String,
    pub welcome_greeting: String,
    pub langflow: LangflowConfig,
    /// Relay replies token by token instead of waiting for the whole run.
    pub langflow_streaming: bool,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let tunnel_domain = std::env::var("TUNNEL_DOMAIN")
            .map(|raw| strip_scheme(&raw))
            .map_err(|_| ConfigError::MissingVar("TUNNEL_DOMAIN".to_string()))?;
        if tunnel_domain.is_empty() {
            return Err(ConfigError::InvalidValue(
                "TUNNEL_DOMAIN".to_string(),
                "host must not be empty".to_string(),
            ));
        }

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), e.to_string()))?,
            Err(_) => DEFAULT_PORT,
        };
        let bind_address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

        let base_url = std::env::var("LANGFLOW_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANGFLOW_BASE_URL.to_string());
        let api_key = std::env::var("LANGFLOW_API_KEY")
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingVar("LANGFLOW_API_KEY".to_string()))?;
        let flow_id = std::env::var("LANGFLOW_FLOW_ID")
            .map_err(|_| ConfigError::MissingVar("LANGFLOW_FLOW_ID".to_string()))?;

        let timeout_secs = match std::env::var("LANGFLOW_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue("LANGFLOW_TIMEOUT_SECS".to_string(), e.to_string())
            })?,
            Err(_) => DEFAULT_LANGFLOW_TIMEOUT_SECS,
        };
        // Zero opts out of the deadline.
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

        let langflow_streaming = match std::env::var("LANGFLOW_STREAMING") {
            Ok(raw) => raw.trim().to_lowercase().parse::<bool>().map_err(|_| {
                ConfigError::InvalidValue(
                    "LANGFLOW_STREAMING".to_string(),
                    format!("'{}' is not true or false", raw),
                )
            })?,
            Err(_) => false,
        };

        let welcome_greeting = std::env::var("WELCOME_GREETING")
            .unwrap_or_else(|_| DEFAULT_WELCOME_GREETING.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            tunnel_domain,
            welcome_greeting,
            langflow: LangflowConfig {
                base_url,
                flow_id,
                api_key,
                timeout,
            },
            langflow_streaming,
            log_level,
        })
    }

    /// The WebSocket URL handed to the telephony platform.
    pub fn relay_url(&self) -> String {
        format!("wss://{}/ws", self.tunnel_domain)
    }
}

fn strip_scheme(raw: &str) -> String {
    let trimmed = raw.trim();
    let host = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    host.trim_end_matches('/').to_string()
}
