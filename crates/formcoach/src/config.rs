//! Client configuration.
//!
//! Every timing knob of the session core lives here with a named default,
//! so tests can tighten them and deployments can override them from a TOML
//! file or `FORMCOACH_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeout for opening the streaming connection.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Bounded reconnect attempts after an unexpected close.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Base delay for exponential reconnect backoff (doubles per attempt).
pub const DEFAULT_RECONNECT_BASE_DELAY_SECS: u64 = 1;

/// Single long-delay retry after the bounded attempts are exhausted.
pub const DEFAULT_RECONNECT_LONG_DELAY_SECS: u64 = 60;

/// Minimum gap between user-requested cancellations.
pub const DEFAULT_CANCEL_COOLDOWN_SECS: u64 = 5;

/// Idle minutes before a conversation is archived.
pub const DEFAULT_IDLE_TIMEOUT_MINUTES: i64 = 120;

/// How long the session lingers in `Complete` before reverting to `Idle`.
pub const DEFAULT_COMPLETE_LINGER_MS: u64 = 300;

/// How many trailing messages feed the suggested-action refresh.
pub const DEFAULT_SUGGESTION_CONTEXT: usize = 10;

/// Configuration for the chat session core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL of the REST backend (e.g. `https://api.formcoach.app`).
    pub api_base_url: String,

    /// URL of the streaming chat endpoint (e.g. `wss://api.formcoach.app/chat`).
    pub stream_url: String,

    /// Bearer token attached to REST calls. Empty disables the header.
    pub auth_token: String,

    /// Seconds allowed for the streaming connection to open.
    pub connect_timeout_secs: u64,

    /// Reconnect attempts after an unexpected close.
    pub reconnect_attempts: u32,

    /// Base seconds for exponential reconnect backoff.
    pub reconnect_base_delay_secs: u64,

    /// Seconds before the single long-delay reconnect retry.
    pub reconnect_long_delay_secs: u64,

    /// Seconds between allowed user cancellations.
    pub cancel_cooldown_secs: u64,

    /// Minutes of inactivity before the active conversation is archived.
    pub idle_timeout_minutes: i64,

    /// Milliseconds the session stays in `Complete` before going `Idle`.
    pub complete_linger_ms: u64,

    /// Trailing messages sent as context for suggested quick replies.
    pub suggestion_context: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            stream_url: "ws://localhost:8080/chat".to_string(),
            auth_token: String::new(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_base_delay_secs: DEFAULT_RECONNECT_BASE_DELAY_SECS,
            reconnect_long_delay_secs: DEFAULT_RECONNECT_LONG_DELAY_SECS,
            cancel_cooldown_secs: DEFAULT_CANCEL_COOLDOWN_SECS,
            idle_timeout_minutes: DEFAULT_IDLE_TIMEOUT_MINUTES,
            complete_linger_ms: DEFAULT_COMPLETE_LINGER_MS,
            suggestion_context: DEFAULT_SUGGESTION_CONTEXT,
        }
    }
}

impl ChatConfig {
    /// Load configuration from an optional TOML file overlaid with
    /// `FORMCOACH_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("FORMCOACH"))
            .build()?;

        // Missing keys fall back to defaults via #[serde(default)].
        settings.try_deserialize()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_base_delay_secs)
    }

    pub fn reconnect_long_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_long_delay_secs)
    }

    pub fn cancel_cooldown(&self) -> Duration {
        Duration::from_secs(self.cancel_cooldown_secs)
    }

    pub fn complete_linger(&self) -> Duration {
        Duration::from_millis(self.complete_linger_ms)
    }

    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.idle_timeout_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_config_default() {
        let config = ChatConfig::default();
        assert_eq!(config.connect_timeout_secs, DEFAULT_CONNECT_TIMEOUT_SECS);
        assert_eq!(config.reconnect_attempts, DEFAULT_RECONNECT_ATTEMPTS);
        assert_eq!(config.idle_timeout_minutes, DEFAULT_IDLE_TIMEOUT_MINUTES);
        assert_eq!(config.cancel_cooldown(), Duration::from_secs(5));
    }

    #[test]
    fn test_chat_config_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formcoach.toml");
        std::fs::write(
            &path,
            "stream_url = \"wss://coach.example/chat\"\nreconnect_attempts = 5\n",
        )
        .unwrap();

        let config = ChatConfig::load(Some(&path)).unwrap();
        assert_eq!(config.stream_url, "wss://coach.example/chat");
        assert_eq!(config.reconnect_attempts, 5);
        // Untouched keys keep their defaults.
        assert_eq!(config.cancel_cooldown_secs, DEFAULT_CANCEL_COOLDOWN_SECS);
    }
}
