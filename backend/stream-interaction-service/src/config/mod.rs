use crate::models::{AutoModSettings, ChatSettings, Sensitivity};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service_name: String,
    pub environment: String,
    pub chat: ChatConfig,
    pub moderation: ModerationConfig,
    pub monetization: MonetizationConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub max_message_length: usize,
    pub slow_mode_seconds: u64,
    pub subscriber_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModerationConfig {
    pub warnings_before_timeout: u32,
    pub escalation_timeout_secs: u64,
    pub spam_window_secs: u64,
    pub spam_duplicate_threshold: u32,
    pub spam_rate_limit: u32,
    pub caps_threshold: f64,
    pub caps_min_letters: u32,
    /// Seeded into the default keyword rule; empty leaves that rule out
    pub blocked_terms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonetizationConfig {
    pub super_chat_enabled: bool,
    pub super_chat_min: f64,
    pub super_chat_max: f64,
    pub donation_min: f64,
    pub donation_max: f64,
    pub default_currency: String,
    pub payment_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub inbound_queue_capacity: usize,
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::EngineError> {
        dotenvy::dotenv().ok();

        let config = Self {
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "stream-interaction-service".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            chat: ChatConfig::from_env(),
            moderation: ModerationConfig::from_env(),
            monetization: MonetizationConfig::from_env(),
            session: SessionConfig::from_env(),
            logging: LoggingConfig::from_env(),
        };
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), crate::error::EngineError> {
        use crate::error::EngineError;

        let m = &self.monetization;
        if m.super_chat_min <= 0.0 || m.super_chat_min > m.super_chat_max {
            return Err(EngineError::Config(format!(
                "super chat bounds out of order: {} > {}",
                m.super_chat_min, m.super_chat_max
            )));
        }
        if m.donation_min <= 0.0 || m.donation_min > m.donation_max {
            return Err(EngineError::Config(format!(
                "donation bounds out of order: {} > {}",
                m.donation_min, m.donation_max
            )));
        }
        if self.session.inbound_queue_capacity == 0 || self.session.event_buffer == 0 {
            return Err(EngineError::Config(
                "session queue capacity and event buffer must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "stream-interaction-service".to_string(),
            environment: "development".to_string(),
            chat: ChatConfig::default(),
            moderation: ModerationConfig::default(),
            monetization: MonetizationConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ChatConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_message_length: env_or("CHAT_MAX_MESSAGE_LENGTH", defaults.max_message_length),
            slow_mode_seconds: env_or("CHAT_SLOW_MODE_SECONDS", defaults.slow_mode_seconds),
            subscriber_only: env_or("CHAT_SUBSCRIBER_ONLY", defaults.subscriber_only),
        }
    }

    pub fn settings(&self) -> ChatSettings {
        ChatSettings {
            max_message_length: self.max_message_length,
            slow_mode_seconds: self.slow_mode_seconds,
            subscriber_only: self.subscriber_only,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 500,
            slow_mode_seconds: 0,
            subscriber_only: false,
        }
    }
}

impl ModerationConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            warnings_before_timeout: env_or(
                "MOD_WARNINGS_BEFORE_TIMEOUT",
                defaults.warnings_before_timeout,
            ),
            escalation_timeout_secs: env_or(
                "MOD_ESCALATION_TIMEOUT_SECS",
                defaults.escalation_timeout_secs,
            ),
            spam_window_secs: env_or("MOD_SPAM_WINDOW_SECS", defaults.spam_window_secs),
            spam_duplicate_threshold: env_or(
                "MOD_SPAM_DUPLICATE_THRESHOLD",
                defaults.spam_duplicate_threshold,
            ),
            spam_rate_limit: env_or("MOD_SPAM_RATE_LIMIT", defaults.spam_rate_limit),
            caps_threshold: env_or("MOD_CAPS_THRESHOLD", defaults.caps_threshold),
            caps_min_letters: env_or("MOD_CAPS_MIN_LETTERS", defaults.caps_min_letters),
            blocked_terms: env::var("MOD_BLOCKED_TERMS")
                .map(|raw| parse_terms(&raw))
                .unwrap_or_default(),
        }
    }

    pub fn auto_mod_settings(&self) -> AutoModSettings {
        AutoModSettings {
            enabled: true,
            sensitivity: Sensitivity::Medium,
            warnings_before_timeout: self.warnings_before_timeout,
            escalation_timeout_secs: self.escalation_timeout_secs,
            spam_window_secs: self.spam_window_secs,
            spam_duplicate_threshold: self.spam_duplicate_threshold,
            spam_rate_limit: self.spam_rate_limit,
            caps_threshold: self.caps_threshold,
            caps_min_letters: self.caps_min_letters,
        }
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            warnings_before_timeout: 3,
            escalation_timeout_secs: 300,
            spam_window_secs: 30,
            spam_duplicate_threshold: 3,
            spam_rate_limit: 10,
            caps_threshold: 0.7,
            caps_min_letters: 10,
            blocked_terms: Vec::new(),
        }
    }
}

/// Accepts comma or pipe separated terms
fn parse_terms(raw: &str) -> Vec<String> {
    raw.split([',', '|'])
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect()
}

impl MonetizationConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            super_chat_enabled: env_or("SUPER_CHAT_ENABLED", defaults.super_chat_enabled),
            super_chat_min: env_or("SUPER_CHAT_MIN", defaults.super_chat_min),
            super_chat_max: env_or("SUPER_CHAT_MAX", defaults.super_chat_max),
            donation_min: env_or("DONATION_MIN", defaults.donation_min),
            donation_max: env_or("DONATION_MAX", defaults.donation_max),
            default_currency: env::var("DEFAULT_CURRENCY")
                .map(|c| c.trim().to_uppercase())
                .unwrap_or(defaults.default_currency),
            payment_timeout_ms: env_or("PAYMENT_TIMEOUT_MS", defaults.payment_timeout_ms),
        }
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_millis(self.payment_timeout_ms)
    }
}

impl Default for MonetizationConfig {
    fn default() -> Self {
        Self {
            super_chat_enabled: true,
            super_chat_min: 1.0,
            super_chat_max: 500.0,
            donation_min: 1.0,
            donation_max: 1000.0,
            default_currency: "USD".to_string(),
            payment_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            inbound_queue_capacity: env_or(
                "SESSION_QUEUE_CAPACITY",
                defaults.inbound_queue_capacity,
            ),
            event_buffer: env_or("SESSION_EVENT_BUFFER", defaults.event_buffer),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inbound_queue_capacity: 256,
            event_buffer: 1024,
        }
    }
}

impl LoggingConfig {
    fn from_env() -> Self {
        let format = match env::var("LOG_FORMAT") {
            Ok(raw) if raw.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Self { format }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
        }
    }
}
