use facetalk_core::{RetryPolicy, VoiceGate};
use secrecy::SecretString;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub avatar_api_key: SecretString,
    pub convai_api_key: SecretString,
    pub face_id: String,
    pub agent_id: String,
    pub avatar_ws_url: String,
    pub convai_api_base: String,
    /// Origin of the signed-URL proxy. Direct issuance is used when absent.
    pub signed_url_proxy: Option<String>,
    pub system_prompt: Option<String>,
    pub connect_timeout: Duration,
    /// Wait for the avatar service to start rendering.
    pub avatar_connect_timeout: Duration,
    pub settle_delay: Duration,
    pub retry: RetryPolicy,
    pub priming_bytes: usize,
    pub voice_gate: VoiceGate,
    pub log_level: Level,
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let avatar_api_key = SecretString::from(required("AVATAR_API_KEY")?);
        let convai_api_key = SecretString::from(required("CONVAI_API_KEY")?);
        let face_id = required("AVATAR_FACE_ID")?;
        let agent_id = required("CONVAI_AGENT_ID")?;

        let avatar_ws_url = optional("AVATAR_WS_URL")
            .unwrap_or_else(|| avatar_stream::ws::DEFAULT_AVATAR_WS_URL.to_string());
        let convai_api_base = optional("CONVAI_API_BASE")
            .unwrap_or_else(|| convai_realtime::signed_url::DEFAULT_API_BASE.to_string());
        let signed_url_proxy = optional("SIGNED_URL_PROXY_URL");
        let system_prompt = optional("SYSTEM_PROMPT");

        let connect_timeout = Duration::from_millis(parse_or("CONNECT_TIMEOUT_MS", 10_000u64)?);
        let avatar_connect_timeout =
            Duration::from_millis(parse_or("AVATAR_CONNECT_TIMEOUT_MS", 15_000u64)?);
        let settle_delay = Duration::from_millis(parse_or("SETTLE_DELAY_MS", 500u64)?);

        let max_attempts = parse_or("MAX_ATTEMPTS", 3u32)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let base_delay = Duration::from_millis(parse_or("RETRY_DELAY_MS", 2_000u64)?);
        // The backoff grows by at most one second over the base delay.
        let retry = RetryPolicy {
            max_attempts,
            base_delay,
            max_delay: base_delay + Duration::from_millis(1_000),
            ..RetryPolicy::default()
        };

        let priming_bytes = parse_or("PRIMING_BYTES", 1024usize)?;
        if !(1024..=6000).contains(&priming_bytes) {
            return Err(ConfigError::InvalidValue(
                "PRIMING_BYTES".to_string(),
                format!("{} is outside 1024..=6000", priming_bytes),
            ));
        }

        let voice_gate = parse_or("VOICE_GATE", VoiceGate::Strict)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            avatar_api_key,
            convai_api_key,
            face_id,
            agent_id,
            avatar_ws_url,
            convai_api_base,
            signed_url_proxy,
            system_prompt,
            connect_timeout,
            avatar_connect_timeout,
            settle_delay,
            retry,
            priming_bytes,
            voice_gate,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;

    const ALL_VARS: [&str; 16] = [
        "AVATAR_API_KEY",
        "CONVAI_API_KEY",
        "AVATAR_FACE_ID",
        "CONVAI_AGENT_ID",
        "AVATAR_WS_URL",
        "CONVAI_API_BASE",
        "SIGNED_URL_PROXY_URL",
        "SYSTEM_PROMPT",
        "CONNECT_TIMEOUT_MS",
        "AVATAR_CONNECT_TIMEOUT_MS",
        "SETTLE_DELAY_MS",
        "MAX_ATTEMPTS",
        "RETRY_DELAY_MS",
        "PRIMING_BYTES",
        "VOICE_GATE",
        "RUST_LOG",
    ];

    fn clear_env_vars() {
        unsafe {
            for var in ALL_VARS {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("AVATAR_API_KEY", "avatar-key");
            env::set_var("CONVAI_API_KEY", "convai-key");
            env::set_var("AVATAR_FACE_ID", "0c2b8b04-5274-41f1-a21c-d5c98322efa9");
            env::set_var("CONVAI_AGENT_ID", "agent_123");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("CONVAI_AGENT_ID".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: CONVAI_AGENT_ID"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.avatar_api_key.expose_secret(), "avatar-key");
        assert_eq!(config.convai_api_key.expose_secret(), "convai-key");
        assert_eq!(config.agent_id, "agent_123");
        assert_eq!(config.convai_api_base, "https://api.elevenlabs.io");
        assert_eq!(config.signed_url_proxy, None);
        assert_eq!(config.system_prompt, None);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.avatar_connect_timeout, Duration::from_secs(15));
        assert_eq!(config.settle_delay, Duration::from_millis(500));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.priming_bytes, 1024);
        assert_eq!(config.voice_gate, VoiceGate::Strict);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("SIGNED_URL_PROXY_URL", "http://localhost:3000");
            env::set_var("SYSTEM_PROMPT", "Be brief.");
            env::set_var("CONNECT_TIMEOUT_MS", "2500");
            env::set_var("AVATAR_CONNECT_TIMEOUT_MS", "20000");
            env::set_var("MAX_ATTEMPTS", "5");
            env::set_var("RETRY_DELAY_MS", "1000");
            env::set_var("PRIMING_BYTES", "6000");
            env::set_var("VOICE_GATE", "level");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(
            config.signed_url_proxy.as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(config.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.avatar_connect_timeout, Duration::from_secs(20));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(1000));
        assert_eq!(config.retry.max_delay, Duration::from_millis(2000));
        assert_eq!(config.priming_bytes, 6000);
        assert_eq!(config.voice_gate, VoiceGate::Level);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_credentials() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::remove_var("CONVAI_API_KEY");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "CONVAI_API_KEY"),
            _ => panic!("Expected MissingVar for CONVAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_blank_agent_id_is_missing() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("CONVAI_AGENT_ID", "   ");
        }

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "CONVAI_AGENT_ID"));
    }

    #[test]
    #[serial]
    fn test_config_invalid_values() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("PRIMING_BYTES", "512");
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "PRIMING_BYTES"));

        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("VOICE_GATE", "loose");
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "VOICE_GATE"));

        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "RUST_LOG"));
    }
}
