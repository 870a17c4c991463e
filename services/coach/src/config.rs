//! Application Configuration Module
//!
//! Loads the coach's settings from environment variables (and `.env`) into a
//! single struct that is passed to the rest of the binary.

use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
pub const DEFAULT_STORE_PATH: &str = "interviews.json";
pub const DEFAULT_USER_ID: &str = "local";
/// Upper bound for `COACH_MAX_MINUTES`: one day.
pub const MAX_SESSION_MINUTES: u64 = 24 * 60;

/// Holds all configuration loaded from the environment.
#[derive(Debug)]
pub struct Config {
    pub openai_api_key: Option<SecretString>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub log_level: Level,
    pub user_id: String,
    pub store_path: PathBuf,
    pub prompts_dir: Option<PathBuf>,
    pub max_minutes: u64,
    pub rearm_delay: Duration,
    pub intro_questions: usize,
    pub question_count: usize,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `OPENAI_API_KEY`: Secret key for the chat API. Required to run an interview.
    // *   `OPENAI_BASE_URL`: (Optional) OpenAI-compatible endpoint. Defaults to the OpenAI API.
    // *   `CHAT_MODEL`: (Optional) Model for questions, feedback and scoring. Defaults to "gpt-4o".
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    // *   `COACH_USER_ID`: (Optional) Owner of saved interviews. Defaults to "local".
    // *   `COACH_STORE_PATH`: (Optional) JSON file for saved interviews.
    // *   `COACH_PROMPTS_DIR`: (Optional) Directory of `.md` prompt overrides.
    // *   `COACH_MAX_MINUTES`, `COACH_REARM_DELAY_MS`, `COACH_INTRO_QUESTIONS`,
    //     `COACH_QUESTION_COUNT`: (Optional) Session policy.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let openai_api_key = lookup("OPENAI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        let max_minutes = parse_or(&lookup, "COACH_MAX_MINUTES", 30)?;
        if max_minutes > MAX_SESSION_MINUTES {
            return Err(ConfigError::InvalidValue {
                var: "COACH_MAX_MINUTES".to_string(),
                value: max_minutes.to_string(),
            });
        }

        Ok(Self {
            openai_api_key,
            openai_base_url: lookup("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            chat_model: lookup("CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            log_level,
            user_id: lookup("COACH_USER_ID").unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            store_path: lookup("COACH_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            prompts_dir: lookup("COACH_PROMPTS_DIR").map(PathBuf::from),
            max_minutes,
            rearm_delay: Duration::from_millis(parse_or(&lookup, "COACH_REARM_DELAY_MS", 1000)?),
            intro_questions: parse_or(&lookup, "COACH_INTRO_QUESTIONS", 0)?,
            question_count: parse_or(&lookup, "COACH_QUESTION_COUNT", 5)?,
        })
    }

    /// Moves the API key out. Only the interview command needs it.
    pub fn take_api_key(&mut self) -> Result<SecretString, ConfigError> {
        self.openai_api_key
            .take()
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))
    }

    /// `None` when `COACH_MAX_MINUTES` is 0.
    pub fn max_duration(&self) -> Option<Duration> {
        (self.max_minutes > 0).then(|| Duration::from_secs(self.max_minutes.saturating_mul(60)))
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let mut config = Config::from_lookup(lookup(&[])).unwrap();

        assert!(config.take_api_key().is_err());
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.openai_base_url, DEFAULT_BASE_URL);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.store_path, PathBuf::from("interviews.json"));
        assert_eq!(config.max_duration(), Some(Duration::from_secs(30 * 60)));
        assert_eq!(config.rearm_delay, Duration::from_millis(1000));
        assert_eq!(config.question_count, 5);
        assert_eq!(config.intro_questions, 0);
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("RUST_LOG", "debug"),
            ("COACH_MAX_MINUTES", "0"),
            ("COACH_INTRO_QUESTIONS", " 2 "),
            ("COACH_PROMPTS_DIR", "prompts"),
        ]))
        .unwrap();

        assert_eq!(config.take_api_key().unwrap().expose_secret(), "sk-test");
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.max_duration(), None);
        assert_eq!(config.intro_questions, 2);
        assert_eq!(config.prompts_dir, Some(PathBuf::from("prompts")));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[("COACH_QUESTION_COUNT", "five")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref var, .. } if var == "COACH_QUESTION_COUNT"));

        let err = Config::from_lookup(lookup(&[("COACH_MAX_MINUTES", "18446744073709551615")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref var, .. } if var == "COACH_MAX_MINUTES"));

        let config = Config::from_lookup(lookup(&[("COACH_MAX_MINUTES", "1440")])).unwrap();
        assert_eq!(config.max_duration(), Some(Duration::from_secs(24 * 60 * 60)));

        let err = Config::from_lookup(lookup(&[("RUST_LOG", "loud")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(_)));
    }

    #[test]
    fn test_api_key_is_not_printed() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-very-secret")])).unwrap();
        assert!(!format!("{config:?}").contains("sk-very-secret"));
    }
}
