//! Environment-driven configuration
//!
//! Values are read once at startup (after `.env` is loaded) and passed
//! explicitly to the components that need them.

use crate::error::ProcessingError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_MAX_ITERATIONS: u32 = 15;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_STUCK_THRESHOLD_MINUTES: i64 = 10;
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 3;
/// Longest stuck threshold a caller may ask for (one week)
pub const MAX_STUCK_THRESHOLD_MINUTES: i64 = 7 * 24 * 60;
pub const DEFAULT_ORPHAN_AGE_DAYS: i64 = 5;
pub const DEFAULT_MAX_ORPHANS_PER_RUN: usize = 20;
/// Upper bound on the orphan age a caller may ask for
pub const MAX_ORPHAN_AGE_DAYS: i64 = 365;

const DEFAULT_LEDGER_TOKEN_URL: &str =
    "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub max_iterations: u32,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub base_url: String,
    pub company_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub seed_refresh_token: String,
    pub token_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub agent: AgentConfig,
    pub ledger: Option<LedgerConfig>,
    pub database_url: Option<String>,
    pub port: u16,
    pub stuck_threshold_minutes: i64,
    pub max_recovery_attempts: u32,
    pub orphan_age_days: i64,
    pub max_orphans_per_run: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let agent = AgentConfig {
            api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            model: env::var("AGENT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            max_tokens: parse_var("AGENT_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
            max_iterations: parse_var("AGENT_MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS)?,
            request_timeout: Duration::from_secs(parse_var(
                "HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
        };

        if agent.max_iterations == 0 {
            return Err(ProcessingError::ConfigError(
                "AGENT_MAX_ITERATIONS must be at least 1".to_string(),
            ));
        }

        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw.parse().map_err(|_| {
                ProcessingError::ConfigError(format!("Invalid port: {}", raw))
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let stuck_threshold_minutes =
            parse_var("STUCK_THRESHOLD_MINUTES", DEFAULT_STUCK_THRESHOLD_MINUTES)?;
        if !(0..=MAX_STUCK_THRESHOLD_MINUTES).contains(&stuck_threshold_minutes) {
            return Err(ProcessingError::ConfigError(format!(
                "STUCK_THRESHOLD_MINUTES must be between 0 and {}",
                MAX_STUCK_THRESHOLD_MINUTES
            )));
        }

        let orphan_age_days = parse_var("ORPHAN_AGE_DAYS", DEFAULT_ORPHAN_AGE_DAYS)?;
        if !(0..=MAX_ORPHAN_AGE_DAYS).contains(&orphan_age_days) {
            return Err(ProcessingError::ConfigError(format!(
                "ORPHAN_AGE_DAYS must be between 0 and {}",
                MAX_ORPHAN_AGE_DAYS
            )));
        }

        Ok(Self {
            agent,
            ledger: LedgerConfig::from_env(),
            database_url: env::var("DATABASE_URL")
                .or_else(|_| env::var("POSTGRES_URL"))
                .ok(),
            port,
            stuck_threshold_minutes,
            max_recovery_attempts: parse_var(
                "MAX_RECOVERY_ATTEMPTS",
                DEFAULT_MAX_RECOVERY_ATTEMPTS,
            )?,
            orphan_age_days,
            max_orphans_per_run: parse_var("MAX_ORPHANS_PER_RUN", DEFAULT_MAX_ORPHANS_PER_RUN)?,
        })
    }
}

impl LedgerConfig {
    /// `None` unless every required ledger variable is present
    fn from_env() -> Option<Self> {
        Some(Self {
            base_url: env::var("LEDGER_BASE_URL").ok()?.trim_end_matches('/').to_string(),
            company_id: env::var("LEDGER_COMPANY_ID").ok()?,
            client_id: env::var("LEDGER_CLIENT_ID").ok()?,
            client_secret: env::var("LEDGER_CLIENT_SECRET").ok()?,
            seed_refresh_token: env::var("LEDGER_REFRESH_TOKEN").ok()?,
            token_url: env::var("LEDGER_TOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_LEDGER_TOKEN_URL.to_string()),
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        ProcessingError::ConfigError(format!("{} has invalid value '{}'", name, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_rejects_garbage() {
        let parsed: Result<u32> = parse_value("AGENT_MAX_ITERATIONS", "fifteen");
        assert!(matches!(parsed, Err(ProcessingError::ConfigError(_))));

        let parsed: u32 = parse_value("AGENT_MAX_ITERATIONS", " 15 ").unwrap();
        assert_eq!(parsed, 15);
    }

    #[test]
    fn test_parse_var_defaults_when_unset() {
        let value: u64 = parse_var("EXPENSE_AGENT_TEST_UNSET_VARIABLE", 30).unwrap();
        assert_eq!(value, 30);
    }
}
