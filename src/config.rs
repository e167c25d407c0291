use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyLevel {
    Strict,
    Moderate,
    Permissive,
}

impl SafetyLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strict" => Some(SafetyLevel::Strict),
            "moderate" => Some(SafetyLevel::Moderate),
            "permissive" => Some(SafetyLevel::Permissive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SafetyLevel::Strict => "strict",
            SafetyLevel::Moderate => "moderate",
            SafetyLevel::Permissive => "permissive",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

/// Runtime configuration, read from the environment exactly once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub event_store_url: String,
    pub registry_url: String,
    pub orchestrator_url: String,
    pub orchestrator_token: String,
    pub llm_api_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    /// 5-field cron expression, local time.
    pub schedule_cron: String,
    /// Path of the embedded sqlite store.
    pub database_url: String,
    pub safety_level: SafetyLevel,
    pub safety_min_score: i64,
    pub safety_allow_override: bool,
    pub notifier_url: Option<String>,
    pub community_url: Option<String>,
    /// Days of history the pipeline analyses, 1..=90.
    pub analysis_days: i64,
    /// Concurrency cap for per-entity and per-suggestion work.
    pub concurrency: usize,
    pub pipeline_timeout: Duration,
    pub bind_addr: SocketAddr,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let orchestrator_token = std::env::var("ORCHESTRATOR_TOKEN")
            .map_err(|_| ConfigError("ORCHESTRATOR_TOKEN is required".to_string()))?;
        let llm_api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| ConfigError("LLM_API_KEY is required".to_string()))?;

        let schedule_cron =
            std::env::var("SCHEDULE_CRON").unwrap_or_else(|_| "0 3 * * *".to_string());
        parse_cron(&schedule_cron)
            .map_err(|e| ConfigError(format!("SCHEDULE_CRON '{schedule_cron}' is invalid: {e}")))?;

        let safety_level_raw =
            std::env::var("SAFETY_LEVEL").unwrap_or_else(|_| "moderate".to_string());
        let safety_level = SafetyLevel::parse(&safety_level_raw).ok_or_else(|| {
            ConfigError(format!(
                "SAFETY_LEVEL '{safety_level_raw}' must be strict, moderate or permissive"
            ))
        })?;

        let analysis_days = env_parse("ANALYSIS_DAYS", 30)?;
        if !(1..=90).contains(&analysis_days) {
            return Err(ConfigError(format!(
                "ANALYSIS_DAYS must be between 1 and 90, got {analysis_days}"
            )));
        }

        let concurrency: usize = env_parse("CONCURRENCY", 4)?;
        if concurrency == 0 {
            return Err(ConfigError("CONCURRENCY must be at least 1".to_string()));
        }

        let bind_raw = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8095".to_string());
        let bind_addr = SocketAddr::from_str(&bind_raw)
            .map_err(|e| ConfigError(format!("BIND_ADDR '{bind_raw}' is invalid: {e}")))?;

        Ok(Self {
            event_store_url: env_or("EVENT_STORE_URL", "http://event-store:8006"),
            registry_url: env_or("REGISTRY_URL", "http://device-registry:8021"),
            orchestrator_url: env_or("ORCHESTRATOR_URL", "http://orchestrator:8123"),
            orchestrator_token,
            llm_api_url: env_or("LLM_API_URL", "https://api.openai.com/v1"),
            llm_api_key,
            llm_model: env_or("LLM_MODEL", "gpt-4o-mini"),
            schedule_cron,
            database_url: env_or("DATABASE_URL", "./ha_insight.db"),
            safety_level,
            safety_min_score: env_parse("SAFETY_MIN_SCORE", 60)?,
            safety_allow_override: env_or("SAFETY_ALLOW_OVERRIDE", "true") == "true",
            notifier_url: std::env::var("NOTIFIER_URL").ok().filter(|s| !s.is_empty()),
            community_url: std::env::var("COMMUNITY_URL").ok().filter(|s| !s.is_empty()),
            analysis_days,
            concurrency,
            pipeline_timeout: Duration::from_secs(env_parse("PIPELINE_TIMEOUT_SECS", 300)?),
            bind_addr,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| ConfigError(format!("{key} '{raw}' is invalid: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a 5-field cron expression. The `cron` crate wants a seconds field,
/// so a conventional 5-field expression gets `0 ` prepended.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule, cron::error::Error> {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        cron::Schedule::from_str(&format!("0 {expr}"))
    } else {
        cron::Schedule::from_str(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Timelike, Utc};

    #[test]
    fn five_field_cron_is_accepted() {
        let schedule = parse_cron("0 3 * * *").unwrap();
        let next = schedule.after(&Utc::now()).next().unwrap();
        assert_eq!(next.hour(), 3);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn garbage_cron_is_rejected() {
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn safety_level_parses_known_values_only() {
        assert_eq!(SafetyLevel::parse("strict"), Some(SafetyLevel::Strict));
        assert_eq!(SafetyLevel::parse("moderate"), Some(SafetyLevel::Moderate));
        assert_eq!(
            SafetyLevel::parse("permissive"),
            Some(SafetyLevel::Permissive)
        );
        assert_eq!(SafetyLevel::parse("lenient"), None);
    }
}
