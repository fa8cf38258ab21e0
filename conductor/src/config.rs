use shared_types::WorkerType;

/// Retry ceilings and escalation thresholds for the recovery policy
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    pub temporary_retries: u32,
    pub rate_limit_retries: u32,
    pub agent_unavailable_retries: u32,
    pub data_quality_retries: u32,
    pub critical_retries: u32,
    pub unknown_retries: u32,
    /// First backoff delay; doubles per retry
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Steps at or above this priority can be on the critical path
    pub high_priority_threshold: i32,
    /// Critical-path steps need strictly more dependents than this
    pub critical_dependents_threshold: usize,
    /// An alternate worker type is skipped once this many plan steps already use it
    pub max_alternate_usage: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            temporary_retries: 3,
            rate_limit_retries: 5,
            agent_unavailable_retries: 2,
            data_quality_retries: 1,
            critical_retries: 0,
            unknown_retries: 1,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            high_priority_threshold: 5,
            critical_dependents_threshold: 4,
            max_alternate_usage: 3,
        }
    }
}

/// Default per-request timeouts by worker type
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerTimeouts {
    pub web_research_ms: u64,
    pub academic_research_ms: u64,
    pub news_research_ms: u64,
    pub data_analysis_ms: u64,
}

impl Default for WorkerTimeouts {
    fn default() -> Self {
        Self {
            web_research_ms: 30_000,
            academic_research_ms: 60_000,
            news_research_ms: 30_000,
            data_analysis_ms: 120_000,
        }
    }
}

impl WorkerTimeouts {
    pub fn for_worker(&self, worker_type: WorkerType) -> u64 {
        match worker_type {
            WorkerType::WebResearch => self.web_research_ms,
            WorkerType::AcademicResearch => self.academic_research_ms,
            WorkerType::NewsResearch => self.news_research_ms,
            WorkerType::DataAnalysis => self.data_analysis_ms,
            WorkerType::Planning | WorkerType::Orchestrator => self.web_research_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConductorConfig {
    pub recovery: RecoveryConfig,
    pub timeouts: WorkerTimeouts,
    /// Delegate newly unblocked steps after every completion
    pub auto_advance: bool,
    /// Use `send_stream` when the transport supports it
    pub streaming: bool,
    /// Capacity of the broadcast event channel
    pub event_capacity: usize,
    pub cleanup_max_age_hours: f64,
    pub web_max_results: u32,
    pub news_max_articles: u32,
    pub news_window_days: i64,
    pub academic_databases: Vec<String>,
    pub academic_peer_reviewed_only: bool,
    pub chart_types: Vec<String>,
    /// Emit JSON log lines instead of the compact format
    pub log_json: bool,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            recovery: RecoveryConfig::default(),
            timeouts: WorkerTimeouts::default(),
            auto_advance: true,
            streaming: true,
            event_capacity: 256,
            cleanup_max_age_hours: 24.0,
            web_max_results: 10,
            news_max_articles: 20,
            news_window_days: 30,
            academic_databases: vec![
                "pubmed".to_string(),
                "arxiv".to_string(),
                "semantic-scholar".to_string(),
            ],
            academic_peer_reviewed_only: true,
            chart_types: vec!["bar".to_string(), "line".to_string(), "scatter".to_string()],
            log_json: false,
        }
    }
}

impl ConductorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        let recovery = &defaults.recovery;
        let timeouts = &defaults.timeouts;

        Ok(Self {
            recovery: RecoveryConfig {
                temporary_retries: env_parse(
                    "CONDUCTOR_TEMPORARY_RETRIES",
                    recovery.temporary_retries,
                )?,
                rate_limit_retries: env_parse(
                    "CONDUCTOR_RATE_LIMIT_RETRIES",
                    recovery.rate_limit_retries,
                )?,
                agent_unavailable_retries: env_parse(
                    "CONDUCTOR_AGENT_UNAVAILABLE_RETRIES",
                    recovery.agent_unavailable_retries,
                )?,
                data_quality_retries: env_parse(
                    "CONDUCTOR_DATA_QUALITY_RETRIES",
                    recovery.data_quality_retries,
                )?,
                critical_retries: recovery.critical_retries,
                unknown_retries: env_parse("CONDUCTOR_UNKNOWN_RETRIES", recovery.unknown_retries)?,
                backoff_base_ms: env_parse("CONDUCTOR_BACKOFF_BASE_MS", recovery.backoff_base_ms)?,
                backoff_cap_ms: env_parse("CONDUCTOR_BACKOFF_CAP_MS", recovery.backoff_cap_ms)?,
                high_priority_threshold: env_parse(
                    "CONDUCTOR_HIGH_PRIORITY_THRESHOLD",
                    recovery.high_priority_threshold,
                )?,
                critical_dependents_threshold: env_parse(
                    "CONDUCTOR_CRITICAL_DEPENDENTS_THRESHOLD",
                    recovery.critical_dependents_threshold,
                )?,
                max_alternate_usage: env_parse(
                    "CONDUCTOR_MAX_ALTERNATE_USAGE",
                    recovery.max_alternate_usage,
                )?,
            },
            timeouts: WorkerTimeouts {
                web_research_ms: env_parse("CONDUCTOR_WEB_TIMEOUT_MS", timeouts.web_research_ms)?,
                academic_research_ms: env_parse(
                    "CONDUCTOR_ACADEMIC_TIMEOUT_MS",
                    timeouts.academic_research_ms,
                )?,
                news_research_ms: env_parse("CONDUCTOR_NEWS_TIMEOUT_MS", timeouts.news_research_ms)?,
                data_analysis_ms: env_parse("CONDUCTOR_DATA_TIMEOUT_MS", timeouts.data_analysis_ms)?,
            },
            auto_advance: env_bool("CONDUCTOR_AUTO_ADVANCE", defaults.auto_advance)?,
            streaming: env_bool("CONDUCTOR_STREAMING", defaults.streaming)?,
            event_capacity: env_parse("CONDUCTOR_EVENT_CAPACITY", defaults.event_capacity)?,
            cleanup_max_age_hours: env_parse(
                "CONDUCTOR_CLEANUP_MAX_AGE_HOURS",
                defaults.cleanup_max_age_hours,
            )?,
            web_max_results: env_parse("CONDUCTOR_WEB_MAX_RESULTS", defaults.web_max_results)?,
            news_max_articles: env_parse("CONDUCTOR_NEWS_MAX_ARTICLES", defaults.news_max_articles)?,
            news_window_days: env_parse("CONDUCTOR_NEWS_WINDOW_DAYS", defaults.news_window_days)?,
            academic_databases: env_csv(
                "CONDUCTOR_ACADEMIC_DATABASES",
                &defaults.academic_databases,
            ),
            academic_peer_reviewed_only: env_bool(
                "CONDUCTOR_PEER_REVIEWED_ONLY",
                defaults.academic_peer_reviewed_only,
            )?,
            chart_types: env_csv("CONDUCTOR_CHART_TYPES", &defaults.chart_types),
            log_json: env_str("CONDUCTOR_LOG_FORMAT", "compact") == "json",
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(anyhow::anyhow!(
                "Invalid boolean for env var {key}='{other}'"
            )),
        },
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[String]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_recovery_table() {
        let config = ConductorConfig::default();
        assert_eq!(config.recovery.temporary_retries, 3);
        assert_eq!(config.recovery.rate_limit_retries, 5);
        assert_eq!(config.recovery.agent_unavailable_retries, 2);
        assert_eq!(config.recovery.data_quality_retries, 1);
        assert_eq!(config.recovery.critical_retries, 0);
        assert_eq!(config.recovery.unknown_retries, 1);
        assert_eq!(config.timeouts.for_worker(WorkerType::DataAnalysis), 120_000);
    }

    #[test]
    fn test_env_helpers() {
        std::env::set_var("CONDUCTOR_TEST_PARSE_OK", " 42 ");
        std::env::set_var("CONDUCTOR_TEST_PARSE_BAD", "forty-two");
        std::env::set_var("CONDUCTOR_TEST_BOOL", "off");
        std::env::set_var("CONDUCTOR_TEST_CSV", "a, b,,c");

        assert_eq!(env_parse("CONDUCTOR_TEST_PARSE_OK", 0u32).unwrap(), 42);
        assert!(env_parse("CONDUCTOR_TEST_PARSE_BAD", 0u32).is_err());
        assert_eq!(env_parse("CONDUCTOR_TEST_PARSE_UNSET", 7u32).unwrap(), 7);
        assert!(!env_bool("CONDUCTOR_TEST_BOOL", true).unwrap());
        assert_eq!(
            env_csv("CONDUCTOR_TEST_CSV", &[]),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }
}
