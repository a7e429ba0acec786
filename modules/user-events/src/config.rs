//! Application configuration parsed from environment variables.

use crate::consumer::CommitFailurePolicy;
use event_broker::{ResetPolicy, RetryPolicy};
use std::env;
use std::time::Duration;

/// Runtime configuration shared by the producer and consumer binaries.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Broker bootstrap list (`host:port[,host:port]`)
    pub brokers: String,
    /// Client identity reported to the broker
    pub client_id: String,
    /// Schema registry base URL
    pub schema_registry_url: String,
    /// Topic the pipeline produces to and consumes from
    pub topic: String,
    /// Consumer groups started by the consumer binary
    pub group_ids: Vec<String>,
    /// Transport selection: "kafka" or "inmemory"
    pub broker_type: String,
    /// Start position for groups with no committed offset
    pub reset_policy: ResetPolicy,
    /// What the consume loop does when an offset commit fails
    pub commit_failure_policy: CommitFailurePolicy,
    /// Backoff applied to transient failures across the pipeline
    pub retry: RetryPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let brokers = env::var("BROKERS").unwrap_or_else(|_| "localhost:9992".to_string());

        let client_id = env::var("CLIENT_ID").unwrap_or_else(|_| "user-events-app".to_string());

        let schema_registry_url = env::var("SCHEMA_REGISTRY_URL")
            .unwrap_or_else(|_| "http://localhost:9981".to_string());

        let topic = env::var("TOPIC").unwrap_or_else(|_| "user-events".to_string());

        let group_ids: Vec<String> = env::var("GROUP_IDS")
            .unwrap_or_else(|_| "analytics-group,notifications-group".to_string())
            .split(',')
            .map(|group| group.trim().to_string())
            .filter(|group| !group.is_empty())
            .collect();
        if group_ids.is_empty() {
            return Err("GROUP_IDS must name at least one consumer group".to_string());
        }

        let broker_type = env::var("BROKER_TYPE").unwrap_or_else(|_| "kafka".to_string());

        let reset_policy: ResetPolicy = env::var("RESET_POLICY")
            .unwrap_or_else(|_| "earliest".to_string())
            .parse()
            .map_err(|e| format!("RESET_POLICY: {}", e))?;

        let commit_failure_policy: CommitFailurePolicy = env::var("COMMIT_FAILURE_POLICY")
            .unwrap_or_else(|_| "abort".to_string())
            .parse()
            .map_err(|e| format!("COMMIT_FAILURE_POLICY: {}", e))?;

        // The short alias names are accepted for compatibility with older
        // deployments; the canonical name wins when both are set.
        let max_retries = parse_with_alias("RETRY_MAX_RETRIES", "RETRY_RETRIES", 3u32)?;
        let backoff_multiplier = parse_with_alias("RETRY_BACKOFF_MULTIPLIER", "RETRY_FACTOR", 2.0f64)?;
        let initial_ms = parse_env("RETRY_INITIAL_MS", 300u64)?;
        let max_time_ms = parse_env("RETRY_MAX_TIME_MS", 3000u64)?;

        let retry = RetryPolicy {
            max_retries,
            initial_retry_time: Duration::from_millis(initial_ms),
            backoff_multiplier,
            max_retry_time: Duration::from_millis(max_time_ms),
        };

        Ok(AppConfig {
            brokers,
            client_id,
            schema_registry_url,
            topic,
            group_ids,
            broker_type,
            reset_policy,
            commit_failure_policy,
            retry,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{} must be a valid number, got `{}`", name, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_with_alias<T: std::str::FromStr>(
    canonical: &str,
    alias: &str,
    default: T,
) -> Result<T, String> {
    match env::var(canonical).or_else(|_| env::var(alias)) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{} must be a valid number, got `{}`", canonical, raw)),
        Err(_) => Ok(default),
    }
}
