use outbox::{BackoffPolicy, DispatcherConfig};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which event bus implementation to publish to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    InMemory,
    Nats,
}

impl FromStr for BusType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inmemory" => Ok(BusType::InMemory),
            "nats" => Ok(BusType::Nats),
            other => Err(format!(
                "Invalid BUS_TYPE: {other}. Must be 'inmemory' or 'nats'"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

/// Relay configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bus_type: BusType,
    pub nats_url: String,
    /// JetStream stream holding `<topic>.>`
    pub stream_name: String,
    pub topic: String,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub publish_timeout: Duration,
    pub reclaim_after: Duration,
    pub backoff: BackoffPolicy,
    pub pool: PoolConfig,
    /// Bind address of the health/stats endpoint
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| "DATABASE_URL must be set".to_string())?;

        let bus_type: BusType = lookup("BUS_TYPE")
            .unwrap_or_else(|| "inmemory".to_string())
            .parse()?;

        let nats_url = lookup("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());
        let stream_name = lookup("OUTBOX_STREAM").unwrap_or_else(|| "QUIZ_EVENTS".to_string());
        let topic = lookup("OUTBOX_TOPIC").unwrap_or_else(|| "quiz.events".to_string());

        if topic.is_empty() || topic.contains(['*', '>', ' ']) || topic.ends_with('.') {
            return Err(format!("OUTBOX_TOPIC '{topic}' is not a valid subject prefix"));
        }

        let poll_interval = Duration::from_millis(parse(&lookup, "OUTBOX_POLL_INTERVAL_MS", 1000)?);
        let batch_size: usize = parse(&lookup, "OUTBOX_BATCH_SIZE", 100)?;
        let max_in_flight: usize = parse(&lookup, "OUTBOX_MAX_IN_FLIGHT", 16)?;
        let publish_timeout =
            Duration::from_millis(parse(&lookup, "OUTBOX_PUBLISH_TIMEOUT_MS", 10_000)?);
        let reclaim_after = Duration::from_secs(parse(&lookup, "OUTBOX_RECLAIM_AFTER_SECS", 60)?);

        let backoff = BackoffPolicy {
            base: Duration::from_millis(parse(&lookup, "OUTBOX_BACKOFF_BASE_MS", 1000)?),
            max_interval: Duration::from_millis(parse(&lookup, "OUTBOX_BACKOFF_MAX_MS", 300_000)?),
            max_attempts: parse(&lookup, "OUTBOX_MAX_ATTEMPTS", 5)?,
        };

        let pool = PoolConfig {
            max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            min_connections: parse(&lookup, "DB_MIN_CONNECTIONS", 0)?,
            acquire_timeout_secs: parse(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", 3)?,
        };

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse(&lookup, "PORT", 8091)?;

        if batch_size == 0 {
            return Err("OUTBOX_BATCH_SIZE must be greater than 0".to_string());
        }
        if max_in_flight == 0 {
            return Err("OUTBOX_MAX_IN_FLIGHT must be greater than 0".to_string());
        }
        if poll_interval.is_zero() {
            return Err("OUTBOX_POLL_INTERVAL_MS must be greater than 0".to_string());
        }
        if reclaim_after <= publish_timeout {
            return Err(
                "OUTBOX_RECLAIM_AFTER_SECS must be longer than OUTBOX_PUBLISH_TIMEOUT_MS".to_string(),
            );
        }
        if backoff.base > backoff.max_interval {
            return Err("OUTBOX_BACKOFF_BASE_MS must not exceed OUTBOX_BACKOFF_MAX_MS".to_string());
        }

        Ok(Config {
            database_url,
            bus_type,
            nats_url,
            stream_name,
            topic,
            poll_interval,
            batch_size,
            max_in_flight,
            publish_timeout,
            reclaim_after,
            backoff,
            pool,
            host,
            port,
        })
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            topic: self.topic.clone(),
            poll_interval: self.poll_interval,
            batch_size: self.batch_size,
            max_in_flight: self.max_in_flight,
            publish_timeout: self.publish_timeout,
            reclaim_after: self.reclaim_after,
            backoff: self.backoff,
        }
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/outbox")]).unwrap();

        assert_eq!(config.bus_type, BusType::InMemory);
        assert_eq!(config.topic, "quiz.events");
        assert_eq!(config.stream_name, "QUIZ_EVENTS");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.pool.acquire_timeout_secs, 3);
        assert_eq!(config.port, 8091);
    }

    #[test]
    fn test_database_url_required() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.contains("DATABASE_URL"));
    }

    #[test]
    fn test_overrides_flow_into_dispatcher_config() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/outbox"),
            ("BUS_TYPE", "NATS"),
            ("OUTBOX_TOPIC", "grading.events"),
            ("OUTBOX_MAX_IN_FLIGHT", "4"),
            ("OUTBOX_MAX_ATTEMPTS", "3"),
            ("OUTBOX_BACKOFF_BASE_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.bus_type, BusType::Nats);
        let dispatcher = config.dispatcher_config();
        assert_eq!(dispatcher.topic, "grading.events");
        assert_eq!(dispatcher.max_in_flight, 4);
        assert_eq!(dispatcher.backoff.max_attempts, 3);
        assert_eq!(dispatcher.backoff.base, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let base = ("DATABASE_URL", "postgres://localhost/outbox");

        assert!(config_from(&[base, ("BUS_TYPE", "kafka")]).is_err());
        assert!(config_from(&[base, ("OUTBOX_BATCH_SIZE", "lots")]).is_err());
        assert!(config_from(&[base, ("OUTBOX_BATCH_SIZE", "0")]).is_err());
        assert!(config_from(&[base, ("OUTBOX_TOPIC", "quiz.*")]).is_err());
        assert!(config_from(&[base, ("PORT", "70000")]).is_err());
        assert!(config_from(&[
            base,
            ("OUTBOX_PUBLISH_TIMEOUT_MS", "90000"),
            ("OUTBOX_RECLAIM_AFTER_SECS", "60"),
        ])
        .is_err());
    }
}
