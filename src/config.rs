use std::env;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueSettings,
    pub worker: WorkerConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed by the CORS layer (the admin dashboard).
    pub cors_allowed_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Which queue backend the service talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendKind {
    Sqlite,
    Memory,
}

impl FromStr for QueueBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(QueueBackendKind::Sqlite),
            "memory" => Ok(QueueBackendKind::Memory),
            _ => Err(ConfigError::InvalidValue("QUEUE_BACKEND".to_string())),
        }
    }
}

/// Longest visibility timeout a queue accepts (12 hours).
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = 43_200;

/// Retention bounds: one minute to 14 days.
pub const MIN_RETENTION_PERIOD_SECONDS: u64 = 60;
pub const MAX_RETENTION_PERIOD_SECONDS: u64 = 1_209_600;

/// Longest backoff and receive wait accepted from the environment (15 minutes).
pub const MAX_WAIT_SECONDS: u64 = 900;

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// When false, producers fall back to direct delivery and the worker is not started.
    pub enabled: bool,
    pub backend: QueueBackendKind,
    pub queue_name: String,
    pub dead_letter_queue_name: String,
    /// Retry budget stamped on every new envelope.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub retry_base_delay_seconds: u64,
    /// Cap for exponential backoff (seconds).
    pub retry_max_delay_seconds: u64,
    /// How long a batch receive waits for messages to become available.
    pub receive_wait_seconds: u64,
    pub visibility_timeout_seconds: u64,
    pub dead_letter_visibility_timeout_seconds: u64,
    pub retention_period_seconds: u64,
    /// Receives without acknowledgement before the backend redrives a message to the DLQ.
    pub max_receive_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub autostart: bool,
    pub batch_size: usize,
    pub poll_interval_seconds: u64,
    /// How long shutdown waits for an in-flight batch to finish.
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Broadcast endpoint. Without it notifications are only logged.
    pub webhook_url: Option<String>,
    pub timeout_seconds: u64,
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        let backend = match env::var("QUEUE_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.queue.backend,
        };

        let queue = QueueSettings {
            enabled: env_bool("QUEUE_ENABLED", defaults.queue.enabled),
            backend,
            queue_name: env_string("QUEUE_NAME", &defaults.queue.queue_name),
            dead_letter_queue_name: env_string(
                "QUEUE_DEAD_LETTER_NAME",
                &defaults.queue.dead_letter_queue_name,
            ),
            max_retries: env_or("QUEUE_MAX_RETRIES", defaults.queue.max_retries),
            retry_base_delay_seconds: env_or(
                "QUEUE_RETRY_BASE_DELAY_SECONDS",
                defaults.queue.retry_base_delay_seconds,
            ),
            retry_max_delay_seconds: env_or(
                "QUEUE_RETRY_MAX_DELAY_SECONDS",
                defaults.queue.retry_max_delay_seconds,
            ),
            receive_wait_seconds: env_or(
                "QUEUE_RECEIVE_WAIT_SECONDS",
                defaults.queue.receive_wait_seconds,
            ),
            visibility_timeout_seconds: env_or(
                "QUEUE_VISIBILITY_TIMEOUT_SECONDS",
                defaults.queue.visibility_timeout_seconds,
            ),
            dead_letter_visibility_timeout_seconds: env_or(
                "QUEUE_DEAD_LETTER_VISIBILITY_TIMEOUT_SECONDS",
                defaults.queue.dead_letter_visibility_timeout_seconds,
            ),
            retention_period_seconds: env_or(
                "QUEUE_RETENTION_PERIOD_SECONDS",
                defaults.queue.retention_period_seconds,
            ),
            max_receive_count: env_or("QUEUE_MAX_RECEIVE_COUNT", defaults.queue.max_receive_count),
        };

        queue.validate()?;

        Ok(Config {
            server: ServerConfig {
                host: env_string("HOST", &defaults.server.host),
                port: env::var("PORT")
                    .unwrap_or_else(|_| defaults.server.port.to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                cors_allowed_origin: env_string(
                    "CORS_ALLOWED_ORIGIN",
                    &defaults.server.cors_allowed_origin,
                ),
            },
            database: DatabaseConfig {
                url: env_string("DATABASE_URL", &defaults.database.url),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                ),
            },
            queue,
            worker: WorkerConfig {
                autostart: env_bool("WORKER_AUTOSTART", defaults.worker.autostart),
                batch_size: env_or("WORKER_BATCH_SIZE", defaults.worker.batch_size),
                poll_interval_seconds: env_or(
                    "WORKER_POLL_INTERVAL_SECONDS",
                    defaults.worker.poll_interval_seconds,
                ),
                shutdown_timeout_seconds: env_or(
                    "WORKER_SHUTDOWN_TIMEOUT_SECONDS",
                    defaults.worker.shutdown_timeout_seconds,
                ),
            },
            delivery: DeliveryConfig {
                webhook_url: env::var("DELIVERY_WEBHOOK_URL")
                    .ok()
                    .filter(|v| !v.trim().is_empty()),
                timeout_seconds: env_or(
                    "DELIVERY_TIMEOUT_SECONDS",
                    defaults.delivery.timeout_seconds,
                ),
            },
        })
    }
}

impl QueueSettings {
    /// Reject names and periods the queue backends cannot represent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_name == self.dead_letter_queue_name {
            return Err(ConfigError::InvalidValue(
                "QUEUE_DEAD_LETTER_NAME".to_string(),
            ));
        }

        let bounded = [
            (
                "QUEUE_VISIBILITY_TIMEOUT_SECONDS",
                self.visibility_timeout_seconds,
                0,
                MAX_VISIBILITY_TIMEOUT_SECONDS,
            ),
            (
                "QUEUE_DEAD_LETTER_VISIBILITY_TIMEOUT_SECONDS",
                self.dead_letter_visibility_timeout_seconds,
                0,
                MAX_VISIBILITY_TIMEOUT_SECONDS,
            ),
            (
                "QUEUE_RETENTION_PERIOD_SECONDS",
                self.retention_period_seconds,
                MIN_RETENTION_PERIOD_SECONDS,
                MAX_RETENTION_PERIOD_SECONDS,
            ),
            (
                "QUEUE_RETRY_BASE_DELAY_SECONDS",
                self.retry_base_delay_seconds,
                0,
                MAX_WAIT_SECONDS,
            ),
            (
                "QUEUE_RETRY_MAX_DELAY_SECONDS",
                self.retry_max_delay_seconds,
                0,
                MAX_WAIT_SECONDS,
            ),
            (
                "QUEUE_RECEIVE_WAIT_SECONDS",
                self.receive_wait_seconds,
                0,
                MAX_WAIT_SECONDS,
            ),
        ];
        for (name, value, min, max) in bounded {
            if !(min..=max).contains(&value) {
                return Err(ConfigError::InvalidValue(name.to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            enabled: true,
            backend: QueueBackendKind::Sqlite,
            queue_name: "notification-processing-queue".to_string(),
            dead_letter_queue_name: "notification-dead-letter-queue".to_string(),
            max_retries: 3,
            retry_base_delay_seconds: 30,
            retry_max_delay_seconds: 480,
            receive_wait_seconds: 5,
            visibility_timeout_seconds: 30,
            dead_letter_visibility_timeout_seconds: 60,
            retention_period_seconds: 1_209_600, // 14 days
            max_receive_count: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                cors_allowed_origin: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/queue.db".to_string(),
                max_connections: 5,
            },
            queue: QueueSettings::default(),
            worker: WorkerConfig {
                autostart: true,
                batch_size: 10,
                poll_interval_seconds: 10,
                shutdown_timeout_seconds: 15,
            },
            delivery: DeliveryConfig {
                webhook_url: None,
                timeout_seconds: 10,
            },
        }
    }
}
