use serde::Deserialize;

use crate::error::QueueError;
use crate::jobs::schema::validate_identifier;
use crate::jobs::PayloadRefType;

pub const DEFAULT_QUEUE_COLLECTION: &str = "queue";
pub const DEFAULT_BLOCK_DURATION_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Ten years. Longer leases would overflow timestamp arithmetic.
const MAX_BLOCK_DURATION_MS: u64 = 10 * 365 * 24 * 60 * 60 * 1000;

/// Per-queue options. Every field has a default; callers override what they need.
///
/// `max_retries` counts re-claims after the first one: a job can be handed out
/// `max_retries + 1` times before it is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub payload_ref_type: PayloadRefType,
    pub queue_collection: String,
    pub block_duration_ms: u64,
    pub max_retries: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            payload_ref_type: PayloadRefType::default(),
            queue_collection: DEFAULT_QUEUE_COLLECTION.to_string(),
            block_duration_ms: DEFAULT_BLOCK_DURATION_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl QueueConfig {
    pub fn with_payload_ref_type(mut self, ty: PayloadRefType) -> Self {
        self.payload_ref_type = ty;
        self
    }

    pub fn with_queue_collection(mut self, name: impl Into<String>) -> Self {
        self.queue_collection = name.into();
        self
    }

    pub fn with_block_duration_ms(mut self, ms: u64) -> Self {
        self.block_duration_ms = ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        validate_identifier(&self.queue_collection)?;
        if self.block_duration_ms == 0 {
            return Err(QueueError::Config(
                "block_duration_ms must be greater than zero".to_string(),
            ));
        }
        if self.block_duration_ms > MAX_BLOCK_DURATION_MS {
            return Err(QueueError::Config(format!(
                "block_duration_ms must be at most {MAX_BLOCK_DURATION_MS}"
            )));
        }
        if self.max_retries < 0 {
            return Err(QueueError::Config(
                "max_retries must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn block_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.block_duration_ms as i64)
    }

    /// Total number of times a job may be claimed.
    pub fn max_claims(&self) -> i32 {
        self.max_retries.saturating_add(1)
    }
}

/// Process-level settings for the worker and the ctl binary, read from the
/// environment (and `.env` when present).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub payload_table: String,
    pub queue: QueueConfig,
    pub ensure_schema: bool,
    pub poll_interval_ms: u64,
    pub clean_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("LEASEQ_WORKER_ID", "WORKER_ID").unwrap_or_default();

        let payload_table =
            env_nonempty("LEASEQ_PAYLOAD_TABLE").unwrap_or_else(|| "payloads".to_string());

        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            payload_ref_type: match env_nonempty("LEASEQ_PAYLOAD_REF_TYPE") {
                Some(s) => PayloadRefType::parse(&s)
                    .ok_or_else(|| anyhow::anyhow!("unknown LEASEQ_PAYLOAD_REF_TYPE: {s}"))?,
                None => defaults.payload_ref_type,
            },
            queue_collection: env_nonempty("LEASEQ_QUEUE_TABLE")
                .unwrap_or(defaults.queue_collection),
            block_duration_ms: env_parse("LEASEQ_BLOCK_DURATION_MS")?
                .unwrap_or(defaults.block_duration_ms),
            max_retries: env_parse("LEASEQ_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
        };
        queue.validate()?;
        validate_identifier(&payload_table)?;

        let ensure_schema = env_bool("LEASEQ_ENSURE_SCHEMA").unwrap_or(false);

        let poll_interval_ms = env_parse("LEASEQ_POLL_INTERVAL_MS")?.unwrap_or(250);
        let clean_interval_secs = env_parse("LEASEQ_CLEAN_INTERVAL_SECS")?.unwrap_or(60);

        Ok(Self {
            database_url,
            worker_id,
            payload_table,
            queue,
            ensure_schema,
            poll_interval_ms,
            clean_interval_secs,
        })
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Unset or blank is `None`; a value that does not parse is an error.
fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_nonempty(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}"))
        })
        .transpose()
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    env_nonempty(primary).or_else(|| env_nonempty(fallback))
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
