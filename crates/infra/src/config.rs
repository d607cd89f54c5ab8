//! Worker configuration loading.
//!
//! | variable | default |
//! |---|---|
//! | `PORTAGE_WORKER_NAME` | `portage-worker` |
//! | `PORTAGE_POLL_INTERVAL_MS` | `20000` |
//! | `PORTAGE_CLAIM_TTL_SECS` | `3600` (`0` disables stale-claim recovery) |
//! | `PORTAGE_RSA_KEY_BITS` | `2048` |
//! | `PORTAGE_TRAVERSAL` | `stack` (or `recursive`) |

use std::str::FromStr;
use std::time::Duration;

use portage_security::DEFAULT_RSA_BITS;

use crate::copier::Traversal;

const MIN_RSA_BITS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Thread name and log label.
    pub name: String,
    /// Delay between polls while searching for or waiting on a job.
    pub poll_interval: Duration,
    /// How long a claim may wait for credentials. `None` disables reaping.
    pub claim_ttl: Option<Duration>,
    pub rsa_key_bits: usize,
    pub traversal: Traversal,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "portage-worker".to_string(),
            poll_interval: Duration::from_millis(20_000),
            claim_ttl: Some(Duration::from_secs(3_600)),
            rsa_key_bits: DEFAULT_RSA_BITS,
            traversal: Traversal::Stack,
        }
    }
}

impl WorkerConfig {
    /// Read `PORTAGE_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("PORTAGE_WORKER_NAME").filter(|n| !n.trim().is_empty()) {
            config.name = name.trim().to_string();
        }
        if let Some(ms) = parse::<u64>(&lookup, "PORTAGE_POLL_INTERVAL_MS")? {
            if ms == 0 {
                return Err(invalid("PORTAGE_POLL_INTERVAL_MS", "0", "must be positive"));
            }
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&lookup, "PORTAGE_CLAIM_TTL_SECS")? {
            config.claim_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(bits) = parse::<usize>(&lookup, "PORTAGE_RSA_KEY_BITS")? {
            if bits < MIN_RSA_BITS {
                return Err(invalid(
                    "PORTAGE_RSA_KEY_BITS",
                    &bits.to_string(),
                    &format!("must be at least {MIN_RSA_BITS}"),
                ));
            }
            config.rsa_key_bits = bits;
        }
        if let Some(raw) = lookup("PORTAGE_TRAVERSAL") {
            config.traversal = raw
                .parse::<Traversal>()
                .map_err(|reason| invalid("PORTAGE_TRAVERSAL", &raw, &reason))?;
        }

        Ok(config)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_claim_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.claim_ttl = ttl;
        self
    }

    pub fn with_rsa_key_bits(mut self, bits: usize) -> Self {
        self.rsa_key_bits = bits;
        self
    }

    pub fn with_traversal(mut self, traversal: Traversal) -> Self {
        self.traversal = traversal;
        self
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
