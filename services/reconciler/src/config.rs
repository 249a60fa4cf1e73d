//! Configuration for the reconciler service.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use azvnet_reconcile::PollPolicy;

use crate::credentials::{DEFAULT_AUTHORITY_HOST, DEFAULT_RESOURCE_MANAGER_ENDPOINT};
use crate::handler::UnknownActionPolicy;

/// Which provider implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Azure Resource Manager over HTTPS.
    Arm,
    /// Process-local state, for development.
    Memory,
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "arm" => Ok(Backend::Arm),
            "memory" => Ok(Backend::Memory),
            other => Err(anyhow!("unknown backend '{other}'")),
        }
    }
}

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Key for encrypted credential fields. Empty means plaintext.
    pub crypto_key: String,

    pub backend: Backend,

    /// Resource Manager endpoint, also the token audience.
    pub arm_endpoint: String,

    /// Azure AD authority host.
    pub authority_host: String,

    /// Delay between operation status polls.
    pub poll_interval: Duration,

    /// Upper bound on one remote operation. `None` waits indefinitely.
    pub operation_timeout: Option<Duration>,

    /// Upper bound on one whole request.
    pub request_timeout: Duration,

    pub unknown_actions: UnknownActionPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_level = var("AZVNET_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let crypto_key = var("AZVNET_CRYPTO_KEY").unwrap_or_default();

        let backend: Backend = var("AZVNET_BACKEND")
            .as_deref()
            .unwrap_or("arm")
            .parse::<Backend>()
            .context("AZVNET_BACKEND")?;

        let arm_endpoint = var("AZVNET_ARM_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_RESOURCE_MANAGER_ENDPOINT.to_string());
        let authority_host =
            var("AZVNET_AUTHORITY_HOST").unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string());

        let poll_interval = match number(&var, "AZVNET_POLL_INTERVAL_MS", 2000)? {
            0 => return Err(anyhow!("AZVNET_POLL_INTERVAL_MS must be greater than 0")),
            ms => Duration::from_millis(ms),
        };

        let operation_timeout = match number(&var, "AZVNET_OPERATION_TIMEOUT_SECS", 1800)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let request_timeout =
            Duration::from_secs(number(&var, "AZVNET_REQUEST_TIMEOUT_SECS", 3600)?);

        let unknown_actions: UnknownActionPolicy = match var("AZVNET_UNKNOWN_ACTION") {
            Some(value) => value
                .parse::<UnknownActionPolicy>()
                .map_err(|e: String| anyhow!(e))
                .context("AZVNET_UNKNOWN_ACTION")?,
            None => UnknownActionPolicy::default(),
        };

        Ok(Self {
            log_level,
            crypto_key,
            backend,
            arm_endpoint,
            authority_host,
            poll_interval,
            operation_timeout,
            request_timeout,
            unknown_actions,
        })
    }

    /// Polling policy for remote operations.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval, self.operation_timeout)
    }
}

fn number(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match var(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{key} must be a non-negative integer, got '{value}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.backend, Backend::Arm);
        assert_eq!(config.log_level, "info");
        assert!(config.crypto_key.is_empty());
        assert_eq!(config.arm_endpoint, DEFAULT_RESOURCE_MANAGER_ENDPOINT);
        assert_eq!(config.poll_policy(), PollPolicy::default());
        assert_eq!(config.request_timeout, Duration::from_secs(3600));
        assert_eq!(config.unknown_actions, UnknownActionPolicy::Ignore);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("AZVNET_BACKEND", "memory"),
            ("AZVNET_POLL_INTERVAL_MS", "50"),
            ("AZVNET_OPERATION_TIMEOUT_SECS", "0"),
            ("AZVNET_UNKNOWN_ACTION", "reject"),
        ])
        .unwrap();

        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.operation_timeout, None);
        assert_eq!(config.unknown_actions, UnknownActionPolicy::Reject);
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("AZVNET_BACKEND", "classic")]).is_err());
        assert!(load(&[("AZVNET_POLL_INTERVAL_MS", "-1")]).is_err());
        assert!(load(&[("AZVNET_POLL_INTERVAL_MS", "0")]).is_err());
        assert!(load(&[("AZVNET_UNKNOWN_ACTION", "drop")]).is_err());
    }
}
