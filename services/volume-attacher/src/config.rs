//! Configuration for the volume attacher.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reattach_reconcile::{
    ExponentialBackoff, PollPolicy, RetryPolicy, DEFAULT_MAX_RETRY_ATTEMPTS,
    DEFAULT_RETRY_DELAY_BASE,
};

/// Attacher configuration, read once per process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Value of the `Cluster` tag on slot volumes.
    pub cluster_name: String,

    /// Value of the `VolumeType` tag on slot volumes.
    pub volume_type: String,

    /// Device path the volume is attached at.
    pub device_name: String,

    /// Budget for whole attach attempts.
    pub attach_retry: RetryPolicy,

    /// Budget for lifecycle completion calls.
    pub report_retry: RetryPolicy,

    /// Wait for the new instance to reach `running`.
    pub instance_wait: PollPolicy,

    /// Wait for the volume to become `available`.
    pub volume_wait: PollPolicy,

    /// Wait for a requested attachment to settle.
    pub attach_wait: PollPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cluster_name = lookup("CLUSTER_NAME").unwrap_or_default();
        let volume_type = lookup("VOLUME_TYPE_TAG").unwrap_or_else(|| "ephemeral".to_string());
        let device_name =
            lookup("VOLUME_DEVICE_NAME").unwrap_or_else(|| "/dev/sdf".to_string());

        let max_retry_attempts: u32 =
            parse_var(&lookup, "MAX_RETRY_ATTEMPTS", DEFAULT_MAX_RETRY_ATTEMPTS)?;
        let retry_delay_base: u64 =
            parse_var(&lookup, "RETRY_DELAY_BASE", DEFAULT_RETRY_DELAY_BASE)?;
        let report_max_attempts: u32 = parse_var(&lookup, "REPORT_MAX_ATTEMPTS", 3)?;
        let poll_interval_secs: u64 = parse_var(&lookup, "POLL_INTERVAL_SECS", 5)?;
        let instance_wait_secs: u64 = parse_var(&lookup, "INSTANCE_WAIT_TIMEOUT_SECS", 120)?;
        let volume_wait_secs: u64 = parse_var(&lookup, "VOLUME_WAIT_TIMEOUT_SECS", 120)?;
        let attach_wait_secs: u64 = parse_var(&lookup, "ATTACH_WAIT_TIMEOUT_SECS", 120)?;

        if max_retry_attempts == 0 {
            bail!("MAX_RETRY_ATTEMPTS must be at least 1");
        }
        if report_max_attempts == 0 {
            bail!("REPORT_MAX_ATTEMPTS must be at least 1");
        }
        if poll_interval_secs == 0 {
            bail!("POLL_INTERVAL_SECS must be at least 1");
        }

        let backoff = ExponentialBackoff::new(retry_delay_base);
        let interval = Duration::from_secs(poll_interval_secs);

        Ok(Self {
            cluster_name,
            volume_type,
            device_name,
            attach_retry: RetryPolicy::new(max_retry_attempts, backoff),
            report_retry: RetryPolicy::new(report_max_attempts, backoff),
            instance_wait: PollPolicy::from_timeout(
                interval,
                Duration::from_secs(instance_wait_secs),
            ),
            volume_wait: PollPolicy::from_timeout(interval, Duration::from_secs(volume_wait_secs)),
            attach_wait: PollPolicy::from_timeout(interval, Duration::from_secs(attach_wait_secs)),
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.cluster_name, "");
        assert_eq!(config.volume_type, "ephemeral");
        assert_eq!(config.device_name, "/dev/sdf");
        assert_eq!(config.attach_retry.max_attempts, 5);
        assert_eq!(config.attach_retry.backoff.base(), 2);
        assert_eq!(config.report_retry.max_attempts, 3);
        assert_eq!(config.instance_wait.interval, Duration::from_secs(5));
        assert_eq!(config.instance_wait.max_attempts, 24);
        assert_eq!(config.attach_wait.max_attempts, 24);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("CLUSTER_NAME", "prod"),
            ("MAX_RETRY_ATTEMPTS", "3"),
            ("RETRY_DELAY_BASE", "3"),
            ("POLL_INTERVAL_SECS", "10"),
            ("VOLUME_WAIT_TIMEOUT_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.attach_retry.max_attempts, 3);
        assert_eq!(config.attach_retry.backoff.base(), 3);
        assert_eq!(config.volume_wait.interval, Duration::from_secs(10));
        assert_eq!(config.volume_wait.max_attempts, 6);
    }

    #[test]
    fn test_rejects_garbage_and_zero_budgets() {
        let err = Config::from_lookup(lookup_from(&[("MAX_RETRY_ATTEMPTS", "five")])).unwrap_err();
        assert!(err.to_string().contains("MAX_RETRY_ATTEMPTS"));

        assert!(Config::from_lookup(lookup_from(&[("MAX_RETRY_ATTEMPTS", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("POLL_INTERVAL_SECS", "0")])).is_err());
    }
}
