//! Router configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What the registry does with a tenant that fails validation.
///
/// Cross-tenant problems (domain conflicts, duplicate ids) always reject the
/// whole load regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidTenantPolicy {
    /// Reject the whole load.
    #[default]
    Abort,
    /// Drop the offending tenant, log it, load the rest.
    SkipAndLog,
}

impl FromStr for InvalidTenantPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" | "skip_and_log" => Ok(Self::SkipAndLog),
            other => Err(format!("expected 'abort' or 'skip_and_log', got '{other}'")),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Minimum similarity (0.0..1.0) a fuzzy domain candidate must reach.
    pub fuzzy_threshold: f64,
    /// Per-attempt classifier timeout.
    pub classifier_timeout: Duration,
    /// Retries after the first classifier attempt.
    pub classifier_max_retries: u32,
    /// Base delay for exponential backoff between classifier attempts.
    pub classifier_backoff: Duration,
    /// Where mail for an unidentified tenant goes.
    pub catch_all_mailbox: String,
    /// Registry-wide destination when a tenant has no rule for a category.
    pub default_mailbox: Option<String>,
    /// Handling of individually invalid tenants at load time.
    pub invalid_tenant_policy: InvalidTenantPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.5,
            classifier_timeout: Duration::from_secs(10),
            classifier_max_retries: 2,
            classifier_backoff: Duration::from_millis(200),
            catch_all_mailbox: "unassigned@localhost".to_string(),
            default_mailbox: None,
            invalid_tenant_policy: InvalidTenantPolicy::Abort,
        }
    }
}

impl RouterConfig {
    /// Build config from `MAIL_ROUTER_*` environment variables.
    ///
    /// Unset variables keep their defaults; set but unparsable ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (env, test map, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parsed::<f64, _>(&lookup, "MAIL_ROUTER_FUZZY_THRESHOLD")? {
            config.fuzzy_threshold = v;
        }
        if let Some(ms) = parsed::<u64, _>(&lookup, "MAIL_ROUTER_CLASSIFIER_TIMEOUT_MS")? {
            config.classifier_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parsed::<u32, _>(&lookup, "MAIL_ROUTER_CLASSIFIER_MAX_RETRIES")? {
            config.classifier_max_retries = n;
        }
        if let Some(ms) = parsed::<u64, _>(&lookup, "MAIL_ROUTER_CLASSIFIER_BACKOFF_MS")? {
            config.classifier_backoff = Duration::from_millis(ms);
        }
        if let Some(mailbox) = lookup("MAIL_ROUTER_CATCH_ALL").filter(|s| !s.trim().is_empty()) {
            config.catch_all_mailbox = mailbox.trim().to_string();
        }
        config.default_mailbox = lookup("MAIL_ROUTER_DEFAULT_MAILBOX")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(policy) = parsed::<InvalidTenantPolicy, _>(&lookup, "MAIL_ROUTER_INVALID_TENANT_POLICY")? {
            config.invalid_tenant_policy = policy;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.fuzzy_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "fuzzy_threshold".into(),
                message: format!("must be in [0.0, 1.0), got {}", self.fuzzy_threshold),
            });
        }
        if self.classifier_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "classifier_timeout".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.catch_all_mailbox.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "catch_all_mailbox".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RouterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fuzzy_threshold, 0.5);
        assert!(config.default_mailbox.is_none());
        assert_eq!(config.invalid_tenant_policy, InvalidTenantPolicy::Abort);
    }

    #[test]
    fn empty_lookup_keeps_defaults() {
        let config = RouterConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.classifier_max_retries, 2);
        assert_eq!(config.catch_all_mailbox, "unassigned@localhost");
    }

    #[test]
    fn overrides_from_lookup() {
        let config = RouterConfig::from_lookup(lookup_from(&[
            ("MAIL_ROUTER_FUZZY_THRESHOLD", "0.7"),
            ("MAIL_ROUTER_CLASSIFIER_TIMEOUT_MS", "2500"),
            ("MAIL_ROUTER_CLASSIFIER_MAX_RETRIES", "0"),
            ("MAIL_ROUTER_CATCH_ALL", "triage@ops.example"),
            ("MAIL_ROUTER_DEFAULT_MAILBOX", "fallback@ops.example"),
            ("MAIL_ROUTER_INVALID_TENANT_POLICY", "skip_and_log"),
        ]))
        .unwrap();
        assert_eq!(config.fuzzy_threshold, 0.7);
        assert_eq!(config.classifier_timeout, Duration::from_millis(2500));
        assert_eq!(config.classifier_max_retries, 0);
        assert_eq!(config.catch_all_mailbox, "triage@ops.example");
        assert_eq!(config.default_mailbox.as_deref(), Some("fallback@ops.example"));
        assert_eq!(config.invalid_tenant_policy, InvalidTenantPolicy::SkipAndLog);
    }

    #[test]
    fn unparsable_value_is_rejected() {
        let err = RouterConfig::from_lookup(lookup_from(&[(
            "MAIL_ROUTER_CLASSIFIER_MAX_RETRIES",
            "lots",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MAIL_ROUTER_CLASSIFIER_MAX_RETRIES"));
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let err =
            RouterConfig::from_lookup(lookup_from(&[("MAIL_ROUTER_FUZZY_THRESHOLD", "1.0")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("ABORT".parse::<InvalidTenantPolicy>(), Ok(InvalidTenantPolicy::Abort));
        assert_eq!("skip".parse::<InvalidTenantPolicy>(), Ok(InvalidTenantPolicy::SkipAndLog));
        assert!("ignore".parse::<InvalidTenantPolicy>().is_err());
    }
}
