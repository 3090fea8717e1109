//! Error types for the mail router.

use std::time::Duration;

/// Configuration-related errors.
///
/// Raised by tenant registry loads and by `RouterConfig::from_env()`.
/// A rejected registry load leaves the previous snapshot in place.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Tenant {tenant_id} is invalid: {}", .reasons.join("; "))]
    InvalidTenant {
        tenant_id: String,
        reasons: Vec<String>,
    },

    #[error("Domain {domain} is claimed by both {first} and {second}")]
    DomainConflict {
        domain: String,
        first: String,
        second: String,
    },

    #[error("Tenant id {tenant_id} appears more than once")]
    DuplicateTenant { tenant_id: String },

    #[error("{} configuration errors: {}", .0.len(), display_all(.0))]
    Multiple(Vec<ConfigError>),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Collapse a list of problems into one error. `None` when the list is empty.
    pub fn from_many(mut errors: Vec<ConfigError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }
}

fn display_all(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Classifier boundary errors.
///
/// Never surfaced by `EmailRouter::route_email`: the orchestrator downgrades
/// them to the tenant's fallback classification.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("Classifier timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),
}

/// Routing decision errors.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// No category rule, no `general` rule, no tenant fallback and no
    /// registry default. Needs an operator to fix the tenant config.
    #[error("Email for tenant {tenant_id} is unroutable: no destination for category '{category}'")]
    Unroutable { tenant_id: String, category: String },
}
