//! Tenant configuration, business hours and the tenant registry.

pub mod hours;
pub mod model;
pub mod registry;

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

pub use hours::{BusinessHours, DayHours, HoursStatus};
pub use model::{
    EscalationRules, KeywordRule, Priority, RoutingRules, TenantConfig, TimeEscalation,
};
pub use registry::{LoadReport, RegistrySnapshot, TenantRegistry};

#[derive(Deserialize)]
#[serde(untagged)]
enum TenantFile {
    List(Vec<TenantConfig>),
    Wrapped { tenants: Vec<TenantConfig> },
}

/// Parse tenant configs from JSON: either a bare array or `{"tenants": [...]}`.
///
/// Only the shape is checked here; semantic validation happens on registry load.
pub fn parse_tenants(json: &str) -> Result<Vec<TenantConfig>, ConfigError> {
    let file: TenantFile =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    Ok(match file {
        TenantFile::List(tenants) | TenantFile::Wrapped { tenants } => tenants,
    })
}

/// Read and parse a JSON tenant file.
pub fn read_tenants_file(path: impl AsRef<Path>) -> Result<Vec<TenantConfig>, ConfigError> {
    let json = std::fs::read_to_string(path)?;
    parse_tenants(&json)
}
