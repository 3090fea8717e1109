//! Mail Router: multi-tenant email routing core.

pub mod classifier;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod tenant;

pub use classifier::{Classifier, KeywordClassifier, TenantContext};
pub use config::RouterConfig;
pub use error::{ClassifierError, ConfigError, RoutingError};
pub use pipeline::processor::EmailRouter;
pub use pipeline::types::{ClassificationResult, EmailMessage, RoutingDecision};
pub use tenant::{TenantConfig, TenantRegistry};
