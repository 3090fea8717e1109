//! Classifier boundary.
//!
//! The router never talks to an AI backend directly: it calls an injected
//! [`Classifier`] with the resolved tenant's [`TenantContext`] and treats any
//! error or timeout as "classifier unavailable".

pub mod keyword;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;
use crate::pipeline::types::{ClassificationResult, EmailMessage};
use crate::tenant::model::TenantConfig;

pub use keyword::KeywordClassifier;
pub use retry::{RetryPolicy, classify_with_retry};

/// Tenant information handed to the classifier alongside the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub display_name: String,
    /// Categories the tenant routes, sorted.
    pub categories: Vec<String>,
    /// Free-form tenant prompt text.
    pub prompt_context: Option<String>,
}

impl From<&TenantConfig> for TenantContext {
    fn from(tenant: &TenantConfig) -> Self {
        Self {
            tenant_id: tenant.id.clone(),
            display_name: tenant.name().to_string(),
            categories: tenant.routing_rules.categories.keys().cloned().collect(),
            prompt_context: tenant.classification_context.clone(),
        }
    }
}

/// Injected category classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Name for logs and error messages.
    fn name(&self) -> &str;

    /// Classify one message for one tenant.
    async fn classify(
        &self,
        ctx: &TenantContext,
        message: &EmailMessage,
    ) -> Result<ClassificationResult, ClassifierError>;
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawClassification {
    category: String,
    #[serde(default)]
    confidence: f64,
}

/// Parse a `{"category": ..., "confidence": ...}` reply from a text-based
/// classifier backend. Tolerates markdown fences and surrounding prose.
pub fn parse_classification_response(raw: &str) -> Result<ClassificationResult, ClassifierError> {
    let json = extract_json_object(raw);
    let parsed: RawClassification = serde_json::from_str(json)
        .map_err(|e| ClassifierError::InvalidResponse(format!("JSON parse error: {e}")))?;

    let result = ClassificationResult::new(parsed.category, parsed.confidence);
    if result.category.is_empty() {
        return Err(ClassifierError::InvalidResponse("empty category".into()));
    }
    Ok(result)
}

fn extract_json_object(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return &trimmed[start..=end];
    }

    trimmed
}
