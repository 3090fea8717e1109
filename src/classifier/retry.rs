//! Bounded retry with timeout around a classifier call.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::{Classifier, TenantContext};
use crate::config::RouterConfig;
use crate::error::ClassifierError;
use crate::pipeline::types::{ClassificationResult, EmailMessage};

/// Backoff is capped at this multiple of the base delay.
const MAX_BACKOFF_FACTOR: u32 = 32;

/// How hard to try the classifier before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay; doubled per retry, plus up to 50% jitter.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            timeout: config.classifier_timeout,
            max_retries: config.classifier_max_retries,
            backoff: config.classifier_backoff,
        }
    }

    /// Delay before retry number `retry` (1-based).
    fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32
            .saturating_pow(retry.saturating_sub(1))
            .min(MAX_BACKOFF_FACTOR);
        let base = self.backoff.saturating_mul(factor);
        let jitter_ms = base.as_millis() as u64 / 2;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RouterConfig::default())
    }
}

/// Call `classifier`, retrying failures and timeouts up to `policy.max_retries`
/// times. Returns the last error when every attempt fails.
pub async fn classify_with_retry(
    classifier: &dyn Classifier,
    ctx: &TenantContext,
    message: &EmailMessage,
    policy: &RetryPolicy,
) -> Result<ClassificationResult, ClassifierError> {
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, classifier.classify(ctx, message)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout {
                timeout: policy.timeout,
            }),
        };

        match outcome {
            Ok(result) => {
                debug!(
                    classifier = classifier.name(),
                    tenant = %ctx.tenant_id,
                    category = %result.category,
                    confidence = result.confidence,
                    attempt,
                    "Classified message"
                );
                return Ok(result.normalized());
            }
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(
                    classifier = classifier.name(),
                    tenant = %ctx.tenant_id,
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Classifier call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
