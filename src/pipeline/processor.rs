//! Email router: one inbound email in, one routing decision out.
//!
//! Flow:
//! 1. Recipient domain → Domain Matcher against one registry snapshot
//! 2. Unresolved → catch-all mailbox, classifier never called
//! 3. Classifier (bounded retry + timeout) → fallback classification on failure
//! 4. Routing policy engine → destination + applied rules
//!
//! Only `RoutingError::Unroutable` reaches the caller; everything else
//! degrades to a fallback and is recorded in the decision's reason codes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::{Classifier, RetryPolicy, TenantContext, classify_with_retry};
use crate::config::RouterConfig;
use crate::error::{ConfigError, RoutingError};
use crate::pipeline::matcher::DomainMatcher;
use crate::pipeline::rules::{RouteOutcome, RoutingPolicyEngine};
use crate::pipeline::types::{
    ClassificationResult, EmailMessage, MatchResult, ReasonCode, RoutingDecision,
};
use crate::tenant::model::{GENERAL_CATEGORY, Priority, TenantConfig};
use crate::tenant::registry::{LoadReport, TenantRegistry};

/// Routes inbound email to tenant mailboxes.
///
/// Cheap to share behind an `Arc`; every decision reads its own registry
/// snapshot, so concurrent reloads never produce a half-old, half-new view.
pub struct EmailRouter {
    registry: Arc<TenantRegistry>,
    matcher: DomainMatcher,
    engine: RoutingPolicyEngine,
    classifier: Arc<dyn Classifier>,
    retry: RetryPolicy,
    catch_all_mailbox: String,
}

impl EmailRouter {
    /// Router with an empty registry built from `config`.
    pub fn new(config: &RouterConfig, classifier: Arc<dyn Classifier>) -> Self {
        let registry = Arc::new(TenantRegistry::new(config.invalid_tenant_policy));
        Self::with_registry(config, registry, classifier)
    }

    /// Router over an existing (possibly shared) registry.
    pub fn with_registry(
        config: &RouterConfig,
        registry: Arc<TenantRegistry>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            registry,
            matcher: DomainMatcher::new(config.fuzzy_threshold),
            engine: RoutingPolicyEngine::new(config.default_mailbox.clone()),
            classifier,
            retry: RetryPolicy::from_config(config),
            catch_all_mailbox: config.catch_all_mailbox.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    /// Atomically replace the tenant set. In-flight decisions keep the old snapshot.
    pub fn load_tenants(&self, tenants: Vec<TenantConfig>) -> Result<LoadReport, ConfigError> {
        self.registry.load(tenants)
    }

    /// Route one email using the current wall clock.
    pub async fn route_email(&self, message: &EmailMessage) -> Result<RoutingDecision, RoutingError> {
        self.route_email_at(message, Utc::now()).await
    }

    /// Route one email as if it were `now`. Business hours and escalation
    /// age are evaluated against `now`.
    pub async fn route_email_at(
        &self,
        message: &EmailMessage,
        now: DateTime<Utc>,
    ) -> Result<RoutingDecision, RoutingError> {
        let snapshot = self.registry.snapshot();
        // A recipient without a usable domain part never resolves.
        let matched = match message.recipient_domain() {
            Some(domain) => self.matcher.match_domain(&snapshot, &domain),
            None => MatchResult::none(message.recipient.trim()),
        };

        let tenant = matched
            .tenant_id
            .as_deref()
            .and_then(|id| snapshot.tenant(id))
            .cloned();
        let Some(tenant) = tenant else {
            info!(
                id = %message.id,
                recipient = %message.recipient,
                generation = snapshot.generation(),
                "No tenant for recipient, routing to catch-all"
            );
            return Ok(self.unresolved(message, &matched, now));
        };

        debug!(
            id = %message.id,
            tenant = %tenant.id,
            method = matched.method.label(),
            confidence = matched.confidence,
            "Resolved tenant"
        );

        let (classification, classifier_failed) = self.classify(&tenant, message).await;

        let outcome = self
            .engine
            .evaluate(&tenant, &classification, message, now)
            .inspect_err(|e| error!(id = %message.id, tenant = %tenant.id, error = %e, "Email is unroutable"))?;

        let mut decision = decision_from(message, &tenant, &matched, &classification, outcome, now);
        if classifier_failed {
            decision.reason_codes.insert(0, ReasonCode::ClassifierUnavailable);
        }

        info!(
            id = %message.id,
            decision = %decision.decision_id,
            tenant = %tenant.id,
            destination = %decision.destination,
            category = %decision.category,
            escalated = decision.escalated,
            rules = ?decision.applied_rules,
            "Routed email"
        );
        Ok(decision)
    }

    /// Route many emails concurrently. Results keep input order; one
    /// unroutable email does not affect the others.
    pub async fn route_batch(
        &self,
        messages: &[EmailMessage],
        now: DateTime<Utc>,
    ) -> Vec<Result<RoutingDecision, RoutingError>> {
        info!(count = messages.len(), "Routing email batch");
        let results = join_all(messages.iter().map(|m| self.route_email_at(m, now))).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total = results.len(), failed, "Batch routing complete");
        results
    }

    /// Re-route a decision whose destination was reported unreachable to
    /// the tenant's backup mailbox for that category.
    ///
    /// `None` when the decision is unresolved, the tenant is gone, or no
    /// backup is configured for the category.
    pub fn reroute_to_backup(&self, decision: &RoutingDecision) -> Option<RoutingDecision> {
        let tenant_id = decision.tenant_id.as_deref()?;
        let tenant = self.registry.tenant(tenant_id)?;
        let backup = tenant
            .backup_routing
            .get(&decision.category)
            .or_else(|| tenant.backup_routing.get(GENERAL_CATEGORY))?;
        if *backup == decision.destination {
            return None;
        }

        warn!(
            tenant = %tenant_id,
            category = %decision.category,
            from = %decision.destination,
            to = %backup,
            "Primary destination unreachable, rerouting to backup"
        );

        let mut rerouted = decision.clone();
        rerouted.decision_id = Uuid::new_v4();
        rerouted.destination = backup.clone();
        rerouted
            .applied_rules
            .push(format!("backup:{}", decision.category));
        rerouted.reason_codes.push(ReasonCode::PrimaryUnreachable);
        rerouted.decided_at = Utc::now();
        Some(rerouted)
    }

    /// Classify with retry; on failure substitute the tenant's fallback category.
    async fn classify(&self, tenant: &TenantConfig, message: &EmailMessage) -> (ClassificationResult, bool) {
        let ctx = TenantContext::from(tenant);
        match classify_with_retry(self.classifier.as_ref(), &ctx, message, &self.retry).await {
            Ok(result) => (result, false),
            Err(e) => {
                warn!(
                    id = %message.id,
                    tenant = %tenant.id,
                    classifier = self.classifier.name(),
                    error = %e,
                    fallback = %tenant.fallback_category,
                    "Classifier unavailable, using fallback classification"
                );
                (ClassificationResult::fallback(&tenant.fallback_category).normalized(), true)
            }
        }
    }

    fn unresolved(&self, message: &EmailMessage, matched: &MatchResult, now: DateTime<Utc>) -> RoutingDecision {
        RoutingDecision {
            decision_id: Uuid::new_v4(),
            message_id: message.id.clone(),
            tenant_id: None,
            destination: self.catch_all_mailbox.clone(),
            category: GENERAL_CATEGORY.to_string(),
            match_method: matched.method,
            match_confidence: matched.confidence,
            classification_confidence: 0.0,
            applied_rules: vec!["catch_all".to_string()],
            escalated: false,
            priority: Priority::default(),
            reason_codes: vec![ReasonCode::UnresolvedTenant],
            decided_at: now,
        }
    }
}

fn decision_from(
    message: &EmailMessage,
    tenant: &TenantConfig,
    matched: &MatchResult,
    classification: &ClassificationResult,
    outcome: RouteOutcome,
    now: DateTime<Utc>,
) -> RoutingDecision {
    RoutingDecision {
        decision_id: Uuid::new_v4(),
        message_id: message.id.clone(),
        tenant_id: Some(tenant.id.clone()),
        destination: outcome.destination,
        category: outcome.category,
        match_method: matched.method,
        match_confidence: matched.confidence,
        classification_confidence: classification.confidence,
        applied_rules: outcome.applied_rules,
        escalated: outcome.escalated,
        priority: outcome.priority,
        reason_codes: outcome.reason_codes,
        decided_at: now,
    }
}
