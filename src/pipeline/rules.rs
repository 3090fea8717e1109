//! Per-tenant routing policy engine.
//!
//! Turns (tenant, classification, message, now) into a destination mailbox
//! plus an ordered trail of the rules that fired. Precedence is fixed:
//!
//! 1. VIP sender/recipient domain → VIP route (terminal)
//! 2. keyword in subject/body → keyword target (skips category routing)
//! 3. category → `general` → tenant fallback → registry default
//! 4. weekend / after-hours route (only over a category-resolved destination)
//! 5. time-based escalation by message age (overrides 2-4)
//!
//! Pure and synchronous; no I/O, no clock reads.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::RoutingError;
use crate::pipeline::types::{ClassificationResult, EmailMessage, ReasonCode};
use crate::tenant::hours::HoursStatus;
use crate::tenant::model::{GENERAL_CATEGORY, Priority, TenantConfig, TimeEscalation, normalize_domain};

pub const RULE_VIP: &str = "vip_override";
pub const RULE_AFTER_HOURS: &str = "after_hours";
pub const RULE_WEEKEND: &str = "weekend";
pub const RULE_ROUTING_FALLBACK: &str = "routing_fallback";
pub const RULE_REGISTRY_DEFAULT: &str = "registry_default";

/// What the policy engine decided for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    pub destination: String,
    /// Category whose rule was used (`general` after an unknown-category fallback).
    pub category: String,
    pub applied_rules: Vec<String>,
    pub escalated: bool,
    pub priority: Priority,
    pub reason_codes: Vec<ReasonCode>,
}

impl RouteOutcome {
    fn new(destination: &str, category: &str) -> Self {
        Self {
            destination: destination.to_string(),
            category: category.to_string(),
            applied_rules: Vec::new(),
            escalated: false,
            priority: Priority::default(),
            reason_codes: Vec::new(),
        }
    }

    fn apply(&mut self, rule: impl Into<String>, destination: &str) {
        let rule = rule.into();
        debug!(rule = %rule, destination = %destination, "Routing rule applied");
        self.applied_rules.push(rule);
        self.destination = destination.to_string();
    }
}

/// Routing policy engine shared by all tenants.
#[derive(Debug, Clone, Default)]
pub struct RoutingPolicyEngine {
    /// Registry-wide last resort when a tenant has no rule for a category.
    default_mailbox: Option<String>,
}

impl RoutingPolicyEngine {
    pub fn new(default_mailbox: Option<String>) -> Self {
        Self { default_mailbox }
    }

    /// Decide where `message` goes for `tenant`.
    ///
    /// Fails only when no category rule, `general` rule, tenant fallback or
    /// registry default exists and no keyword/VIP rule already decided.
    pub fn evaluate(
        &self,
        tenant: &TenantConfig,
        classification: &ClassificationResult,
        message: &EmailMessage,
        now: DateTime<Utc>,
    ) -> Result<RouteOutcome, RoutingError> {
        let base_priority = tenant.routing_rules.priority.unwrap_or_default();

        if let Some(mut outcome) = self.check_vip(tenant, classification, message) {
            outcome.priority = escalated_priority(base_priority);
            return Ok(outcome);
        }

        let mut outcome = match self.check_keywords(tenant, classification, message) {
            Some(outcome) => outcome,
            None => {
                let mut outcome = self.route_category(tenant, classification)?;
                self.check_business_hours(tenant, now, &mut outcome);
                outcome
            }
        };

        self.check_time_escalation(tenant, message, now, &mut outcome);

        outcome.priority = if outcome.escalated {
            escalated_priority(base_priority)
        } else {
            base_priority
        };
        Ok(outcome)
    }

    fn check_vip(
        &self,
        tenant: &TenantConfig,
        classification: &ClassificationResult,
        message: &EmailMessage,
    ) -> Option<RouteOutcome> {
        let vip_route = tenant.vip_route.as_deref()?;
        if tenant.vip_domains.is_empty() {
            return None;
        }

        let is_vip = [message.sender_domain(), message.recipient_domain()]
            .into_iter()
            .flatten()
            .any(|domain| is_vip_domain(tenant, &domain));
        if !is_vip {
            return None;
        }

        let mut outcome = RouteOutcome::new(vip_route, &classification.category);
        outcome.apply(RULE_VIP, vip_route);
        outcome.escalated = true;
        Some(outcome)
    }

    /// First keyword in declaration order found in subject or body.
    fn check_keywords(
        &self,
        tenant: &TenantConfig,
        classification: &ClassificationResult,
        message: &EmailMessage,
    ) -> Option<RouteOutcome> {
        if tenant.escalation.keywords.is_empty() {
            return None;
        }
        let haystack = format!("{}\n{}", message.subject, message.body).to_lowercase();

        let rule = tenant.escalation.keywords.iter().find(|rule| {
            let needle = rule.keyword.trim().to_lowercase();
            !needle.is_empty() && haystack.contains(&needle)
        })?;

        let mut outcome = RouteOutcome::new(&rule.escalate_to, &classification.category);
        outcome.apply(format!("keyword:{}", rule.keyword.trim()), &rule.escalate_to);
        outcome.escalated = true;
        Some(outcome)
    }

    fn route_category(
        &self,
        tenant: &TenantConfig,
        classification: &ClassificationResult,
    ) -> Result<RouteOutcome, RoutingError> {
        let category = classification.category.as_str();
        let rules = &tenant.routing_rules;

        if let Some(mailbox) = rules.categories.get(category) {
            let mut outcome = RouteOutcome::new(mailbox, category);
            outcome.apply(format!("category:{category}"), mailbox);
            return Ok(outcome);
        }

        let mut reasons = vec![ReasonCode::UnknownCategory];

        if let Some(mailbox) = rules.categories.get(GENERAL_CATEGORY) {
            let mut outcome = RouteOutcome::new(mailbox, GENERAL_CATEGORY);
            outcome.apply(format!("category:{GENERAL_CATEGORY}"), mailbox);
            outcome.reason_codes = reasons;
            return Ok(outcome);
        }

        if let Some(ref mailbox) = rules.fallback {
            reasons.push(ReasonCode::TenantFallback);
            let mut outcome = RouteOutcome::new(mailbox, category);
            outcome.apply(RULE_ROUTING_FALLBACK, mailbox);
            outcome.reason_codes = reasons;
            return Ok(outcome);
        }

        if let Some(ref mailbox) = self.default_mailbox {
            reasons.push(ReasonCode::RegistryDefault);
            let mut outcome = RouteOutcome::new(mailbox, category);
            outcome.apply(RULE_REGISTRY_DEFAULT, mailbox);
            outcome.reason_codes = reasons;
            return Ok(outcome);
        }

        Err(RoutingError::Unroutable {
            tenant_id: tenant.id.clone(),
            category: category.to_string(),
        })
    }

    /// Weekend route beats the after-hours route; a closed weekend with no
    /// weekend route still takes the after-hours route.
    fn check_business_hours(
        &self,
        tenant: &TenantConfig,
        now: DateTime<Utc>,
        outcome: &mut RouteOutcome,
    ) {
        match tenant.business_hours.status_at(now) {
            HoursStatus::Open => {}
            HoursStatus::Weekend => {
                if let Some(ref mailbox) = tenant.weekend_route {
                    outcome.apply(RULE_WEEKEND, mailbox);
                } else if let Some(ref mailbox) = tenant.after_hours_route {
                    outcome.apply(RULE_AFTER_HOURS, mailbox);
                }
            }
            HoursStatus::AfterHours => {
                if let Some(ref mailbox) = tenant.after_hours_route {
                    outcome.apply(RULE_AFTER_HOURS, mailbox);
                }
            }
        }
    }

    /// Highest threshold the message age has reached wins.
    fn check_time_escalation(
        &self,
        tenant: &TenantConfig,
        message: &EmailMessage,
        now: DateTime<Utc>,
        outcome: &mut RouteOutcome,
    ) {
        let Some(rules) = tenant.escalation.time_based.get(&outcome.category) else {
            return;
        };
        let age_hours = message_age_hours(message, now);

        let Some(rule) = rules
            .iter()
            .filter(|rule| age_hours >= rule.after_hours)
            .fold(None::<&TimeEscalation>, |best, rule| match best {
                Some(b) if b.after_hours >= rule.after_hours => Some(b),
                _ => Some(rule),
            })
        else {
            return;
        };

        let name = format!("time_escalation:{}:{}h", outcome.category, rule.after_hours);
        outcome.apply(name, &rule.escalate_to);
        outcome.escalated = true;
    }
}

/// Age in fractional hours; clock skew (arrival in the future) counts as zero.
fn message_age_hours(message: &EmailMessage, now: DateTime<Utc>) -> f64 {
    let seconds = now.signed_duration_since(message.received_at).num_seconds().max(0);
    seconds as f64 / 3600.0
}

fn escalated_priority(base: Priority) -> Priority {
    base.max(Priority::High)
}

fn is_same_or_subdomain(domain: &str, parent: &str) -> bool {
    domain == parent
        || domain
            .strip_suffix(parent)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Whether `domain` is one of the tenant's VIP domains or a subdomain of one.
///
/// VIP entries are compared as stored; the registry normalizes them on load.
pub fn is_vip_domain(tenant: &TenantConfig, domain: &str) -> bool {
    let Some(domain) = normalize_domain(domain) else {
        return false;
    };
    tenant
        .vip_domains
        .iter()
        .any(|vip| is_same_or_subdomain(&domain, vip))
}
