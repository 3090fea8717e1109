//! Tenant configuration schema and load-time validation.
//!
//! Tenants arrive already parsed (JSON, YAML, admin API patch). Field names
//! are camelCase on the wire. Validation collects every problem with a tenant
//! rather than stopping at the first one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tenant::hours::BusinessHours;

/// Category every tenant may fall back to when the classified one has no rule.
pub const GENERAL_CATEGORY: &str = "general";

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")
        .expect("domain regex compiles")
});

static MAILBOX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*$")
        .expect("mailbox regex compiles")
});

/// Normalize a domain for indexing and lookup.
///
/// Lowercases, trims whitespace, strips one trailing dot and a leading `www.`.
/// Returns `None` when the result is not a syntactically valid multi-label domain.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let mut domain = raw.trim().to_ascii_lowercase();
    if domain.ends_with('.') {
        domain.pop();
    }
    if let Some(rest) = domain.strip_prefix("www.")
        && rest.contains('.')
    {
        domain = rest.to_string();
    }
    if domain.len() > 253 || !DOMAIN_RE.is_match(&domain) {
        return None;
    }
    Some(domain)
}

/// Basic mailbox syntax check (`local@domain`).
pub fn is_valid_mailbox(mailbox: &str) -> bool {
    mailbox.len() <= 254 && MAILBOX_RE.is_match(mailbox)
}

/// Domain part of an email address, normalized. `None` if absent or malformed.
pub fn domain_of(address: &str) -> Option<String> {
    let address = address.trim().trim_start_matches('<').trim_end_matches('>');
    let (_, domain) = address.rsplit_once('@')?;
    normalize_domain(domain)
}

/// Relative importance a tenant assigns to its mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Category → mailbox routing table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRules {
    /// Primary destination per category.
    pub categories: BTreeMap<String, String>,
    /// Tenant-level catch-all, tried after the `general` category.
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// Escalate once a message has waited `after_hours` hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEscalation {
    pub after_hours: f64,
    pub escalate_to: String,
}

/// Redirect when `keyword` appears in the subject or body (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRule {
    pub keyword: String,
    pub escalate_to: String,
}

/// Time- and keyword-based escalation rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationRules {
    /// Category → thresholds. Order within a category does not matter.
    #[serde(default)]
    pub time_based: BTreeMap<String, Vec<TimeEscalation>>,
    /// Checked in declaration order; first hit wins.
    #[serde(default)]
    pub keywords: Vec<KeywordRule>,
}

/// One tenant ("client"): its domains, routing rules and schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub primary_domain: String,
    #[serde(default)]
    pub alias_domains: BTreeSet<String>,
    #[serde(default)]
    pub vip_domains: BTreeSet<String>,
    /// Destination for mail from or to a VIP domain.
    #[serde(default)]
    pub vip_route: Option<String>,
    pub routing_rules: RoutingRules,
    #[serde(default)]
    pub escalation: EscalationRules,
    /// Category → mailbox used when the primary destination is unreachable.
    #[serde(default)]
    pub backup_routing: BTreeMap<String, String>,
    #[serde(default)]
    pub after_hours_route: Option<String>,
    #[serde(default)]
    pub weekend_route: Option<String>,
    #[serde(default)]
    pub business_hours: BusinessHours,
    /// Category substituted when the classifier fails.
    #[serde(default = "default_fallback_category")]
    pub fallback_category: String,
    /// Extra tenant-specific text handed to the classifier.
    #[serde(default)]
    pub classification_context: Option<String>,
}

fn default_fallback_category() -> String {
    GENERAL_CATEGORY.to_string()
}

impl TenantConfig {
    /// Minimal tenant: one domain, one routing table, defaults elsewhere.
    pub fn new<C, M>(
        id: impl Into<String>,
        primary_domain: impl Into<String>,
        categories: impl IntoIterator<Item = (C, M)>,
    ) -> Self
    where
        C: Into<String>,
        M: Into<String>,
    {
        Self {
            id: id.into(),
            display_name: None,
            primary_domain: primary_domain.into(),
            alias_domains: BTreeSet::new(),
            vip_domains: BTreeSet::new(),
            vip_route: None,
            routing_rules: RoutingRules {
                categories: categories
                    .into_iter()
                    .map(|(c, m)| (c.into(), m.into()))
                    .collect(),
                fallback: None,
                priority: None,
            },
            escalation: EscalationRules::default(),
            backup_routing: BTreeMap::new(),
            after_hours_route: None,
            weekend_route: None,
            business_hours: BusinessHours::default(),
            fallback_category: default_fallback_category(),
            classification_context: None,
        }
    }

    /// Name for display and classifier prompts; falls back to the id.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    /// Normalized primary + alias domains. Malformed entries are skipped.
    pub fn claimed_domains(&self) -> BTreeSet<String> {
        std::iter::once(&self.primary_domain)
            .chain(self.alias_domains.iter())
            .filter_map(|d| normalize_domain(d))
            .collect()
    }

    /// Canonical copy kept by the registry: VIP domains normalized, every
    /// category key (routing, backup, time escalation, fallback) folded with
    /// [`category_key`]. Run after `validate`, which rejects keys that collide
    /// once folded.
    pub fn normalized(mut self) -> Self {
        self.vip_domains = self
            .vip_domains
            .iter()
            .filter_map(|d| normalize_domain(d))
            .collect();
        self.routing_rules.categories = fold_keys(std::mem::take(&mut self.routing_rules.categories));
        self.backup_routing = fold_keys(std::mem::take(&mut self.backup_routing));
        self.escalation.time_based = fold_keys(std::mem::take(&mut self.escalation.time_based));
        self.fallback_category = category_key(&self.fallback_category);
        self
    }

    /// Check this tenant in isolation. Returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.id.trim().is_empty() {
            problems.push("id must not be empty".to_string());
        }

        if normalize_domain(&self.primary_domain).is_none() {
            problems.push(format!("primaryDomain '{}' is not a valid domain", self.primary_domain));
        }
        for alias in &self.alias_domains {
            if normalize_domain(alias).is_none() {
                problems.push(format!("aliasDomains entry '{alias}' is not a valid domain"));
            }
        }
        for vip in &self.vip_domains {
            if normalize_domain(vip).is_none() {
                problems.push(format!("vipDomains entry '{vip}' is not a valid domain"));
            }
        }
        if !self.vip_domains.is_empty() && self.vip_route.is_none() {
            problems.push("vipDomains are set but vipRoute is missing".to_string());
        }

        if self.routing_rules.categories.is_empty() {
            problems.push("routingRules.categories must define at least one category".to_string());
        }
        check_category_keys(&mut problems, "routingRules.categories", self.routing_rules.categories.keys());
        check_category_keys(&mut problems, "backupRouting", self.backup_routing.keys());
        check_category_keys(&mut problems, "escalation.timeBased", self.escalation.time_based.keys());
        for (category, mailbox) in &self.routing_rules.categories {
            if category.trim().is_empty() {
                problems.push("routingRules.categories has an empty category name".to_string());
            }
            check_mailbox(&mut problems, &format!("routingRules.categories.{category}"), mailbox);
        }
        if let Some(ref fallback) = self.routing_rules.fallback {
            check_mailbox(&mut problems, "routingRules.fallback", fallback);
        }

        for (category, rules) in &self.escalation.time_based {
            for rule in rules {
                if !rule.after_hours.is_finite() || rule.after_hours < 0.0 {
                    problems.push(format!(
                        "escalation.timeBased.{category}: afterHours {} must be a non-negative number",
                        rule.after_hours
                    ));
                }
                check_mailbox(
                    &mut problems,
                    &format!("escalation.timeBased.{category}.escalateTo"),
                    &rule.escalate_to,
                );
            }
        }
        for rule in &self.escalation.keywords {
            if rule.keyword.trim().is_empty() {
                problems.push("escalation.keywords has an empty keyword".to_string());
            }
            check_mailbox(
                &mut problems,
                &format!("escalation.keywords.{}", rule.keyword),
                &rule.escalate_to,
            );
        }

        for (category, mailbox) in &self.backup_routing {
            check_mailbox(&mut problems, &format!("backupRouting.{category}"), mailbox);
        }
        for (field, value) in [
            ("vipRoute", &self.vip_route),
            ("afterHoursRoute", &self.after_hours_route),
            ("weekendRoute", &self.weekend_route),
        ] {
            if let Some(mailbox) = value {
                check_mailbox(&mut problems, field, mailbox);
            }
        }

        problems.extend(self.business_hours.validate());

        if self.fallback_category.trim().is_empty() {
            problems.push("fallbackCategory must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Canonical category name: trimmed and lowercased. Classifier output and
/// tenant rule keys are both compared in this form.
pub fn category_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn fold_keys<V>(map: BTreeMap<String, V>) -> BTreeMap<String, V> {
    map.into_iter().map(|(k, v)| (category_key(&k), v)).collect()
}

fn check_category_keys<'a>(
    problems: &mut Vec<String>,
    field: &str,
    keys: impl Iterator<Item = &'a String>,
) {
    let mut seen = BTreeMap::new();
    for key in keys {
        if let Some(first) = seen.insert(category_key(key), key) {
            problems.push(format!(
                "{field}: categories '{first}' and '{key}' are the same once lowercased"
            ));
        }
    }
}

fn check_mailbox(problems: &mut Vec<String>, field: &str, mailbox: &str) {
    if !is_valid_mailbox(mailbox) {
        problems.push(format!("{field}: '{mailbox}' is not a valid email address"));
    }
}
