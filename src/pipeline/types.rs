//! Shared types for the routing pipeline.

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenant::model::{Priority, category_key, domain_of};

// ── Inbound message ─────────────────────────────────────────────────

/// An inbound email as delivered by the webhook handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Provider message id, or a generated UUID.
    #[serde(default = "generated_id")]
    pub id: String,
    pub sender: String,
    pub recipient: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    /// When the message first arrived (UTC). Retried messages keep their original time.
    pub received_at: DateTime<Utc>,
}

fn generated_id() -> String {
    Uuid::new_v4().to_string()
}

impl EmailMessage {
    /// Build a message received now.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: generated_id(),
            sender: sender.into(),
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    /// Override the arrival time.
    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }

    /// Normalized recipient domain; the only input to tenant resolution.
    pub fn recipient_domain(&self) -> Option<String> {
        domain_of(&self.recipient)
    }

    /// Normalized sender domain; used by VIP rules only.
    pub fn sender_domain(&self) -> Option<String> {
        domain_of(&self.sender)
    }

    /// Parse a raw RFC 822 / MIME message.
    ///
    /// Uses the first `From` and first `To` address, the plain-text body
    /// (HTML stripped when no text part exists) and the `Date` header,
    /// falling back to now. Returns `None` without a sender or recipient.
    pub fn from_rfc822(raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let sender = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())?
            .to_string();
        let recipient = parsed
            .to()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())?
            .to_string();
        let subject = parsed.subject().unwrap_or_default().to_string();
        let body = parsed
            .body_text(0)
            .map(|t| t.to_string())
            .or_else(|| parsed.body_html(0).map(|h| strip_html(&h)))
            .unwrap_or_default();
        let id = parsed
            .message_id()
            .map(|s| s.to_string())
            .unwrap_or_else(generated_id);
        let received_at = parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
            .unwrap_or_else(Utc::now);

        Some(Self {
            id,
            sender,
            recipient,
            subject,
            body,
            received_at,
        })
    }
}

/// Strip HTML tags and collapse whitespace.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Classification ──────────────────────────────────────────────────

/// Category assigned by the external classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: String,
    /// 0.0..=1.0
    pub confidence: f64,
}

impl ClassificationResult {
    pub fn new(category: impl Into<String>, confidence: f64) -> Self {
        Self {
            category: category.into(),
            confidence,
        }
        .normalized()
    }

    /// Substitute used when the classifier fails: the given category at zero confidence.
    pub fn fallback(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            confidence: 0.0,
        }
    }

    /// Lowercase/trim the category, clamp the confidence. NaN becomes 0.0.
    pub fn normalized(mut self) -> Self {
        self.category = category_key(&self.category);
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        self
    }
}

// ── Domain matching ─────────────────────────────────────────────────

/// Strategy that produced a tenant match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Equal to a tenant's primary domain.
    Exact,
    /// Equal to one of a tenant's alias domains.
    Alias,
    /// Subdomain of a tenant's primary or alias domain.
    Hierarchy,
    /// Closest known domain by edit distance.
    Fuzzy,
    None,
}

impl MatchMethod {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Alias => "alias",
            Self::Hierarchy => "hierarchy",
            Self::Fuzzy => "fuzzy",
            Self::None => "none",
        }
    }
}

/// A candidate the matcher considered, kept for debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub domain: String,
    pub tenant_id: String,
    /// Raw similarity (1.0 for structural matches).
    pub similarity: f64,
    /// Confidence this candidate would have been given; 0.0 below the fuzzy threshold.
    pub confidence: f64,
}

/// Output of the domain matcher. "No tenant" is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Normalized input domain, or the raw input when it could not be normalized.
    pub domain: String,
    /// Known domain the input resolved through.
    pub matched_domain: Option<String>,
    pub tenant_id: Option<String>,
    pub confidence: f64,
    pub method: MatchMethod,
    /// Near misses, best first.
    pub alternatives: Vec<MatchCandidate>,
}

impl MatchResult {
    /// Unresolved result.
    pub fn none(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            matched_domain: None,
            tenant_id: None,
            confidence: 0.0,
            method: MatchMethod::None,
            alternatives: Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.tenant_id.is_some()
    }
}

// ── Routing decision ────────────────────────────────────────────────

/// Why a fallback or non-default path was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Recipient domain matched no tenant; sent to the catch-all.
    UnresolvedTenant,
    /// Classifier failed or timed out; fallback classification used.
    ClassifierUnavailable,
    /// Classified category has no rule for this tenant.
    UnknownCategory,
    /// Neither the category nor `general` had a rule; tenant fallback mailbox used.
    TenantFallback,
    /// Registry-wide default mailbox used.
    RegistryDefault,
    /// Delivery reported the primary destination unreachable; backup used.
    PrimaryUnreachable,
}

/// Final routing outcome for one email, with its audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub decision_id: Uuid,
    pub message_id: String,
    /// `None` when the recipient domain matched no tenant.
    pub tenant_id: Option<String>,
    pub destination: String,
    pub category: String,
    pub match_method: MatchMethod,
    pub match_confidence: f64,
    pub classification_confidence: f64,
    /// Rules in the order they were applied, e.g. `["category:support", "after_hours"]`.
    pub applied_rules: Vec<String>,
    pub escalated: bool,
    pub priority: Priority,
    pub reason_codes: Vec<ReasonCode>,
    pub decided_at: DateTime<Utc>,
}

impl RoutingDecision {
    pub fn is_resolved(&self) -> bool {
        self.tenant_id.is_some()
    }

    pub fn has_reason(&self, reason: ReasonCode) -> bool {
        self.reason_codes.contains(&reason)
    }
}
