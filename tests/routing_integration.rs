//! End-to-end routing tests through the public `EmailRouter` API.
//!
//! Classifiers are stubs; the registry, matcher and policy engine are real.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use mail_router::classifier::{Classifier, TenantContext, parse_classification_response};
use mail_router::config::{InvalidTenantPolicy, RouterConfig};
use mail_router::error::{ClassifierError, ConfigError, RoutingError};
use mail_router::pipeline::processor::EmailRouter;
use mail_router::pipeline::types::{
    ClassificationResult, EmailMessage, MatchMethod, ReasonCode,
};
use mail_router::tenant::model::KeywordRule;
use mail_router::tenant::{TenantConfig, read_tenants_file};

/// Always answers with the same category.
struct StubClassifier {
    category: &'static str,
    confidence: f64,
}

#[async_trait]
impl Classifier for StubClassifier {
    fn name(&self) -> &str {
        "stub"
    }

    async fn classify(
        &self,
        _ctx: &TenantContext,
        _message: &EmailMessage,
    ) -> Result<ClassificationResult, ClassifierError> {
        Ok(ClassificationResult::new(self.category, self.confidence))
    }
}

/// Never answers within any reasonable timeout.
struct StuckClassifier;

#[async_trait]
impl Classifier for StuckClassifier {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn classify(
        &self,
        _ctx: &TenantContext,
        _message: &EmailMessage,
    ) -> Result<ClassificationResult, ClassifierError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(ClassificationResult::new("support", 1.0))
    }
}

/// Text-completion style backend: replies with prose-wrapped JSON.
struct ChattyClassifier {
    reply: &'static str,
}

#[async_trait]
impl Classifier for ChattyClassifier {
    fn name(&self) -> &str {
        "chatty"
    }

    async fn classify(
        &self,
        _ctx: &TenantContext,
        _message: &EmailMessage,
    ) -> Result<ClassificationResult, ClassifierError> {
        parse_classification_response(self.reply)
    }
}

fn stub(category: &'static str, confidence: f64) -> Arc<dyn Classifier> {
    Arc::new(StubClassifier {
        category,
        confidence,
    })
}

fn fast_config() -> RouterConfig {
    RouterConfig {
        classifier_timeout: Duration::from_millis(50),
        classifier_max_retries: 1,
        classifier_backoff: Duration::from_millis(5),
        ..RouterConfig::default()
    }
}

/// Wednesday 2024-03-06 10:30 UTC.
fn business_hours() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 10, 30, 0).unwrap()
}

fn acme() -> TenantConfig {
    TenantConfig::new(
        "acme",
        "acme.com",
        [("support", "support@acme.com"), ("general", "info@acme.com")],
    )
}

fn email(sender: &str, recipient: &str, subject: &str) -> EmailMessage {
    EmailMessage::new(sender, recipient, subject, "See subject.").received_at(business_hours())
}

#[tokio::test]
async fn acme_support_scenario() {
    let router = EmailRouter::new(&fast_config(), stub("support", 0.95));
    router.load_tenants(vec![acme()]).unwrap();

    let decision = router
        .route_email_at(
            &email("customer@example.org", "help@support.acme.com", "Printer jammed"),
            business_hours(),
        )
        .await
        .unwrap();

    assert_eq!(decision.tenant_id.as_deref(), Some("acme"));
    assert_eq!(decision.destination, "support@acme.com");
    assert_eq!(decision.category, "support");
    assert_eq!(decision.match_method, MatchMethod::Hierarchy);
    assert!((decision.match_confidence - 0.9).abs() < 1e-12);
    assert!((decision.classification_confidence - 0.95).abs() < 1e-12);
    assert!(!decision.escalated);
}

#[tokio::test]
async fn vip_sender_beats_category() {
    let mut tenant = acme();
    tenant.vip_domains.insert("vip.com".into());
    tenant.vip_route = Some("vip@acme.com".into());

    let router = EmailRouter::new(&fast_config(), stub("support", 0.95));
    router.load_tenants(vec![tenant]).unwrap();

    let decision = router
        .route_email_at(&email("ceo@vip.com", "help@acme.com", "Hello"), business_hours())
        .await
        .unwrap();
    assert_eq!(decision.destination, "vip@acme.com");
    assert!(decision.escalated);
    assert_eq!(decision.applied_rules, vec!["vip_override"]);
}

#[tokio::test]
async fn urgent_keyword_beats_category() {
    let mut tenant = acme();
    tenant.escalation.keywords.push(KeywordRule {
        keyword: "urgent".into(),
        escalate_to: "oncall@acme.com".into(),
    });

    let router = EmailRouter::new(&fast_config(), stub("support", 0.95));
    router.load_tenants(vec![tenant]).unwrap();

    let decision = router
        .route_email_at(
            &email("customer@example.org", "help@acme.com", "URGENT: site down"),
            business_hours(),
        )
        .await
        .unwrap();
    assert_eq!(decision.destination, "oncall@acme.com");
    assert!(decision.escalated);
}

#[tokio::test(start_paused = true)]
async fn classifier_timeout_falls_back_to_general() {
    let router = EmailRouter::new(&fast_config(), Arc::new(StuckClassifier));
    router.load_tenants(vec![acme()]).unwrap();

    let decision = router
        .route_email_at(&email("customer@example.org", "help@acme.com", "Hi"), business_hours())
        .await
        .unwrap();
    assert_eq!(decision.category, "general");
    assert_eq!(decision.destination, "info@acme.com");
    assert_eq!(decision.classification_confidence, 0.0);
    assert!(decision.has_reason(ReasonCode::ClassifierUnavailable));
}

#[tokio::test(start_paused = true)]
async fn classifier_failure_uses_tenant_fallback_category() {
    let mut tenant = acme();
    tenant.fallback_category = "support".into();

    let router = EmailRouter::new(
        &fast_config(),
        Arc::new(ChattyClassifier {
            reply: "Sorry, I can't classify this one.",
        }),
    );
    router.load_tenants(vec![tenant]).unwrap();

    let decision = router
        .route_email_at(&email("customer@example.org", "help@acme.com", "Hi"), business_hours())
        .await
        .unwrap();
    assert_eq!(decision.category, "support");
    assert_eq!(decision.destination, "support@acme.com");
    assert!(decision.has_reason(ReasonCode::ClassifierUnavailable));
}

#[tokio::test]
async fn text_backend_reply_is_parsed() {
    let router = EmailRouter::new(
        &fast_config(),
        Arc::new(ChattyClassifier {
            reply: "Sure! {\"category\": \"Support\", \"confidence\": 0.7}",
        }),
    );
    router.load_tenants(vec![acme()]).unwrap();

    let decision = router
        .route_email_at(&email("customer@example.org", "help@acme.com", "Hi"), business_hours())
        .await
        .unwrap();
    assert_eq!(decision.destination, "support@acme.com");
    assert!(decision.reason_codes.is_empty());
}

#[tokio::test]
async fn unroutable_is_a_hard_error() {
    let router = EmailRouter::new(&fast_config(), stub("billing", 0.9));
    router
        .load_tenants(vec![TenantConfig::new("solo", "solo.dev", [("sales", "sales@solo.dev")])])
        .unwrap();

    let err = router
        .route_email_at(&email("customer@example.org", "x@solo.dev", "Invoice"), business_hours())
        .await
        .unwrap_err();
    let RoutingError::Unroutable { tenant_id, category } = err;
    assert_eq!(tenant_id, "solo");
    assert_eq!(category, "billing");
}

#[tokio::test]
async fn conflicting_reload_keeps_previous_registry() {
    let router = EmailRouter::new(&fast_config(), stub("support", 0.9));
    router.load_tenants(vec![acme()]).unwrap();

    let mut thief = TenantConfig::new("thief", "thief.org", [("support", "s@thief.org")]);
    thief.alias_domains.insert("acme.com".into());
    let err = router
        .load_tenants(vec![acme(), thief])
        .unwrap_err();
    assert!(matches!(err, ConfigError::DomainConflict { ref domain, .. } if domain == "acme.com"));

    assert_eq!(router.registry().generation(), 1);
    assert!(router.registry().tenant("thief").is_none());
    let decision = router
        .route_email_at(&email("customer@example.org", "help@acme.com", "Hi"), business_hours())
        .await
        .unwrap();
    assert_eq!(decision.tenant_id.as_deref(), Some("acme"));
}

#[tokio::test]
async fn skip_policy_drops_only_the_bad_tenant() {
    let config = RouterConfig {
        invalid_tenant_policy: InvalidTenantPolicy::SkipAndLog,
        ..fast_config()
    };
    let router = EmailRouter::new(&config, stub("support", 0.9));
    let broken = TenantConfig::new("broken", "not a domain", [("support", "nope")]);

    let report = router.load_tenants(vec![acme(), broken]).unwrap();
    assert_eq!(report.loaded, vec!["acme"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, "broken");
    assert!(report.skipped[0].1.len() >= 2);
}

#[tokio::test]
async fn tenants_from_json_file_with_timezone() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "tenants": [{{
                "id": "nyc",
                "displayName": "NYC Plumbing",
                "primaryDomain": "nycplumbing.com",
                "aliasDomains": ["nyc-plumbing.net"],
                "routingRules": {{
                    "categories": {{"support": "desk@nycplumbing.com", "general": "hello@nycplumbing.com"}},
                    "priority": "high"
                }},
                "afterHoursRoute": "night@nycplumbing.com",
                "businessHours": {{
                    "timezone": "America/New_York",
                    "days": {{
                        "Mon": {{"open": "09:00", "close": "17:00"}},
                        "Tue": {{"open": "09:00", "close": "17:00"}},
                        "Wed": {{"open": "09:00", "close": "17:00"}},
                        "Thu": {{"open": "09:00", "close": "17:00"}},
                        "Fri": {{"open": "09:00", "close": "17:00"}}
                    }}
                }}
            }}]
        }}"#
    )
    .unwrap();

    let tenants = read_tenants_file(file.path()).unwrap();
    let router = EmailRouter::new(&fast_config(), stub("support", 0.9));
    router.load_tenants(tenants).unwrap();

    // 15:00 UTC is 10:00 in New York.
    let morning = Utc.with_ymd_and_hms(2024, 3, 6, 15, 0, 0).unwrap();
    let open = router
        .route_email_at(&email("a@example.org", "fix@nyc-plumbing.net", "Leak"), morning)
        .await
        .unwrap();
    assert_eq!(open.destination, "desk@nycplumbing.com");
    assert_eq!(open.match_method, MatchMethod::Alias);
    assert_eq!(serde_json::to_value(open.priority).unwrap(), "high");

    // 23:00 UTC is 18:00 in New York.
    let evening = Utc.with_ymd_and_hms(2024, 3, 6, 23, 0, 0).unwrap();
    let closed = router
        .route_email_at(&email("a@example.org", "fix@nycplumbing.com", "Leak"), evening)
        .await
        .unwrap();
    assert_eq!(closed.destination, "night@nycplumbing.com");
    assert_eq!(closed.applied_rules, vec!["category:support", "after_hours"]);
}

/// Tenant set for one reload generation. Every mailbox carries the version
/// tag, and only the `v2` set claims `acme.io`.
fn versioned_tenants(version: &str) -> Vec<TenantConfig> {
    let mut acme = TenantConfig::new(
        "acme",
        "acme.com",
        [("support", format!("support-{version}@acme.com"))],
    );
    if version == "v2" {
        acme.alias_domains.insert("acme.io".into());
    }
    let globex = TenantConfig::new(
        "globex",
        "globex.com",
        [("support", format!("support-{version}@globex.com"))],
    );
    vec![acme, globex]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reload_under_concurrent_routing_is_atomic() {
    let router = Arc::new(EmailRouter::new(&fast_config(), stub("support", 0.9)));
    router.load_tenants(versioned_tenants("v1")).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let checked = Arc::new(AtomicUsize::new(0));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let router = Arc::clone(&router);
        let stop = Arc::clone(&stop);
        let checked = Arc::clone(&checked);
        readers.push(tokio::spawn(async move {
            while !stop.load(Ordering::Relaxed) {
                // Odd generations hold v1, even generations hold v2.
                let snapshot = router.registry().snapshot();
                let version = if snapshot.generation() % 2 == 1 { "v1" } else { "v2" };
                for id in snapshot.tenant_ids() {
                    let tenant = snapshot.tenant(id).unwrap();
                    let mailbox = &tenant.routing_rules.categories["support"];
                    assert!(mailbox.contains(version), "mixed snapshot: {mailbox} in {version}");
                }
                assert_eq!(snapshot.lookup_exact("acme.io").is_some(), version == "v2");

                let decision = router
                    .route_email_at(&email("a@example.org", "help@acme.com", "Hi"), business_hours())
                    .await
                    .unwrap();
                assert!(
                    decision.destination == "support-v1@acme.com"
                        || decision.destination == "support-v2@acme.com"
                );
                checked.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        }));
    }

    for round in 0..200 {
        let version = if round % 2 == 0 { "v2" } else { "v1" };
        router.load_tenants(versioned_tenants(version)).unwrap();
        tokio::task::yield_now().await;
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(router.registry().generation(), 201);
    assert!(checked.load(Ordering::Relaxed) > 0);
}

#[tokio::test]
async fn batch_routes_every_message() {
    let router = EmailRouter::new(&fast_config(), stub("support", 0.9));
    router.load_tenants(vec![acme()]).unwrap();

    let messages: Vec<_> = (0..20)
        .map(|i| email("a@example.org", &format!("user{i}@acme.com"), "Help"))
        .collect();
    let results = router.route_batch(&messages, business_hours()).await;
    assert_eq!(results.len(), 20);
    assert!(
        results
            .iter()
            .all(|r| r.as_ref().is_ok_and(|d| d.destination == "support@acme.com"))
    );
}

#[tokio::test]
async fn rfc822_message_routes_end_to_end() {
    let raw = concat!(
        "From: Bob <bob@example.org>\r\n",
        "To: help@support.acme.com\r\n",
        "Subject: Broken widget\r\n",
        "Date: Wed, 06 Mar 2024 10:00:00 +0000\r\n",
        "\r\n",
        "The widget is broken.\r\n",
    );
    let message = EmailMessage::from_rfc822(raw.as_bytes()).unwrap();

    let router = EmailRouter::new(&fast_config(), stub("support", 0.9));
    router.load_tenants(vec![acme()]).unwrap();
    let decision = router.route_email_at(&message, business_hours()).await.unwrap();
    assert_eq!(decision.destination, "support@acme.com");
    assert_eq!(decision.message_id, message.id);
}
