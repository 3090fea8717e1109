//! Per-email routing pipeline.
//!
//! Every inbound email flows through:
//! 1. `DomainMatcher::match_domain()`: recipient domain → tenant (exact, alias, hierarchy, fuzzy)
//! 2. `Classifier::classify()`: external category, bounded retry, fallback on failure
//! 3. `RoutingPolicyEngine::evaluate()`: VIP, keyword, category, hours, escalation
//! 4. `EmailRouter`: composes the above into one `RoutingDecision`
//!
//! Matching and routing are pure; the classifier call is the only I/O.

pub mod matcher;
pub mod processor;
pub mod rules;
pub mod similarity;
pub mod types;
