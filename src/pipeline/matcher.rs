//! Domain matcher: resolves a recipient domain to a tenant.
//!
//! Strategies, tried in order, first hit wins:
//! 1. exact (primary domain, 1.0) / alias (alias domain, 1.0)
//! 2. hierarchy: subdomain of a known domain, longest suffix wins (0.9)
//! 3. fuzzy: closest known domain by edit distance over the labels left of
//!    the shared suffix (0.5..=0.85)
//! 4. none (0.0)
//!
//! Never errors. Works on a single registry snapshot so one call cannot see
//! two registry generations.

use std::cmp::Ordering;

use tracing::debug;

use crate::pipeline::similarity::{domain_similarity, fuzzy_confidence};
use crate::pipeline::types::{MatchCandidate, MatchMethod, MatchResult};
use crate::tenant::model::normalize_domain;
use crate::tenant::registry::RegistrySnapshot;

/// Confidence for an exact or alias match.
pub const EXACT_CONFIDENCE: f64 = 1.0;
/// Confidence for a subdomain match.
pub const HIERARCHY_CONFIDENCE: f64 = 0.9;

/// How many near misses to keep on a result.
const MAX_ALTERNATIVES: usize = 3;

/// Domain → tenant resolver.
#[derive(Debug, Clone)]
pub struct DomainMatcher {
    fuzzy_threshold: f64,
}

impl Default for DomainMatcher {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl DomainMatcher {
    /// `fuzzy_threshold` is the minimum similarity a fuzzy candidate needs.
    pub fn new(fuzzy_threshold: f64) -> Self {
        Self { fuzzy_threshold }
    }

    pub fn fuzzy_threshold(&self) -> f64 {
        self.fuzzy_threshold
    }

    /// Resolve `raw_domain` against `snapshot`.
    pub fn match_domain(&self, snapshot: &RegistrySnapshot, raw_domain: &str) -> MatchResult {
        let Some(domain) = normalize_domain(raw_domain) else {
            debug!(domain = %raw_domain, "Malformed domain, no match");
            return MatchResult::none(raw_domain.trim());
        };

        let result = self
            .match_exact(snapshot, &domain)
            .or_else(|| self.match_hierarchy(snapshot, &domain))
            .unwrap_or_else(|| self.match_fuzzy(snapshot, &domain));

        debug!(
            domain = %result.domain,
            tenant = result.tenant_id.as_deref().unwrap_or("-"),
            method = result.method.label(),
            confidence = result.confidence,
            "Domain matched"
        );
        result
    }

    fn match_exact(&self, snapshot: &RegistrySnapshot, domain: &str) -> Option<MatchResult> {
        let tenant = snapshot.lookup_normalized(domain)?;
        let is_primary = normalize_domain(&tenant.primary_domain).as_deref() == Some(domain);
        Some(MatchResult {
            domain: domain.to_string(),
            matched_domain: Some(domain.to_string()),
            tenant_id: Some(tenant.id.clone()),
            confidence: EXACT_CONFIDENCE,
            method: if is_primary {
                MatchMethod::Exact
            } else {
                MatchMethod::Alias
            },
            alternatives: Vec::new(),
        })
    }

    /// Walk proper suffixes from longest to shortest; the first known one wins.
    /// Later (shorter) hits belonging to other tenants are kept as alternatives.
    fn match_hierarchy(&self, snapshot: &RegistrySnapshot, domain: &str) -> Option<MatchResult> {
        let mut hits = domain
            .match_indices('.')
            .map(|(i, _)| &domain[i + 1..])
            .filter(|suffix| suffix.contains('.'))
            .filter_map(|suffix| {
                snapshot
                    .lookup_normalized(suffix)
                    .map(|tenant| (suffix, tenant.id.as_str()))
            });

        let (matched, tenant_id) = hits.next()?;
        let alternatives = hits
            .filter(|(_, other)| *other != tenant_id)
            .take(MAX_ALTERNATIVES)
            .map(|(suffix, other)| MatchCandidate {
                domain: suffix.to_string(),
                tenant_id: other.to_string(),
                similarity: 1.0,
                confidence: HIERARCHY_CONFIDENCE,
            })
            .collect();

        Some(MatchResult {
            domain: domain.to_string(),
            matched_domain: Some(matched.to_string()),
            tenant_id: Some(tenant_id.to_string()),
            confidence: HIERARCHY_CONFIDENCE,
            method: MatchMethod::Hierarchy,
            alternatives,
        })
    }

    /// Score every known domain; best candidate wins if it clears the threshold.
    ///
    /// Ranking: similarity descending, then shorter domain, then lexical order.
    fn match_fuzzy(&self, snapshot: &RegistrySnapshot, domain: &str) -> MatchResult {
        let mut candidates: Vec<MatchCandidate> = snapshot
            .all_domains()
            .map(|(known, tenant_id)| {
                let score = domain_similarity(domain, known);
                MatchCandidate {
                    domain: known.to_string(),
                    tenant_id: tenant_id.to_string(),
                    similarity: score,
                    confidence: fuzzy_confidence(score, self.fuzzy_threshold),
                }
            })
            .filter(|c| c.similarity > 0.0)
            .collect();
        candidates.sort_by(rank);

        let mut ranked = candidates.into_iter();
        match ranked.next() {
            Some(best) if best.similarity >= self.fuzzy_threshold => MatchResult {
                domain: domain.to_string(),
                matched_domain: Some(best.domain.clone()),
                tenant_id: Some(best.tenant_id.clone()),
                confidence: best.confidence,
                method: MatchMethod::Fuzzy,
                alternatives: ranked.take(MAX_ALTERNATIVES).collect(),
            },
            Some(best) => {
                let mut result = MatchResult::none(domain);
                result.alternatives = std::iter::once(best)
                    .chain(ranked)
                    .take(MAX_ALTERNATIVES)
                    .collect();
                result
            }
            None => MatchResult::none(domain),
        }
    }
}

fn rank(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.domain.len().cmp(&b.domain.len()))
        .then_with(|| a.domain.cmp(&b.domain))
}
