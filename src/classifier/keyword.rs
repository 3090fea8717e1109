//! Deterministic keyword-table classifier.
//!
//! Useful as an offline default and in tests. Counts keyword hits per
//! category in subject + body and picks the category with the most hits,
//! restricted to categories the tenant actually routes.

use async_trait::async_trait;

use super::{Classifier, TenantContext};
use crate::error::ClassifierError;
use crate::pipeline::types::{ClassificationResult, EmailMessage};
use crate::tenant::model::GENERAL_CATEGORY;

/// Confidence reported when no keyword matched.
const NO_MATCH_CONFIDENCE: f64 = 0.1;

const DEFAULT_TABLE: &[(&str, &[&str])] = &[
    (
        "support",
        &["help", "issue", "problem", "broken", "error", "not working", "crash", "support"],
    ),
    (
        "billing",
        &["invoice", "payment", "refund", "charge", "billing", "receipt", "subscription"],
    ),
    (
        "sales",
        &["pricing", "quote", "demo", "purchase", "trial", "discount", "sales"],
    ),
];

pub struct KeywordClassifier {
    table: Vec<(String, Vec<String>)>,
}

impl KeywordClassifier {
    /// Custom table. Earlier categories win ties.
    pub fn new<C, K, I>(table: impl IntoIterator<Item = (C, I)>) -> Self
    where
        C: Into<String>,
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        let table = table
            .into_iter()
            .map(|(category, keywords)| {
                (
                    category.into().trim().to_lowercase(),
                    keywords
                        .into_iter()
                        .map(|k| k.into().trim().to_lowercase())
                        .filter(|k| !k.is_empty())
                        .collect(),
                )
            })
            .collect();
        Self { table }
    }

    fn score(&self, ctx: &TenantContext, text: &str) -> ClassificationResult {
        let routed = |category: &str| ctx.categories.is_empty() || ctx.categories.iter().any(|c| c == category);

        let mut total = 0usize;
        let mut best: Option<(&str, usize)> = None;
        for (category, keywords) in &self.table {
            if !routed(category) {
                continue;
            }
            let hits = keywords.iter().filter(|k| text.contains(k.as_str())).count();
            total += hits;
            if hits > 0 && best.is_none_or(|(_, h)| hits > h) {
                best = Some((category.as_str(), hits));
            }
        }

        match best {
            Some((category, hits)) => {
                let share = hits as f64 / total as f64;
                let strength = 0.6 + 0.1 * hits.min(3) as f64;
                ClassificationResult::new(category, share * strength)
            }
            None => ClassificationResult::new(GENERAL_CATEGORY, NO_MATCH_CONFIDENCE),
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE.iter().map(|(c, k)| (*c, k.iter().copied())))
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(
        &self,
        ctx: &TenantContext,
        message: &EmailMessage,
    ) -> Result<ClassificationResult, ClassifierError> {
        let text = format!("{}\n{}", message.subject, message.body).to_lowercase();
        Ok(self.score(ctx, &text))
    }
}
