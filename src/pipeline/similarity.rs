//! Domain similarity scoring for fuzzy tenant matching.
//!
//! Base score is normalized Levenshtein similarity, `1 - distance /
//! max(len_a, len_b)`, in 0.0..=1.0. Domains are compared on the labels left
//! of their shared trailing labels, so `gmail.com` and `globex.com` are scored
//! as `gmail` vs `globex` and a common `.com` earns nothing. Pure and
//! deterministic, so equal inputs always produce bit-identical scores.

/// Lowest confidence a fuzzy match is reported with.
pub const FUZZY_MIN_CONFIDENCE: f64 = 0.5;
/// Highest confidence a fuzzy match is reported with.
pub const FUZZY_MAX_CONFIDENCE: f64 = 0.85;

/// Applied when two domains share no trailing label at all.
pub const TLD_MISMATCH_FACTOR: f64 = 0.8;

/// Levenshtein edit distance over bytes (domains are ASCII after normalization).
pub fn levenshtein(a: &str, b: &str) -> usize {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized similarity in 0.0..=1.0. Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Similarity of two normalized domains, ignoring their common suffix.
///
/// Trailing labels both domains share are stripped (each side keeps at least
/// one label) and the remaining stems are scored with [`similarity`]. When
/// not even the last label matches, the whole-string score is scaled by
/// [`TLD_MISMATCH_FACTOR`].
pub fn domain_similarity(a: &str, b: &str) -> f64 {
    let labels_a: Vec<&str> = a.split('.').collect();
    let labels_b: Vec<&str> = b.split('.').collect();
    let max_shared = labels_a.len().min(labels_b.len()).saturating_sub(1);
    let shared = labels_a
        .iter()
        .rev()
        .zip(labels_b.iter().rev())
        .take(max_shared)
        .take_while(|(x, y)| x == y)
        .count();

    if shared == 0 {
        return similarity(a, b) * TLD_MISMATCH_FACTOR;
    }
    let stem_a = labels_a[..labels_a.len() - shared].join(".");
    let stem_b = labels_b[..labels_b.len() - shared].join(".");
    similarity(&stem_a, &stem_b)
}

/// Map a similarity that cleared `threshold` onto the fuzzy confidence band.
///
/// `threshold` maps to 0.5 and a perfect score to 0.85. Scores below the
/// threshold map to 0.0.
pub fn fuzzy_confidence(score: f64, threshold: f64) -> f64 {
    if score < threshold {
        return 0.0;
    }
    let span = 1.0 - threshold;
    if span <= f64::EPSILON {
        return FUZZY_MAX_CONFIDENCE;
    }
    let scaled = FUZZY_MIN_CONFIDENCE
        + (FUZZY_MAX_CONFIDENCE - FUZZY_MIN_CONFIDENCE) * ((score - threshold) / span);
    scaled.clamp(FUZZY_MIN_CONFIDENCE, FUZZY_MAX_CONFIDENCE)
}
