//! Deterministic text preprocessing shared by co-tweet and co-similarity
//! (§4.3): fingerprinting for exact-match equality, and a pluggable
//! similarity metric for near-duplicate matching.

use std::collections::BTreeSet;

use unicode_segmentation::UnicodeSegmentation;

/// Lowercases, collapses internal whitespace runs, and strips surrounding
/// whitespace, so that trivially-reformatted duplicates fingerprint equal.
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 64-bit hash of the normalized text, used for co-tweet equality.
///
/// Built on `blake3` (already in this lineage's dependency stack) rather than
/// `std`'s `DefaultHasher`, whose algorithm is explicitly unspecified across
/// Rust versions and therefore unsuitable for a fingerprint that must stay
/// stable for a given corpus.
pub fn fingerprint(text: &str) -> u64 {
    let normalized = normalize_whitespace(text);
    let hash = blake3::hash(normalized.as_bytes());
    u64::from_le_bytes(hash.as_bytes()[0..8].try_into().expect("8 bytes"))
}

/// Splits on Unicode word boundaries, lowercases, and drops tokens with no
/// alphanumeric content (pure punctuation/whitespace), returning a set
/// (duplicates collapsed — boolean bag of words) for co-similarity.
pub fn tokens(text: &str) -> BTreeSet<String> {
    text.unicode_words()
        .map(|w| w.to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// A pluggable capability passed to the Temporal Join Engine for
/// co-similarity (Design Note §9): buckets events into a coarse equality
/// class for candidate generation, then scores candidate pairs exactly.
pub trait SimilarityMetric: Send + Sync {
    /// Coarse key so that every event lands in exactly one bucket; only
    /// events sharing a bucket are scored against each other.
    fn bucket(&self, tokens: &BTreeSet<String>) -> u64;

    /// Score in `[0, 1]`; higher means more similar.
    fn score(&self, a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64;
}

/// Default similarity: Jaccard index over token sets, bucketed by the hash of
/// the lexicographically smallest few tokens (a cheap MinHash-style coarse
/// key: near-duplicate sets usually share their smallest tokens).
#[derive(Debug, Clone, Copy, Default)]
pub struct JaccardMetric;

impl JaccardMetric {
    const BUCKET_PREFIX_LEN: usize = 3;
}

impl SimilarityMetric for JaccardMetric {
    fn bucket(&self, tokens: &BTreeSet<String>) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for token in tokens.iter().take(Self::BUCKET_PREFIX_LEN) {
            hasher.update(token.as_bytes());
            hasher.update(b"\0");
        }
        let hash = hasher.finalize();
        u64::from_le_bytes(hash.as_bytes()[0..8].try_into().expect("8 bytes"))
    }

    fn score(&self, a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
        if a.is_empty() && b.is_empty() {
            return 0.0;
        }
        let intersection = a.intersection(b).count();
        let union = a.union(b).count();
        intersection as f64 / union as f64
    }
}
