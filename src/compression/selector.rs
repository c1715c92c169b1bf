//! Adaptive Algorithm Selection
//!
//! Picks a codec from a payload's [`DataProfile`]:
//!
//! 1. A fingerprint cache remembers the best-performing algorithm seen for
//!    each (size, entropy, repetition) bucket and is consulted first.
//! 2. Otherwise a heuristic applies: high entropy favors the cheapest codec,
//!    high repetition favors the highest ratio, and size thresholds decide the
//!    rest.
//! 3. Per-algorithm benchmark weights (an exponential moving average of
//!    composite scores) may override the heuristic when another codec has
//!    proven clearly better.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::trace;

use super::algorithm::CompressionAlgorithm;
use super::profile::{DataProfile, ProfileFingerprint};

/// Entropy (bits/byte) above which only the cheapest codec is worth running
pub const HIGH_ENTROPY_THRESHOLD: f64 = 7.0;

/// Repetition ratio above which the highest-ratio codec is preferred
pub const HIGH_REPETITION_THRESHOLD: f64 = 0.5;

/// Upper bound of the "small" size class
pub const SMALL_PAYLOAD: usize = 10 * 1024;

/// Upper bound of the "medium" size class
pub const MEDIUM_PAYLOAD: usize = 1024 * 1024;

/// Starting weight for every algorithm
pub const INITIAL_WEIGHT: f64 = 0.5;

/// Weight lead another codec needs before it overrides the heuristic
pub const WEIGHT_BIAS_MARGIN: f64 = 0.15;

/// Remembered outcome for a fingerprint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileChoice {
    pub algorithm: CompressionAlgorithm,
    pub ratio: f64,
}

/// Size-only choice used when adaptive mode is off
pub fn select_by_size(size: usize) -> CompressionAlgorithm {
    if size < SMALL_PAYLOAD {
        CompressionAlgorithm::Lz4
    } else if size < MEDIUM_PAYLOAD {
        CompressionAlgorithm::Deflate
    } else {
        CompressionAlgorithm::Zstd
    }
}

/// Adaptive selector with a fingerprint cache and benchmark weights
pub struct AdaptiveSelector {
    profile_cache: RwLock<HashMap<ProfileFingerprint, ProfileChoice>>,
    weights: RwLock<HashMap<CompressionAlgorithm, f64>>,
    capacity: usize,
}

impl AdaptiveSelector {
    /// Create a selector remembering at most `capacity` fingerprints
    pub fn new(capacity: usize) -> Self {
        let weights = CompressionAlgorithm::codecs()
            .into_iter()
            .map(|a| (a, INITIAL_WEIGHT))
            .collect();
        Self {
            profile_cache: RwLock::new(HashMap::new()),
            weights: RwLock::new(weights),
            capacity: capacity.max(1),
        }
    }

    /// Choose an algorithm among `candidates` for the given profile
    pub fn select(
        &self,
        profile: &DataProfile,
        candidates: &[CompressionAlgorithm],
    ) -> CompressionAlgorithm {
        let fingerprint = profile.fingerprint();
        if let Some(choice) = self.profile_cache.read().get(&fingerprint) {
            if candidates.contains(&choice.algorithm) {
                trace!(?fingerprint, algorithm = %choice.algorithm, "profile cache hit");
                return choice.algorithm;
            }
        }

        let heuristic = Self::heuristic(profile);
        self.apply_bias(heuristic, candidates)
    }

    /// Choice from entropy, repetition and size alone
    pub fn heuristic(profile: &DataProfile) -> CompressionAlgorithm {
        if profile.entropy > HIGH_ENTROPY_THRESHOLD {
            CompressionAlgorithm::Lz4
        } else if profile.repetition_ratio > HIGH_REPETITION_THRESHOLD {
            CompressionAlgorithm::Zstd
        } else {
            select_by_size(profile.size)
        }
    }

    fn apply_bias(
        &self,
        heuristic: CompressionAlgorithm,
        candidates: &[CompressionAlgorithm],
    ) -> CompressionAlgorithm {
        let weights = self.weights.read();
        let heuristic_weight = weights.get(&heuristic).copied().unwrap_or(INITIAL_WEIGHT);

        let best = candidates
            .iter()
            .filter(|a| **a != CompressionAlgorithm::None)
            .filter_map(|a| weights.get(a).map(|w| (*a, *w)))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((algorithm, weight)) if weight > heuristic_weight + WEIGHT_BIAS_MARGIN => {
                trace!(%heuristic, %algorithm, "benchmark weights override heuristic");
                algorithm
            }
            _ => heuristic,
        }
    }

    /// Remember the outcome of compressing a profiled payload
    pub fn record_outcome(
        &self,
        fingerprint: ProfileFingerprint,
        algorithm: CompressionAlgorithm,
        ratio: f64,
    ) {
        let mut cache = self.profile_cache.write();
        match cache.get_mut(&fingerprint) {
            Some(existing) => {
                if existing.algorithm == algorithm || ratio > existing.ratio {
                    *existing = ProfileChoice { algorithm, ratio };
                }
            }
            None => {
                if cache.len() >= self.capacity {
                    cache.clear();
                }
                cache.insert(fingerprint, ProfileChoice { algorithm, ratio });
            }
        }
    }

    /// Fold a benchmark score into the algorithm's moving average
    pub fn update_weight(&self, algorithm: CompressionAlgorithm, score: f64) -> f64 {
        let mut weights = self.weights.write();
        let weight = weights.entry(algorithm).or_insert(INITIAL_WEIGHT);
        *weight = 0.9 * *weight + 0.1 * score;
        *weight
    }

    /// Current weight for an algorithm
    pub fn weight(&self, algorithm: CompressionAlgorithm) -> f64 {
        self.weights
            .read()
            .get(&algorithm)
            .copied()
            .unwrap_or(INITIAL_WEIGHT)
    }

    /// Snapshot of all weights
    pub fn weights(&self) -> HashMap<CompressionAlgorithm, f64> {
        self.weights.read().clone()
    }

    /// Cached choice for a fingerprint
    pub fn cached_choice(&self, fingerprint: &ProfileFingerprint) -> Option<ProfileChoice> {
        self.profile_cache.read().get(fingerprint).copied()
    }

    /// Number of remembered fingerprints
    pub fn cached_profiles(&self) -> usize {
        self.profile_cache.read().len()
    }
}

impl Default for AdaptiveSelector {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CompressionAlgorithm; 3] = [
        CompressionAlgorithm::Lz4,
        CompressionAlgorithm::Deflate,
        CompressionAlgorithm::Zstd,
    ];

    fn profile(size: usize, entropy: f64, repetition_ratio: f64) -> DataProfile {
        DataProfile {
            size,
            entropy,
            repetition_ratio,
        }
    }

    #[test]
    fn test_heuristic_rules() {
        assert_eq!(
            AdaptiveSelector::heuristic(&profile(2_000_000, 7.5, 0.9)),
            CompressionAlgorithm::Lz4
        );
        assert_eq!(
            AdaptiveSelector::heuristic(&profile(2_000, 3.0, 0.8)),
            CompressionAlgorithm::Zstd
        );
        assert_eq!(
            AdaptiveSelector::heuristic(&profile(2_000, 4.0, 0.1)),
            CompressionAlgorithm::Lz4
        );
        assert_eq!(
            AdaptiveSelector::heuristic(&profile(200_000, 4.0, 0.1)),
            CompressionAlgorithm::Deflate
        );
        assert_eq!(
            AdaptiveSelector::heuristic(&profile(5_000_000, 4.0, 0.1)),
            CompressionAlgorithm::Zstd
        );
    }

    #[test]
    fn test_profile_cache_consulted_first() {
        let selector = AdaptiveSelector::new(16);
        let p = profile(200_000, 4.0, 0.1);
        assert_eq!(selector.select(&p, &ALL), CompressionAlgorithm::Deflate);

        selector.record_outcome(p.fingerprint(), CompressionAlgorithm::Zstd, 4.0);
        assert_eq!(selector.select(&p, &ALL), CompressionAlgorithm::Zstd);

        // A cached algorithm that is not a candidate is ignored
        let without_zstd = [CompressionAlgorithm::Lz4, CompressionAlgorithm::Deflate];
        assert_eq!(
            selector.select(&p, &without_zstd),
            CompressionAlgorithm::Deflate
        );
    }

    #[test]
    fn test_record_outcome_keeps_best_ratio() {
        let selector = AdaptiveSelector::new(16);
        let fp = profile(200_000, 4.0, 0.1).fingerprint();

        selector.record_outcome(fp, CompressionAlgorithm::Zstd, 4.0);
        selector.record_outcome(fp, CompressionAlgorithm::Lz4, 2.0);
        assert_eq!(
            selector.cached_choice(&fp).unwrap().algorithm,
            CompressionAlgorithm::Zstd
        );

        selector.record_outcome(fp, CompressionAlgorithm::Deflate, 5.0);
        assert_eq!(
            selector.cached_choice(&fp).unwrap().algorithm,
            CompressionAlgorithm::Deflate
        );
    }

    #[test]
    fn test_profile_cache_is_bounded() {
        let selector = AdaptiveSelector::new(2);
        for size in [1_000, 10_000, 100_000] {
            let fp = profile(size, 4.0, 0.1).fingerprint();
            selector.record_outcome(fp, CompressionAlgorithm::Lz4, 2.0);
        }
        assert!(selector.cached_profiles() <= 2);
    }

    #[test]
    fn test_weight_ema() {
        let selector = AdaptiveSelector::default();
        let w = selector.update_weight(CompressionAlgorithm::Lz4, 1.0);
        assert!((w - 0.55).abs() < 1e-9);
        let w = selector.update_weight(CompressionAlgorithm::Lz4, 0.0);
        assert!((w - 0.495).abs() < 1e-9);
    }

    #[test]
    fn test_weights_bias_selection() {
        let selector = AdaptiveSelector::default();
        let p = profile(2_000, 4.0, 0.1);
        assert_eq!(selector.select(&p, &ALL), CompressionAlgorithm::Lz4);

        for _ in 0..30 {
            selector.update_weight(CompressionAlgorithm::Deflate, 1.0);
            selector.update_weight(CompressionAlgorithm::Lz4, 0.0);
        }
        assert_eq!(selector.select(&p, &ALL), CompressionAlgorithm::Deflate);
    }
}
