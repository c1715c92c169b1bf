//! Data Profiling
//!
//! Lightweight statistics used by adaptive algorithm selection: Shannon
//! entropy of the byte distribution and the fraction of duplicate
//! fixed-size windows. Only a bounded prefix of the payload is sampled.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Sample size for profiling (64KB)
pub const PROFILE_SAMPLE_SIZE: usize = 64 * 1024;

/// Window size used for repetition detection
pub const REPETITION_WINDOW: usize = 8;

/// Characteristics of a payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataProfile {
    /// Full payload size in bytes
    pub size: usize,
    /// Shannon entropy, 0-8 bits per byte
    pub entropy: f64,
    /// Fraction of windows that repeat an earlier window, 0-1
    pub repetition_ratio: f64,
}

impl DataProfile {
    /// Profile a payload
    pub fn analyze(data: &[u8]) -> Self {
        let sample = &data[..data.len().min(PROFILE_SAMPLE_SIZE)];
        Self {
            size: data.len(),
            entropy: shannon_entropy(sample),
            repetition_ratio: repetition_ratio(sample),
        }
    }

    /// Coarse bucket key for the selection cache
    pub fn fingerprint(&self) -> ProfileFingerprint {
        let size_bucket = match self.size {
            0..=4_095 => 0,
            4_096..=65_535 => 1,
            65_536..=1_048_575 => 2,
            1_048_576..=16_777_215 => 3,
            _ => 4,
        };
        ProfileFingerprint {
            size_bucket,
            entropy_bucket: self.entropy.clamp(0.0, 7.999).floor() as u8,
            repetition_bucket: (self.repetition_ratio.clamp(0.0, 0.999) * 10.0).floor() as u8,
        }
    }
}

/// Size, entropy and repetition buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileFingerprint {
    pub size_bucket: u8,
    pub entropy_bucket: u8,
    pub repetition_bucket: u8,
}

/// Calculate Shannon entropy of data (0-8 bits per byte).
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0u64; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &freq {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}

/// Fraction of non-overlapping windows already seen earlier in the sample.
pub fn repetition_ratio(data: &[u8]) -> f64 {
    let windows = data.len() / REPETITION_WINDOW;
    if windows < 2 {
        return 0.0;
    }

    let mut seen = HashSet::with_capacity(windows);
    let mut duplicates = 0usize;
    for window in data.chunks_exact(REPETITION_WINDOW) {
        let mut key = [0u8; REPETITION_WINDOW];
        key.copy_from_slice(window);
        if !seen.insert(u64::from_le_bytes(key)) {
            duplicates += 1;
        }
    }
    duplicates as f64 / windows as f64
}
