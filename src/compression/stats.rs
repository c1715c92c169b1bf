//! Compression Statistics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::algorithm::CompressionAlgorithm;

/// Lock-free counters for the compression pipeline
#[derive(Debug, Default)]
pub struct CompressionStats {
    /// Payloads stored compressed
    pub compressed: AtomicU64,
    /// Payloads below the minimum size
    pub skipped_small: AtomicU64,
    /// Codec failed or expanded the payload; stored uncompressed
    pub fallbacks: AtomicU64,
    /// Requested codec unavailable; a cheaper one was used
    pub downgrades: AtomicU64,
    /// Payloads rejected for exceeding the maximum size
    pub rejected_oversize: AtomicU64,
    /// Decompressions performed
    pub decompressions: AtomicU64,
    /// Checksum mismatches after decompression
    pub integrity_failures: AtomicU64,
    /// Uncompressed bytes seen by compress
    pub bytes_in: AtomicU64,
    /// Bytes produced by compress
    pub bytes_out: AtomicU64,
    /// Per-algorithm usage, indexed by wire id
    per_algorithm: [AtomicU64; 4],
}

impl CompressionStats {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished compress call
    pub fn record_compression(&self, algorithm: CompressionAlgorithm, input: usize, output: usize) {
        if algorithm != CompressionAlgorithm::None {
            self.compressed.fetch_add(1, Ordering::Relaxed);
        }
        self.per_algorithm[algorithm.wire_id() as usize].fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(input as u64, Ordering::Relaxed);
        self.bytes_out.fetch_add(output as u64, Ordering::Relaxed);
    }

    /// Usage count for an algorithm
    pub fn usage(&self, algorithm: CompressionAlgorithm) -> u64 {
        self.per_algorithm[algorithm.wire_id() as usize].load(Ordering::Relaxed)
    }

    /// Overall output/input ratio (1.0 when nothing was seen)
    pub fn overall_ratio(&self) -> f64 {
        let input = self.bytes_in.load(Ordering::Relaxed);
        let output = self.bytes_out.load(Ordering::Relaxed);
        if input == 0 {
            1.0
        } else {
            output as f64 / input as f64
        }
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> CompressionStatsSnapshot {
        CompressionStatsSnapshot {
            compressed: self.compressed.load(Ordering::Relaxed),
            skipped_small: self.skipped_small.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            downgrades: self.downgrades.load(Ordering::Relaxed),
            rejected_oversize: self.rejected_oversize.load(Ordering::Relaxed),
            decompressions: self.decompressions.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            overall_ratio: self.overall_ratio(),
            lz4_uses: self.usage(CompressionAlgorithm::Lz4),
            deflate_uses: self.usage(CompressionAlgorithm::Deflate),
            zstd_uses: self.usage(CompressionAlgorithm::Zstd),
        }
    }
}

/// Point-in-time copy of [`CompressionStats`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionStatsSnapshot {
    pub compressed: u64,
    pub skipped_small: u64,
    pub fallbacks: u64,
    pub downgrades: u64,
    pub rejected_oversize: u64,
    pub decompressions: u64,
    pub integrity_failures: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub overall_ratio: f64,
    pub lz4_uses: u64,
    pub deflate_uses: u64,
    pub zstd_uses: u64,
}

impl CompressionStatsSnapshot {
    /// Bytes saved by compression
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_in.saturating_sub(self.bytes_out)
    }
}
