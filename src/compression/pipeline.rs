//! Compression Pipeline
//!
//! Entry point used by the cache core:
//!
//! ```text
//! bytes ──▶ size gates ──▶ algorithm selection ──▶ availability fallback
//!                                                          │
//!            CompressionResult ◀── expansion check ◀── (chunked) compress
//! ```
//!
//! Compression never fails a write: codec errors and payloads that grow are
//! stored uncompressed. Only payloads above `max_size` are refused.
//! Decompression always verifies the SHA-256 checksum of the original bytes.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use super::algorithm::{CodecSet, CompressionAlgorithm};
use super::chunking::{decode_chunks, encode_chunks};
use super::profile::DataProfile;
use super::selector::{select_by_size, AdaptiveSelector};
use super::stats::{CompressionStats, CompressionStatsSnapshot};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Algorithm setting: adaptive/size-based choice or a forced algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlgorithmSetting {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "none")]
    None,
    #[serde(rename = "fast-text", alias = "lz4")]
    FastText,
    #[serde(rename = "deflate-family", alias = "deflate", alias = "gzip")]
    DeflateFamily,
    #[serde(rename = "modern-block", alias = "zstd")]
    ModernBlock,
}

impl AlgorithmSetting {
    /// The forced algorithm, `None` for auto
    pub fn forced(&self) -> Option<CompressionAlgorithm> {
        match self {
            AlgorithmSetting::Auto => None,
            AlgorithmSetting::None => Some(CompressionAlgorithm::None),
            AlgorithmSetting::FastText => Some(CompressionAlgorithm::Lz4),
            AlgorithmSetting::DeflateFamily => Some(CompressionAlgorithm::Deflate),
            AlgorithmSetting::ModernBlock => Some(CompressionAlgorithm::Zstd),
        }
    }
}

/// Configuration for the compression pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    /// Algorithm to use, or `auto`
    pub algorithm: AlgorithmSetting,
    /// Payloads smaller than this are stored uncompressed
    pub min_size: usize,
    /// Payloads larger than this are refused
    pub max_size: usize,
    /// Payloads larger than this are split into independently compressed chunks
    pub chunk_size: usize,
    /// Profile payloads to pick an algorithm (otherwise size-only)
    pub adaptive_mode: bool,
    /// Compression level for deflate/zstd
    pub level: i32,
    /// Algorithms treated as unavailable at runtime
    pub disabled_algorithms: Vec<CompressionAlgorithm>,
    /// Maximum remembered profile fingerprints
    pub profile_cache_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmSetting::Auto,
            min_size: 1024,              // 1KB minimum
            max_size: 64 * 1024 * 1024,  // 64MB maximum
            chunk_size: 64 * 1024,       // 64KB chunks
            adaptive_mode: true,
            level: 3,
            disabled_algorithms: Vec::new(),
            profile_cache_size: 1024,
        }
    }
}

impl CompressionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.min_size > self.max_size {
            return Err(Error::Config(format!(
                "compression min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("compression chunk_size must be > 0".into()));
        }
        if self.chunk_size > u32::MAX as usize {
            return Err(Error::Config(
                "compression chunk_size must fit in 32 bits".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Checksum
// =============================================================================

/// SHA-256 digest of uncompressed bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum(pub [u8; 32]);

impl Checksum {
    /// Hash a payload
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..12])
    }
}

// =============================================================================
// Compression Result
// =============================================================================

/// Output of [`CompressionPipeline::compress`]
#[derive(Debug, Clone)]
pub struct CompressionResult {
    /// Algorithm actually applied
    pub algorithm: CompressionAlgorithm,
    /// Stored payload (raw bytes when algorithm is none)
    pub data: Bytes,
    /// Uncompressed size
    pub original_size: usize,
    /// Stored size
    pub compressed_size: usize,
    /// original / compressed
    pub compression_ratio: f64,
    /// Time spent compressing
    pub compression_time: Duration,
    /// Number of chunks when the payload was chunked
    pub chunk_count: Option<u32>,
    /// Checksum of the uncompressed bytes
    pub checksum: Checksum,
}

impl CompressionResult {
    fn uncompressed(data: &[u8], checksum: Checksum, elapsed: Duration) -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            data: Bytes::copy_from_slice(data),
            original_size: data.len(),
            compressed_size: data.len(),
            compression_ratio: 1.0,
            compression_time: elapsed,
            chunk_count: None,
            checksum,
        }
    }

    /// Whether the payload is stored compressed
    pub fn is_compressed(&self) -> bool {
        self.algorithm != CompressionAlgorithm::None
    }

    /// Bytes saved by compression
    pub fn bytes_saved(&self) -> usize {
        self.original_size.saturating_sub(self.compressed_size)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Compression service shared by the cache core
pub struct CompressionPipeline {
    config: CompressionConfig,
    codecs: CodecSet,
    selector: AdaptiveSelector,
    stats: CompressionStats,
    disabled: HashSet<CompressionAlgorithm>,
}

impl CompressionPipeline {
    /// Create a pipeline with custom config
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            codecs: CodecSet::new(config.level),
            selector: AdaptiveSelector::new(config.profile_cache_size),
            stats: CompressionStats::new(),
            disabled: config.disabled_algorithms.iter().copied().collect(),
            config,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Adaptive selector (profile cache and benchmark weights)
    pub fn selector(&self) -> &AdaptiveSelector {
        &self.selector
    }

    pub(crate) fn codecs(&self) -> &CodecSet {
        &self.codecs
    }

    /// Get statistics snapshot
    pub fn stats(&self) -> CompressionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether an algorithm can be used for new compressions
    pub fn is_available(&self, algorithm: CompressionAlgorithm) -> bool {
        algorithm == CompressionAlgorithm::None
            || (algorithm.is_compiled() && !self.disabled.contains(&algorithm))
    }

    /// Algorithms currently usable for compression
    pub fn available_algorithms(&self) -> Vec<CompressionAlgorithm> {
        CompressionAlgorithm::codecs()
            .into_iter()
            .filter(|a| self.is_available(*a))
            .collect()
    }

    /// Walk the fallback chain until an available algorithm is found
    pub fn resolve_algorithm(&self, requested: CompressionAlgorithm) -> CompressionAlgorithm {
        let mut current = requested;
        while !self.is_available(current) {
            match current.fallback() {
                Some(next) => current = next,
                None => break,
            }
        }
        if current != requested {
            warn!(
                requested = %requested,
                using = %current,
                "Compression algorithm unavailable, downgrading"
            );
            self.stats.downgrades.fetch_add(1, Ordering::Relaxed);
        }
        current
    }

    /// Compress using the configured algorithm setting
    pub fn compress(&self, data: &[u8]) -> Result<CompressionResult> {
        self.compress_with(data, self.config.algorithm.forced())
    }

    /// Compress, optionally forcing an algorithm
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub fn compress_with(
        &self,
        data: &[u8],
        forced: Option<CompressionAlgorithm>,
    ) -> Result<CompressionResult> {
        let start = Instant::now();
        let size = data.len();

        if size > self.config.max_size {
            self.stats.rejected_oversize.fetch_add(1, Ordering::Relaxed);
            return Err(Error::PayloadTooLarge {
                size,
                max: self.config.max_size,
            });
        }

        let checksum = Checksum::compute(data);

        if size < self.config.min_size {
            debug!("Data too small for compression: {} bytes", size);
            self.stats.skipped_small.fetch_add(1, Ordering::Relaxed);
            self.stats
                .record_compression(CompressionAlgorithm::None, size, size);
            return Ok(CompressionResult::uncompressed(
                data,
                checksum,
                start.elapsed(),
            ));
        }

        let (requested, profile) = match forced {
            Some(algorithm) => (algorithm, None),
            None if self.config.adaptive_mode => {
                let profile = DataProfile::analyze(data);
                let choice = self
                    .selector
                    .select(&profile, &self.available_algorithms());
                debug!(
                    entropy = profile.entropy,
                    repetition = profile.repetition_ratio,
                    algorithm = %choice,
                    "Adaptive algorithm selection"
                );
                (choice, Some(profile))
            }
            None => (select_by_size(size), None),
        };

        let algorithm = self.resolve_algorithm(requested);
        let codec = match (algorithm, self.codecs.get(algorithm)) {
            (CompressionAlgorithm::None, _) | (_, None) => {
                self.stats
                    .record_compression(CompressionAlgorithm::None, size, size);
                return Ok(CompressionResult::uncompressed(
                    data,
                    checksum,
                    start.elapsed(),
                ));
            }
            (_, Some(codec)) => codec,
        };

        let (compressed, chunk_count) = if size > self.config.chunk_size {
            let chunks = data
                .chunks(self.config.chunk_size)
                .map(|chunk| codec.compress(chunk))
                .collect::<Result<Vec<_>>>();
            match chunks {
                Ok(chunks) => {
                    let count = chunks.len() as u32;
                    (Ok(encode_chunks(&chunks)), Some(count))
                }
                Err(e) => (Err(e), None),
            }
        } else {
            (codec.compress(data), None)
        };

        let compressed = match compressed {
            Ok(compressed) => compressed,
            Err(e) => {
                warn!("Compression with {} failed, using uncompressed: {}", algorithm, e);
                self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .record_compression(CompressionAlgorithm::None, size, size);
                return Ok(CompressionResult::uncompressed(
                    data,
                    checksum,
                    start.elapsed(),
                ));
            }
        };

        if compressed.len() >= size {
            debug!(
                "{} expanded payload ({} -> {} bytes), storing uncompressed",
                algorithm,
                size,
                compressed.len()
            );
            self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
            self.stats
                .record_compression(CompressionAlgorithm::None, size, size);
            return Ok(CompressionResult::uncompressed(
                data,
                checksum,
                start.elapsed(),
            ));
        }

        let compressed_size = compressed.len();
        let ratio = size as f64 / compressed_size as f64;
        if let Some(profile) = profile {
            self.selector
                .record_outcome(profile.fingerprint(), algorithm, ratio);
        }
        self.stats
            .record_compression(algorithm, size, compressed_size);

        debug!(
            "{} compressed: {} -> {} bytes (ratio: {:.2}x, chunks: {:?})",
            algorithm, size, compressed_size, ratio, chunk_count
        );

        Ok(CompressionResult {
            algorithm,
            data: Bytes::from(compressed),
            original_size: size,
            compressed_size,
            compression_ratio: ratio,
            compression_time: start.elapsed(),
            chunk_count,
            checksum,
        })
    }

    /// Decompress a result produced by [`compress`](Self::compress)
    pub fn decompress(&self, result: &CompressionResult) -> Result<Bytes> {
        self.decompress_parts(
            result.algorithm,
            &result.data,
            result.chunk_count,
            &result.checksum,
        )
    }

    /// Decompress a stored payload given its out-of-band metadata
    #[instrument(skip(self, payload, checksum), fields(size = payload.len()))]
    pub fn decompress_parts(
        &self,
        algorithm: CompressionAlgorithm,
        payload: &[u8],
        chunk_count: Option<u32>,
        checksum: &Checksum,
    ) -> Result<Bytes> {
        self.stats.decompressions.fetch_add(1, Ordering::Relaxed);

        let output = if algorithm == CompressionAlgorithm::None {
            payload.to_vec()
        } else {
            let codec = self
                .codecs
                .get(algorithm)
                .ok_or_else(|| Error::UnsupportedAlgorithm(algorithm.name().into()))?;

            match chunk_count {
                Some(expected) => {
                    let mut out = Vec::new();
                    for chunk in decode_chunks(payload, expected)? {
                        out.extend_from_slice(&codec.decompress(chunk)?);
                    }
                    out
                }
                None => codec.decompress(payload)?,
            }
        };

        let actual = Checksum::compute(&output);
        if actual != *checksum {
            self.stats.integrity_failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Integrity {
                expected: checksum.to_hex(),
                actual: actual.to_hex(),
            });
        }

        Ok(Bytes::from(output))
    }
}

impl Default for CompressionPipeline {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn text_payload(len: usize) -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog. "
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect()
    }

    fn noisy_payload(len: usize) -> Vec<u8> {
        // xorshift noise, effectively incompressible
        let mut state = 0x2545F4914F6CDD1Du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    #[test]
    fn test_small_payload_skipped() {
        let pipeline = CompressionPipeline::default();
        let result = pipeline.compress(b"tiny").unwrap();
        assert_eq!(result.algorithm, CompressionAlgorithm::None);
        assert_eq!(result.compressed_size, result.original_size);
        assert_eq!(pipeline.stats().skipped_small, 1);
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let pipeline = CompressionPipeline::new(CompressionConfig {
            max_size: 2048,
            ..Default::default()
        });
        let err = pipeline.compress(&text_payload(4096)).unwrap_err();
        assert_matches!(err, Error::PayloadTooLarge { size: 4096, max: 2048 });
        assert_eq!(pipeline.stats().bytes_in, 0);
        assert_eq!(pipeline.selector().cached_profiles(), 0);
    }

    #[test]
    fn test_roundtrip_each_forced_algorithm() {
        let pipeline = CompressionPipeline::default();
        let data = text_payload(8 * 1024);
        for algorithm in CompressionAlgorithm::codecs() {
            let result = pipeline.compress_with(&data, Some(algorithm)).unwrap();
            assert!(result.is_compressed());
            assert!(result.compressed_size < result.original_size);
            assert_eq!(pipeline.decompress(&result).unwrap().as_ref(), &data[..]);
        }
    }

    #[test]
    fn test_incompressible_falls_back_to_none() {
        let pipeline = CompressionPipeline::default();
        let data = noisy_payload(16 * 1024);
        let result = pipeline
            .compress_with(&data, Some(CompressionAlgorithm::Deflate))
            .unwrap();
        assert_eq!(result.algorithm, CompressionAlgorithm::None);
        assert_eq!(result.data.as_ref(), &data[..]);
        assert_eq!(pipeline.stats().fallbacks, 1);
    }

    #[test]
    fn test_chunked_roundtrip() {
        let pipeline = CompressionPipeline::new(CompressionConfig {
            chunk_size: 4096,
            ..Default::default()
        });
        let data = text_payload(4096 * 5 + 100);
        let result = pipeline
            .compress_with(&data, Some(CompressionAlgorithm::Lz4))
            .unwrap();
        assert_eq!(result.chunk_count, Some(6));
        assert_eq!(pipeline.decompress(&result).unwrap().as_ref(), &data[..]);
    }

    #[test]
    fn test_chunk_count_validated() {
        let pipeline = CompressionPipeline::new(CompressionConfig {
            chunk_size: 4096,
            ..Default::default()
        });
        let data = text_payload(4096 * 3);
        let mut result = pipeline
            .compress_with(&data, Some(CompressionAlgorithm::Deflate))
            .unwrap();
        result.chunk_count = Some(7);
        assert_matches!(
            pipeline.decompress(&result),
            Err(Error::ChunkMismatch {
                expected: 7,
                actual: 3
            })
        );
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let pipeline = CompressionPipeline::default();
        let data = text_payload(4096);
        let mut result = pipeline.compress(&data).unwrap();
        result.checksum = Checksum::compute(b"something else");
        assert_matches!(pipeline.decompress(&result), Err(Error::Integrity { .. }));
        assert_eq!(pipeline.stats().integrity_failures, 1);
    }

    #[test]
    fn test_disabled_algorithm_downgrades() {
        let pipeline = CompressionPipeline::new(CompressionConfig {
            disabled_algorithms: vec![CompressionAlgorithm::Zstd],
            ..Default::default()
        });
        assert_eq!(
            pipeline.resolve_algorithm(CompressionAlgorithm::Zstd),
            CompressionAlgorithm::Deflate
        );

        let data = text_payload(8192);
        let result = pipeline
            .compress_with(&data, Some(CompressionAlgorithm::Zstd))
            .unwrap();
        assert_eq!(result.algorithm, CompressionAlgorithm::Deflate);
        assert!(pipeline.stats().downgrades >= 1);
        assert_eq!(pipeline.decompress(&result).unwrap().as_ref(), &data[..]);
    }

    #[test]
    fn test_adaptive_mode_records_profile() {
        let pipeline = CompressionPipeline::default();
        let data = text_payload(32 * 1024);
        let result = pipeline.compress(&data).unwrap();
        assert!(result.is_compressed());
        let fingerprint = DataProfile::analyze(&data).fingerprint();
        let choice = pipeline.selector().cached_choice(&fingerprint).unwrap();
        assert_eq!(choice.algorithm, result.algorithm);
    }

    #[test]
    fn test_config_validation() {
        assert!(CompressionConfig::default().validate().is_ok());
        let bad = CompressionConfig {
            min_size: 10,
            max_size: 5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = CompressionConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_algorithm_setting_forced() {
        assert_eq!(AlgorithmSetting::Auto.forced(), None);
        assert_eq!(
            AlgorithmSetting::ModernBlock.forced(),
            Some(CompressionAlgorithm::Zstd)
        );
        let parsed: AlgorithmSetting = serde_json::from_str("\"fast-text\"").unwrap();
        assert_eq!(parsed, AlgorithmSetting::FastText);
    }
}
