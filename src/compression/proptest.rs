//! Property-Based Tests for the Compression Pipeline
//!
//! # Test Properties
//!
//! 1. **Roundtrip Correctness**: decompress(compress(P, A)) = P for every algorithm
//! 2. **Checksum Stability**: the recorded checksum matches the decompressed bytes
//! 3. **Threshold Behavior**: payloads below min_size are never compressed
//! 4. **Chunk Reconstruction**: chunked payloads reassemble byte-for-byte

#![cfg(test)]

use proptest::prelude::*;

use super::algorithm::CompressionAlgorithm;
use super::chunking::{decode_chunks, encode_chunks};
use super::pipeline::{Checksum, CompressionConfig, CompressionPipeline};

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for forced algorithms.
fn algorithm_strategy() -> impl Strategy<Value = CompressionAlgorithm> {
    prop_oneof![
        Just(CompressionAlgorithm::None),
        Just(CompressionAlgorithm::Lz4),
        Just(CompressionAlgorithm::Deflate),
        Just(CompressionAlgorithm::Zstd),
    ]
}

/// Strategy mixing random bytes with low-alphabet (compressible) data.
fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..20_000),
        prop::collection::vec(0u8..4, 0..20_000),
    ]
}

fn small_chunk_pipeline() -> CompressionPipeline {
    CompressionPipeline::new(CompressionConfig {
        min_size: 64,
        chunk_size: 1024,
        ..Default::default()
    })
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: every algorithm roundtrips and the checksum still matches.
    #[test]
    fn prop_roundtrip_all_algorithms(
        data in payload_strategy(),
        algorithm in algorithm_strategy(),
    ) {
        let pipeline = small_chunk_pipeline();
        let result = pipeline.compress_with(&data, Some(algorithm))?;
        let restored = pipeline.decompress(&result)?;

        prop_assert_eq!(restored.as_ref(), &data[..]);
        prop_assert_eq!(result.checksum, Checksum::compute(&restored));
        prop_assert!(result.compressed_size <= result.original_size);
    }

    /// Property: adaptive selection roundtrips too.
    #[test]
    fn prop_roundtrip_adaptive(data in payload_strategy()) {
        let pipeline = small_chunk_pipeline();
        let result = pipeline.compress(&data)?;
        let restored = pipeline.decompress(&result)?;
        prop_assert_eq!(restored.as_ref(), &data[..]);
    }

    /// Property: payloads under min_size are stored verbatim.
    #[test]
    fn prop_below_min_size_never_compressed(
        data in prop::collection::vec(any::<u8>(), 0..64),
        algorithm in algorithm_strategy(),
    ) {
        let pipeline = small_chunk_pipeline();
        let result = pipeline.compress_with(&data, Some(algorithm))?;
        prop_assert_eq!(result.algorithm, CompressionAlgorithm::None);
        prop_assert_eq!(result.compressed_size, result.original_size);
    }

    /// Property: payloads over max_size are refused.
    #[test]
    fn prop_above_max_size_rejected(extra in 1usize..512) {
        let pipeline = CompressionPipeline::new(CompressionConfig {
            min_size: 0,
            max_size: 1024,
            ..Default::default()
        });
        let data = vec![0u8; 1024 + extra];
        prop_assert!(pipeline.compress(&data).is_err());
    }

    /// Property: framed chunks decode in header order, for any chunk count >= 1.
    #[test]
    fn prop_chunk_framing_reconstructs(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..32),
    ) {
        let framed = encode_chunks(&chunks);
        let decoded = decode_chunks(&framed, chunks.len() as u32)?;
        let rebuilt: Vec<u8> = decoded.concat();
        prop_assert_eq!(rebuilt, chunks.concat());
    }
}
