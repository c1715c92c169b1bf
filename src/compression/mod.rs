//! Adaptive Compression Pipeline
//!
//! Selects and applies a compression algorithm to serialized cache values,
//! chunks large payloads and verifies integrity on the way back.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        CompressionPipeline                               │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────┐   ┌────────────────────┐   ┌──────────────────────┐  │
//! │  │ DataProfile   │──▶│ AdaptiveSelector   │──▶│ CodecSet             │  │
//! │  │ (entropy,     │   │ (fingerprint cache,│   │ (none, LZ4, DEFLATE, │  │
//! │  │  repetition)  │   │  EMA weights)      │   │  Zstandard)          │  │
//! │  └───────────────┘   └────────────────────┘   └──────────┬───────────┘  │
//! │                                 ▲                        │              │
//! │                        ┌────────┴────────┐      ┌────────▼─────────┐    │
//! │                        │ Benchmark       │      │ Chunk framing    │    │
//! │                        │ (composite      │      │ + SHA-256        │    │
//! │                        │  scores)        │      │   checksum       │    │
//! │                        └─────────────────┘      └──────────────────┘    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use couchecache::compression::{CompressionPipeline, CompressionAlgorithm};
//!
//! let pipeline = CompressionPipeline::default();
//!
//! let data = b"Hello, this is test data that should compress well! ".repeat(64);
//! let result = pipeline.compress(&data).unwrap();
//! assert!(result.algorithm != CompressionAlgorithm::None);
//!
//! let decompressed = pipeline.decompress(&result).unwrap();
//! assert_eq!(decompressed.as_ref(), &data[..]);
//! ```

mod algorithm;
mod benchmark;
mod chunking;
mod pipeline;
mod profile;
mod selector;
mod stats;

#[cfg(test)]
mod proptest;

pub use algorithm::{
    CodecSet, CompressionAlgorithm, Compressor, DeflateCompressor, Lz4Compressor, NoopCompressor,
};
#[cfg(feature = "zstd")]
pub use algorithm::ZstdCompressor;
pub use benchmark::{composite_score, AlgorithmBenchmark, BenchmarkReport};
pub use chunking::{decode_chunks, encode_chunks};
pub use pipeline::{
    AlgorithmSetting, Checksum, CompressionConfig, CompressionPipeline, CompressionResult,
};
pub use profile::{DataProfile, ProfileFingerprint};
pub use selector::{AdaptiveSelector, ProfileChoice};
pub use stats::{CompressionStats, CompressionStatsSnapshot};
