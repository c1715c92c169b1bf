//! Compression Algorithms and Codecs
//!
//! Each algorithm family maps to one codec:
//!
//! | Family           | Codec             | Crate    |
//! |------------------|-------------------|----------|
//! | `none`           | pass-through      | -        |
//! | `fast-text`      | LZ4 block         | `lz4`    |
//! | `deflate-family` | zlib / DEFLATE    | `flate2` |
//! | `modern-block`   | Zstandard         | `zstd`   |
//!
//! Zstandard is behind the `zstd` cargo feature. When it is compiled out (or
//! disabled at runtime) requests for it walk the fallback chain
//! `modern-block → deflate-family → fast-text → none`.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithm families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    /// No compression
    #[serde(rename = "none")]
    None,
    /// LZ4 - fastest, moderate ratio
    #[serde(rename = "fast-text", alias = "lz4")]
    Lz4,
    /// zlib/DEFLATE - balanced
    #[serde(rename = "deflate-family", alias = "deflate", alias = "gzip")]
    Deflate,
    /// Zstandard - best ratio
    #[serde(rename = "modern-block", alias = "zstd")]
    Zstd,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "fast-text",
            CompressionAlgorithm::Deflate => "deflate-family",
            CompressionAlgorithm::Zstd => "modern-block",
        }
    }

    /// Identifier used in the stored envelope
    pub fn wire_id(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
            CompressionAlgorithm::Deflate => 2,
            CompressionAlgorithm::Zstd => 3,
        }
    }

    /// Parse an envelope identifier
    pub fn from_wire_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(CompressionAlgorithm::None),
            1 => Ok(CompressionAlgorithm::Lz4),
            2 => Ok(CompressionAlgorithm::Deflate),
            3 => Ok(CompressionAlgorithm::Zstd),
            other => Err(Error::UnsupportedAlgorithm(format!("wire id {}", other))),
        }
    }

    /// Whether a codec for this algorithm is compiled into the build
    pub fn is_compiled(&self) -> bool {
        match self {
            CompressionAlgorithm::Zstd => cfg!(feature = "zstd"),
            _ => true,
        }
    }

    /// Nearest cheaper algorithm to degrade to
    pub fn fallback(&self) -> Option<Self> {
        match self {
            CompressionAlgorithm::Zstd => Some(CompressionAlgorithm::Deflate),
            CompressionAlgorithm::Deflate => Some(CompressionAlgorithm::Lz4),
            CompressionAlgorithm::Lz4 => Some(CompressionAlgorithm::None),
            CompressionAlgorithm::None => None,
        }
    }

    /// All algorithms that actually compress, cheapest first
    pub fn codecs() -> [Self; 3] {
        [
            CompressionAlgorithm::Lz4,
            CompressionAlgorithm::Deflate,
            CompressionAlgorithm::Zstd,
        ]
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

fn compress_err(algorithm: CompressionAlgorithm, e: impl std::fmt::Display) -> Error {
    Error::Compression {
        algorithm: algorithm.name().into(),
        reason: e.to_string(),
    }
}

fn decompress_err(algorithm: CompressionAlgorithm, e: impl std::fmt::Display) -> Error {
    Error::Decompression {
        algorithm: algorithm.name().into(),
        reason: e.to_string(),
    }
}

/// Pass-through compressor (no compression)
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// LZ4 block compressor with the uncompressed size prepended
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(data, Some(lz4::block::CompressionMode::DEFAULT), true)
            .map_err(|e| compress_err(self.algorithm(), e))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| decompress_err(self.algorithm(), e))
    }
}

/// zlib-framed DEFLATE compressor
pub struct DeflateCompressor {
    level: u32,
}

impl DeflateCompressor {
    /// Create with a compression level (clamped to 0-9)
    pub fn with_level(level: i32) -> Self {
        Self {
            level: level.clamp(0, 9) as u32,
        }
    }
}

impl Compressor for DeflateCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Deflate
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|e| compress_err(self.algorithm(), e))?;
        encoder.finish().map_err(|e| compress_err(self.algorithm(), e))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = flate2::read::ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| decompress_err(self.algorithm(), e))?;
        Ok(out)
    }
}

/// Zstandard compressor
#[cfg(feature = "zstd")]
pub struct ZstdCompressor {
    level: i32,
}

#[cfg(feature = "zstd")]
impl ZstdCompressor {
    /// Create with a compression level (clamped to 1-22)
    pub fn with_level(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
        }
    }
}

#[cfg(feature = "zstd")]
impl Compressor for ZstdCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zstd
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(|e| compress_err(self.algorithm(), e))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| decompress_err(self.algorithm(), e))
    }
}

// =============================================================================
// Codec Set
// =============================================================================

/// The codecs compiled into this build
pub struct CodecSet {
    noop: NoopCompressor,
    lz4: Lz4Compressor,
    deflate: DeflateCompressor,
    #[cfg(feature = "zstd")]
    zstd: ZstdCompressor,
}

impl CodecSet {
    /// Build every compiled codec at the given level
    pub fn new(level: i32) -> Self {
        Self {
            noop: NoopCompressor,
            lz4: Lz4Compressor,
            deflate: DeflateCompressor::with_level(level),
            #[cfg(feature = "zstd")]
            zstd: ZstdCompressor::with_level(level),
        }
    }

    /// Get compressor for algorithm, `None` if it is not compiled in
    pub fn get(&self, algorithm: CompressionAlgorithm) -> Option<&dyn Compressor> {
        match algorithm {
            CompressionAlgorithm::None => Some(&self.noop),
            CompressionAlgorithm::Lz4 => Some(&self.lz4),
            CompressionAlgorithm::Deflate => Some(&self.deflate),
            #[cfg(feature = "zstd")]
            CompressionAlgorithm::Zstd => Some(&self.zstd),
            #[cfg(not(feature = "zstd"))]
            CompressionAlgorithm::Zstd => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DATA: &[u8] = b"Hello, this is test data that should compress well. \
        It has some repetition: Hello, this is test data that should compress well.";

    #[test]
    fn test_codec_roundtrips() {
        let codecs = CodecSet::new(3);
        for algorithm in CompressionAlgorithm::codecs() {
            let Some(codec) = codecs.get(algorithm) else {
                continue;
            };
            let compressed = codec.compress(TEST_DATA).unwrap();
            let decompressed = codec.decompress(&compressed).unwrap();
            assert_eq!(decompressed, TEST_DATA, "roundtrip failed for {}", algorithm);
        }
    }

    #[test]
    fn test_noop_roundtrip() {
        let compressor = NoopCompressor;
        let compressed = compressor.compress(TEST_DATA).unwrap();
        assert_eq!(compressed, TEST_DATA);
        assert_eq!(compressor.decompress(&compressed).unwrap(), TEST_DATA);
    }

    #[test]
    fn test_wire_ids_are_stable() {
        for algorithm in [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Lz4,
            CompressionAlgorithm::Deflate,
            CompressionAlgorithm::Zstd,
        ] {
            assert_eq!(
                CompressionAlgorithm::from_wire_id(algorithm.wire_id()).unwrap(),
                algorithm
            );
        }
        assert!(matches!(
            CompressionAlgorithm::from_wire_id(42),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_fallback_chain_terminates() {
        let mut current = CompressionAlgorithm::Zstd;
        let mut steps = 0;
        while let Some(next) = current.fallback() {
            current = next;
            steps += 1;
        }
        assert_eq!(current, CompressionAlgorithm::None);
        assert_eq!(steps, 3);
    }

    #[test]
    fn test_serde_names() {
        let parsed: CompressionAlgorithm = serde_json::from_str("\"deflate-family\"").unwrap();
        assert_eq!(parsed, CompressionAlgorithm::Deflate);
        let parsed: CompressionAlgorithm = serde_json::from_str("\"zstd\"").unwrap();
        assert_eq!(parsed, CompressionAlgorithm::Zstd);
        assert_eq!(
            serde_json::to_string(&CompressionAlgorithm::Lz4).unwrap(),
            "\"fast-text\""
        );
    }

    #[test]
    fn test_corrupt_input_is_reported() {
        let codecs = CodecSet::new(3);
        let codec = codecs.get(CompressionAlgorithm::Deflate).unwrap();
        let err = codec.decompress(b"definitely not zlib").unwrap_err();
        assert!(matches!(err, Error::Decompression { .. }));
    }
}
