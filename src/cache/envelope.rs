//! Stored Value Envelope
//!
//! Binary layout written to the backing store (all integers big-endian):
//!
//! ```text
//! ┌───────┬─────┬───────┬────────────┬──────────────┬───────────┬───────────┬─────────┬──────────┬─────────┐
//! │ "CC1" │ alg │ flags │ chunkCount │ originalSize │ cachedAt  │ expiresAt │ version │ checksum │ payload │
//! │  3 B  │ u8  │  u8   │    u32     │     u64      │ i64 (ms)  │ i64 (ms)  │   u32   │   32 B   │   ...   │
//! └───────┴─────┴───────┴────────────┴──────────────┴───────────┴───────────┴─────────┴──────────┴─────────┘
//! ```
//!
//! The payload is the compression pipeline's output: raw bytes for `none`,
//! a single compressed block, or the chunk framing when `FLAG_CHUNKED` is set.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

use crate::compression::{Checksum, CompressionAlgorithm, CompressionResult};
use crate::error::{Error, Result};

/// Envelope magic
pub const MAGIC: &[u8; 3] = b"CC1";

/// Payload uses chunk framing
pub const FLAG_CHUNKED: u8 = 0b0000_0001;

/// Fixed header length
pub const HEADER_LEN: usize = 3 + 1 + 1 + 4 + 8 + 8 + 8 + 4 + 32;

/// Decoded envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub algorithm: CompressionAlgorithm,
    pub chunk_count: Option<u32>,
    pub original_size: u64,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub version: u32,
    pub checksum: Checksum,
    pub payload: Bytes,
}

impl Envelope {
    /// Wrap a compression result with entry timing
    pub fn from_compressed(
        result: &CompressionResult,
        cached_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        version: u32,
    ) -> Self {
        Self {
            algorithm: result.algorithm,
            chunk_count: result.chunk_count,
            original_size: result.original_size as u64,
            cached_at,
            expires_at,
            version,
            checksum: result.checksum,
            payload: result.data.clone(),
        }
    }

    /// Whether the payload is stored compressed
    pub fn is_compressed(&self) -> bool {
        self.algorithm != CompressionAlgorithm::None
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_slice(MAGIC);
        buf.put_u8(self.algorithm.wire_id());
        buf.put_u8(if self.chunk_count.is_some() { FLAG_CHUNKED } else { 0 });
        buf.put_u32(self.chunk_count.unwrap_or(0));
        buf.put_u64(self.original_size);
        buf.put_i64(self.cached_at.timestamp_millis());
        buf.put_i64(self.expires_at.timestamp_millis());
        buf.put_u32(self.version);
        buf.put_slice(self.checksum.as_bytes());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(raw: &Bytes) -> Result<Self> {
        if raw.len() < HEADER_LEN {
            return Err(Error::CorruptPayload(format!(
                "envelope of {} bytes is shorter than the {}-byte header",
                raw.len(),
                HEADER_LEN
            )));
        }
        if &raw[..3] != MAGIC {
            return Err(Error::CorruptPayload("bad envelope magic".into()));
        }

        let mut header = &raw[3..HEADER_LEN];
        let algorithm = CompressionAlgorithm::from_wire_id(header.get_u8())?;
        let flags = header.get_u8();
        let declared_chunks = header.get_u32();
        let original_size = header.get_u64();
        let cached_at = millis_to_datetime(header.get_i64())?;
        let expires_at = millis_to_datetime(header.get_i64())?;
        let version = header.get_u32();
        let mut checksum = [0u8; 32];
        header.copy_to_slice(&mut checksum);

        if flags & !FLAG_CHUNKED != 0 {
            return Err(Error::CorruptPayload(format!("unknown envelope flags {:#04x}", flags)));
        }
        let chunk_count = if flags & FLAG_CHUNKED != 0 {
            Some(declared_chunks)
        } else {
            None
        };
        if expires_at < cached_at {
            return Err(Error::CorruptPayload("expiry precedes creation".into()));
        }

        Ok(Self {
            algorithm,
            chunk_count,
            original_size,
            cached_at,
            expires_at,
            version,
            checksum: Checksum(checksum),
            payload: raw.slice(HEADER_LEN..),
        })
    }
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::CorruptPayload(format!("invalid timestamp {}", ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{CompressionConfig, CompressionPipeline};
    use assert_matches::assert_matches;

    fn sample(data: &[u8]) -> (Envelope, CompressionPipeline) {
        let pipeline = CompressionPipeline::new(CompressionConfig {
            min_size: 16,
            chunk_size: 1024,
            ..Default::default()
        });
        let result = pipeline.compress(data).unwrap();
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let env = Envelope::from_compressed(&result, now, now + chrono::Duration::seconds(60), 1);
        (env, pipeline)
    }

    #[test]
    fn test_encode_decode_preserves_metadata() {
        let data = b"compressible payload ".repeat(200);
        let (env, pipeline) = sample(&data);
        assert_eq!(env.chunk_count, Some(5));

        let raw = env.encode();
        assert_eq!(&raw[..3], MAGIC);
        let decoded = Envelope::decode(&raw).unwrap();
        assert_eq!(decoded, env);

        let restored = pipeline
            .decompress_parts(
                decoded.algorithm,
                &decoded.payload,
                decoded.chunk_count,
                &decoded.checksum,
            )
            .unwrap();
        assert_eq!(restored.as_ref(), &data[..]);
    }

    #[test]
    fn test_uncompressed_payload_unchunked() {
        let (env, _) = sample(b"tiny");
        assert!(!env.is_compressed());
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded.chunk_count, None);
        assert_eq!(decoded.payload.as_ref(), b"tiny");
    }

    #[test]
    fn test_short_or_garbled_rejected() {
        assert_matches!(
            Envelope::decode(&Bytes::from_static(b"CC1")),
            Err(Error::CorruptPayload(_))
        );

        let (env, _) = sample(b"tiny");
        let mut raw = env.encode().to_vec();
        raw[0] = b'X';
        assert_matches!(
            Envelope::decode(&Bytes::from(raw)),
            Err(Error::CorruptPayload(_))
        );
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let (env, _) = sample(b"tiny");
        let mut raw = env.encode().to_vec();
        raw[3] = 42;
        assert_matches!(
            Envelope::decode(&Bytes::from(raw)),
            Err(Error::UnsupportedAlgorithm(_))
        );
    }

    #[test]
    fn test_unknown_flags_rejected() {
        let (env, _) = sample(b"tiny");
        let mut raw = env.encode().to_vec();
        raw[4] = 0x80;
        assert_matches!(
            Envelope::decode(&Bytes::from(raw)),
            Err(Error::CorruptPayload(_))
        );
    }
}
