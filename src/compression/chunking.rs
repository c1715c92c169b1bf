//! Chunked Payload Framing
//!
//! Payloads larger than the configured chunk size are split and each chunk
//! is compressed independently. The framed layout is:
//!
//! ```text
//! ┌──────────────┬───────────────────────────────┬──────────────────────┐
//! │ chunk_count  │ chunk_count × chunk_size      │ chunk bytes          │
//! │ (u32, BE)    │ (u32, BE each)                │ (concatenated)       │
//! └──────────────┴───────────────────────────────┴──────────────────────┘
//! ```

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Size of one header field
const FIELD_SIZE: usize = 4;

/// Frame already-compressed chunks
pub fn encode_chunks(chunks: &[Vec<u8>]) -> Vec<u8> {
    let body: usize = chunks.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(FIELD_SIZE * (chunks.len() + 1) + body);

    out.put_u32(chunks.len() as u32);
    for chunk in chunks {
        out.put_u32(chunk.len() as u32);
    }
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

/// Split a framed payload back into chunk slices, in header order.
///
/// Fails with [`Error::ChunkMismatch`] when the header declares a different
/// number of chunks than `expected`, and [`Error::CorruptPayload`] when the
/// declared sizes do not match the body.
pub fn decode_chunks(data: &[u8], expected: u32) -> Result<Vec<&[u8]>> {
    let mut header = data;
    if header.remaining() < FIELD_SIZE {
        return Err(Error::CorruptPayload("chunk header truncated".into()));
    }

    let declared = header.get_u32();
    if declared != expected {
        return Err(Error::ChunkMismatch {
            expected,
            actual: declared,
        });
    }

    let table_len = declared as usize * FIELD_SIZE;
    if header.remaining() < table_len {
        return Err(Error::CorruptPayload("chunk size table truncated".into()));
    }

    let sizes: Vec<usize> = (0..declared).map(|_| header.get_u32() as usize).collect();
    let total: usize = sizes.iter().sum();
    if header.remaining() != total {
        return Err(Error::CorruptPayload(format!(
            "chunk sizes sum to {} but body has {} bytes",
            total,
            header.remaining()
        )));
    }

    let mut chunks = Vec::with_capacity(sizes.len());
    let mut body = header;
    for size in sizes {
        let (chunk, rest) = body.split_at(size);
        chunks.push(chunk);
        body = rest;
    }
    Ok(chunks)
}
