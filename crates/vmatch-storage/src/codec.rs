//! Binary container formats.
//!
//! Matrix container (`.vtf`):
//!
//! ```text
//! magic "VTFm" | version u16 | reserved u16 | rows u32 | cols u32
//! | payload_len u64 | sha256(payload) [32] | payload f32-LE row-major
//! ```
//!
//! Cache entry container (`.vqc`) wraps a matrix container together with
//! the entry's identity, global vector and timing metadata, again with a
//! whole-payload digest. Readers verify magic, version, declared lengths
//! and digest; any mismatch is a corrupt-data error, never a partial
//! value.

use ndarray::Array2;
use sha2::{Digest, Sha256};

use vmatch_models::{VideoEncoding, VideoId};

use crate::error::{StorageError, StorageResult};

const MATRIX_MAGIC: &[u8; 4] = b"VTFm";
const ENTRY_MAGIC: &[u8; 4] = b"VQCe";
const FORMAT_VERSION: u16 = 1;
const DIGEST_LEN: usize = 32;

/// Serialize a temporal matrix.
pub fn encode_matrix(matrix: &Array2<f32>) -> Vec<u8> {
    let (rows, cols) = matrix.dim();
    let mut payload = Vec::with_capacity(rows * cols * 4);
    for &x in matrix.iter() {
        payload.extend_from_slice(&x.to_le_bytes());
    }
    let digest = Sha256::digest(&payload);

    let mut out = Vec::with_capacity(56 + payload.len());
    out.extend_from_slice(MATRIX_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(rows as u32).to_le_bytes());
    out.extend_from_slice(&(cols as u32).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&digest);
    out.extend_from_slice(&payload);
    out
}

/// Deserialize a temporal matrix, verifying shape and digest.
pub fn decode_matrix(bytes: &[u8]) -> StorageResult<Array2<f32>> {
    let mut reader = Reader::new(bytes);
    reader.expect_magic(MATRIX_MAGIC)?;
    reader.expect_version()?;
    let _reserved = reader.u16()?;
    let rows = reader.u32()? as usize;
    let cols = reader.u32()? as usize;
    let payload_len = reader.u64()? as usize;
    let digest = reader.bytes(DIGEST_LEN)?.to_vec();

    let expected_len = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| StorageError::corrupt("matrix shape overflows"))?;
    if payload_len != expected_len {
        return Err(StorageError::corrupt(format!(
            "payload length {payload_len} does not match shape [{rows}, {cols}]"
        )));
    }
    let payload = reader.bytes(payload_len)?;
    if Sha256::digest(payload).as_slice() != digest {
        return Err(StorageError::corrupt("matrix digest mismatch"));
    }

    let values: Vec<f32> = payload
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| StorageError::corrupt(format!("matrix shape: {e}")))
}

/// Serialize a full cache entry (identity + global + temporal).
pub fn encode_entry(encoding: &VideoEncoding) -> Vec<u8> {
    let id_bytes = encoding.video_id.as_str().as_bytes();
    let matrix_bytes = encode_matrix(&encoding.temporal);

    let mut payload =
        Vec::with_capacity(id_bytes.len() + encoding.global.len() * 4 + matrix_bytes.len());
    payload.extend_from_slice(id_bytes);
    for &x in &encoding.global {
        payload.extend_from_slice(&x.to_le_bytes());
    }
    payload.extend_from_slice(&matrix_bytes);
    let digest = Sha256::digest(&payload);

    let mut out = Vec::with_capacity(64 + payload.len());
    out.extend_from_slice(ENTRY_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(id_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&(encoding.global.len() as u32).to_le_bytes());
    out.extend_from_slice(&(matrix_bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(&encoding.created_at.timestamp_millis().to_le_bytes());
    out.extend_from_slice(&encoding.processing_ms.to_le_bytes());
    out.extend_from_slice(&digest);
    out.extend_from_slice(&payload);
    out
}

/// Deserialize a cache entry, verifying the digest.
pub fn decode_entry(bytes: &[u8]) -> StorageResult<VideoEncoding> {
    let mut reader = Reader::new(bytes);
    reader.expect_magic(ENTRY_MAGIC)?;
    reader.expect_version()?;
    let _reserved = reader.u16()?;
    let id_len = reader.u32()? as usize;
    let dim = reader.u32()? as usize;
    let matrix_len = reader.u64()? as usize;
    let created_ms = reader.i64()?;
    let processing_ms = reader.f32()?;
    let digest = reader.bytes(DIGEST_LEN)?.to_vec();

    let payload_len = dim
        .checked_mul(4)
        .and_then(|n| n.checked_add(id_len))
        .and_then(|n| n.checked_add(matrix_len))
        .ok_or_else(|| StorageError::corrupt("entry lengths overflow"))?;
    let payload = reader.bytes(payload_len)?;
    if Sha256::digest(payload).as_slice() != digest {
        return Err(StorageError::corrupt("entry digest mismatch"));
    }

    let video_id = std::str::from_utf8(&payload[..id_len])
        .map_err(|e| StorageError::corrupt(format!("entry id: {e}")))?
        .to_string();
    let global: Vec<f32> = payload[id_len..id_len + dim * 4]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let temporal = decode_matrix(&payload[id_len + dim * 4..])?;

    Ok(VideoEncoding {
        video_id: VideoId::from(video_id),
        global,
        temporal,
        processing_ms,
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(chrono::Utc::now),
    })
}

/// Bounds-checked little-endian reader.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| StorageError::corrupt("truncated container"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn expect_magic(&mut self, magic: &[u8; 4]) -> StorageResult<()> {
        if self.bytes(4)? != magic {
            return Err(StorageError::corrupt("bad magic"));
        }
        Ok(())
    }

    fn expect_version(&mut self) -> StorageResult<()> {
        let version = self.u16()?;
        if version != FORMAT_VERSION {
            return Err(StorageError::corrupt(format!(
                "unsupported format version {version}"
            )));
        }
        Ok(())
    }

    fn u16(&mut self) -> StorageResult<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> StorageResult<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> StorageResult<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> StorageResult<i64> {
        Ok(i64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> StorageResult<f32> {
        Ok(f32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }
}
