//! Exact flat L2 index and its binary file format.
//!
//! # File layout (little-endian)
//!
//! ```text
//! offset  size            field
//! 0       4               magic "RTVX"
//! 4       4               format version (u32)
//! 8       4               dims (u32)
//! 12      8               generation (u64)
//! 20      8               count (u64)
//! 28      count*dims*4    vectors, row-major f32
//! ...     32              SHA-256 of every preceding byte
//! ```

use sha2::{Digest, Sha256};

use super::{NearestNeighbors, Neighbor};
use crate::embedding::{blob_to_vec, squared_l2, vec_to_blob};
use crate::error::{RagError, Result};

pub const MAGIC: &[u8; 4] = b"RTVX";
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 28;
const DIGEST_LEN: usize = 32;

/// Brute-force index over row-major `f32` storage.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dims: usize,
    data: Vec<f32>,
}

/// A decoded vector file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedIndex {
    pub generation: u64,
    pub index: FlatIndex,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    /// Keep only the first `len` vectors.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dims);
    }

    /// Build a new index holding the vectors at `positions`, in that order.
    pub fn select(&self, positions: &[usize]) -> FlatIndex {
        let mut out = FlatIndex::new(self.dims);
        for &p in positions {
            if let Some(v) = self.vector(p) {
                out.data.extend_from_slice(v);
            }
        }
        out
    }

    /// Serialize to the on-disk layout, stamped with `generation`.
    pub fn encode(&self, generation: u64) -> Vec<u8> {
        let payload = vec_to_blob(&self.data);
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + DIGEST_LEN);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&generation.to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        out.extend_from_slice(&payload);
        let digest = Sha256::digest(&out);
        out.extend_from_slice(&digest);
        out
    }

    /// Parse bytes produced by [`encode`](FlatIndex::encode).
    ///
    /// # Errors
    ///
    /// [`RagError::IndexCorrupt`] on a bad magic, unknown version, length
    /// disagreement or checksum failure.
    pub fn decode(bytes: &[u8]) -> Result<DecodedIndex> {
        if bytes.len() < HEADER_LEN + DIGEST_LEN {
            return Err(corrupt(format!("vector file too short ({} bytes)", bytes.len())));
        }
        let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
        if Sha256::digest(body).as_slice() != digest {
            return Err(corrupt("vector file checksum mismatch".to_string()));
        }
        if &body[0..4] != MAGIC {
            return Err(corrupt("bad vector file magic".to_string()));
        }
        let version = read_u32(&body[4..8]);
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported vector file version {}", version)));
        }
        let dims = read_u32(&body[8..12]) as usize;
        let generation = read_u64(&body[12..20]);
        let count = read_u64(&body[20..28]) as usize;

        let payload = &body[HEADER_LEN..];
        let expected = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt("vector file header overflows".to_string()))?;
        if payload.len() != expected {
            return Err(corrupt(format!(
                "vector payload is {} bytes, header declares {}",
                payload.len(),
                expected
            )));
        }

        Ok(DecodedIndex {
            generation,
            index: FlatIndex {
                dims,
                data: blob_to_vec(payload),
            },
        })
    }

    fn check_dims(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                actual: v.len(),
            });
        }
        Ok(())
    }
}

impl NearestNeighbors for FlatIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        for v in vectors {
            self.check_dims(v)?;
        }
        self.data.reserve(vectors.len() * self.dims);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>> {
        self.check_dims(query)?;
        let k = top_k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(position, v)| Neighbor {
                position,
                distance: squared_l2(query, v),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

fn corrupt(msg: String) -> RagError {
    RagError::IndexCorrupt(msg)
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
