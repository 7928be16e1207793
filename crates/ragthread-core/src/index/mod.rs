//! Nearest-neighbour index abstraction.
//!
//! The [`NearestNeighbors`] trait pins down the contract the thread store
//! relies on: positional storage, squared-L2 distances, ascending order with
//! ties broken by lower position, `top_k` clamped to the entry count.
//! [`FlatIndex`] is the exact brute-force implementation; an approximate
//! structure can replace it as long as it honours the same ordering.

mod flat;

pub use flat::{DecodedIndex, FlatIndex, FORMAT_VERSION, MAGIC};

use crate::error::Result;

/// One search hit: a stored position and its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    /// Squared Euclidean distance.
    pub distance: f32,
}

/// Positional vector storage with exact-order nearest-neighbour search.
pub trait NearestNeighbors: Send + Sync {
    /// Width of every stored vector.
    fn dims(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors at positions `[len, len + vectors.len())`.
    ///
    /// Either every vector is added or none is.
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()>;

    /// The vector stored at `position`.
    fn vector(&self, position: usize) -> Option<&[f32]>;

    /// The `top_k` nearest stored vectors, nearest first.
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>>;
}
