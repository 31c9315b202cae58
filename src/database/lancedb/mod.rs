// LanceDB vector database module
// Root index of document summary vectors plus one sub-index of chunk vectors per document


pub mod vector_store;

use serde::{Deserialize, Serialize};

pub use vector_store::VectorIndex;

/// Persisted allocation state of the root index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RootIndexState {
    /// Id the next root append receives
    pub next_id: i64,
}

/// Scale a vector to unit L2 length in place. Zero vectors are left untouched.
///
/// L2 distance between unit vectors is a monotonic function of cosine similarity,
/// so indexed and query vectors must both pass through here.
#[inline]
pub fn normalize_l2(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[inline]
pub fn normalized(vector: &[f32]) -> Vec<f32> {
    let mut copy = vector.to_vec();
    normalize_l2(&mut copy);
    copy
}
