//! docqa-embed - Embedding providers
//!
//! - [`HashEmbedder`]: deterministic feature-hashing embedder with no model
//!   files, used offline and in tests.
//! - `OnnxEmbedder` (feature `onnx`): sentence-transformer style model run
//!   through ONNX Runtime with mean pooling and L2 normalization.

mod hash;
#[cfg(feature = "onnx")]
mod onnx;

pub use hash::HashEmbedder;
#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbedder;

// Re-export the Embedder trait for convenience
pub use docqa_core::Embedder;

/// L2 normalize a vector in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}
