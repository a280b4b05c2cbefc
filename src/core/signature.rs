//! Unit-normalized face signatures.
//!
//! A [`Signature`] can only be built through a normalizing constructor, so
//! every value that is compared or persisted has Euclidean norm 1.

use crate::common::{FaceAuthError, Result};

/// Allowed drift of a stored signature's norm from 1.0.
pub const NORM_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct Signature(Vec<f32>);

impl Signature {
    /// Normalizes `values` to unit length.
    pub fn from_raw(values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(FaceAuthError::InvalidSignature("empty vector".into()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FaceAuthError::InvalidSignature("non-finite component".into()));
        }

        let norm = l2_norm(&values);
        if norm == 0.0 || !norm.is_finite() {
            return Err(FaceAuthError::InvalidSignature("zero-norm vector".into()));
        }

        let normalized = values.iter().map(|&v| (v as f64 / norm) as f32).collect();
        Ok(Self(normalized))
    }

    /// Accepts `values` only if they are already unit length.
    pub fn from_normalized(values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(FaceAuthError::InvalidSignature("empty vector".into()));
        }
        let norm = l2_norm(&values);
        if !norm.is_finite() || (norm - 1.0).abs() > NORM_TOLERANCE {
            return Err(FaceAuthError::InvalidSignature(format!(
                "norm {:.6} is not 1.0", norm
            )));
        }
        Ok(Self(values))
    }

    /// Element-wise mean of `samples`, re-normalized.
    pub fn average(samples: &[Signature]) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| FaceAuthError::InvalidSignature("no samples to average".into()))?;
        let dimension = first.dimension();

        let mut sum = vec![0.0f64; dimension];
        for sample in samples {
            if sample.dimension() != dimension {
                return Err(FaceAuthError::InvalidSignature(format!(
                    "dimension mismatch: {} vs {}", sample.dimension(), dimension
                )));
            }
            for (acc, &v) in sum.iter_mut().zip(sample.as_slice()) {
                *acc += v as f64;
            }
        }

        let count = samples.len() as f64;
        Self::from_raw(sum.into_iter().map(|v| (v / count) as f32).collect())
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn norm(&self) -> f64 {
        l2_norm(&self.0)
    }

    /// Cosine similarity; both sides are unit length so this is the dot product.
    pub fn cosine(&self, other: &Signature) -> f64 {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum::<f64>()
            .clamp(-1.0, 1.0)
    }
}

fn l2_norm(values: &[f32]) -> f64 {
    values.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt()
}
