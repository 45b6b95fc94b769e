// Vector primitives for the personalization vector.
//
// Kept free of I/O so the recommendation math can be tested without a
// database: signals in, unit vector out.

use ndarray::{Array1, ArrayView1};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum VectorError {
    #[error("embedding dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Component-wise `Σ wᵢ·eᵢ / Σ wᵢ`.
///
/// Returns `None` for an empty input or a non-positive total weight.
pub fn weighted_mean<'a, I>(pairs: I) -> Result<Option<Array1<f64>>, VectorError>
where
    I: IntoIterator<Item = (&'a [f32], f64)>,
{
    let mut sum: Option<Array1<f64>> = None;
    let mut total_weight = 0.0;

    for (embedding, weight) in pairs {
        let vector = ArrayView1::from(embedding).mapv(f64::from);
        match sum.as_mut() {
            Some(acc) => {
                if acc.len() != vector.len() {
                    return Err(VectorError::DimensionMismatch {
                        expected: acc.len(),
                        found: vector.len(),
                    });
                }
                acc.scaled_add(weight, &vector);
            }
            None => sum = Some(vector * weight),
        }
        total_weight += weight;
    }

    match sum {
        Some(acc) if total_weight > 0.0 && total_weight.is_finite() => {
            Ok(Some(acc / total_weight))
        }
        _ => Ok(None),
    }
}

/// Scale to unit L2 norm. `None` for a zero (or non-finite) vector.
pub fn l2_normalize(vector: Array1<f64>) -> Option<Array1<f64>> {
    let norm = vector.dot(&vector).sqrt();
    if norm > 0.0 && norm.is_finite() {
        Some(vector / norm)
    } else {
        None
    }
}

/// Weighted mean followed by L2 normalization
pub fn personalization_vector<'a, I>(pairs: I) -> Result<Option<Vec<f32>>, VectorError>
where
    I: IntoIterator<Item = (&'a [f32], f64)>,
{
    Ok(weighted_mean(pairs)?
        .and_then(l2_normalize)
        .map(|v| v.iter().map(|x| *x as f32).collect()))
}

/// `1 - cos(a, b)`, matching the ordering of pgvector's `<=>` operator.
///
/// Zero vectors and mismatched dimensions are maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }

    let a = ArrayView1::from(a).mapv(f64::from);
    let b = ArrayView1::from(b).mapv(f64::from);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }

    1.0 - a.dot(&b) / (norm_a * norm_b)
}
