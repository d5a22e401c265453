use serde::{Deserialize, Serialize};

/// A dense vector of 32-bit floats
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    #[inline]
    #[must_use]
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    #[inline]
    #[must_use]
    pub fn from_slice(data: &[f32]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn into_inner(self) -> Vec<f32> {
        self.data
    }

    /// Euclidean norm, SIMD-accelerated.
    #[inline]
    pub fn norm(&self) -> f32 {
        crate::simd::norm_simd(&self.data)
    }

    /// Cosine similarity with another vector.
    ///
    /// Returns 0.0 when either vector has zero norm or the dimensions
    /// differ, keeping scores total and comparable.
    #[inline]
    pub fn cosine_similarity(&self, other: &Vector) -> f32 {
        cosine_similarity(&self.data, &other.data)
    }

    /// Normalize to unit length in place. A zero vector is left unchanged.
    #[inline]
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > f32::EPSILON {
            let inv_norm = 1.0 / norm;
            for x in &mut self.data {
                *x *= inv_norm;
            }
        }
    }

    /// Normalized copy.
    #[inline]
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut v = self.clone();
        v.normalize();
        v
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Self::new(data)
    }
}

/// Cosine similarity between two raw slices.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot = crate::simd::dot_product_simd(a, b);
    let norm_a = crate::simd::norm_simd(a);
    let norm_b = crate::simd::norm_simd(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Cosine similarity with the query norm hoisted out of the scan loop.
#[inline]
pub fn cosine_similarity_prenormed(query: &[f32], query_norm: f32, candidate: &[f32]) -> f32 {
    if query_norm == 0.0 || query.len() != candidate.len() {
        return 0.0;
    }

    let dot = crate::simd::dot_product_simd(query, candidate);
    let candidate_norm = crate::simd::norm_simd(candidate);
    if candidate_norm == 0.0 {
        return 0.0;
    }

    dot / (query_norm * candidate_norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let v1 = Vector::new(vec![1.0, 0.0]);
        let v2 = Vector::new(vec![1.0, 0.0]);
        assert!((v1.cosine_similarity(&v2) - 1.0).abs() < 1e-6);

        let v3 = Vector::new(vec![1.0, 0.0]);
        let v4 = Vector::new(vec![0.0, 1.0]);
        assert!(v3.cosine_similarity(&v4).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let zero = Vector::new(vec![0.0, 0.0, 0.0]);
        let v = Vector::new(vec![1.0, 2.0, 3.0]);
        assert_eq!(zero.cosine_similarity(&v), 0.0);
    }

    #[test]
    fn test_cosine_reference_value() {
        // query [0.9, 0.1, 0] against [1, 0, 0]: 0.9 / sqrt(0.82)
        let sim = cosine_similarity(&[0.9, 0.1, 0.0], &[1.0, 0.0, 0.0]);
        assert!((sim - 0.9939).abs() < 1e-3);
    }

    #[test]
    fn test_prenormed_matches_full() {
        let q = [0.4, -1.2, 0.7, 3.1];
        let c = [1.0, 0.5, -0.5, 0.25];
        let qn = crate::simd::norm_simd(&q);
        let full = cosine_similarity(&q, &c);
        let pre = cosine_similarity_prenormed(&q, qn, &c);
        assert!((full - pre).abs() < 1e-6);
    }

    #[test]
    fn test_normalize() {
        let mut v = Vector::new(vec![3.0, 4.0]);
        v.normalize();
        assert!((v.norm() - 1.0).abs() < 1e-6);

        let mut zero = Vector::new(vec![0.0, 0.0]);
        zero.normalize();
        assert_eq!(zero.as_slice(), &[0.0, 0.0]);
    }
}
