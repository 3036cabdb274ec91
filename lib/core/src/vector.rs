use serde::{Deserialize, Serialize};

/// Dense embedding vector
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
    #[must_use]
    pub fn into_inner(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    pub fn dot(&self, other: &Vector) -> f32 {
        crate::simd::dot_product_simd(&self.data, &other.data)
    }

    #[inline]
    pub fn norm(&self) -> f32 {
        crate::simd::norm_simd(&self.data)
    }

    /// Scale to unit length. Zero vectors are left untouched.
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > f32::EPSILON {
            let inv = 1.0 / norm;
            self.data.iter_mut().for_each(|x| *x *= inv);
        }
    }

    #[inline]
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_dot() {
        let a = Vector::new(vec![3.0, 4.0, 0.0]).normalized();
        let b = Vector::new(vec![1.0, 1.0, 1.0]).normalized();
        assert!((a.norm() - 1.0).abs() < 1e-6);
        // 7 / (5 * sqrt(3))
        assert!((a.dot(&b) - 0.808_290_4).abs() < 1e-5);
        assert!((a.dot(&a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_vector_stays_zero() {
        let v = Vector::new(vec![0.0; 4]).normalized();
        assert!(v.as_slice().iter().all(|x| *x == 0.0));
    }
}
