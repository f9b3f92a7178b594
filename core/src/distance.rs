//! Euclidean distance kernels used by the similarity searcher.
//!
//! With the `simd` feature the squared distance runs on 8-wide lanes through
//! the `wide` crate (AVX2 on `x86_64`, NEON on aarch64); otherwise a scalar
//! loop is used. Both produce the same ordering for search purposes.

#[cfg(feature = "simd")]
use wide::f32x8;

/// Squared L2 distance between two equal-length slices.
#[cfg(feature = "simd")]
#[must_use]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have same length");

    let mut sum = f32x8::ZERO;
    let a_chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let a_rest = a_chunks.remainder();
    let b_rest = b_chunks.remainder();

    for (ca, cb) in a_chunks.zip(b_chunks) {
        let mut la = [0.0f32; 8];
        let mut lb = [0.0f32; 8];
        la.copy_from_slice(ca);
        lb.copy_from_slice(cb);
        let diff = f32x8::new(la) - f32x8::new(lb);
        sum += diff * diff;
    }

    let lanes: [f32; 8] = sum.into();
    let mut total: f32 = lanes.iter().sum();
    for (x, y) in a_rest.iter().zip(b_rest) {
        let diff = x - y;
        total += diff * diff;
    }
    total
}

/// Squared L2 distance between two equal-length slices.
#[cfg(not(feature = "simd"))]
#[must_use]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have same length");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// L2 (Euclidean) distance.
#[must_use]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    l2_distance_squared(a, b).sqrt()
}
