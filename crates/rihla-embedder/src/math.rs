//! Vector math shared by encoders and their callers.
//!
//! Intent prototypes are centroids over the embeddings of example
//! phrases; matching an utterance against one prototype per intent is
//! cheaper and steadier than scanning every phrase.

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().fold(0.0f32, |sum, x| sum + x * x).sqrt()
}

/// Scale a vector to unit length. Zero vectors pass through unchanged.
pub fn normalize(v: Vec<f32>) -> Vec<f32> {
    let magnitude = l2_norm(&v);
    if magnitude == 0.0 {
        return v;
    }
    v.into_iter().map(|x| x / magnitude).collect()
}

/// Cosine similarity between two vectors of equal dimension.
///
/// Returns 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "dimension mismatch");
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na = l2_norm(a);
    let nb = l2_norm(b);
    if na > 0.0 && nb > 0.0 {
        dot / (na * nb)
    } else {
        0.0
    }
}

/// Average a set of embeddings into one unit-length prototype.
///
/// Inputs are normalized before summing so a verbose example phrase
/// cannot outweigh a short one.
///
/// # Panics
/// Panics on an empty input set or mixed dimensions.
pub fn compute_centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    let dim = vectors
        .first()
        .map(|v| v.len())
        .expect("cannot average an empty embedding set");

    let summed = vectors.iter().fold(vec![0.0f32; dim], |mut sum, v| {
        assert_eq!(v.len(), dim, "mixed embedding dimensions in centroid input");
        for (slot, component) in sum.iter_mut().zip(normalize(v.clone())) {
            *slot += component;
        }
        sum
    });

    let count = vectors.len() as f32;
    normalize(summed.into_iter().map(|x| x / count).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_norm() {
        let v = vec![3.0, 4.0];
        assert!((l2_norm(&v) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_unit_length() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let v = normalize(vec![0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.2, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_centroid_of_one() {
        let c = compute_centroid(&[vec![2.0, 0.0]]);
        assert!((c[0] - 1.0).abs() < 1e-6);
        assert!(c[1].abs() < 1e-6);
    }

    #[test]
    fn test_centroid_symmetric() {
        let c = compute_centroid(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        // Equidistant from both inputs
        assert!((c[0] - c[1]).abs() < 1e-6);
        assert!((l2_norm(&c) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_input_scale_invariant() {
        // A long phrase embedding (larger magnitude) must not dominate.
        let a = compute_centroid(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        let b = compute_centroid(&[vec![100.0, 0.0], vec![0.0, 1.0]]);
        assert!((a[0] - b[0]).abs() < 1e-6);
        assert!((a[1] - b[1]).abs() < 1e-6);
    }
}
