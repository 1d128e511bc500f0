// Cosine similarity over embedding vectors.
//
// This is the single comparison primitive the whole engine is built on:
// the registry ranks candidate topics by it, and the matcher's thresholds
// are defined against it. Two phrasings of the same complaint ("rude
// driver" vs "impolite delivery partner") land near each other in
// embedding space even though they share almost no characters.

/// Cosine similarity between two embedding vectors, clamped to [0.0, 1.0].
///
/// Returns 0.0 for mismatched lengths, empty vectors, or zero vectors —
/// callers that need a hard dimension check do it before calling (the
/// registry raises `DimensionMismatch` instead of silently returning 0).
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    let denom = mag_a * mag_b;
    if denom < f64::EPSILON {
        0.0
    } else {
        (dot / denom).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-10);
    }

    #[test]
    fn test_cosine_proportional() {
        // Same direction, different magnitudes — should be 1.0
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![2.0, 4.0, 6.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_cosine_empty() {
        let a: Vec<f64> = vec![];
        let b: Vec<f64> = vec![];
        assert!(cosine_similarity(&a, &b).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(cosine_similarity(&a, &b).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cosine_mismatched_dimensions() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(
            cosine_similarity(&a, &b).abs() < f64::EPSILON,
            "Mismatched dims should return 0.0"
        );
    }

    #[test]
    fn test_cosine_negative_values_clamp_to_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(
            sim.abs() < f64::EPSILON,
            "Opposite vectors should clamp to 0.0, got {sim}"
        );
    }

    #[test]
    fn test_cosine_is_symmetric() {
        let a = vec![1.0, 3.0, -2.0, 0.5];
        let b = vec![2.0, -1.0, 4.0, 0.0];
        let sim_ab = cosine_similarity(&a, &b);
        let sim_ba = cosine_similarity(&b, &a);
        assert!((sim_ab - sim_ba).abs() < 1e-10, "Cosine should be symmetric");
    }
}
