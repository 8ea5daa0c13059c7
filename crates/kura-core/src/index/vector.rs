//! Embedding vector helpers: validation, normalisation, blob codec, scoring.

use crate::error::{KuraError, Result};

/// Rejects empty vectors and vectors with non-finite or all-zero components.
pub(crate) fn validate(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(KuraError::Validation("embedding vector is empty".into()));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(KuraError::Validation(
            "embedding vector contains non-finite values".into(),
        ));
    }
    if l2_norm(vector) <= f64::EPSILON {
        return Err(KuraError::Validation("embedding vector has zero norm".into()));
    }
    Ok(())
}

fn l2_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt()
}

/// Scales `vector` to unit length. Callers validate first.
pub(crate) fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm = l2_norm(vector);
    vector.iter().map(|v| (f64::from(*v) / norm) as f32).collect()
}

/// Similarity of two unit vectors in `[0, 1]`: cosine, with opposing
/// directions clamped to zero. Identical directions score `1.0`.
pub(crate) fn score(a: &[f32], b: &[f32]) -> f32 {
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();
    dot.clamp(0.0, 1.0) as f32
}

pub(crate) fn encode_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub(crate) fn decode_blob(blob: &[u8], dimension: usize) -> Result<Vec<f32>> {
    let expected = dimension * std::mem::size_of::<f32>();
    if blob.len() != expected {
        return Err(KuraError::IndexIo(format!(
            "invalid embedding byte length: expected {expected}, got {}",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_degenerate_vectors() {
        assert!(validate(&[]).is_err());
        assert!(validate(&[0.0, 0.0]).is_err());
        assert!(validate(&[1.0, f32::NAN]).is_err());
        assert!(validate(&[0.3, 0.4]).is_ok());
    }

    #[test]
    fn normalized_has_unit_length() {
        let v = normalized(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn score_bounds() {
        let a = normalized(&[1.0, 0.0]);
        assert!((score(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(score(&a, &normalized(&[0.0, 1.0])), 0.0);
        assert_eq!(score(&a, &normalized(&[-1.0, 0.0])), 0.0);

        let b = normalized(&[0.99, (1.0f32 - 0.99 * 0.99).sqrt()]);
        assert!((score(&a, &b) - 0.99).abs() < 1e-5);
    }

    #[test]
    fn blob_codec_rejects_wrong_length() {
        let blob = encode_blob(&[1.0, 2.0, 3.0]);
        assert_eq!(decode_blob(&blob, 3).unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(matches!(decode_blob(&blob, 4), Err(KuraError::IndexIo(_))));
    }
}
