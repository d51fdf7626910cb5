//! Canonical cache key derivation.
//!
//! A key is `<namespace>:<hex sha256>` over the namespace, the sorted
//! parameter pairs, and a value-shape version that is bumped whenever a
//! facet changes its cached representation. Embedding parameters are
//! quantized to 6 significant digits per component before hashing so
//! near-identical vectors from different runs share an identity.

use sha2::{Digest, Sha256};

/// Derive the canonical key for a namespace and parameter tuple.
pub fn canonical_key(namespace: &str, params: &[(&str, String)], shape_version: u32) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(&b.1)));

    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(shape_version.to_le_bytes());
    for (name, value) in sorted {
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update([b'=']);
        hasher.update(value.as_bytes());
    }

    format!("{namespace}:{}", hex::encode(hasher.finalize()))
}

/// Quantize one embedding component to 6 significant digits.
///
/// Scientific notation with 5 fractional digits keeps exactly 6
/// significant digits for any magnitude and is stable across platforms.
pub fn quantize_component(x: f32) -> String {
    if x == 0.0 {
        // Collapse -0.0 and 0.0
        return "0.00000e0".into();
    }
    format!("{x:.5e}")
}

/// Render an embedding as its quantized cache identity.
pub fn quantize_embedding(embedding: &[f32]) -> String {
    let parts: Vec<String> = embedding.iter().map(|x| quantize_component(*x)).collect();
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_namespace_prefixed_hex() {
        let key = canonical_key("query:attractions", &[("limit", "10".into())], 1);
        assert!(key.starts_with("query:attractions:"));
        let digest = key.rsplit(':').next().unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_parameter_order_does_not_matter() {
        let a = canonical_key(
            "ns",
            &[("limit", "10".into()), ("offset", "0".into())],
            1,
        );
        let b = canonical_key(
            "ns",
            &[("offset", "0".into()), ("limit", "10".into())],
            1,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_shape_version_changes_key() {
        let a = canonical_key("ns", &[("q", "x".into())], 1);
        let b = canonical_key("ns", &[("q", "x".into())], 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_namespace_changes_key() {
        let a = canonical_key("ns1", &[("q", "x".into())], 1);
        let b = canonical_key("ns2", &[("q", "x".into())], 1);
        assert_ne!(a, b);
    }

    // Pins the quantization contract: 6 significant digits, so vectors
    // differing only past the 7th digit share an identity while a
    // difference in the 6th digit does not.
    #[test]
    fn test_quantization_six_significant_digits() {
        assert_eq!(
            quantize_component(0.123_456_7),
            quantize_component(0.123_456_74)
        );
        assert_ne!(
            quantize_component(0.123_451),
            quantize_component(0.123_461)
        );
        assert_eq!(quantize_component(0.123_456_7), "1.23457e-1");
    }

    #[test]
    fn test_quantization_handles_zero_and_sign() {
        assert_eq!(quantize_component(0.0), quantize_component(-0.0));
        assert_ne!(quantize_component(0.5), quantize_component(-0.5));
    }

    mod laws {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_key_order_insensitive(
                a in "[a-z]{1,8}",
                b in "[a-z]{1,8}",
                va in "[a-z0-9]{0,8}",
                vb in "[a-z0-9]{0,8}",
            ) {
                let k1 = canonical_key("ns", &[(&a, va.clone()), (&b, vb.clone())], 1);
                let k2 = canonical_key("ns", &[(&b, vb), (&a, va)], 1);
                prop_assert_eq!(k1, k2);
            }

            // Quantization is a projection: applying it to its own
            // parsed output changes nothing.
            #[test]
            fn prop_quantization_idempotent(x in -10.0f32..10.0) {
                let q = quantize_component(x);
                let reparsed: f32 = q.parse().unwrap();
                prop_assert_eq!(quantize_component(reparsed), q);
            }
        }
    }

    #[test]
    fn test_quantized_embeddings_share_keys() {
        let a = vec![0.123_456_7f32, -0.987_654_3];
        let b = vec![0.123_456_74f32, -0.987_654_32];
        assert_eq!(quantize_embedding(&a), quantize_embedding(&b));

        let key_a = canonical_key("vector:attractions", &[("emb", quantize_embedding(&a))], 1);
        let key_b = canonical_key("vector:attractions", &[("emb", quantize_embedding(&b))], 1);
        assert_eq!(key_a, key_b);
    }
}
