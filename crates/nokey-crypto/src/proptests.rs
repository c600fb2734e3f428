
#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{json, Value};

    use crate::broker::{decrypt, encrypt, sign, verify};
    use crate::testing::shared_identity;
    use crate::vault::derive_key;

    fn small_payload() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,64}".prop_map(Value::from),
            ("[a-z]{1,8}", any::<u32>()).prop_map(|(k, v)| json!({ k: v })),
            prop::collection::vec(any::<u16>(), 0..8).prop_map(|v| json!(v)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_encrypt_decrypt_round_trip(payload in small_payload()) {
            let identity = shared_identity();
            let sealed = encrypt(&identity.encryption_public_jwk(), &payload).unwrap();
            prop_assert_eq!(decrypt(identity.decryption_key(), &sealed).unwrap(), payload);
        }

        #[test]
        fn test_signature_integrity(payload in small_payload()) {
            let identity = shared_identity();
            let signed = sign(identity.signing_key(), &payload).unwrap();
            let verified = verify(&identity.signing_public_jwk(), &signed.signature, &signed.signed_data).unwrap();
            prop_assert!(verified.is_authentic);
            prop_assert_eq!(verified.data, payload);
        }

        // Flipping any signature byte must yield a non-authentic result, not an error.
        #[test]
        fn test_signature_tamper_detected(payload in small_payload(), index in any::<prop::sample::Index>(), bit in 0u8..8) {
            use base64::engine::general_purpose::STANDARD;
            use base64::Engine;

            let identity = shared_identity();
            let signed = sign(identity.signing_key(), &payload).unwrap();
            let mut raw = STANDARD.decode(&signed.signature).unwrap();
            let i = index.index(raw.len());
            raw[i] ^= 1 << bit;
            let verified = verify(&identity.signing_public_jwk(), &STANDARD.encode(raw), &signed.signed_data).unwrap();
            prop_assert!(!verified.is_authentic);
        }

        #[test]
        fn test_derivation_is_deterministic(password in "\\PC{0,24}", salt in "[A-Za-z0-9+/]{4,24}", iterations in 1u32..64) {
            let a = derive_key(&password, &salt, iterations).unwrap();
            let b = derive_key(&password, &salt, iterations).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn test_distinct_salts_give_distinct_keys(password in "\\PC{0,24}", s1 in "[a-z]{8}", s2 in "[A-Z]{8}") {
            prop_assert_ne!(derive_key(&password, &s1, 2).unwrap(), derive_key(&password, &s2, 2).unwrap());
        }
    }
}
