//! Conversion between live RSA keys and their JWK exports.
//!
//! Big integers are encoded base64url without padding, big-endian, as
//! WebCrypto does. Import rejects anything that is not an RSA key of the
//! expected algorithm or whose components do not form a valid key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};

use nokey_proto::{PrivateJwk, PublicJwk};

use crate::error::CryptoError;

const KTY_RSA: &str = "RSA";

fn encode_uint(value: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

fn decode_uint(member: &str, encoded: &str) -> Result<BigUint, CryptoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| CryptoError::KeyImport(format!("member {member}: {e}")))?;
    if bytes.is_empty() {
        return Err(CryptoError::KeyImport(format!("member {member} is empty")));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

fn check_header(kty: &str, alg: Option<&str>, expected_alg: &str) -> Result<(), CryptoError> {
    if kty != KTY_RSA {
        return Err(CryptoError::KeyImport(format!("unsupported key type {kty:?}")));
    }
    match alg {
        Some(alg) if alg != expected_alg => Err(CryptoError::KeyImport(format!(
            "expected algorithm {expected_alg}, got {alg}"
        ))),
        _ => Ok(()),
    }
}

/// Export the public half of a key.
pub fn public_to_jwk(key: &RsaPublicKey, alg: &str, key_ops: &[&str]) -> PublicJwk {
    PublicJwk {
        kty: KTY_RSA.to_string(),
        n: encode_uint(key.n()),
        e: encode_uint(key.e()),
        alg: Some(alg.to_string()),
        key_ops: key_ops.iter().map(|op| op.to_string()).collect(),
        ext: Some(true),
    }
}

/// Export a full private key including its CRT parameters.
pub fn private_to_jwk(
    key: &RsaPrivateKey,
    alg: &str,
    key_ops: &[&str],
) -> Result<PrivateJwk, CryptoError> {
    let primes = key.primes();
    if primes.len() != 2 {
        return Err(CryptoError::KeyGeneration(format!(
            "expected two primes, found {}",
            primes.len()
        )));
    }
    let missing = || CryptoError::KeyGeneration("missing CRT parameters".into());
    let dp = key.dp().ok_or_else(missing)?;
    let dq = key.dq().ok_or_else(missing)?;
    let qi = key.crt_coefficient().ok_or_else(missing)?;

    Ok(PrivateJwk {
        kty: KTY_RSA.to_string(),
        n: encode_uint(key.n()),
        e: encode_uint(key.e()),
        d: encode_uint(key.d()),
        p: encode_uint(&primes[0]),
        q: encode_uint(&primes[1]),
        dp: encode_uint(dp),
        dq: encode_uint(dq),
        qi: encode_uint(&qi),
        alg: Some(alg.to_string()),
        key_ops: key_ops.iter().map(|op| op.to_string()).collect(),
        ext: Some(true),
    })
}

/// Import a public key, checking `kty` and (when present) `alg`.
pub fn public_from_jwk(jwk: &PublicJwk, expected_alg: &str) -> Result<RsaPublicKey, CryptoError> {
    check_header(&jwk.kty, jwk.alg.as_deref(), expected_alg)?;
    let n = decode_uint("n", &jwk.n)?;
    let e = decode_uint("e", &jwk.e)?;
    RsaPublicKey::new(n, e).map_err(|e| CryptoError::KeyImport(e.to_string()))
}

/// Import a private key. The CRT members are recomputed from `p` and `q`;
/// the key is validated before it is returned.
pub fn private_from_jwk(
    jwk: &PrivateJwk,
    expected_alg: &str,
) -> Result<RsaPrivateKey, CryptoError> {
    check_header(&jwk.kty, jwk.alg.as_deref(), expected_alg)?;
    let n = decode_uint("n", &jwk.n)?;
    let e = decode_uint("e", &jwk.e)?;
    let d = decode_uint("d", &jwk.d)?;
    let p = decode_uint("p", &jwk.p)?;
    let q = decode_uint("q", &jwk.q)?;
    RsaPrivateKey::from_components(n, e, d, vec![p, q])
        .map_err(|e| CryptoError::KeyImport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::shared_identity;
    use nokey_proto::keys::{ALG_PS256, ALG_RSA_OAEP_256};

    #[test]
    fn test_public_jwk_round_trip() {
        let identity = shared_identity();
        let jwk = identity.encryption_public_jwk();
        let key = public_from_jwk(&jwk, ALG_RSA_OAEP_256).unwrap();
        assert_eq!(public_to_jwk(&key, ALG_RSA_OAEP_256, &["encrypt"]), jwk);
    }

    #[test]
    fn test_wrong_algorithm_rejected() {
        let jwk = shared_identity().encryption_public_jwk();
        let err = public_from_jwk(&jwk, ALG_PS256).unwrap_err();
        assert!(matches!(err, CryptoError::KeyImport(_)));
    }

    #[test]
    fn test_wrong_key_type_rejected() {
        let mut jwk = shared_identity().signing_public_jwk();
        jwk.kty = "EC".into();
        assert!(matches!(
            public_from_jwk(&jwk, ALG_PS256),
            Err(CryptoError::KeyImport(_))
        ));
    }

    #[test]
    fn test_bad_base64_rejected() {
        let mut jwk = shared_identity().signing_public_jwk();
        jwk.n = "not base64 !!".into();
        assert!(matches!(
            public_from_jwk(&jwk, ALG_PS256),
            Err(CryptoError::KeyImport(_))
        ));
    }

    #[test]
    fn test_inconsistent_private_key_rejected() {
        let exported = shared_identity().export();
        let mut private = exported.encryption_key.exported_private.clone();
        private.d = exported.signing_key.exported_private.d.clone();
        assert!(matches!(
            private_from_jwk(&private, ALG_RSA_OAEP_256),
            Err(CryptoError::KeyImport(_))
        ));
    }

    #[test]
    fn test_missing_alg_is_accepted() {
        let mut jwk = shared_identity().signing_public_jwk();
        jwk.alg = None;
        assert!(public_from_jwk(&jwk, ALG_PS256).is_ok());
    }
}
