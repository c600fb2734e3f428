//! Crypto operation broker.
//!
//! The free functions are the synchronous primitives. [`CryptoBroker`] binds
//! them to the local identity and runs them on the blocking pool so the
//! event loop never waits on RSA arithmetic.
//!
//! Payloads are JSON values. They are serialized before encryption and
//! parsed again after decryption, so anything JSON-representable and small
//! enough for one OAEP block (190 bytes for a 2048-bit key) can be sealed.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::try_join_all;
use rand_core::OsRng;
use rsa::{Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use nokey_proto::keys::{ALG_PS256, ALG_RSA_OAEP_256};
use nokey_proto::{PublicJwk, Share, TaggedShare};

use crate::error::CryptoError;
use crate::identity::DeviceIdentity;
use crate::jwk::public_from_jwk;

/// RSA-PSS salt length in bytes. Peers sign and verify with the same value.
pub const PSS_SALT_LEN: usize = 128;

/// Result of [`sign`]: the signature and the exact text it covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signed {
    pub signature: String,
    pub signed_data: String,
}

/// Result of [`verify`]. A mismatch is a normal outcome, not an error.
#[derive(Clone, Debug, PartialEq)]
pub struct Verified {
    pub data: Value,
    pub is_authentic: bool,
}

/// Canonical text form of a payload, as signed and as returned to the caller.
///
/// Object members are emitted in sorted order.
pub fn canonical_json(payload: &Value) -> Result<String, CryptoError> {
    Ok(serde_json::to_string(payload)?)
}

/// Seal a payload to a recipient's public key. Returns base64 ciphertext.
pub fn encrypt(recipient: &PublicJwk, payload: &Value) -> Result<String, CryptoError> {
    let key = public_from_jwk(recipient, ALG_RSA_OAEP_256)?;
    encrypt_with_key(&key, payload)
}

pub fn encrypt_with_key(recipient: &RsaPublicKey, payload: &Value) -> Result<String, CryptoError> {
    let plaintext = serde_json::to_vec(payload)?;
    let ciphertext = recipient
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &plaintext)
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
    Ok(STANDARD.encode(ciphertext))
}

/// Open base64 ciphertext with a local private key.
pub fn decrypt(key: &RsaPrivateKey, ciphertext: &str) -> Result<Value, CryptoError> {
    let bytes = STANDARD.decode(ciphertext)?;
    let plaintext = key
        .decrypt(Oaep::new::<Sha256>(), &bytes)
        .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Sign the canonical form of a payload with RSA-PSS over SHA-256.
pub fn sign(key: &RsaPrivateKey, payload: &Value) -> Result<Signed, CryptoError> {
    let signed_data = canonical_json(payload)?;
    let digest = Sha256::digest(signed_data.as_bytes());
    let signature = key
        .sign_with_rng(
            &mut OsRng,
            Pss::new_with_salt::<Sha256>(PSS_SALT_LEN),
            &digest,
        )
        .map_err(|e| CryptoError::Sign(e.to_string()))?;
    Ok(Signed {
        signature: STANDARD.encode(signature),
        signed_data,
    })
}

/// Check a signature over `signed_data`.
///
/// Errors only when the key cannot be imported or `signed_data` is not JSON.
/// A signature that is not valid base64 or does not match is reported as
/// `is_authentic: false`.
pub fn verify(
    key: &PublicJwk,
    signature: &str,
    signed_data: &str,
) -> Result<Verified, CryptoError> {
    let key = public_from_jwk(key, ALG_PS256)?;
    verify_with_key(&key, signature, signed_data)
}

pub fn verify_with_key(
    key: &RsaPublicKey,
    signature: &str,
    signed_data: &str,
) -> Result<Verified, CryptoError> {
    let data: Value = serde_json::from_str(signed_data)?;
    let is_authentic = match STANDARD.decode(signature) {
        Ok(sig) => {
            let digest = Sha256::digest(signed_data.as_bytes());
            key.verify(Pss::new_with_salt::<Sha256>(PSS_SALT_LEN), &digest, &sig)
                .is_ok()
        }
        Err(_) => false,
    };
    Ok(Verified { data, is_authentic })
}

fn in_batch(position: usize) -> impl FnOnce(CryptoError) -> CryptoError {
    move |reason| CryptoError::BatchFailed {
        position,
        reason: Box::new(reason),
    }
}

/// Asynchronous broker bound to this device's identity.
#[derive(Clone, Debug)]
pub struct CryptoBroker {
    identity: Arc<DeviceIdentity>,
}

impl CryptoBroker {
    pub fn new(identity: Arc<DeviceIdentity>) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Arc<DeviceIdentity> {
        &self.identity
    }

    /// Seal one payload to someone else's public key.
    pub async fn encrypt(&self, recipient: PublicJwk, payload: Value) -> Result<String, CryptoError> {
        tokio::task::spawn_blocking(move || encrypt(&recipient, &payload)).await?
    }

    /// Open a payload sealed to this device.
    pub async fn decrypt(&self, ciphertext: String) -> Result<Value, CryptoError> {
        let identity = Arc::clone(&self.identity);
        tokio::task::spawn_blocking(move || decrypt(identity.decryption_key(), &ciphertext))
            .await?
    }

    /// Sign a payload with this device's signing key.
    pub async fn sign(&self, payload: Value) -> Result<Signed, CryptoError> {
        let identity = Arc::clone(&self.identity);
        tokio::task::spawn_blocking(move || sign(identity.signing_key(), &payload)).await?
    }

    pub async fn verify(
        &self,
        key: PublicJwk,
        signature: String,
        signed_data: String,
    ) -> Result<Verified, CryptoError> {
        tokio::task::spawn_blocking(move || verify(&key, &signature, &signed_data)).await?
    }

    /// Encrypt the `y` of every share to one recipient.
    ///
    /// All entries run concurrently. Identifiers and order are preserved;
    /// if any entry fails the whole batch fails.
    pub async fn encrypt_batch(
        &self,
        recipient: &PublicJwk,
        entries: Vec<TaggedShare>,
    ) -> Result<Vec<TaggedShare>, CryptoError> {
        let key = public_from_jwk(recipient, ALG_RSA_OAEP_256)?;
        let count = entries.len();
        let jobs = entries.into_iter().enumerate().map(|(position, (id, share))| {
            let key = key.clone();
            async move {
                let share = tokio::task::spawn_blocking(move || seal_share(&key, share))
                    .await
                    .map_err(CryptoError::from)
                    .and_then(|r| r)
                    .map_err(in_batch(position))?;
                Ok::<_, CryptoError>((id, share))
            }
        });
        let sealed = try_join_all(jobs).await?;
        debug!(count, "encrypted share batch");
        Ok(sealed)
    }

    /// Encrypt each share to its own recipient key.
    pub async fn encrypt_each(
        &self,
        entries: Vec<(Value, (PublicJwk, Share))>,
    ) -> Result<Vec<TaggedShare>, CryptoError> {
        let count = entries.len();
        let jobs = entries
            .into_iter()
            .enumerate()
            .map(|(position, (id, (recipient, share)))| async move {
                let share = tokio::task::spawn_blocking(move || {
                    let key = public_from_jwk(&recipient, ALG_RSA_OAEP_256)?;
                    seal_share(&key, share)
                })
                .await
                .map_err(CryptoError::from)
                .and_then(|r| r)
                .map_err(in_batch(position))?;
                Ok::<_, CryptoError>((id, share))
            });
        let sealed = try_join_all(jobs).await?;
        debug!(count, "encrypted shares to individual recipients");
        Ok(sealed)
    }

    /// Decrypt the `y` of every share with this device's key.
    pub async fn decrypt_batch(
        &self,
        entries: Vec<TaggedShare>,
    ) -> Result<Vec<TaggedShare>, CryptoError> {
        let count = entries.len();
        let jobs = entries.into_iter().enumerate().map(|(position, (id, share))| {
            let identity = Arc::clone(&self.identity);
            async move {
                let share = tokio::task::spawn_blocking(move || {
                    open_share(identity.decryption_key(), share)
                })
                .await
                .map_err(CryptoError::from)
                .and_then(|r| r)
                .map_err(in_batch(position))?;
                Ok::<_, CryptoError>((id, share))
            }
        });
        let opened = try_join_all(jobs).await?;
        debug!(count, "decrypted share batch");
        Ok(opened)
    }
}

fn seal_share(key: &RsaPublicKey, mut share: Share) -> Result<Share, CryptoError> {
    share.y = Value::String(encrypt_with_key(key, &share.y)?);
    Ok(share)
}

fn open_share(key: &RsaPrivateKey, mut share: Share) -> Result<Share, CryptoError> {
    let ciphertext = share
        .y
        .as_str()
        .ok_or_else(|| CryptoError::Encoding("share value is not a ciphertext string".into()))?;
    share.y = decrypt(key, ciphertext)?;
    Ok(share)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::shared_identity;
    use serde_json::json;

    fn share(y: Value) -> Share {
        Share {
            y,
            rest: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_sign_verify() {
        let identity = shared_identity();
        let payload = json!({ "type": "ShareRequest", "from": "dev-1", "n": [1, 2, 3] });
        let signed = sign(identity.signing_key(), &payload).unwrap();
        let verified = verify(&identity.signing_public_jwk(), &signed.signature, &signed.signed_data)
            .unwrap();
        assert!(verified.is_authentic);
        assert_eq!(verified.data, payload);
    }

    #[test]
    fn test_tampered_data_is_not_authentic() {
        let identity = shared_identity();
        let signed = sign(identity.signing_key(), &json!({ "amount": 10 })).unwrap();
        let tampered = signed.signed_data.replace("10", "11");
        let verified = verify(&identity.signing_public_jwk(), &signed.signature, &tampered)
            .unwrap();
        assert!(!verified.is_authentic);
        assert_eq!(verified.data, json!({ "amount": 11 }));
    }

    #[test]
    fn test_garbage_signature_is_not_authentic() {
        let identity = shared_identity();
        let verified = verify(&identity.signing_public_jwk(), "@@not base64@@", "{}").unwrap();
        assert!(!verified.is_authentic);
    }

    #[test]
    fn test_verify_rejects_non_json() {
        let identity = shared_identity();
        let err = verify(&identity.signing_public_jwk(), "", "not json").unwrap_err();
        assert!(matches!(err, CryptoError::Payload(_)));
    }

    #[test]
    fn test_verify_rejects_bad_key() {
        let mut key = shared_identity().signing_public_jwk();
        key.kty = "oct".into();
        assert!(matches!(
            verify(&key, "", "{}"),
            Err(CryptoError::KeyImport(_))
        ));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let identity = shared_identity();
        let payload = json!("c2VjcmV0IHNoYXJl");
        let sealed = encrypt(&identity.encryption_public_jwk(), &payload).unwrap();
        assert_ne!(sealed, payload.as_str().unwrap());
        assert_eq!(decrypt(identity.decryption_key(), &sealed).unwrap(), payload);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let identity = shared_identity();
        let payload = json!("x".repeat(400));
        assert!(matches!(
            encrypt(&identity.encryption_public_jwk(), &payload),
            Err(CryptoError::Encrypt(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_preserves_ids_and_other_fields() {
        let broker = CryptoBroker::new(shared_identity());
        let mut extra = serde_json::Map::new();
        extra.insert("x".into(), json!(4));
        let entries = vec![
            (json!("a"), Share { y: json!("one"), rest: extra }),
            (json!("b"), share(json!({ "n": 2 }))),
        ];
        let sealed = broker
            .encrypt_batch(&broker.identity().encryption_public_jwk(), entries)
            .await
            .unwrap();
        assert_eq!(sealed[0].0, json!("a"));
        assert_eq!(sealed[1].0, json!("b"));
        assert_eq!(sealed[0].1.rest["x"], json!(4));

        let opened = broker.decrypt_batch(sealed).await.unwrap();
        assert_eq!(opened[0].1.y, json!("one"));
        assert_eq!(opened[1].1.y, json!({ "n": 2 }));
        assert_eq!(opened[0].1.rest["x"], json!(4));
    }

    #[tokio::test]
    async fn test_batch_fails_as_a_whole() {
        let broker = CryptoBroker::new(shared_identity());
        let entries = vec![
            (json!("good"), share(json!(encrypt(&broker.identity().encryption_public_jwk(), &json!(1)).unwrap()))),
            (json!("bad"), share(json!("AAAA"))),
        ];
        match broker.decrypt_batch(entries).await {
            Err(CryptoError::BatchFailed { position, .. }) => assert_eq!(position, 1),
            other => panic!("expected batch failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_encrypt_each_uses_per_entry_keys() {
        let broker = CryptoBroker::new(shared_identity());
        let key = broker.identity().encryption_public_jwk();
        let entries = vec![
            (json!("dev-a"), (key.clone(), share(json!(1)))),
            (json!("dev-b"), (key, share(json!(2)))),
        ];
        let sealed = broker.encrypt_each(entries).await.unwrap();
        let opened = broker.decrypt_batch(sealed).await.unwrap();
        assert_eq!(opened[0], (json!("dev-a"), share(json!(1))));
        assert_eq!(opened[1], (json!("dev-b"), share(json!(2))));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let broker = CryptoBroker::new(shared_identity());
        assert!(broker.decrypt_batch(Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broker_sign_matches_free_function_form() {
        let broker = CryptoBroker::new(shared_identity());
        let signed = broker.sign(json!({ "b": 1, "a": 2 })).await.unwrap();
        assert_eq!(signed.signed_data, r#"{"a":2,"b":1}"#);
        let verified = broker
            .verify(
                broker.identity().signing_public_jwk(),
                signed.signature,
                signed.signed_data,
            )
            .await
            .unwrap();
        assert!(verified.is_authentic);
    }
}
