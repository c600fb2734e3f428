//! Password vault key derivation.
//!
//! A vault password yields two values through PBKDF2-HMAC-SHA256 with two
//! different salts: the vault `key` and an independent `passwordHash` that
//! can be stored and compared without revealing the key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::try_join;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Random bytes per salt, before base64 encoding.
pub const SALT_BYTES: usize = 16;
/// Length of each derived value in bytes (256 bits).
pub const DERIVED_BYTES: usize = 32;

/// Outcome of creating a vault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultDerivation {
    pub key: String,
    pub salt: String,
    pub password_hash: String,
    pub hash_salt: String,
    /// Unix milliseconds.
    pub time: i64,
}

/// Outcome of re-deriving for an unlock attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultOpening {
    pub key: String,
    pub password_hash: String,
    pub time: i64,
}

/// Fresh random salt, base64 encoded.
pub fn new_salt() -> Result<String, CryptoError> {
    let mut bytes = [0u8; SALT_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::Unavailable(e.to_string()))?;
    Ok(STANDARD.encode(bytes))
}

/// PBKDF2-HMAC-SHA256 of `password` with the UTF-8 bytes of `salt`.
///
/// Deterministic for fixed inputs. Returns the 32 derived bytes as base64.
pub fn derive_key(password: &str, salt: &str, iterations: u32) -> Result<String, CryptoError> {
    if iterations == 0 {
        return Err(CryptoError::InvalidParameter(
            "iteration count must be positive".into(),
        ));
    }
    let mut out = Zeroizing::new([0u8; DERIVED_BYTES]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut *out);
    Ok(STANDARD.encode(*out))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Derives vault keys off the event loop. Both derivations of one request
/// run concurrently.
#[derive(Clone, Copy, Debug, Default)]
pub struct VaultKeyDeriver;

impl VaultKeyDeriver {
    pub fn new() -> Self {
        Self
    }

    async fn derive_pair(
        password: &str,
        salt: &str,
        hash_salt: &str,
        iterations: u32,
    ) -> Result<(String, String), CryptoError> {
        let run = |salt: &str| {
            let password = Zeroizing::new(password.to_owned());
            let salt = salt.to_owned();
            async move {
                tokio::task::spawn_blocking(move || derive_key(&password, &salt, iterations))
                    .await?
            }
        };
        try_join(run(salt), run(hash_salt)).await
    }

    /// First derivation for a new vault: two fresh salts, two derived values.
    pub async fn derive_first(
        &self,
        password: &str,
        iterations: u32,
    ) -> Result<VaultDerivation, CryptoError> {
        let salt = new_salt()?;
        let hash_salt = new_salt()?;
        let (key, password_hash) =
            Self::derive_pair(password, &salt, &hash_salt, iterations).await?;
        Ok(VaultDerivation {
            key,
            salt,
            password_hash,
            hash_salt,
            time: now_millis(),
        })
    }

    /// Re-derive both values from stored salts for an unlock attempt.
    ///
    /// The caller compares `password_hash` with the stored one before using `key`.
    pub async fn derive_for_open(
        &self,
        password: &str,
        salt: &str,
        hash_salt: &str,
        iterations: u32,
    ) -> Result<VaultOpening, CryptoError> {
        let (key, password_hash) =
            Self::derive_pair(password, salt, hash_salt, iterations).await?;
        Ok(VaultOpening {
            key,
            password_hash,
            time: now_millis(),
        })
    }
}
