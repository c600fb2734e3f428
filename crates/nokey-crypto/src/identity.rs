//! Device identity: the encryption and signing key pairs of this device.
//!
//! A device has exactly one identity for its whole life. It is generated on
//! first run, persisted as an [`ExportedIdentity`] in device-local storage
//! and re-imported on every later start.

use std::fmt;

use rand_core::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info};

use nokey_proto::keys::{ALG_PS256, ALG_RSA_OAEP_256};
use nokey_proto::{ExportedIdentity, ExportedKeyPair, PublicJwk};

use crate::error::CryptoError;
use crate::jwk::{private_from_jwk, private_to_jwk, public_from_jwk, public_to_jwk};

/// Modulus size of both key pairs.
pub const MODULUS_BITS: usize = 2048;

const ENCRYPTION_OPS: (&[&str], &[&str]) = (&["encrypt"], &["decrypt"]);
const SIGNING_OPS: (&[&str], &[&str]) = (&["verify"], &["sign"]);

/// Check that the platform can provide secure randomness.
pub fn ensure_provider() -> Result<(), CryptoError> {
    let mut sample = [0u8; 8];
    getrandom::getrandom(&mut sample).map_err(|e| CryptoError::Unavailable(e.to_string()))
}

/// One live key pair together with its exported form.
struct KeyPair {
    public: RsaPublicKey,
    private: RsaPrivateKey,
    exported: ExportedKeyPair,
}

impl KeyPair {
    fn generate(alg: &str, ops: (&[&str], &[&str])) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, MODULUS_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = private.to_public_key();
        let exported = ExportedKeyPair {
            exported_public: public_to_jwk(&public, alg, ops.0),
            exported_private: private_to_jwk(&private, alg, ops.1)?,
        };
        Ok(Self {
            public,
            private,
            exported,
        })
    }

    fn import(exported: &ExportedKeyPair, alg: &str) -> Result<Self, CryptoError> {
        let public = public_from_jwk(&exported.exported_public, alg)?;
        let private = private_from_jwk(&exported.exported_private, alg)?;
        if private.to_public_key() != public {
            return Err(CryptoError::KeyImport(
                "public and private halves belong to different keys".into(),
            ));
        }
        Ok(Self {
            public,
            private,
            exported: exported.clone(),
        })
    }
}

/// The device's cryptographic identity.
pub struct DeviceIdentity {
    encryption: KeyPair,
    signing: KeyPair,
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity").finish_non_exhaustive()
    }
}

impl DeviceIdentity {
    /// Generate a fresh identity: an RSA-OAEP-SHA256 encryption pair and an
    /// RSA-PSS-SHA256 signing pair, both 2048 bits.
    pub fn generate() -> Result<Self, CryptoError> {
        ensure_provider()?;
        let encryption = KeyPair::generate(ALG_RSA_OAEP_256, ENCRYPTION_OPS)?;
        let signing = KeyPair::generate(ALG_PS256, SIGNING_OPS)?;
        info!("generated new device identity");
        Ok(Self {
            encryption,
            signing,
        })
    }

    /// Serializable form of all four keys, for device-local persistence.
    pub fn export(&self) -> ExportedIdentity {
        ExportedIdentity {
            encryption_key: self.encryption.exported.clone(),
            signing_key: self.signing.exported.clone(),
        }
    }

    /// Rebuild live keys from an export.
    ///
    /// Fails with [`CryptoError::KeyImport`] on malformed or mismatched material.
    pub fn import(exported: &ExportedIdentity) -> Result<Self, CryptoError> {
        ensure_provider()?;
        let encryption = KeyPair::import(&exported.encryption_key, ALG_RSA_OAEP_256)?;
        let signing = KeyPair::import(&exported.signing_key, ALG_PS256)?;
        debug!("restored device identity");
        Ok(Self {
            encryption,
            signing,
        })
    }

    /// Import the persisted identity, or generate one when nothing was persisted.
    ///
    /// An import failure is returned as is: an established identity is never
    /// silently replaced.
    pub fn load_or_create(persisted: Option<&ExportedIdentity>) -> Result<Self, CryptoError> {
        match persisted {
            Some(exported) => Self::import(exported),
            None => Self::generate(),
        }
    }

    /// [`DeviceIdentity::load_or_create`] on the blocking pool.
    pub async fn load_or_create_async(
        persisted: Option<ExportedIdentity>,
    ) -> Result<Self, CryptoError> {
        tokio::task::spawn_blocking(move || Self::load_or_create(persisted.as_ref())).await?
    }

    /// Public encryption key as other devices should see it.
    pub fn encryption_public_jwk(&self) -> PublicJwk {
        self.encryption.exported.exported_public.clone()
    }

    /// Public verification key as other devices should see it.
    pub fn signing_public_jwk(&self) -> PublicJwk {
        self.signing.exported.exported_public.clone()
    }

    pub fn encryption_public_key(&self) -> &RsaPublicKey {
        &self.encryption.public
    }

    pub fn verifying_key(&self) -> &RsaPublicKey {
        &self.signing.public
    }

    pub(crate) fn decryption_key(&self) -> &RsaPrivateKey {
        &self.encryption.private
    }

    pub(crate) fn signing_key(&self) -> &RsaPrivateKey {
        &self.signing.private
    }
}
