//! Device announcement handed to the application layer at start-up.

use serde_json::Value;

use nokey_crypto::DeviceIdentity;
use nokey_proto::{DeviceAnnouncement, DeviceType};

use crate::errors::CoreError;

/// Number of random words in the initial seed.
pub const SEED_WORDS: usize = 9;

/// Nine random `u32`s split as `(first, rest)`.
pub fn initial_seed() -> Result<(u32, Vec<u32>), CoreError> {
    let mut bytes = [0u8; SEED_WORDS * 4];
    getrandom::getrandom(&mut bytes).map_err(|e| {
        CoreError::Crypto(nokey_crypto::CryptoError::Unavailable(e.to_string()))
    })?;
    let mut words = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    let first = words.next().unwrap_or_default();
    Ok((first, words.collect()))
}

/// Build the announcement. Only public key material is included.
pub fn announce(
    identity: &DeviceIdentity,
    stored_state: Option<Value>,
    device_type: DeviceType,
) -> Result<DeviceAnnouncement, CoreError> {
    Ok(DeviceAnnouncement {
        initial_seed: initial_seed()?,
        stored_state,
        encryption_key: identity.encryption_public_jwk(),
        signing_key: identity.signing_public_jwk(),
        device_type,
    })
}
