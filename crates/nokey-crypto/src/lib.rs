#![forbid(unsafe_code)]

//! Cryptography for the NoKey hub.
//!
//! - [`identity`]: the device's RSA encryption and signing key pairs
//! - [`broker`]: encrypt, decrypt, sign and verify, single and batched
//! - [`vault`]: PBKDF2 derivation of vault keys and password hashes

pub mod broker;
pub mod error;
pub mod identity;
pub mod jwk;
pub mod vault;

#[cfg(test)]
mod proptests;

pub use broker::{CryptoBroker, Signed, Verified, PSS_SALT_LEN};
pub use error::CryptoError;
pub use identity::{ensure_provider, DeviceIdentity};
pub use vault::{VaultDerivation, VaultKeyDeriver, VaultOpening};
