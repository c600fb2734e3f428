//! Serializable key exports.
//!
//! Keys travel and persist as JSON Web Keys (RFC 7517, RSA members from
//! RFC 7518 §6.3). Public and private exports are separate types so that a
//! private export cannot be placed where public material is expected.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// JWK `alg` of the encryption key pair (RSA-OAEP with SHA-256).
pub const ALG_RSA_OAEP_256: &str = "RSA-OAEP-256";
/// JWK `alg` of the signing key pair (RSA-PSS with SHA-256).
pub const ALG_PS256: &str = "PS256";

/// Public half of an RSA key as a JWK.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    pub kty: String,
    /// Modulus, base64url without padding.
    pub n: String,
    /// Public exponent, base64url without padding.
    pub e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_ops: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<bool>,
}

/// Private RSA key as a JWK. Only ever written to device-local storage.
///
/// The secret members are wiped on drop and never rendered by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateJwk {
    #[zeroize(skip)]
    pub kty: String,
    pub n: String,
    pub e: String,
    pub d: String,
    pub p: String,
    pub q: String,
    pub dp: String,
    pub dq: String,
    pub qi: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[zeroize(skip)]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[zeroize(skip)]
    pub key_ops: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[zeroize(skip)]
    pub ext: Option<bool>,
}

impl fmt::Debug for PrivateJwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateJwk")
            .field("kty", &self.kty)
            .field("alg", &self.alg)
            .field("key_ops", &self.key_ops)
            .finish_non_exhaustive()
    }
}

/// Exported form of one key pair, as persisted under the `keys` storage key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedKeyPair {
    pub exported_public: PublicJwk,
    pub exported_private: PrivateJwk,
}

/// Exported form of a whole device identity.
///
/// JSON shape:
/// `{ encryptionKey: {exportedPublic, exportedPrivate}, signingKey: {exportedPublic, exportedPrivate} }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedIdentity {
    pub encryption_key: ExportedKeyPair,
    pub signing_key: ExportedKeyPair,
}

/// Kind of runtime hosting the hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeviceType {
    Browser,
    WebExtension,
    Android {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    Desktop,
}

/// Start-up flags handed to the application layer.
///
/// Carries only public key material; this is what other devices get to see
/// when this device announces itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAnnouncement {
    /// `[seed, [eight more words]]`, enough entropy for a seeded PRNG in the UI layer.
    pub initial_seed: (u32, Vec<u32>),
    pub stored_state: Option<Value>,
    pub encryption_key: PublicJwk,
    pub signing_key: PublicJwk,
    pub device_type: DeviceType,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_private() -> PrivateJwk {
        PrivateJwk {
            kty: "RSA".into(),
            n: "bW9kdWx1cw".into(),
            e: "AQAB".into(),
            d: "c2VjcmV0LWQ".into(),
            p: "cA".into(),
            q: "cQ".into(),
            dp: "ZHA".into(),
            dq: "ZHE".into(),
            qi: "cWk".into(),
            alg: Some(ALG_PS256.into()),
            key_ops: vec!["sign".into()],
            ext: Some(true),
        }
    }

    #[test]
    fn test_private_debug_is_redacted() {
        let rendered = format!("{:?}", sample_private());
        assert!(!rendered.contains("c2VjcmV0LWQ"));
        assert!(!rendered.contains("bW9kdWx1cw"));
        assert!(rendered.contains("PS256"));
    }

    fn sample_public(key_ops: &[&str]) -> PublicJwk {
        PublicJwk {
            kty: "RSA".into(),
            n: "bW9kdWx1cw".into(),
            e: "AQAB".into(),
            alg: Some(ALG_PS256.into()),
            key_ops: key_ops.iter().map(|op| op.to_string()).collect(),
            ext: Some(true),
        }
    }

    #[test]
    fn test_public_export_has_no_private_members() {
        let json = serde_json::to_value(sample_public(&["verify"])).unwrap();
        assert_eq!(json["n"], "bW9kdWx1cw");
        assert_eq!(json["key_ops"][0], "verify");
        assert!(json.get("d").is_none());
        assert!(json.get("p").is_none());
    }

    #[test]
    fn test_exported_identity_wire_shape() {
        let pair = ExportedKeyPair {
            exported_public: sample_public(&["encrypt"]),
            exported_private: sample_private(),
        };
        let identity = ExportedIdentity {
            encryption_key: pair.clone(),
            signing_key: pair,
        };
        let json = serde_json::to_value(&identity).unwrap();
        assert!(json["encryptionKey"]["exportedPublic"].is_object());
        assert!(json["signingKey"]["exportedPrivate"]["d"].is_string());
    }

    #[test]
    fn test_public_jwk_accepts_minimal_webcrypto_export() {
        let jwk: PublicJwk =
            serde_json::from_str(r#"{"kty":"RSA","n":"AQID","e":"Aw"}"#).unwrap();
        assert_eq!(jwk.alg, None);
        assert!(jwk.key_ops.is_empty());
    }

    #[test]
    fn test_device_type_tagging() {
        let json = serde_json::to_value(DeviceType::Android {
            version: Some("1.2".into()),
        })
        .unwrap();
        assert_eq!(json["type"], "Android");
        assert_eq!(json["version"], "1.2");
        let browser = serde_json::to_value(DeviceType::WebExtension).unwrap();
        assert_eq!(browser, serde_json::json!({ "type": "WebExtension" }));
    }
}
