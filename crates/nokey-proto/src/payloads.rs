//! Typed payloads carried in the `data` member of envelopes.
//!
//! Correlation fields (`time`, `groupId`, `deviceId`, `otherId`, `reqIds`,
//! `from`, `ids`, `name`, `boxId`) are kept as raw JSON values: the hub never
//! interprets them and must hand them back exactly as received. A field the
//! request left out is left out of the reply; an explicit `null` stays `null`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::keys::PublicJwk;

/// One share of a threshold-shared secret.
///
/// Only `y` is touched by the broker; every other member rides along.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub y: Value,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// `[id, share]` pair as it appears on the wire.
pub type TaggedShare = (Value, Share);

/// Present correlation members become `Some`, even when they are `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// `verifyAuthenticity`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
    /// The exact string that was signed (`signedData` from the signer).
    pub data: String,
    pub signature: String,
    pub key: PublicJwk,
}

/// `onAuthenticatedMsg`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReply {
    pub data: Value,
    pub is_authentic: bool,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
}

/// `getSignatureForMsg`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub msg: Value,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub other_id: Option<Value>,
}

/// `onSignedMsg`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignReply {
    pub data: String,
    pub signature: String,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub other_id: Option<Value>,
}

// ---------------------------------------------------------------------------
// Shares
// ---------------------------------------------------------------------------

/// `encryptNewShares`: every device gets its share sealed to its own key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptNewSharesRequest {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Value>,
    pub shares: Vec<(Value, (PublicJwk, Share))>,
}

/// `onNewEncryptedShares`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEncryptedShares {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Value>,
    pub shares: Vec<TaggedShare>,
}

/// `encryptShares`: several shares sealed to one recipient.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptSharesRequest {
    pub shares: Vec<TaggedShare>,
    pub public_key: PublicJwk,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub req_ids: Option<Value>,
}

/// `onDidEncryptShares`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidEncryptShares {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Value>,
    pub encrypted_shares: Vec<TaggedShare>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub req_ids: Option<Value>,
}

/// `decryptRequestedShares`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptRequestedSharesRequest {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub ids: Option<Value>,
    pub shares: Vec<TaggedShare>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub other_id: Option<Value>,
}

/// `onDidDecryptRequestedShares`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDecryptRequestedShares {
    pub shares: Vec<TaggedShare>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub other_id: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub ids: Option<Value>,
}

// ---------------------------------------------------------------------------
// Password vaults
// ---------------------------------------------------------------------------

/// `hashPwFirst`
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashPasswordRequest {
    pub password: String,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(alias = "itterations")]
    pub iterations: u32,
}

impl fmt::Debug for HashPasswordRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashPasswordRequest")
            .field("name", &self.name)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

/// `didHashPwFirst`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidHashPassword {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    pub key: String,
    pub salt: String,
    pub password_hash: String,
    pub hash_salt: String,
    pub time: i64,
}

/// `openBox`
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenBoxRequest {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub box_id: Option<Value>,
    pub salt: String,
    pub hash_salt: String,
    pub password: String,
    #[serde(alias = "itterations")]
    pub iterations: u32,
}

impl fmt::Debug for OpenBoxRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenBoxRequest")
            .field("box_id", &self.box_id)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

/// `onDidOpenBox`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenBox {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub box_id: Option<Value>,
    pub key: String,
    pub password_hash: String,
    pub time: i64,
}

// ---------------------------------------------------------------------------
// Popup, frames, files
// ---------------------------------------------------------------------------

/// `closeAndSuppressPopup`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressPopup {
    /// Window during which rising counts do not reopen the popup.
    /// Falls back to the hub's configured default.
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// `onSizeChanged`: an embedded frame reporting its rendered size.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeChanged {
    pub id: String,
    pub width: u32,
    pub height: u32,
}

/// `exportFile`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFile {
    pub filename: String,
    pub content: String,
}

/// `onExported`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exported {
    /// Name actually used after collision resolution.
    pub filename: String,
    pub path: String,
}

/// Category of a failure reported on the error channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CryptoUnavailable,
    KeyImportFailure,
    StorageUnavailable,
    BatchFailure,
    CryptoFailure,
    InvalidRequest,
    ExportFailure,
    Internal,
}

/// `onError`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// Tag of the request that failed, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_share_keeps_unknown_members() {
        let raw = json!({ "y": "abc", "x": 3, "groupId": ["g", 1] });
        let share: Share = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(share.y, json!("abc"));
        assert_eq!(share.rest.get("x"), Some(&json!(3)));
        assert_eq!(serde_json::to_value(&share).unwrap(), raw);
    }

    #[test]
    fn test_tagged_shares_are_json_pairs() {
        let shares: Vec<TaggedShare> =
            serde_json::from_value(json!([["a", { "y": 1 }], [["g", 2], { "y": 2 }]])).unwrap();
        assert_eq!(shares[0].0, json!("a"));
        assert_eq!(shares[1].0, json!(["g", 2]));
    }

    #[test]
    fn test_hash_request_accepts_legacy_spelling() {
        let req: HashPasswordRequest = serde_json::from_value(
            json!({ "password": "pw", "name": "vault", "itterations": 1000 }),
        )
        .unwrap();
        assert_eq!(req.iterations, 1000);
        assert!(!format!("{req:?}").contains("pw\""));
    }

    #[test]
    fn test_absent_correlation_fields_stay_absent() {
        let req: SignRequest = serde_json::from_value(json!({ "msg": "m" })).unwrap();
        assert_eq!(req.other_id, None);
        let reply = SignReply {
            data: "\"m\"".into(),
            signature: "c2ln".into(),
            other_id: req.other_id,
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert!(json.get("otherId").is_none());

        let req: SignRequest =
            serde_json::from_value(json!({ "msg": "m", "otherId": null })).unwrap();
        assert_eq!(req.other_id, Some(Value::Null));
    }

    #[test]
    fn test_error_report_kind_is_snake_case() {
        let report = ErrorReport {
            kind: ErrorKind::KeyImportFailure,
            message: "bad key".into(),
            request: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "key_import_failure");
        assert!(json.get("request").is_none());
    }
}
