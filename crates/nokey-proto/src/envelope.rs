//! Envelope encoding and decoding.
//!
//! Every message between execution contexts is a JSON object
//! `{ "type": <tag>, "data": <payload> }`. Decoding goes through
//! [`RawEnvelope`] first so that an unknown tag can be told apart from a
//! known tag carrying a malformed body.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::payloads::*;

/// Errors raised while decoding an envelope.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown envelope type: {0}")]
    UnknownType(String),
    #[error("invalid payload for {tag}: {source}")]
    InvalidPayload {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Untyped envelope as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default)]
    pub data: Value,
}

impl RawEnvelope {
    pub fn new(tag: impl Into<String>, data: Value) -> Self {
        Self {
            tag: tag.into(),
            data,
        }
    }

    /// Parse one JSON text into a raw envelope.
    pub fn from_json(text: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(text).map_err(ProtoError::Malformed)
    }

    pub fn to_json(&self) -> String {
        // A struct of a String and a Value always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Envelopes sent by an execution context to the hub.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    StateRequest,
    ReceiveMsg(Value),
    RequestAccountsForSite(Value),
    SubmitEntry(Value),
    FillForm(Value),
    ClosePopup,
    CloseAndSuppressPopup(SuppressPopup),
    NotificationCount(u32),
    OpenInTab(Value),
    SizeChanged(SizeChanged),
    StoreState(Value),
    ResetStorage(Value),
    ExportFile(ExportFile),
    VerifyAuthenticity(VerifyRequest),
    GetSignatureForMsg(SignRequest),
    DecryptMyShares(Vec<TaggedShare>),
    EncryptNewShares(EncryptNewSharesRequest),
    EncryptShares(EncryptSharesRequest),
    DecryptRequestedShares(DecryptRequestedSharesRequest),
    HashPwFirst(HashPasswordRequest),
    OpenBox(OpenBoxRequest),
}

fn payload<T: DeserializeOwned>(tag: &'static str, data: Value) -> Result<T, ProtoError> {
    serde_json::from_value(data).map_err(|source| ProtoError::InvalidPayload { tag, source })
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    // Payload types hold only strings, numbers and JSON values.
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

impl Inbound {
    pub const TAGS: [&'static str; 21] = [
        "onStateRequest",
        "onReceiveMsg",
        "onRequestAccountsForSite",
        "onSubmitEntry",
        "onFillForm",
        "closePopup",
        "closeAndSuppressPopup",
        "onNotificationCount",
        "onOpenInTab",
        "onSizeChanged",
        "storeState",
        "resetStorage",
        "exportFile",
        "verifyAuthenticity",
        "getSignatureForMsg",
        "decryptMyShares",
        "encryptNewShares",
        "encryptShares",
        "decryptRequestedShares",
        "hashPwFirst",
        "openBox",
    ];

    /// Wire tag of this envelope.
    pub fn tag(&self) -> &'static str {
        match self {
            Inbound::StateRequest => "onStateRequest",
            Inbound::ReceiveMsg(_) => "onReceiveMsg",
            Inbound::RequestAccountsForSite(_) => "onRequestAccountsForSite",
            Inbound::SubmitEntry(_) => "onSubmitEntry",
            Inbound::FillForm(_) => "onFillForm",
            Inbound::ClosePopup => "closePopup",
            Inbound::CloseAndSuppressPopup(_) => "closeAndSuppressPopup",
            Inbound::NotificationCount(_) => "onNotificationCount",
            Inbound::OpenInTab(_) => "onOpenInTab",
            Inbound::SizeChanged(_) => "onSizeChanged",
            Inbound::StoreState(_) => "storeState",
            Inbound::ResetStorage(_) => "resetStorage",
            Inbound::ExportFile(_) => "exportFile",
            Inbound::VerifyAuthenticity(_) => "verifyAuthenticity",
            Inbound::GetSignatureForMsg(_) => "getSignatureForMsg",
            Inbound::DecryptMyShares(_) => "decryptMyShares",
            Inbound::EncryptNewShares(_) => "encryptNewShares",
            Inbound::EncryptShares(_) => "encryptShares",
            Inbound::DecryptRequestedShares(_) => "decryptRequestedShares",
            Inbound::HashPwFirst(_) => "hashPwFirst",
            Inbound::OpenBox(_) => "openBox",
        }
    }

    /// Decode a typed envelope from its raw form.
    pub fn decode(raw: RawEnvelope) -> Result<Self, ProtoError> {
        let RawEnvelope { tag, data } = raw;
        let msg = match tag.as_str() {
            "onStateRequest" => Inbound::StateRequest,
            "onReceiveMsg" => Inbound::ReceiveMsg(data),
            "onRequestAccountsForSite" => Inbound::RequestAccountsForSite(data),
            "onSubmitEntry" => Inbound::SubmitEntry(data),
            "onFillForm" => Inbound::FillForm(data),
            "closePopup" => Inbound::ClosePopup,
            "closeAndSuppressPopup" => {
                // Older senders omit the body entirely.
                if data.is_null() {
                    Inbound::CloseAndSuppressPopup(SuppressPopup::default())
                } else {
                    Inbound::CloseAndSuppressPopup(payload("closeAndSuppressPopup", data)?)
                }
            }
            "onNotificationCount" => {
                Inbound::NotificationCount(payload("onNotificationCount", data)?)
            }
            "onOpenInTab" => Inbound::OpenInTab(data),
            "onSizeChanged" => Inbound::SizeChanged(payload("onSizeChanged", data)?),
            "storeState" => Inbound::StoreState(data),
            "resetStorage" => Inbound::ResetStorage(data),
            "exportFile" => Inbound::ExportFile(payload("exportFile", data)?),
            "verifyAuthenticity" => {
                Inbound::VerifyAuthenticity(payload("verifyAuthenticity", data)?)
            }
            "getSignatureForMsg" => {
                Inbound::GetSignatureForMsg(payload("getSignatureForMsg", data)?)
            }
            "decryptMyShares" => Inbound::DecryptMyShares(payload("decryptMyShares", data)?),
            "encryptNewShares" => Inbound::EncryptNewShares(payload("encryptNewShares", data)?),
            "encryptShares" => Inbound::EncryptShares(payload("encryptShares", data)?),
            "decryptRequestedShares" => {
                Inbound::DecryptRequestedShares(payload("decryptRequestedShares", data)?)
            }
            "hashPwFirst" => Inbound::HashPwFirst(payload("hashPwFirst", data)?),
            "openBox" => Inbound::OpenBox(payload("openBox", data)?),
            _ => return Err(ProtoError::UnknownType(tag)),
        };
        Ok(msg)
    }

    /// Parse and decode a JSON text in one step.
    pub fn from_json(text: &str) -> Result<Self, ProtoError> {
        Self::decode(RawEnvelope::from_json(text)?)
    }

    /// Whether this request is answered by the crypto broker or key deriver.
    pub fn is_crypto_request(&self) -> bool {
        matches!(
            self,
            Inbound::VerifyAuthenticity(_)
                | Inbound::GetSignatureForMsg(_)
                | Inbound::DecryptMyShares(_)
                | Inbound::EncryptNewShares(_)
                | Inbound::EncryptShares(_)
                | Inbound::DecryptRequestedShares(_)
                | Inbound::HashPwFirst(_)
                | Inbound::OpenBox(_)
        )
    }
}

/// Envelopes sent by the hub to one or all execution contexts.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    NewState(Value),
    OpenPopup,
    ClosePopup,
    FillForm(Value),
    SizeChanged(SizeChanged),
    AuthenticatedMsg(VerifyReply),
    SignedMsg(SignReply),
    ReceiveMyShares(Vec<TaggedShare>),
    NewEncryptedShares(NewEncryptedShares),
    DidEncryptShares(DidEncryptShares),
    DidDecryptRequestedShares(DidDecryptRequestedShares),
    DidHashPwFirst(DidHashPassword),
    DidOpenBox(DidOpenBox),
    Exported(Exported),
    Error(ErrorReport),
}

impl Outbound {
    pub fn tag(&self) -> &'static str {
        match self {
            Outbound::NewState(_) => "onNewState",
            Outbound::OpenPopup => "openPopup",
            Outbound::ClosePopup => "closePopup",
            Outbound::FillForm(_) => "fillForm",
            Outbound::SizeChanged(_) => "onSizeChanged",
            Outbound::AuthenticatedMsg(_) => "onAuthenticatedMsg",
            Outbound::SignedMsg(_) => "onSignedMsg",
            Outbound::ReceiveMyShares(_) => "onReceiveMyShares",
            Outbound::NewEncryptedShares(_) => "onNewEncryptedShares",
            Outbound::DidEncryptShares(_) => "onDidEncryptShares",
            Outbound::DidDecryptRequestedShares(_) => "onDidDecryptRequestedShares",
            Outbound::DidHashPwFirst(_) => "didHashPwFirst",
            Outbound::DidOpenBox(_) => "onDidOpenBox",
            Outbound::Exported(_) => "onExported",
            Outbound::Error(_) => "onError",
        }
    }

    pub fn encode(&self) -> RawEnvelope {
        let data = match self {
            Outbound::OpenPopup | Outbound::ClosePopup => Value::Null,
            Outbound::NewState(v) | Outbound::FillForm(v) => v.clone(),
            Outbound::SizeChanged(p) => to_value(p),
            Outbound::AuthenticatedMsg(p) => to_value(p),
            Outbound::SignedMsg(p) => to_value(p),
            Outbound::ReceiveMyShares(p) => to_value(p),
            Outbound::NewEncryptedShares(p) => to_value(p),
            Outbound::DidEncryptShares(p) => to_value(p),
            Outbound::DidDecryptRequestedShares(p) => to_value(p),
            Outbound::DidHashPwFirst(p) => to_value(p),
            Outbound::DidOpenBox(p) => to_value(p),
            Outbound::Exported(p) => to_value(p),
            Outbound::Error(p) => to_value(p),
        };
        RawEnvelope::new(self.tag(), data)
    }

    pub fn to_json(&self) -> String {
        self.encode().to_json()
    }

    /// Decode an outbound envelope, as a context receiving it would.
    pub fn decode(raw: RawEnvelope) -> Result<Self, ProtoError> {
        let RawEnvelope { tag, data } = raw;
        let msg = match tag.as_str() {
            "onNewState" => Outbound::NewState(data),
            "openPopup" => Outbound::OpenPopup,
            "closePopup" => Outbound::ClosePopup,
            "fillForm" => Outbound::FillForm(data),
            "onSizeChanged" => Outbound::SizeChanged(payload("onSizeChanged", data)?),
            "onAuthenticatedMsg" => Outbound::AuthenticatedMsg(payload("onAuthenticatedMsg", data)?),
            "onSignedMsg" => Outbound::SignedMsg(payload("onSignedMsg", data)?),
            "onReceiveMyShares" => Outbound::ReceiveMyShares(payload("onReceiveMyShares", data)?),
            "onNewEncryptedShares" => {
                Outbound::NewEncryptedShares(payload("onNewEncryptedShares", data)?)
            }
            "onDidEncryptShares" => Outbound::DidEncryptShares(payload("onDidEncryptShares", data)?),
            "onDidDecryptRequestedShares" => {
                Outbound::DidDecryptRequestedShares(payload("onDidDecryptRequestedShares", data)?)
            }
            "didHashPwFirst" => Outbound::DidHashPwFirst(payload("didHashPwFirst", data)?),
            "onDidOpenBox" => Outbound::DidOpenBox(payload("onDidOpenBox", data)?),
            "onExported" => Outbound::Exported(payload("onExported", data)?),
            "onError" => Outbound::Error(payload("onError", data)?),
            _ => return Err(ProtoError::UnknownType(tag)),
        };
        Ok(msg)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtoError> {
        Self::decode(RawEnvelope::from_json(text)?)
    }
}
