#![forbid(unsafe_code)]

//! Wire format for the NoKey hub.
//!
//! Every message exchanged between an execution context (popup, content
//! script, iframe, web page) and the background hub is a JSON envelope of
//! the form `{ "type": <tag>, "data": <payload> }`. This crate defines the
//! closed set of tags in each direction, the typed payloads behind them and
//! the serializable key export formats.

pub mod envelope;
pub mod keys;
pub mod payloads;

#[cfg(test)]
mod proptests;

pub use envelope::{Inbound, Outbound, ProtoError, RawEnvelope};
pub use keys::{
    DeviceAnnouncement, DeviceType, ExportedIdentity, ExportedKeyPair, PrivateJwk, PublicJwk,
};
pub use payloads::*;
