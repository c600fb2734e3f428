//! Boundary to the application layer.
//!
//! The hub does not interpret page messages, account lookups or new
//! entries; it forwards them here. The application pushes new state back
//! through [`Hub::publish_state`].

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use nokey_proto::DeviceAnnouncement;

use crate::errors::CoreError;
use crate::hub::Hub;
use crate::registry::ConnectionId;

/// Inbound envelopes owned by the application layer.
#[derive(Clone, Debug, PartialEq)]
pub enum AppMessage {
    ReceiveMsg(Value),
    RequestAccountsForSite(Value),
    SubmitEntry(Value),
    OpenInTab(Value),
}

impl AppMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            AppMessage::ReceiveMsg(_) => "onReceiveMsg",
            AppMessage::RequestAccountsForSite(_) => "onRequestAccountsForSite",
            AppMessage::SubmitEntry(_) => "onSubmitEntry",
            AppMessage::OpenInTab(_) => "onOpenInTab",
        }
    }
}

#[async_trait]
pub trait Application: Send + Sync {
    /// Called once after the hub has its identity and state.
    async fn on_start(&self, _hub: &Hub, _announcement: &DeviceAnnouncement) {}

    async fn handle(
        &self,
        hub: &Hub,
        origin: ConnectionId,
        message: AppMessage,
    ) -> Result<(), CoreError>;
}

/// Application that ignores everything. The hub still serves crypto,
/// storage and popup requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullApplication;

#[async_trait]
impl Application for NullApplication {
    async fn handle(
        &self,
        _hub: &Hub,
        origin: ConnectionId,
        message: AppMessage,
    ) -> Result<(), CoreError> {
        debug!(connection_id = %origin, envelope = message.tag(), "no application attached");
        Ok(())
    }
}
