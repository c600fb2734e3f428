//! NoKey Core - the hub of one device runtime.
//!
//! This crate implements:
//! - Connection registry with unicast and broadcast delivery
//! - Message relay that routes envelopes between contexts and the crypto layer
//! - Persistent state store for application state and the device identity
//! - Popup notification state machine and badge
//! - File export with collision-free naming

#![forbid(unsafe_code)]

// Relay
pub mod hub;
pub mod registry;

// Services
pub mod application;
pub mod badge;
pub mod export;
pub mod notification;

// Infrastructure
pub mod config;
pub mod device;
pub mod errors;
pub mod store;

pub use application::{AppMessage, Application, NullApplication};
pub use badge::{BadgeSink, BadgeState, TracingBadge};
pub use config::{ConfigError, HubConfig};
pub use errors::{ChannelError, CoreError, CoreResult, ExportError, StoreError};
pub use export::{DirectoryExporter, FileExporter};
pub use hub::{Hub, HubBuilder, HubStats, HubStatsSnapshot};
pub use notification::{NotificationAction, NotificationMachine, NotificationPhase};
pub use registry::{Channel, ConnectionId, ConnectionRegistry, MpscChannel};
pub use store::{DirectoryBackend, MemoryBackend, Persisted, StateStore, StorageBackend};
