//! Message relay: the central hub of one device runtime.
//!
//! The hub owns the connection registry, the crypto broker, the vault key
//! deriver, the state store and the popup notification machine. Each
//! connected context feeds raw envelopes into [`Hub::serve_connection`];
//! the hub decodes them, dispatches on the tag and routes replies:
//!
//! - crypto replies, state replies and errors go back to the origin only
//! - new state, popup open/close and form fills go to every context
//! - frame size changes are debounced per frame and sent to the others
//!
//! Crypto requests are spawned so that replies may complete in any order.
//! Everything else is handled in arrival order on the connection's loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use nokey_crypto::{ensure_provider, CryptoBroker, CryptoError, DeviceIdentity, VaultKeyDeriver};
use nokey_proto::{
    DeviceAnnouncement, DeviceType, DidDecryptRequestedShares, DidEncryptShares, DidHashPassword,
    DidOpenBox, ErrorKind, ErrorReport, Inbound, NewEncryptedShares, Outbound, ProtoError,
    RawEnvelope, SignReply, SizeChanged, VerifyReply,
};

use crate::application::{AppMessage, Application, NullApplication};
use crate::badge::{BadgeSink, BadgeState, TracingBadge};
use crate::config::HubConfig;
use crate::device::announce;
use crate::errors::{CoreError, CoreResult, StoreError};
use crate::export::{DirectoryExporter, FileExporter};
use crate::notification::{NotificationAction, NotificationMachine, NotificationPhase};
use crate::registry::{Channel, ConnectionId, ConnectionRegistry};
use crate::store::{DirectoryBackend, Persisted, StateStore, KEYS_KEY};

// ============================================================================
// Statistics
// ============================================================================

/// Counters for inbound envelope handling.
#[derive(Debug, Default)]
pub struct HubStats {
    /// Envelopes received from any connection
    pub received: AtomicU64,
    /// Envelopes handed to a handler
    pub dispatched: AtomicU64,
    /// Envelopes dropped for any reason
    pub dropped: AtomicU64,
    /// Dropped because the tag is not known
    pub unknown_type: AtomicU64,
    /// Dropped because the body did not match the tag
    pub invalid_payload: AtomicU64,
    /// Handlers that returned an error
    pub handler_errors: AtomicU64,
}

impl HubStats {
    pub fn snapshot(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            unknown_type: self.unknown_type.load(Ordering::Relaxed),
            invalid_payload: self.invalid_payload.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_unknown_type(&self) {
        Self::inc(&self.unknown_type);
        Self::inc(&self.dropped);
    }

    fn inc_invalid_payload(&self) {
        Self::inc(&self.invalid_payload);
        Self::inc(&self.dropped);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub dropped: u64,
    pub unknown_type: u64,
    pub invalid_payload: u64,
    pub handler_errors: u64,
}

// ============================================================================
// Builder
// ============================================================================

/// Collaborators and settings for [`Hub::start`].
pub struct HubBuilder {
    config: HubConfig,
    store: Option<StateStore>,
    badge: Arc<dyn BadgeSink>,
    application: Arc<dyn Application>,
    exporter: Option<Arc<dyn FileExporter>>,
    device_type: DeviceType,
}

impl HubBuilder {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            store: None,
            badge: Arc::new(TracingBadge),
            application: Arc::new(NullApplication),
            exporter: None,
            device_type: DeviceType::Desktop,
        }
    }

    /// Use this store instead of a directory store under `data_dir`.
    pub fn store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn badge(mut self, badge: Arc<dyn BadgeSink>) -> Self {
        self.badge = badge;
        self
    }

    pub fn application(mut self, application: Arc<dyn Application>) -> Self {
        self.application = application;
        self
    }

    pub fn exporter(mut self, exporter: Arc<dyn FileExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub async fn start(self) -> CoreResult<Arc<Hub>> {
        Hub::start(self).await
    }
}

// ============================================================================
// Hub
// ============================================================================

pub struct Hub {
    registry: ConnectionRegistry,
    broker: CryptoBroker,
    deriver: VaultKeyDeriver,
    store: StateStore,
    durable: AtomicBool,
    state: RwLock<Option<Value>>,
    notifications: Mutex<NotificationMachine>,
    badge: Arc<dyn BadgeSink>,
    application: Arc<dyn Application>,
    exporter: Arc<dyn FileExporter>,
    announcement: DeviceAnnouncement,
    stats: HubStats,
    pending_sizes: DashMap<String, u64>,
    size_generation: AtomicU64,
    config: HubConfig,
}

impl Hub {
    /// Bring the hub up: validate the configuration, check the crypto provider, load persisted data,
    /// restore or create the device identity and build the announcement.
    ///
    /// On first run the new identity is persisted immediately. A persisted
    /// identity that fails to import is an error; it is never replaced.
    /// Unreachable storage downgrades the hub to in-memory storage.
    pub async fn start(builder: HubBuilder) -> CoreResult<Arc<Self>> {
        let HubBuilder {
            config,
            store,
            badge,
            application,
            exporter,
            device_type,
        } = builder;

        config.validate()?;
        ensure_provider()?;

        let mut durable = true;
        let store = match store {
            Some(store) => store,
            None => match DirectoryBackend::open(&config.data_dir) {
                Ok(backend) => StateStore::new(Arc::new(backend)),
                Err(e) => {
                    warn!("storage unavailable, keeping state in memory: {e}");
                    durable = false;
                    StateStore::in_memory()
                }
            },
        };

        let (store, persisted) = match store.load().await {
            Ok(persisted) => (store, persisted),
            Err(StoreError::Corrupt { key, source }) if key == KEYS_KEY => {
                return Err(CryptoError::KeyImport(format!("persisted keys unreadable: {source}")).into());
            }
            Err(e @ StoreError::Corrupt { .. }) => return Err(e.into()),
            Err(e) => {
                warn!("storage unavailable, keeping state in memory: {e}");
                durable = false;
                (StateStore::in_memory(), Persisted::default())
            }
        };

        let first_run = persisted.keys.is_none();
        let identity = Arc::new(DeviceIdentity::load_or_create_async(persisted.keys).await?);
        if first_run {
            let state = persisted.state.clone().unwrap_or(Value::Null);
            if let Err(e) = store.save(&state, &identity.export()).await {
                warn!("could not persist new identity: {e}");
                durable = false;
            }
        }

        let announcement = announce(&identity, persisted.state.clone(), device_type)?;
        let exporter: Arc<dyn FileExporter> = match exporter {
            Some(exporter) => exporter,
            None => Arc::new(DirectoryExporter::new(config.export_dir.clone())),
        };

        let hub = Arc::new(Self {
            registry: ConnectionRegistry::new(),
            broker: CryptoBroker::new(identity),
            deriver: VaultKeyDeriver::new(),
            store,
            durable: AtomicBool::new(durable),
            state: RwLock::new(persisted.state),
            notifications: Mutex::new(NotificationMachine::new()),
            badge,
            application,
            exporter,
            announcement,
            stats: HubStats::default(),
            pending_sizes: DashMap::new(),
            size_generation: AtomicU64::new(0),
            config,
        });

        info!(first_run, durable, "hub started");
        hub.application.on_start(&hub, &hub.announcement).await;
        Ok(hub)
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn broker(&self) -> &CryptoBroker {
        &self.broker
    }

    pub fn stats(&self) -> HubStatsSnapshot {
        self.stats.snapshot()
    }

    /// Public identity, seed and stored state for the application layer.
    pub fn announcement(&self) -> &DeviceAnnouncement {
        &self.announcement
    }

    pub fn current_state(&self) -> Option<Value> {
        self.state.read().clone()
    }

    /// Whether state is written to durable storage this session.
    pub fn is_durable(&self) -> bool {
        self.durable.load(Ordering::Relaxed)
    }

    pub fn notification_phase(&self) -> NotificationPhase {
        self.notifications.lock().phase(now())
    }

    /// Register a context. Replies and broadcasts go to `channel`.
    pub fn connect(&self, origin: impl Into<String>, channel: Arc<dyn Channel>) -> ConnectionId {
        self.registry.connect(origin, channel)
    }

    pub fn disconnect(&self, id: ConnectionId) {
        self.registry.unregister(id);
    }

    /// Run the read loop of one context until its inbound side closes.
    ///
    /// Crypto requests still in flight at that point are allowed to finish
    /// and reply before the context is unregistered.
    pub async fn serve_connection(
        self: Arc<Self>,
        origin: impl Into<String>,
        channel: Arc<dyn Channel>,
        mut inbound: mpsc::Receiver<RawEnvelope>,
    ) {
        let id = self.connect(origin, channel);
        if !self.is_durable() {
            let notice = ErrorReport {
                kind: ErrorKind::StorageUnavailable,
                message: "storage unavailable, state is kept in memory for this session".into(),
                request: None,
            };
            self.reply(id, Outbound::Error(notice)).await;
        }
        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                raw = inbound.recv() => {
                    let Some(raw) = raw else { break };
                    let Some(message) = self.decode(id, raw) else { continue };
                    HubStats::inc(&self.stats.dispatched);
                    if message.is_crypto_request() {
                        let hub = Arc::clone(&self);
                        in_flight.spawn(async move { hub.run(id, message).await });
                    } else {
                        self.run(id, message).await;
                    }
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }
        while in_flight.join_next().await.is_some() {}
        self.disconnect(id);
        debug!(connection_id = %id, "connection closed");
    }

    fn decode(&self, origin: ConnectionId, raw: RawEnvelope) -> Option<Inbound> {
        HubStats::inc(&self.stats.received);
        match Inbound::decode(raw) {
            Ok(message) => Some(message),
            Err(ProtoError::UnknownType(tag)) => {
                warn!(connection_id = %origin, tag, "dropping envelope of unknown type");
                self.stats.inc_unknown_type();
                None
            }
            Err(e) => {
                warn!(connection_id = %origin, "dropping envelope: {e}");
                self.stats.inc_invalid_payload();
                None
            }
        }
    }

    /// Decode and dispatch one envelope from `origin`.
    pub async fn handle_raw(self: &Arc<Self>, origin: ConnectionId, raw: RawEnvelope) {
        if let Some(message) = self.decode(origin, raw) {
            self.handle(origin, message).await;
        }
    }

    /// Dispatch a decoded envelope from `origin`. Crypto requests run on
    /// their own task; their replies may arrive after this returns.
    pub async fn handle(self: &Arc<Self>, origin: ConnectionId, message: Inbound) {
        HubStats::inc(&self.stats.dispatched);
        if message.is_crypto_request() {
            let hub = Arc::clone(self);
            tokio::spawn(async move { hub.run(origin, message).await });
        } else {
            self.run(origin, message).await;
        }
    }

    async fn run(self: &Arc<Self>, origin: ConnectionId, message: Inbound) {
        let tag = message.tag();
        if let Err(e) = self.dispatch(origin, message).await {
            HubStats::inc(&self.stats.handler_errors);
            warn!(connection_id = %origin, envelope = tag, "request failed: {e}");
            self.registry
                .send_to(origin, &Outbound::Error(e.report(Some(tag))))
                .await;
        }
    }

    async fn reply(&self, origin: ConnectionId, envelope: Outbound) {
        self.registry.send_to(origin, &envelope).await;
    }

    async fn dispatch(self: &Arc<Self>, origin: ConnectionId, message: Inbound) -> CoreResult<()> {
        match message {
            Inbound::StateRequest => {
                let state = self.current_state().unwrap_or(Value::Null);
                self.reply(origin, Outbound::NewState(state)).await;
            }
            Inbound::ReceiveMsg(v) => self.forward(origin, AppMessage::ReceiveMsg(v)).await?,
            Inbound::RequestAccountsForSite(v) => {
                self.forward(origin, AppMessage::RequestAccountsForSite(v)).await?
            }
            Inbound::SubmitEntry(v) => self.forward(origin, AppMessage::SubmitEntry(v)).await?,
            Inbound::OpenInTab(v) => self.forward(origin, AppMessage::OpenInTab(v)).await?,
            Inbound::FillForm(v) => {
                self.registry.broadcast(&Outbound::FillForm(v)).await;
            }
            Inbound::ClosePopup => {
                self.notifications.lock().on_close();
                self.registry
                    .broadcast_except(origin, &Outbound::ClosePopup)
                    .await;
            }
            Inbound::CloseAndSuppressPopup(req) => {
                let duration = req
                    .duration_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.config.popup_suppress());
                let action = self.notifications.lock().on_suppress(duration, now());
                debug!(?duration, "popup suppressed");
                self.perform(action).await;
            }
            Inbound::NotificationCount(count) => {
                self.badge.apply(&BadgeState::for_count(count));
                let action = self.notifications.lock().on_count(count, now());
                if let Some(action) = action {
                    self.perform(action).await;
                }
            }
            Inbound::SizeChanged(size) => self.debounce_size(origin, size),
            Inbound::StoreState(state) => {
                *self.state.write() = Some(state.clone());
                self.persist(&state).await?;
            }
            Inbound::ResetStorage(state) => {
                *self.state.write() = Some(state.clone());
                self.store
                    .reset(&state, &self.broker.identity().export())
                    .await?;
            }
            Inbound::ExportFile(file) => {
                let exported = self.exporter.export(&file.filename, &file.content).await?;
                self.reply(origin, Outbound::Exported(exported)).await;
            }
            Inbound::VerifyAuthenticity(req) => {
                let verified = self.broker.verify(req.key, req.signature, req.data).await?;
                let reply = VerifyReply {
                    data: verified.data,
                    is_authentic: verified.is_authentic,
                    time: req.time,
                    from: req.from,
                };
                self.reply(origin, Outbound::AuthenticatedMsg(reply)).await;
            }
            Inbound::GetSignatureForMsg(req) => {
                let signed = self.broker.sign(req.msg).await?;
                let reply = SignReply {
                    data: signed.signed_data,
                    signature: signed.signature,
                    other_id: req.other_id,
                };
                self.reply(origin, Outbound::SignedMsg(reply)).await;
            }
            Inbound::DecryptMyShares(shares) => {
                let shares = self.broker.decrypt_batch(shares).await?;
                self.reply(origin, Outbound::ReceiveMyShares(shares)).await;
            }
            Inbound::EncryptNewShares(req) => {
                let shares = self.broker.encrypt_each(req.shares).await?;
                let reply = NewEncryptedShares {
                    time: req.time,
                    group_id: req.group_id,
                    shares,
                };
                self.reply(origin, Outbound::NewEncryptedShares(reply)).await;
            }
            Inbound::EncryptShares(req) => {
                let shares = self.broker.encrypt_batch(&req.public_key, req.shares).await?;
                let reply = DidEncryptShares {
                    device_id: req.device_id,
                    encrypted_shares: shares,
                    req_ids: req.req_ids,
                };
                self.reply(origin, Outbound::DidEncryptShares(reply)).await;
            }
            Inbound::DecryptRequestedShares(req) => {
                let shares = self.broker.decrypt_batch(req.shares).await?;
                let reply = DidDecryptRequestedShares {
                    shares,
                    time: req.time,
                    other_id: req.other_id,
                    ids: req.ids,
                };
                self.reply(origin, Outbound::DidDecryptRequestedShares(reply)).await;
            }
            Inbound::HashPwFirst(req) => {
                let derived = self
                    .deriver
                    .derive_first(&req.password, req.iterations)
                    .await?;
                let reply = DidHashPassword {
                    name: req.name.clone(),
                    key: derived.key,
                    salt: derived.salt,
                    password_hash: derived.password_hash,
                    hash_salt: derived.hash_salt,
                    time: derived.time,
                };
                self.reply(origin, Outbound::DidHashPwFirst(reply)).await;
            }
            Inbound::OpenBox(req) => {
                let opened = self
                    .deriver
                    .derive_for_open(&req.password, &req.salt, &req.hash_salt, req.iterations)
                    .await?;
                let reply = DidOpenBox {
                    box_id: req.box_id.clone(),
                    key: opened.key,
                    password_hash: opened.password_hash,
                    time: opened.time,
                };
                self.reply(origin, Outbound::DidOpenBox(reply)).await;
            }
        }
        Ok(())
    }

    async fn forward(&self, origin: ConnectionId, message: AppMessage) -> CoreResult<()> {
        self.application.handle(self, origin, message).await
    }

    async fn perform(&self, action: NotificationAction) {
        match action {
            NotificationAction::OpenPopup => {
                let delivered = self.registry.broadcast(&Outbound::OpenPopup).await;
                debug!(delivered, "popup opened");
                self.notifications.lock().confirm_open();
            }
            NotificationAction::ClosePopup => {
                self.registry.broadcast(&Outbound::ClosePopup).await;
            }
        }
    }

    /// Forward a size change once the frame has been quiet for the
    /// configured debounce period. Only the latest size per frame is sent.
    fn debounce_size(self: &Arc<Self>, origin: ConnectionId, size: SizeChanged) {
        let generation = self.size_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending_sizes.insert(size.id.clone(), generation);
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(hub.config.size_debounce()).await;
            if hub
                .pending_sizes
                .remove_if(&size.id, |_, g| *g == generation)
                .is_some()
            {
                hub.registry
                    .broadcast_except(origin, &Outbound::SizeChanged(size))
                    .await;
            }
        });
    }

    async fn persist(&self, state: &Value) -> CoreResult<()> {
        self.store
            .save(state, &self.broker.identity().export())
            .await
            .map_err(|e| {
                warn!("failed to persist state: {e}");
                CoreError::from(e)
            })
    }

    /// Replace the application state, persist it and broadcast it to every
    /// context. Returns the number of contexts reached.
    ///
    /// The broadcast happens even when persisting fails; the failure is
    /// returned afterwards.
    pub async fn publish_state(&self, state: Value) -> CoreResult<usize> {
        *self.state.write() = Some(state.clone());
        let delivered = self.registry.broadcast(&Outbound::NewState(state.clone())).await;
        self.persist(&state).await?;
        Ok(delivered)
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::RecordingChannel;
    use crate::store::MemoryBackend;
    use nokey_proto::{ExportedIdentity, SuppressPopup};
    use serde_json::json;
    use std::sync::OnceLock;

    fn shared_keys() -> ExportedIdentity {
        static KEYS: OnceLock<ExportedIdentity> = OnceLock::new();
        KEYS.get_or_init(|| DeviceIdentity::generate().unwrap().export())
            .clone()
    }

    async fn hub() -> Arc<Hub> {
        let backend = Arc::new(MemoryBackend::new());
        let store = StateStore::new(backend);
        store.save(&json!({ "v": 1 }), &shared_keys()).await.unwrap();
        HubBuilder::new(HubConfig::default())
            .store(store)
            .start()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_restores_state_and_identity() {
        let hub = hub().await;
        assert_eq!(hub.current_state(), Some(json!({ "v": 1 })));
        assert_eq!(
            hub.announcement().signing_key,
            shared_keys().signing_key.exported_public
        );
        assert!(hub.is_durable());
    }

    #[tokio::test]
    async fn test_state_request_replies_to_origin_only() {
        let hub = hub().await;
        let a = Arc::new(RecordingChannel::default());
        let b = Arc::new(RecordingChannel::default());
        let ida = hub.connect("a", a.clone());
        hub.connect("b", b.clone());

        hub.handle(ida, Inbound::StateRequest).await;
        assert_eq!(a.tags(), vec!["onNewState"]);
        assert!(b.tags().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_envelopes_are_counted() {
        let hub = hub().await;
        let id = hub.connect("a", Arc::new(RecordingChannel::default()));
        hub.handle_raw(id, RawEnvelope::new("nope", Value::Null)).await;
        hub.handle_raw(id, RawEnvelope::new("onNotificationCount", json!("x")))
            .await;
        let stats = hub.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.unknown_type, 1);
        assert_eq!(stats.invalid_payload, 1);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.dispatched, 0);
    }

    #[tokio::test]
    async fn test_suppress_broadcasts_close() {
        let hub = hub().await;
        let a = Arc::new(RecordingChannel::default());
        let id = hub.connect("a", a.clone());
        hub.handle(id, Inbound::NotificationCount(1)).await;
        hub.handle(id, Inbound::CloseAndSuppressPopup(SuppressPopup::default()))
            .await;
        hub.handle(id, Inbound::NotificationCount(2)).await;
        assert_eq!(a.tags(), vec!["openPopup", "closePopup"]);
        assert_eq!(hub.notification_phase(), NotificationPhase::Suppressed);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = HubConfig {
            channel_buffer: 0,
            ..HubConfig::default()
        };
        let result = HubBuilder::new(config)
            .store(StateStore::in_memory())
            .start()
            .await;
        assert!(matches!(
            result,
            Err(CoreError::Config(crate::config::ConfigError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn test_store_state_updates_current() {
        let hub = hub().await;
        let id = hub.connect("a", Arc::new(RecordingChannel::default()));
        hub.handle(id, Inbound::StoreState(json!({ "v": 2 }))).await;
        assert_eq!(hub.current_state(), Some(json!({ "v": 2 })));
    }
}
