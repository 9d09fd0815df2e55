//! Chat session: storage, relay intake and conversation state.
//!
//! A session owns the conversation components for one local identity and
//! drives them from two directions:
//!
//! - **bootstrap** replays every stored record once at startup
//! - **live processing** folds records arriving through the [`Intake`]
//!
//! Outbound operations build a record with the core components, publish it,
//! and fold it locally so the caller sees the result without waiting for the
//! relay echo.
//!
//! # Example
//!
//! ```ignore
//! let mut session = ChatSession::new(account, transport, store, config);
//! session.connect().await?;
//! session.bootstrap().await?;
//!
//! let mut intake = session.new_intake();
//! session.open_subscriptions(&mut intake).await?;
//! session.run(&mut intake, shutdown).await?;
//! ```

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::intake::Intake;
use crate::store::RecordStore;
use crate::transport::{RelayRecord, Transport};
use crate::watch::{WatchKind, WatchRegistry};
use chat_core::{
    ChatMessage, ConversationList, ConversationSummary, ConversationType, DirectMessageController,
    DirectUpdate, GroupContent, GroupEngine, GroupUpdate, LamportClock, Watcher,
};
use chat_crypto::{verify_record, Account};
use chat_types::{Filter, Kind, PublicKey, Record, RecordId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source recorded for records this session published itself.
pub const LOCAL_SOURCE: &str = "local";

/// What folding one record changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A profile was cached.
    Profile,
    /// Direct-message history changed (or the record was a duplicate).
    Direct(DirectUpdate),
    /// Group state changed (or the record was a duplicate).
    Group(GroupUpdate),
    /// Stored only; no component consumes this kind.
    Stored,
}

/// Result of replaying the store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Records read from the store.
    pub records: usize,
    /// Records that failed to fold and were removed from the store.
    pub rejected: Vec<RecordId>,
}

/// Result of a [`ChatSession::run`] loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Records folded successfully.
    pub processed: usize,
    /// Records rejected and removed from the store.
    pub rejected: Vec<RecordId>,
}

/// Conversation state for one local identity.
pub struct ChatSession<T: Transport, S: RecordStore> {
    account: Arc<dyn Account>,
    me: PublicKey,
    transport: T,
    store: S,
    config: ClientConfig,
    clock: LamportClock,
    conversations: ConversationList,
    direct: DirectMessageController,
    groups: GroupEngine,
    profile_watch: Arc<WatchRegistry>,
    group_watch: Arc<WatchRegistry>,
    applied_profiles: Option<u64>,
    applied_groups: Option<u64>,
}

impl<T: Transport, S: RecordStore> ChatSession<T, S> {
    /// Create a session. Nothing is read or subscribed until
    /// [`bootstrap`](Self::bootstrap) and
    /// [`open_subscriptions`](Self::open_subscriptions).
    pub fn new(account: Arc<dyn Account>, transport: T, store: S, config: ClientConfig) -> Self {
        let me = account.public_key();
        let profile_watch = Arc::new(WatchRegistry::new(WatchKind::Profiles));
        let group_watch = Arc::new(WatchRegistry::new(WatchKind::Groups));
        let groups = GroupEngine::new(
            account.clone(),
            group_watch.clone() as Arc<dyn Watcher>,
            profile_watch.clone() as Arc<dyn Watcher>,
        );

        Self {
            direct: DirectMessageController::new(account.clone()),
            conversations: ConversationList::new(me),
            account,
            me,
            transport,
            store,
            config,
            clock: LamportClock::new(),
            groups,
            profile_watch,
            group_watch,
            applied_profiles: None,
            applied_groups: None,
        }
    }

    // ===========================================
    // Startup
    // ===========================================

    /// Replay every stored record.
    ///
    /// Group records are replayed creations first, then invitations, then
    /// messages, so every message finds its key. Messages are picked after
    /// the keys are loaded, since the local user's own messages cannot be
    /// told apart from invitation copies before that. Direct messages follow, so
    /// invitations the local user sent classify against the loaded groups.
    /// Records that fail are removed from the store.
    pub async fn bootstrap(&mut self) -> Result<BootstrapReport> {
        let records = self.store.all_records().await?;
        self.clock.seed(&records);

        for peer in self.conversations.ingest(&records) {
            self.profile_watch.add(peer);
        }

        let mut rejected = BTreeSet::new();

        let keys = self.groups.partition(&records);
        let ordered = keys
            .creations
            .into_iter()
            .map(|r| (r, GroupStage::Creation))
            .chain(keys.invitations.into_iter().map(|r| (r, GroupStage::Invitation)));
        for (record, stage) in ordered {
            self.replay_group(record, stage, &mut rejected);
        }
        // Own messages classify as messages only once their keys are loaded.
        for record in self.groups.partition(&records).messages {
            self.replay_group(record, GroupStage::Message, &mut rejected);
        }

        let direct_kinds = [Kind::DirectMessage, Kind::GroupMessage];
        for record in records.iter().filter(|r| direct_kinds.contains(&r.kind)) {
            if rejected.contains(&record.id) {
                continue;
            }
            if let Err(e) = self.direct.add_record(record, &self.groups) {
                warn!(id = %record.id, error = %e, "rejecting stored direct message");
                rejected.insert(record.id);
            }
        }

        for id in &rejected {
            self.store.remove_record(id).await?;
        }

        info!(
            records = records.len(),
            rejected = rejected.len(),
            clock = self.clock.now(),
            "bootstrap complete"
        );
        Ok(BootstrapReport {
            records: records.len(),
            rejected: rejected.into_iter().collect(),
        })
    }

    fn replay_group(&mut self, record: &Record, stage: GroupStage, rejected: &mut BTreeSet<RecordId>) {
        let result = match stage {
            GroupStage::Creation => self.groups.handle_creation(record),
            GroupStage::Invitation => self.groups.handle_invitation(record),
            GroupStage::Message => self.groups.handle_message(record),
        };
        match result {
            Ok(update) => self.register_group(&update),
            Err(e) => {
                warn!(id = %record.id, error = %e, "rejecting stored group record");
                rejected.insert(record.id);
            }
        }
    }

    /// Connect the transport to the configured relays.
    ///
    /// No configured relay, or a transport that reaches none, is fatal.
    pub async fn connect(&self) -> Result<()> {
        let relays = &self.config.relays.urls;
        if relays.is_empty() {
            return Err(ClientError::UnexpectedState("no relays configured".into()));
        }
        self.transport.connect(relays).await.map_err(|e| {
            ClientError::UnexpectedState(format!("could not connect to relays: {}", e))
        })?;
        info!(relays = relays.len(), "connected");
        Ok(())
    }

    /// Intake sized from the configuration.
    pub fn new_intake(&self) -> Intake {
        Intake::new(self.config.intake.capacity)
    }

    /// Open the fixed subscriptions plus the watch subscriptions and merge
    /// them into `intake`.
    ///
    /// A subscription that fails to open is fatal.
    pub async fn open_subscriptions(&mut self, intake: &mut Intake) -> Result<()> {
        let me = self.me;
        let fixed = [
            ("dm_sent", Filter::new().authors([me]).kinds([Kind::DirectMessage])),
            ("dm_received", Filter::new().p_tags([me]).kinds([Kind::DirectMessage])),
            ("gm_sent", Filter::new().authors([me]).kinds([Kind::GroupMessage])),
            ("gm_received", Filter::new().p_tags([me]).kinds([Kind::GroupMessage])),
            ("app_data", Filter::new().authors([me]).kinds([Kind::EncryptedAppData])),
        ];
        for (name, filter) in fixed {
            self.open(intake, name, filter).await?;
        }

        self.applied_profiles = None;
        self.applied_groups = None;
        self.refresh_watches(intake).await?;
        Ok(())
    }

    /// Reopen watch subscriptions whose registry grew since they were last
    /// opened. Returns how many were reopened.
    pub async fn refresh_watches(&mut self, intake: &mut Intake) -> Result<usize> {
        if intake.is_sealed() {
            return Ok(0);
        }
        let mut reopened = 0;
        for kind in [WatchKind::Profiles, WatchKind::Groups] {
            let registry = match kind {
                WatchKind::Profiles => self.profile_watch.clone(),
                WatchKind::Groups => self.group_watch.clone(),
            };
            let generation = registry.generation();
            let applied = match kind {
                WatchKind::Profiles => self.applied_profiles,
                WatchKind::Groups => self.applied_groups,
            };
            if applied == Some(generation) {
                continue;
            }
            if let Some(filter) = registry.filter() {
                self.open(intake, registry.subscription_name(), filter).await?;
                reopened += 1;
            }
            match kind {
                WatchKind::Profiles => self.applied_profiles = Some(generation),
                WatchKind::Groups => self.applied_groups = Some(generation),
            }
        }
        Ok(reopened)
    }

    async fn open(&self, intake: &mut Intake, name: &str, filter: Filter) -> Result<()> {
        let subscription = self.transport.subscribe(name, filter).await.map_err(|e| {
            ClientError::UnexpectedState(format!("could not open subscription {}: {}", name, e))
        })?;
        intake.merge(subscription)?;
        debug!(subscription = name, "subscription open");
        Ok(())
    }

    // ===========================================
    // Live processing
    // ===========================================

    /// Fold one record delivered by a relay.
    ///
    /// The record is verified, stored, its lamport stamp observed, and then
    /// routed by kind. A record that fails to fold is removed from the store
    /// again and the error returned; the session stays usable.
    pub async fn process(&mut self, item: RelayRecord) -> Result<Outcome> {
        let RelayRecord { record, relay_url } = item;
        verify_record(&record).map_err(ClientError::InvalidRecord)?;
        self.accept(&record, &relay_url).await
    }

    async fn accept(&mut self, record: &Record, source: &str) -> Result<Outcome> {
        self.store.add_record(record, source).await?;
        if let Some(stamp) = record.lamport() {
            self.clock.observe(stamp);
        }

        match self.route(record) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(id = %record.id, kind = ?record.kind, error = %e, "discarding record");
                self.store.remove_record(&record.id).await?;
                Err(e)
            }
        }
    }

    fn route(&mut self, record: &Record) -> Result<Outcome> {
        match record.kind {
            Kind::Profile => {
                self.conversations.ingest_record(record);
                Ok(Outcome::Profile)
            }
            Kind::DirectMessage => {
                if let Some(peer) = self.conversations.ingest_record(record) {
                    self.profile_watch.add(peer);
                }
                Ok(Outcome::Direct(self.direct.add_record(record, &self.groups)?))
            }
            Kind::GroupMessage => {
                let update = self.groups.add_record(record)?;
                self.register_group(&update);
                if let GroupUpdate::Invited(_) | GroupUpdate::Ignored = update {
                    self.direct.add_record(record, &self.groups)?;
                }
                Ok(Outcome::Group(update))
            }
            Kind::Text | Kind::EncryptedAppData => {
                debug!(id = %record.id, kind = ?record.kind, "stored without handler");
                Ok(Outcome::Stored)
            }
        }
    }

    fn register_group(&mut self, update: &GroupUpdate) {
        if let GroupUpdate::Created(group) | GroupUpdate::Invited(group) = update {
            self.conversations.add_group(*group);
        }
    }

    /// Consume `intake` until `shutdown` fires or the intake ends.
    ///
    /// Per-record failures are logged and counted; a fatal error stops the
    /// loop. Watch subscriptions are widened whenever a registry grows,
    /// before the next record is taken.
    pub async fn run(&mut self, intake: &mut Intake, shutdown: CancellationToken) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut profile_changes = self.profile_watch.changes();
        let mut group_changes = self.group_watch.changes();
        self.refresh_watches(intake).await?;

        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Ok(()) = profile_changes.changed() => {
                    self.refresh_watches(intake).await?;
                    continue;
                }
                Ok(()) = group_changes.changed() => {
                    self.refresh_watches(intake).await?;
                    continue;
                }
                item = intake.recv() => item,
            };
            let Some(item) = item else { break };
            let id = item.record.id;

            match self.process(item).await {
                Ok(_) => summary.processed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(%id, error = %e, "record rejected");
                    summary.rejected.push(id);
                }
            }
        }
        info!(
            processed = summary.processed,
            rejected = summary.rejected.len(),
            "intake loop stopped"
        );
        Ok(summary)
    }

    // ===========================================
    // Outbound
    // ===========================================

    /// Send a text message to `recipient`.
    pub async fn send_direct_message(&mut self, recipient: &PublicKey, text: &str) -> Result<Record> {
        let lamport = self.clock.tick();
        let record = self.direct.prepare_text(recipient, text, lamport)?;
        self.publish_and_fold(&record).await?;
        Ok(record)
    }

    /// Send an image to `recipient`, one record per chunk.
    pub async fn send_image(&mut self, recipient: &PublicKey, image: &[u8]) -> Result<Vec<Record>> {
        let lamport = self.clock.tick();
        let records =
            self.direct
                .prepare_image(recipient, image, lamport, self.config.attachments.chunk_size)?;
        for record in &records {
            self.publish_and_fold(record).await?;
        }
        Ok(records)
    }

    /// Create a group and publish its creation record. Returns the group
    /// address.
    pub async fn create_group(&mut self) -> Result<PublicKey> {
        let creation = self.groups.create_group();
        let address = creation.address();
        self.conversations.add_group(address);
        let record = self.groups.encode_creation(&creation)?;
        self.publish_and_fold(&record).await?;
        Ok(address)
    }

    /// Invite `invitee` to a group the local user created.
    pub async fn invite(&mut self, group: &PublicKey, invitee: &PublicKey) -> Result<Record> {
        let record = self.groups.prepare_invitation(group, invitee)?;
        self.publish_and_fold(&record).await?;
        Ok(record)
    }

    /// Post to a group the local user created or joined.
    pub async fn send_group_message(&mut self, group: &PublicKey, content: GroupContent) -> Result<Record> {
        let lamport = self.clock.tick();
        let record = self.groups.prepare_message(group, content, Some(lamport))?;
        self.publish_and_fold(&record).await?;
        Ok(record)
    }

    async fn publish_and_fold(&mut self, record: &Record) -> Result<()> {
        self.transport.publish(record).await?;
        self.accept(record, LOCAL_SOURCE).await?;
        Ok(())
    }

    // ===========================================
    // Read surface
    // ===========================================

    /// Local identity.
    pub fn me(&self) -> PublicKey {
        self.me
    }

    /// Account used for encryption and signing.
    pub fn account(&self) -> &Arc<dyn Account> {
        &self.account
    }

    /// Current logical time.
    pub fn clock(&self) -> u64 {
        self.clock.now()
    }

    /// Conversation summaries and profiles.
    pub fn conversations(&self) -> &ConversationList {
        &self.conversations
    }

    /// Classify a peer or group address.
    pub fn conversation_type(&self, peer: &PublicKey) -> ConversationType {
        let is_group = self.groups.conversation_list().contains(peer);
        self.conversations.classify(peer, is_group)
    }

    /// Contacts, most recently active first.
    pub fn contacts(&self) -> Vec<ConversationSummary> {
        self.conversations.contacts()
    }

    /// Strangers, most recently active first.
    pub fn strangers(&self) -> Vec<ConversationSummary> {
        self.conversations.strangers()
    }

    /// Ordered history with `peer`.
    pub fn direct_history(&self, peer: &PublicKey) -> Vec<ChatMessage> {
        self.direct.history(peer)
    }

    /// Group engine (creations, invitations, admin keys).
    pub fn groups(&self) -> &GroupEngine {
        &self.groups
    }

    /// Ordered history of `group`.
    pub fn group_history(&self, group: &PublicKey) -> Vec<ChatMessage> {
        self.groups.history(group)
    }

    /// Watched profile authors.
    pub fn profile_watch(&self) -> &WatchRegistry {
        &self.profile_watch
    }

    /// Watched group addresses.
    pub fn group_watch(&self) -> &WatchRegistry {
        &self.group_watch
    }

    /// Configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<T: Transport, S: RecordStore> std::fmt::Debug for ChatSession<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("me", &self.me)
            .field("clock", &self.clock.now())
            .field("direct", &self.direct)
            .field("groups", &self.groups)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupStage {
    Creation,
    Invitation,
    Message,
}
