//! Conversation classification.
//!
//! Folds profile and direct-message records into one summary per peer and
//! answers "who is a stranger, who is a contact". A peer becomes a contact
//! once messages have flowed in both directions.

use chat_types::{Kind, PublicKey, Record};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// How a peer relates to the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationType {
    /// Messages in one direction only
    Stranger,
    /// Messages in both directions
    Contact,
    /// A group conversation
    Group,
}

/// Latest known state of a conversation with one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    /// Peer identity (or group address).
    pub peer: PublicKey,
    /// Latest profile record published by the peer.
    pub profile: Option<Record>,
    /// Newest direct message the local user sent to the peer.
    pub newest_sent_by_me: Option<Record>,
    /// Newest direct message the local user received from the peer.
    pub newest_received_by_me: Option<Record>,
}

impl ConversationSummary {
    fn new(peer: PublicKey, profile: Option<Record>) -> Self {
        Self {
            peer,
            profile,
            newest_sent_by_me: None,
            newest_received_by_me: None,
        }
    }

    /// Contact when both directions are populated, Stranger otherwise.
    pub fn conversation_type(&self) -> ConversationType {
        if self.newest_sent_by_me.is_some() && self.newest_received_by_me.is_some() {
            ConversationType::Contact
        } else {
            ConversationType::Stranger
        }
    }

    /// Sum of the newest sent and received timestamps; higher sorts first.
    ///
    /// Widened to `u128` because both timestamps are chosen by the author.
    pub fn sort_score(&self) -> u128 {
        let sent = self.newest_sent_by_me.as_ref().map_or(0, |r| r.created_at);
        let received = self.newest_received_by_me.as_ref().map_or(0, |r| r.created_at);
        u128::from(sent) + u128::from(received)
    }
}

fn replace_if_newer(slot: &mut Option<Record>, record: &Record) {
    match slot {
        Some(existing) if existing.created_at >= record.created_at => {}
        _ => *slot = Some(record.clone()),
    }
}

/// Per-peer conversation summaries for one local user.
#[derive(Debug, Clone)]
pub struct ConversationList {
    me: PublicKey,
    summaries: BTreeMap<PublicKey, ConversationSummary>,
    group_summaries: BTreeMap<PublicKey, ConversationSummary>,
    profiles: HashMap<PublicKey, Record>,
}

impl ConversationList {
    /// Empty list for the given local identity.
    pub fn new(me: PublicKey) -> Self {
        Self {
            me,
            summaries: BTreeMap::new(),
            group_summaries: BTreeMap::new(),
            profiles: HashMap::new(),
        }
    }

    /// Fold a batch of records. Returns peers seen for the first time.
    pub fn ingest<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) -> Vec<PublicKey> {
        records
            .into_iter()
            .filter_map(|r| self.ingest_record(r))
            .collect()
    }

    /// Fold one record. Returns the peer if this created its summary.
    ///
    /// Kinds other than Profile and DirectMessage are ignored, as are direct
    /// messages the local user neither sent nor received.
    pub fn ingest_record(&mut self, record: &Record) -> Option<PublicKey> {
        match record.kind {
            Kind::Profile => {
                self.apply_profile(record);
                None
            }
            Kind::DirectMessage => self.apply_direct_message(record),
            _ => None,
        }
    }

    fn apply_profile(&mut self, record: &Record) {
        let author = record.author;
        match self.profiles.get(&author) {
            Some(cached) if cached.created_at >= record.created_at => {}
            _ => {
                self.profiles.insert(author, record.clone());
            }
        }
        if let Some(summary) = self.summaries.get_mut(&author) {
            replace_if_newer(&mut summary.profile, record);
        }
        if let Some(summary) = self.group_summaries.get_mut(&author) {
            replace_if_newer(&mut summary.profile, record);
        }
    }

    fn apply_direct_message(&mut self, record: &Record) -> Option<PublicKey> {
        let addressed = record.tags.first_p();
        let peer = if record.author == self.me {
            addressed?
        } else if addressed == Some(self.me) {
            record.author
        } else {
            debug!(id = %record.id, "direct message not addressed to or from us, skipping");
            return None;
        };

        let is_new = !self.summaries.contains_key(&peer);
        let profile = self.profiles.get(&peer).cloned();
        let summary = self
            .summaries
            .entry(peer)
            .or_insert_with(|| ConversationSummary::new(peer, profile));

        if peer == self.me {
            // Talking to myself: both directions move together.
            let newer = summary
                .newest_sent_by_me
                .as_ref()
                .map_or(true, |r| record.created_at > r.created_at);
            if newer {
                summary.newest_sent_by_me = Some(record.clone());
                summary.newest_received_by_me = Some(record.clone());
            }
        } else if record.author == self.me {
            replace_if_newer(&mut summary.newest_sent_by_me, record);
        } else {
            replace_if_newer(&mut summary.newest_received_by_me, record);
        }

        is_new.then_some(peer)
    }

    /// Register a group conversation (created or joined).
    pub fn add_group(&mut self, address: PublicKey) {
        let profile = self.profiles.get(&address).cloned();
        self.group_summaries
            .entry(address)
            .or_insert_with(|| ConversationSummary::new(address, profile));
    }

    /// Classify a peer. Unknown peers are strangers.
    pub fn classify(&self, peer: &PublicKey, is_group: bool) -> ConversationType {
        if is_group {
            return ConversationType::Group;
        }
        self.summaries
            .get(peer)
            .map_or(ConversationType::Stranger, ConversationSummary::conversation_type)
    }

    /// Summary for one peer.
    pub fn summary(&self, peer: &PublicKey) -> Option<&ConversationSummary> {
        self.summaries.get(peer)
    }

    /// Latest cached profile of any identity.
    pub fn profile(&self, identity: &PublicKey) -> Option<&Record> {
        self.profiles.get(identity)
    }

    /// Snapshot of strangers, most recently active first.
    pub fn strangers(&self) -> Vec<ConversationSummary> {
        self.snapshot(ConversationType::Stranger)
    }

    /// Snapshot of contacts, most recently active first.
    pub fn contacts(&self) -> Vec<ConversationSummary> {
        self.snapshot(ConversationType::Contact)
    }

    /// Snapshot of group conversations, most recently active first.
    pub fn groups(&self) -> Vec<ConversationSummary> {
        sorted(self.group_summaries.values().cloned().collect())
    }

    fn snapshot(&self, kind: ConversationType) -> Vec<ConversationSummary> {
        sorted(
            self.summaries
                .values()
                .filter(|s| s.conversation_type() == kind)
                .cloned()
                .collect(),
        )
    }
}

fn sorted(mut summaries: Vec<ConversationSummary>) -> Vec<ConversationSummary> {
    summaries.sort_by(|a, b| b.sort_score().cmp(&a.sort_score()));
    summaries
}
