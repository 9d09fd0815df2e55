//! Group messaging on top of pairwise encryption.
//!
//! A group has three keys:
//!
//! - **admin key** (`group_key`): its public half is the group address;
//!   only the creator holds the secret.
//! - **cipher key**: shared with every member; members encrypt to its public
//!   half and decrypt with its secret against the author.
//! - **member keys**: ordinary identities, used for invitations.
//!
//! All three record types travel as [`Kind::GroupMessage`]:
//!
//! | type       | tags             | encrypted by / to            |
//! |------------|------------------|------------------------------|
//! | creation   | none             | creator / creator            |
//! | invitation | `p` = invitee    | creator / invitee            |
//! | message    | `p` = group addr | member / cipher public key   |
//!
//! The type is inferred from tags and authorship before decryption; see
//! [`classify_group_record`].

use crate::message::{sort_chronologically, ChatMessage, ChatMessageKind};
use crate::CoreError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chat_crypto::{Account, Keypair};
use chat_types::{Kind, PublicKey, Record, RecordId, Tags, UnsignedRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Receives identities whose records should be fetched from now on.
///
/// Implementations must be idempotent: adding an identity twice is a no-op.
pub trait Watcher: Send + Sync {
    /// Start watching `identity`.
    fn watch(&self, identity: PublicKey);
}

/// Resolves a group address to the group's shared cipher key.
pub trait GroupKeyring {
    /// Cipher key for `group`, if the local user created or joined it.
    fn cipher_key(&self, group: &PublicKey) -> Option<&Keypair>;
}

/// The three group record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupRecordType {
    /// A creator's self-addressed record of a new group's keys
    Creation,
    /// Cipher key delivered to an invitee
    Invitation,
    /// A message posted to the group
    Message,
}

/// Keys of a group the local user created.
#[derive(Debug, Clone)]
pub struct GroupCreation {
    /// Shared cipher key.
    pub cipher_key: Keypair,
    /// Admin key; its public half is the group address.
    pub group_key: Keypair,
}

impl GroupCreation {
    /// Fresh random keys for a new group.
    pub fn generate() -> Self {
        Self {
            cipher_key: Keypair::generate(),
            group_key: Keypair::generate(),
        }
    }

    /// The group address.
    pub fn address(&self) -> PublicKey {
        self.group_key.public_key()
    }
}

/// Decrypt access to a group the local user was invited to.
#[derive(Debug, Clone)]
pub struct GroupInvitation {
    /// Shared cipher key.
    pub cipher_key: Keypair,
    /// Group address.
    pub group_address: PublicKey,
    /// Invitation record timestamp.
    pub created_at: u64,
}

/// Outbound group message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupContent {
    /// Plain text.
    Text(String),
    /// Raw image bytes, inlined as base64.
    Image(Vec<u8>),
}

/// Result of folding one group record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupUpdate {
    /// A group created by the local user was recorded.
    Created(PublicKey),
    /// An invitation was accepted.
    Invited(PublicKey),
    /// A message was appended to a group's history.
    Message {
        /// Group address.
        group: PublicKey,
        /// Record id of the message.
        id: RecordId,
    },
    /// Nothing changed (own invitation copy, duplicate message).
    Ignored,
}

/// Group records sorted into replay order.
#[derive(Debug, Default)]
pub struct GroupRecordBatches<'a> {
    /// Creation records.
    pub creations: Vec<&'a Record>,
    /// Invitation records.
    pub invitations: Vec<&'a Record>,
    /// Message records.
    pub messages: Vec<&'a Record>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum GroupPayload {
    #[serde(rename = "gm_creation", rename_all = "camelCase")]
    Creation { cipher_key: String, group_key: String },
    #[serde(rename = "gm_invitation", rename_all = "camelCase")]
    Invitation {
        cipher_key: String,
        group_addr: PublicKey,
    },
    #[serde(rename = "gm_message")]
    Message { text: String, kind: ChatMessageKind },
}

impl GroupPayload {
    fn parse(plaintext: &str) -> Result<Self, CoreError> {
        serde_json::from_str(plaintext).map_err(CoreError::schema)
    }

    fn encode(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(CoreError::schema)
    }
}

fn parse_secret(hex: &str) -> Result<Keypair, CoreError> {
    Keypair::from_secret_hex(hex).map_err(CoreError::schema)
}

/// Infer the type of a group record without decrypting its payload.
///
/// 1. No tags: creation.
/// 2. First `p` is the local user: invitation received.
/// 3. First `p` differs and the local user is the author: a message if the
///    group cipher key for `p` opens it, otherwise the admin's own copy of
///    an invitation. A self-sent message therefore only classifies as a
///    message once its group's key is loaded.
/// 4. Anything else: message.
pub fn classify_group_record(
    account: &dyn Account,
    keyring: &dyn GroupKeyring,
    record: &Record,
) -> GroupRecordType {
    if record.tags.is_empty() {
        return GroupRecordType::Creation;
    }
    let me = account.public_key();
    let receiver = record.tags.first_p();
    if receiver == Some(me) {
        return GroupRecordType::Invitation;
    }
    if record.author == me {
        let Some(receiver) = receiver else {
            return GroupRecordType::Message;
        };
        let opens = keyring
            .cipher_key(&receiver)
            .is_some_and(|cipher| cipher.decrypt(&me, &record.content).is_ok());
        return if opens {
            GroupRecordType::Message
        } else {
            GroupRecordType::Invitation
        };
    }
    GroupRecordType::Message
}

/// Decrypt and parse an invitation record, sent or received.
pub fn decode_invitation(account: &dyn Account, record: &Record) -> Result<GroupInvitation, CoreError> {
    let me = account.public_key();
    let counterparty = match record.tags.first_p() {
        Some(p) if p != me => p, // I sent it
        _ => record.author,
    };
    let plaintext = account
        .decrypt(&counterparty, &record.content)
        .map_err(CoreError::decryption)?;

    match GroupPayload::parse(&plaintext)? {
        GroupPayload::Invitation {
            cipher_key,
            group_addr,
        } => Ok(GroupInvitation {
            cipher_key: parse_secret(&cipher_key)?,
            group_address: group_addr,
            created_at: record.created_at,
        }),
        other => Err(CoreError::schema(format!(
            "expected gm_invitation, got {}",
            payload_type(&other)
        ))),
    }
}

fn payload_type(payload: &GroupPayload) -> &'static str {
    match payload {
        GroupPayload::Creation { .. } => "gm_creation",
        GroupPayload::Invitation { .. } => "gm_invitation",
        GroupPayload::Message { .. } => "gm_message",
    }
}

/// Group membership and history for one local user.
pub struct GroupEngine {
    account: Arc<dyn Account>,
    group_watcher: Arc<dyn Watcher>,
    profile_watcher: Arc<dyn Watcher>,
    created: BTreeMap<PublicKey, GroupCreation>,
    invitations: BTreeMap<PublicKey, GroupInvitation>,
    messages: HashMap<PublicKey, Vec<ChatMessage>>,
    seen: HashSet<RecordId>,
}

impl GroupKeyring for GroupEngine {
    fn cipher_key(&self, group: &PublicKey) -> Option<&Keypair> {
        self.created
            .get(group)
            .map(|c| &c.cipher_key)
            .or_else(|| self.invitations.get(group).map(|i| &i.cipher_key))
    }
}

impl GroupEngine {
    /// New engine for `account`. Group addresses are handed to
    /// `group_watcher` (to fetch messages) and `profile_watcher` (to fetch
    /// the group's profile) as they become known.
    pub fn new(
        account: Arc<dyn Account>,
        group_watcher: Arc<dyn Watcher>,
        profile_watcher: Arc<dyn Watcher>,
    ) -> Self {
        Self {
            account,
            group_watcher,
            profile_watcher,
            created: BTreeMap::new(),
            invitations: BTreeMap::new(),
            messages: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    /// Infer a record's type against this engine's keys.
    pub fn classify(&self, record: &Record) -> GroupRecordType {
        classify_group_record(self.account.as_ref(), self, record)
    }

    /// Split group records into creations, invitations and messages, the
    /// order in which they must be replayed.
    ///
    /// Self-sent messages land among the invitations until their group's key
    /// is known; partition again after folding creations and invitations.
    pub fn partition<'a>(&self, records: impl IntoIterator<Item = &'a Record>) -> GroupRecordBatches<'a> {
        let mut batches = GroupRecordBatches::default();
        for record in records.into_iter().filter(|r| r.kind == Kind::GroupMessage) {
            match self.classify(record) {
                GroupRecordType::Creation => batches.creations.push(record),
                GroupRecordType::Invitation => batches.invitations.push(record),
                GroupRecordType::Message => batches.messages.push(record),
            }
        }
        batches
    }

    /// Classify and fold one group record.
    pub fn add_record(&mut self, record: &Record) -> Result<GroupUpdate, CoreError> {
        if record.kind != Kind::GroupMessage {
            return Err(CoreError::UnexpectedKind(record.kind));
        }
        match self.classify(record) {
            GroupRecordType::Creation => self.handle_creation(record),
            GroupRecordType::Invitation => self.handle_invitation(record),
            GroupRecordType::Message => self.handle_message(record),
        }
    }

    /// Recover a group from the creator's self-addressed creation record.
    pub fn handle_creation(&mut self, record: &Record) -> Result<GroupUpdate, CoreError> {
        let plaintext = self
            .account
            .decrypt(&record.author, &record.content)
            .map_err(CoreError::decryption)?;

        let creation = match GroupPayload::parse(&plaintext)? {
            GroupPayload::Creation {
                cipher_key,
                group_key,
            } => GroupCreation {
                cipher_key: parse_secret(&cipher_key)?,
                group_key: parse_secret(&group_key)?,
            },
            other => {
                return Err(CoreError::schema(format!(
                    "expected gm_creation, got {}",
                    payload_type(&other)
                )))
            }
        };

        let address = creation.address();
        self.created.entry(address).or_insert(creation);
        self.watch(address);
        debug!(group = %address, "group creation recorded");
        Ok(GroupUpdate::Created(address))
    }

    /// Accept an invitation addressed to the local user.
    ///
    /// The admin's own copies of invitations it sent are ignored.
    pub fn handle_invitation(&mut self, record: &Record) -> Result<GroupUpdate, CoreError> {
        if record.author == self.account.public_key() {
            return Ok(GroupUpdate::Ignored);
        }
        let invitation = decode_invitation(self.account.as_ref(), record)?;
        let address = invitation.group_address;

        let newer = self
            .invitations
            .get(&address)
            .map_or(true, |existing| invitation.created_at > existing.created_at);
        if newer {
            self.invitations.insert(address, invitation);
        }
        self.watch(address);
        info!(group = %address, from = %record.author, "joined group");
        Ok(GroupUpdate::Invited(address))
    }

    /// Decrypt a group message and append it to the group's history.
    pub fn handle_message(&mut self, record: &Record) -> Result<GroupUpdate, CoreError> {
        let group = record
            .tags
            .first_p()
            .ok_or_else(|| CoreError::schema("group message has no group address"))?;
        if self.seen.contains(&record.id) {
            return Ok(GroupUpdate::Ignored);
        }
        let cipher = self
            .cipher_key(&group)
            .ok_or(CoreError::UnknownGroup(group))?;
        let plaintext = cipher
            .decrypt(&record.author, &record.content)
            .map_err(CoreError::decryption)?;

        let (text, kind) = match GroupPayload::parse(&plaintext)? {
            GroupPayload::Message { text, kind } => (text, kind),
            other => {
                return Err(CoreError::schema(format!(
                    "expected gm_message, got {}",
                    payload_type(&other)
                )))
            }
        };

        self.seen.insert(record.id);
        self.messages
            .entry(group)
            .or_default()
            .push(ChatMessage::new(record.clone(), kind, text));
        Ok(GroupUpdate::Message {
            group,
            id: record.id,
        })
    }

    fn watch(&self, address: PublicKey) {
        self.group_watcher.watch(address);
        self.profile_watcher.watch(address);
    }

    /// Generate keys for a new group and register it locally.
    ///
    /// Publish [`GroupEngine::encode_creation`] of the result so other
    /// devices of the creator can recover the group.
    pub fn create_group(&mut self) -> GroupCreation {
        let creation = GroupCreation::generate();
        let address = creation.address();
        self.created.insert(address, creation.clone());
        self.watch(address);
        info!(group = %address, "group created");
        creation
    }

    /// Self-addressed, tagless record carrying a group's secret keys.
    pub fn encode_creation(&self, creation: &GroupCreation) -> Result<Record, CoreError> {
        let payload = GroupPayload::Creation {
            cipher_key: creation.cipher_key.secret_hex().to_string(),
            group_key: creation.group_key.secret_hex().to_string(),
        };
        let me = self.account.public_key();
        self.seal(&me, Tags::new(), &payload)
    }

    /// Invitation carrying the cipher key to `invitee`.
    ///
    /// Only the creator of `group` may invite.
    pub fn prepare_invitation(&self, group: &PublicKey, invitee: &PublicKey) -> Result<Record, CoreError> {
        let creation = self.created.get(group).ok_or(CoreError::NotAdmin(*group))?;
        let payload = GroupPayload::Invitation {
            cipher_key: creation.cipher_key.secret_hex().to_string(),
            group_addr: creation.address(),
        };
        self.seal(invitee, Tags::new().with_p(invitee), &payload)
    }

    /// Message record for `group`, encrypted to the group cipher key.
    ///
    /// Images are inlined as base64 in a single record.
    pub fn prepare_message(
        &self,
        group: &PublicKey,
        content: GroupContent,
        lamport: Option<u64>,
    ) -> Result<Record, CoreError> {
        let cipher = self.cipher_key(group).ok_or(CoreError::UnknownGroup(*group))?;
        let payload = match content {
            GroupContent::Text(text) => GroupPayload::Message {
                text,
                kind: ChatMessageKind::Text,
            },
            GroupContent::Image(bytes) => GroupPayload::Message {
                text: STANDARD.encode(bytes),
                kind: ChatMessageKind::Image,
            },
        };
        let mut tags = Tags::new().with_p(group);
        if let Some(stamp) = lamport {
            tags = tags.with_lamport(stamp);
        }
        self.seal(&cipher.public_key(), tags, &payload)
    }

    fn seal(&self, to: &PublicKey, tags: Tags, payload: &GroupPayload) -> Result<Record, CoreError> {
        let content = self
            .account
            .encrypt(to, &payload.encode()?)
            .map_err(CoreError::Crypto)?;
        let unsigned = UnsignedRecord::new(self.account.public_key(), Kind::GroupMessage, tags, content);
        self.account.sign(unsigned).map_err(CoreError::Crypto)
    }

    /// Admin key of a group the local user created.
    pub fn admin_key(&self, group: &PublicKey) -> Option<&Keypair> {
        self.created.get(group).map(|c| &c.group_key)
    }

    /// Creation entry for `group`.
    pub fn creation(&self, group: &PublicKey) -> Option<&GroupCreation> {
        self.created.get(group)
    }

    /// Invitation entry for `group`.
    pub fn invitation(&self, group: &PublicKey) -> Option<&GroupInvitation> {
        self.invitations.get(group)
    }

    /// Addresses of every group created or joined.
    pub fn conversation_list(&self) -> Vec<PublicKey> {
        let mut addresses: Vec<PublicKey> = self
            .created
            .keys()
            .chain(self.invitations.keys())
            .copied()
            .collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }

    /// Ordered history of one group.
    pub fn history(&self, group: &PublicKey) -> Vec<ChatMessage> {
        let mut messages = self.messages.get(group).cloned().unwrap_or_default();
        sort_chronologically(&mut messages);
        messages
    }
}

impl std::fmt::Debug for GroupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupEngine")
            .field("me", &self.account.public_key())
            .field("created", &self.created.len())
            .field("invitations", &self.invitations.len())
            .field("messages", &self.seen.len())
            .finish()
    }
}

/// A watcher that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWatcher;

impl Watcher for NoopWatcher {
    fn watch(&self, _identity: PublicKey) {}
}
