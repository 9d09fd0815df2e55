//! Direct (1:1) message history.
//!
//! Decrypts pairwise-encrypted records, reassembles chunked images and
//! indexes everything by record id so replays are harmless. Group
//! invitations also show up in the 1:1 history with the inviter, as a
//! system line.

use crate::attachment::{self, ChunkPart};
use crate::group::{classify_group_record, decode_invitation, GroupKeyring, GroupRecordType};
use crate::message::{sort_chronologically, ChatMessage, ChatMessageKind};
use crate::CoreError;
use chat_crypto::Account;
use chat_types::{AttachmentTag, Kind, PublicKey, Record, RecordId, Tags, UnsignedRecord};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of folding one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectUpdate {
    /// A text message was added.
    Text(RecordId),
    /// The last missing chunk arrived and an image was added.
    Image(RecordId),
    /// A group invitation was added as a system message.
    Invitation(RecordId),
    /// An attachment chunk was held until the rest arrive.
    Pending {
        /// Attachment identifier.
        attachment: String,
        /// Distinct chunks held so far.
        received: usize,
        /// Chunks expected.
        total: u32,
    },
    /// Already seen.
    Duplicate,
    /// Not a direct message for the local user.
    Ignored,
}

/// True when `record` belongs to the conversation between `me` and `peer`.
pub fn is_dm_between(record: &Record, me: &PublicKey, peer: &PublicKey) -> bool {
    let addressed = record.tags.first_p();
    if record.author == *me {
        addressed.as_ref() == Some(peer)
    } else if record.author == *peer {
        addressed.as_ref() == Some(me)
    } else {
        false
    }
}

/// Text shown in place of a group invitation.
pub fn invitation_notice(group: &PublicKey) -> String {
    format!("You have been invited to group {}", group)
}

#[derive(Debug, Clone)]
struct DecryptedChunk {
    record: Record,
    tag: AttachmentTag,
    plaintext: String,
}

impl ChunkPart for DecryptedChunk {
    fn attachment(&self) -> Option<&AttachmentTag> {
        Some(&self.tag)
    }

    fn payload(&self) -> &str {
        &self.plaintext
    }
}

/// Chunks of one attachment: author, counterparty, attachment id.
///
/// Attachment ids travel in plaintext tags, so they only identify an
/// attachment within one sender's half of one conversation.
type AttachmentKey = (PublicKey, PublicKey, String);

/// Decrypted 1:1 history of the local user.
pub struct DirectMessageController {
    account: Arc<dyn Account>,
    messages: HashMap<RecordId, ChatMessage>,
    pending: HashMap<AttachmentKey, Vec<DecryptedChunk>>,
    completed: HashSet<AttachmentKey>,
}

impl DirectMessageController {
    /// Empty history for `account`.
    pub fn new(account: Arc<dyn Account>) -> Self {
        Self {
            account,
            messages: HashMap::new(),
            pending: HashMap::new(),
            completed: HashSet::new(),
        }
    }

    /// Fold one record.
    ///
    /// Direct messages are decrypted and indexed; group records are kept
    /// only when `keyring`-aware classification says they are invitations.
    /// Any other kind is an error.
    pub fn add_record(
        &mut self,
        record: &Record,
        keyring: &dyn GroupKeyring,
    ) -> Result<DirectUpdate, CoreError> {
        match record.kind {
            Kind::DirectMessage => self.add_direct(record),
            Kind::GroupMessage => {
                match classify_group_record(self.account.as_ref(), keyring, record) {
                    GroupRecordType::Invitation => self.add_invitation(record),
                    _ => Ok(DirectUpdate::Ignored),
                }
            }
            other => Err(CoreError::UnexpectedKind(other)),
        }
    }

    fn add_direct(&mut self, record: &Record) -> Result<DirectUpdate, CoreError> {
        if self.messages.contains_key(&record.id) {
            return Ok(DirectUpdate::Duplicate);
        }
        let me = self.account.public_key();
        let addressed = record.tags.first_p();
        let counterparty = if record.author == me {
            match addressed {
                Some(p) => p,
                None => return Err(CoreError::schema("direct message has no recipient")),
            }
        } else if addressed == Some(me) {
            record.author
        } else {
            debug!(id = %record.id, "direct message not for us, skipping");
            return Ok(DirectUpdate::Ignored);
        };

        let tag = record.tags.attachment()?;
        let plaintext = self
            .account
            .decrypt(&counterparty, &record.content)
            .map_err(CoreError::decryption)?;

        match tag {
            None => {
                let message = ChatMessage::new(record.clone(), ChatMessageKind::Text, plaintext);
                self.messages.insert(record.id, message);
                Ok(DirectUpdate::Text(record.id))
            }
            Some(tag) => self.add_chunk(
                counterparty,
                DecryptedChunk {
                    record: record.clone(),
                    tag,
                    plaintext,
                },
            ),
        }
    }

    fn add_chunk(
        &mut self,
        counterparty: PublicKey,
        chunk: DecryptedChunk,
    ) -> Result<DirectUpdate, CoreError> {
        let id = chunk.tag.id.clone();
        let author = chunk.record.author;
        let key = (author, counterparty, id.clone());
        if self.completed.contains(&key) {
            return Ok(DirectUpdate::Duplicate);
        }

        let chunks = self.pending.entry(key.clone()).or_default();
        if chunks.iter().any(|c| c.record.id == chunk.record.id) {
            return Ok(DirectUpdate::Duplicate);
        }
        chunks.push(chunk);

        match attachment::reassemble(chunks) {
            Ok(image) => {
                let chunks = self.pending.remove(&key).unwrap_or_default();
                let first = chunks
                    .into_iter()
                    .min_by_key(|c| c.tag.index)
                    .ok_or_else(|| CoreError::IncompleteAttachment {
                        id: id.clone(),
                        missing: vec![0],
                    })?;
                let message_id = first.record.id;
                let message = ChatMessage::new(first.record, ChatMessageKind::Image, image.encoded);
                self.messages.insert(message_id, message);
                self.completed.insert(key);
                Ok(DirectUpdate::Image(message_id))
            }
            Err(CoreError::IncompleteAttachment { .. }) => {
                let total = chunks[0].tag.total;
                let received = chunks
                    .iter()
                    .map(|c| c.tag.index)
                    .collect::<HashSet<_>>()
                    .len();
                Ok(DirectUpdate::Pending {
                    attachment: id,
                    received,
                    total,
                })
            }
            Err(err) => {
                warn!(attachment = %id, %author, error = %err, "dropping undecodable attachment");
                self.pending.remove(&key);
                Err(err)
            }
        }
    }

    fn add_invitation(&mut self, record: &Record) -> Result<DirectUpdate, CoreError> {
        if self.messages.contains_key(&record.id) {
            return Ok(DirectUpdate::Duplicate);
        }
        let invitation = match decode_invitation(self.account.as_ref(), record) {
            Ok(invitation) => invitation,
            Err(e) if record.author == self.account.public_key() => {
                debug!(id = %record.id, error = %e, "own group record opens with no known key, ignoring");
                return Ok(DirectUpdate::Ignored);
            }
            Err(e) => return Err(e),
        };
        let message = ChatMessage::new(
            record.clone(),
            ChatMessageKind::Text,
            invitation_notice(&invitation.group_address),
        );
        self.messages.insert(record.id, message);
        Ok(DirectUpdate::Invitation(record.id))
    }

    /// Ordered history with `peer`.
    pub fn history(&self, peer: &PublicKey) -> Vec<ChatMessage> {
        let me = self.account.public_key();
        let mut messages: Vec<ChatMessage> = self
            .messages
            .values()
            .filter(|m| is_dm_between(&m.record, &me, peer))
            .cloned()
            .collect();
        sort_chronologically(&mut messages);
        messages
    }

    /// Number of materialized messages across all peers.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when nothing has been materialized.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Encrypted text message to `recipient`, stamped with `lamport`.
    pub fn prepare_text(
        &self,
        recipient: &PublicKey,
        text: &str,
        lamport: u64,
    ) -> Result<Record, CoreError> {
        let tags = Tags::new().with_p(recipient).with_lamport(lamport);
        self.seal(recipient, tags, text)
    }

    /// One encrypted record per attachment chunk, all stamped with `lamport`.
    pub fn prepare_image(
        &self,
        recipient: &PublicKey,
        image: &[u8],
        lamport: u64,
        chunk_size: usize,
    ) -> Result<Vec<Record>, CoreError> {
        attachment::split(image, chunk_size)
            .into_iter()
            .map(|chunk| {
                let tags = Tags::new()
                    .with_p(recipient)
                    .with_lamport(lamport)
                    .with_attachment(&chunk.tag);
                self.seal(recipient, tags, &chunk.content)
            })
            .collect()
    }

    fn seal(&self, recipient: &PublicKey, tags: Tags, plaintext: &str) -> Result<Record, CoreError> {
        let content = self
            .account
            .encrypt(recipient, plaintext)
            .map_err(CoreError::Crypto)?;
        let unsigned = UnsignedRecord::new(self.account.public_key(), Kind::DirectMessage, tags, content);
        self.account.sign(unsigned).map_err(CoreError::Crypto)
    }
}

impl std::fmt::Debug for DirectMessageController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectMessageController")
            .field("me", &self.account.public_key())
            .field("messages", &self.messages.len())
            .field("pending_attachments", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::tests::engine;
    use crate::group::GroupEngine;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use chat_crypto::Keypair;

    struct Pair {
        me: Keypair,
        peer: Keypair,
        mine: DirectMessageController,
        theirs: DirectMessageController,
        no_groups: GroupEngine,
    }

    fn pair() -> Pair {
        let me = Keypair::generate();
        let peer = Keypair::generate();
        Pair {
            mine: DirectMessageController::new(Arc::new(me.clone())),
            theirs: DirectMessageController::new(Arc::new(peer.clone())),
            no_groups: engine(&me),
            me,
            peer,
        }
    }

    fn dm(from: &Keypair, to: &PublicKey, text: &str, created_at: u64, lamport: Option<u64>) -> Record {
        let mut tags = Tags::new().with_p(to);
        if let Some(v) = lamport {
            tags = tags.with_lamport(v);
        }
        let content = from.encrypt(to, text).unwrap();
        from.sign(
            UnsignedRecord::new(from.public_key(), Kind::DirectMessage, tags, content)
                .with_created_at(created_at),
        )
        .unwrap()
    }

    fn texts(history: &[ChatMessage]) -> Vec<&str> {
        history.iter().map(|m| m.content.as_str()).collect()
    }

    // ===========================================
    // Text Message Tests
    // ===========================================

    #[test]
    fn both_directions_in_one_history() {
        let mut p = pair();
        let sent = p.mine.prepare_text(&p.peer.public_key(), "hi", 1).unwrap();
        let reply = dm(&p.peer, &p.me.public_key(), "hello", sent.created_at, Some(2));

        p.mine.add_record(&sent, &p.no_groups).unwrap();
        p.mine.add_record(&reply, &p.no_groups).unwrap();

        assert_eq!(texts(&p.mine.history(&p.peer.public_key())), vec!["hi", "hello"]);
    }

    #[test]
    fn peer_decrypts_my_message() {
        let mut p = pair();
        let sent = p.mine.prepare_text(&p.peer.public_key(), "secret", 1).unwrap();
        let peer_groups = engine(&p.peer);

        assert_eq!(
            p.theirs.add_record(&sent, &peer_groups).unwrap(),
            DirectUpdate::Text(sent.id)
        );
        assert_eq!(texts(&p.theirs.history(&p.me.public_key())), vec!["secret"]);
    }

    #[test]
    fn history_orders_by_lamport_then_time() {
        let mut p = pair();
        let me = p.me.public_key();
        let records = [
            dm(&p.peer, &me, "late clock, early wall", 100, Some(5)),
            dm(&p.peer, &me, "early clock, late wall", 200, Some(1)),
            dm(&p.peer, &me, "unstamped", 50, None),
        ];
        for r in &records {
            p.mine.add_record(r, &p.no_groups).unwrap();
        }

        let history = p.mine.history(&p.peer.public_key());
        assert_eq!(
            texts(&history),
            vec!["unstamped", "early clock, late wall", "late clock, early wall"]
        );
    }

    #[test]
    fn readding_is_noop() {
        let mut p = pair();
        let record = dm(&p.peer, &p.me.public_key(), "once", 10, Some(1));

        p.mine.add_record(&record, &p.no_groups).unwrap();
        assert_eq!(
            p.mine.add_record(&record, &p.no_groups).unwrap(),
            DirectUpdate::Duplicate
        );
        assert_eq!(p.mine.history(&p.peer.public_key()).len(), 1);
    }

    #[test]
    fn histories_are_per_peer() {
        let mut p = pair();
        let other = Keypair::generate();
        p.mine
            .add_record(&dm(&p.peer, &p.me.public_key(), "from peer", 1, None), &p.no_groups)
            .unwrap();
        p.mine
            .add_record(&dm(&other, &p.me.public_key(), "from other", 2, None), &p.no_groups)
            .unwrap();

        assert_eq!(texts(&p.mine.history(&p.peer.public_key())), vec!["from peer"]);
        assert_eq!(texts(&p.mine.history(&other.public_key())), vec!["from other"]);
    }

    #[test]
    fn undecryptable_is_error() {
        let mut p = pair();
        let mut record = dm(&p.peer, &p.me.public_key(), "x", 1, None);
        record.content = p.peer.encrypt(&Keypair::generate().public_key(), "x").unwrap();

        assert!(matches!(
            p.mine.add_record(&record, &p.no_groups),
            Err(CoreError::Decryption(_))
        ));
        assert!(p.mine.is_empty());
    }

    #[test]
    fn unrelated_is_ignored() {
        let mut p = pair();
        let stranger = Keypair::generate();
        let record = dm(&p.peer, &stranger.public_key(), "not for you", 1, None);

        assert_eq!(
            p.mine.add_record(&record, &p.no_groups).unwrap(),
            DirectUpdate::Ignored
        );
    }

    #[test]
    fn other_kinds_are_rejected() {
        let mut p = pair();
        let record = p
            .me
            .sign(UnsignedRecord::new(p.me.public_key(), Kind::Text, Tags::new(), "note"))
            .unwrap();

        assert!(matches!(
            p.mine.add_record(&record, &p.no_groups),
            Err(CoreError::UnexpectedKind(Kind::Text))
        ));
    }

    // ===========================================
    // Image Tests
    // ===========================================

    #[test]
    fn image_chunks_in_any_order() {
        let mut p = pair();
        let image: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        let mut records = p
            .theirs
            .prepare_image(&p.me.public_key(), &image, 3, 100)
            .unwrap();
        assert_eq!(records.len(), 7);
        records.reverse();
        records.swap(1, 4);

        let mut outcomes = Vec::new();
        for r in &records {
            outcomes.push(p.mine.add_record(r, &p.no_groups).unwrap());
        }

        assert!(outcomes[..6]
            .iter()
            .all(|o| matches!(o, DirectUpdate::Pending { total: 7, .. })));
        assert!(matches!(outcomes[6], DirectUpdate::Image(_)));

        let history = p.mine.history(&p.peer.public_key());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, ChatMessageKind::Image);
        assert_eq!(STANDARD.decode(&history[0].content).unwrap(), image);
    }

    #[test]
    fn missing_chunk_keeps_image_pending() {
        let mut p = pair();
        let image = vec![9u8; 300];
        let records = p
            .theirs
            .prepare_image(&p.me.public_key(), &image, 1, 100)
            .unwrap();

        for r in records.iter().skip(1) {
            p.mine.add_record(r, &p.no_groups).unwrap();
        }
        assert!(p.mine.history(&p.peer.public_key()).is_empty());

        // Redelivery of a held chunk does not count twice.
        assert_eq!(
            p.mine.add_record(&records[1], &p.no_groups).unwrap(),
            DirectUpdate::Duplicate
        );

        assert!(matches!(
            p.mine.add_record(&records[0], &p.no_groups).unwrap(),
            DirectUpdate::Image(_)
        ));
        assert_eq!(
            p.mine.add_record(&records[2], &p.no_groups).unwrap(),
            DirectUpdate::Duplicate
        );
    }

    fn chunk_record(from: &Keypair, to: &PublicKey, tag: &AttachmentTag, bytes: &[u8]) -> Record {
        let tags = Tags::new().with_p(to).with_attachment(tag);
        let content = from.encrypt(to, &STANDARD.encode(bytes)).unwrap();
        from.sign(UnsignedRecord::new(from.public_key(), Kind::DirectMessage, tags, content))
            .unwrap()
    }

    #[test]
    fn reused_attachment_id_stays_with_its_sender() {
        let mut p = pair();
        let me = p.me.public_key();
        let third = Keypair::generate();
        let image = vec![1u8; 300];
        let records = p.theirs.prepare_image(&me, &image, 1, 100).unwrap();
        let tag = records[1].tags.attachment().unwrap().unwrap();

        p.mine.add_record(&records[0], &p.no_groups).unwrap();

        // Same id and total, delivered before the real chunk 1.
        let copied = chunk_record(&third, &me, &tag, &[0xEE; 100]);
        assert!(matches!(
            p.mine.add_record(&copied, &p.no_groups).unwrap(),
            DirectUpdate::Pending { received: 1, total: 3, .. }
        ));

        // Conflicting total only discards the third party's chunks.
        let conflicting = AttachmentTag {
            total: 5,
            ..tag.clone()
        };
        assert!(matches!(
            p.mine
                .add_record(&chunk_record(&third, &me, &conflicting, &[0xEE; 3]), &p.no_groups),
            Err(CoreError::CorruptAttachment { .. })
        ));

        p.mine.add_record(&records[1], &p.no_groups).unwrap();
        assert!(matches!(
            p.mine.add_record(&records[2], &p.no_groups).unwrap(),
            DirectUpdate::Image(_)
        ));

        let history = p.mine.history(&p.peer.public_key());
        assert_eq!(history.len(), 1);
        assert_eq!(STANDARD.decode(&history[0].content).unwrap(), image);
        assert!(p.mine.history(&third.public_key()).is_empty());
    }

    #[test]
    fn oversized_chunk_count_is_rejected() {
        let mut p = pair();
        let me = p.me.public_key();
        let tags = Tags::from(vec![
            vec!["p".to_string(), me.to_hex()],
            vec![
                "image".to_string(),
                "big".to_string(),
                u32::MAX.to_string(),
                "0".to_string(),
            ],
        ]);
        let content = p.peer.encrypt(&me, "AAAA").unwrap();
        let record = p
            .peer
            .sign(UnsignedRecord::new(p.peer.public_key(), Kind::DirectMessage, tags, content))
            .unwrap();

        assert!(matches!(
            p.mine.add_record(&record, &p.no_groups),
            Err(CoreError::InvalidTags(_))
        ));
        assert!(p.mine.is_empty());
    }

    // ===========================================
    // Invitation Tests
    // ===========================================

    #[test]
    fn invitation_shows_as_system_message() {
        let mut p = pair();
        let mut admin_groups = engine(&p.peer);
        let group = admin_groups.create_group().address();
        let invite = admin_groups
            .prepare_invitation(&group, &p.me.public_key())
            .unwrap();

        assert_eq!(
            p.mine.add_record(&invite, &p.no_groups).unwrap(),
            DirectUpdate::Invitation(invite.id)
        );

        let history = p.mine.history(&p.peer.public_key());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, invitation_notice(&group));
    }

    #[test]
    fn admin_sees_own_invitation_in_history() {
        let p = pair();
        let mut admin = DirectMessageController::new(Arc::new(p.peer.clone()));
        let mut admin_groups = engine(&p.peer);
        let group = admin_groups.create_group().address();
        let invite = admin_groups
            .prepare_invitation(&group, &p.me.public_key())
            .unwrap();

        admin.add_record(&invite, &admin_groups).unwrap();
        assert_eq!(admin.history(&p.me.public_key()).len(), 1);
    }

    #[test]
    fn group_messages_are_not_direct() {
        let mut p = pair();
        let mut my_groups = engine(&p.me);
        let group = my_groups.create_group().address();
        let message = my_groups
            .prepare_message(&group, crate::group::GroupContent::Text("hi".into()), None)
            .unwrap();

        assert_eq!(
            p.mine.add_record(&message, &my_groups).unwrap(),
            DirectUpdate::Ignored
        );
    }

    #[test]
    fn own_unreadable_group_record_is_ignored() {
        let mut p = pair();
        let somewhere = Keypair::generate().public_key();
        let content = p.me.encrypt(&Keypair::generate().public_key(), "opaque").unwrap();
        let record = p
            .me
            .sign(UnsignedRecord::new(
                p.me.public_key(),
                Kind::GroupMessage,
                Tags::new().with_p(&somewhere),
                content,
            ))
            .unwrap();

        assert_eq!(
            p.mine.add_record(&record, &p.no_groups).unwrap(),
            DirectUpdate::Ignored
        );
        assert!(p.mine.is_empty());
    }
}
