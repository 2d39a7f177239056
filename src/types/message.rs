use serde::Serialize;

use crate::binary::jid::{Jid, MessageId};

/// Identifies one message within one conversation.
///
/// `participant` is present iff `remote_jid` is a group; it names the acting
/// device inside the group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct MessageKey {
    pub remote_jid: Jid,
    pub id: MessageId,
    pub from_me: bool,
    pub participant: Option<Jid>,
}

/// Delivery state of a message. Only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MessageStatus {
    Pending,
    ServerAck,
    DeliveryAck,
    Read,
    Played,
}

/// System-event placeholders rendered in place of regular content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StubType {
    /// Undecryptable payload; the retry workflow is running for it.
    Ciphertext,
    GroupCreate,
    GroupChangeSubject,
    GroupChangeAnnounce,
    GroupChangeRestrict,
    GroupParticipantAdd,
    GroupParticipantRemove,
    GroupParticipantPromote,
    GroupParticipantDemote,
    GroupParticipantLeave,
    CallMissedVoice,
    CallMissedVideo,
}

/// Quoting context attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextInfo {
    pub stanza_id: MessageId,
    pub participant: Jid,
    pub quoted_message: Box<MessageContent>,
    /// Set when the quoted stanza came from a group chat.
    pub remote_jid: Option<Jid>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MediaContent {
    pub url: String,
    pub direct_path: Option<String>,
    pub media_key: Vec<u8>,
    pub mimetype: String,
    pub file_enc_sha256: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
    pub caption: Option<String>,
    pub gif_playback: bool,
    pub jpeg_thumbnail: Option<Vec<u8>>,
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationContent {
    pub degrees_latitude: f64,
    pub degrees_longitude: f64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactContent {
    pub display_name: String,
    pub vcard: String,
}

/// Kind of bulk history payload announced by a sync notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HistorySyncKind {
    InitialBootstrap,
    Recent,
    Full,
    PushName,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySyncNotice {
    pub kind: HistorySyncKind,
    pub chunk_order: u32,
    pub progress: Option<u32>,
}

/// Peer-to-peer control payloads carried inside the encrypted channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProtocolContent {
    /// Disappearing-message setting change; `0` turns the timer off.
    EphemeralSetting { expiration: u32 },
    HistorySyncNotification(HistorySyncNotice),
}

/// The decrypted wire payload.
///
/// One arm per protocol message type; senders set exactly one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MessageContent {
    Conversation(String),
    ExtendedText {
        text: String,
        context_info: Option<ContextInfo>,
    },
    Image(MediaContent),
    Video(MediaContent),
    Audio(MediaContent),
    Document(MediaContent),
    Sticker(MediaContent),
    Location(LocationContent),
    Contact(ContactContent),
    Protocol(ProtocolContent),
}

impl MessageContent {
    pub fn media(&self) -> Option<&MediaContent> {
        match self {
            MessageContent::Image(m)
            | MessageContent::Video(m)
            | MessageContent::Audio(m)
            | MessageContent::Document(m)
            | MessageContent::Sticker(m) => Some(m),
            _ => None,
        }
    }

    fn media_mut(&mut self) -> Option<&mut MediaContent> {
        match self {
            MessageContent::Image(m)
            | MessageContent::Video(m)
            | MessageContent::Audio(m)
            | MessageContent::Document(m)
            | MessageContent::Sticker(m) => Some(m),
            _ => None,
        }
    }
}

/// A message as held by the client and handed to event subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct WebMessage {
    pub key: MessageKey,
    pub message_timestamp: i64,
    pub push_name: Option<String>,
    pub status: MessageStatus,
    pub message: Option<MessageContent>,
    pub stub_type: Option<StubType>,
    pub stub_parameters: Vec<String>,
}

impl WebMessage {
    pub fn new(key: MessageKey, timestamp: i64) -> Self {
        Self {
            key,
            message_timestamp: timestamp,
            push_name: None,
            status: MessageStatus::Pending,
            message: None,
            stub_type: None,
            stub_parameters: Vec::new(),
        }
    }

    /// Advances the status; moving backwards is a no-op.
    pub fn advance_status(&mut self, status: MessageStatus) {
        if status > self.status {
            self.status = status;
        }
    }

    pub fn is_ciphertext_stub(&self) -> bool {
        self.stub_type == Some(StubType::Ciphertext)
    }
}

const MAX_INLINE_THUMBNAIL: usize = 64 * 1024;

/// Normalizes a message before it is handed to subscribers: key JIDs are
/// reduced to account identities and oversized inline thumbnails dropped.
pub fn clean_message(msg: &mut WebMessage, me: &Jid) {
    msg.key.remote_jid = msg.key.remote_jid.to_non_ad();
    if let Some(participant) = msg.key.participant.take() {
        let normalized = if participant.is_same_user_as(me) {
            me.to_non_ad()
        } else {
            participant.to_non_ad()
        };
        msg.key.participant = Some(normalized);
    }
    if let Some(media) = msg.message.as_mut().and_then(|m| m.media_mut())
        && media
            .jpeg_thumbnail
            .as_ref()
            .is_some_and(|t| t.len() > MAX_INLINE_THUMBNAIL)
    {
        media.jpeg_thumbnail = None;
    }
}

/// Envelope metadata parsed from an inbound `message` stanza before the
/// ciphertext is touched.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub key: MessageKey,
    /// The actual sending device, also for 1:1 chats where the key carries
    /// no participant.
    pub author: Jid,
    pub category: Option<String>,
    pub push_name: Option<String>,
    pub timestamp: i64,
    /// Stanza was flushed from the server's offline queue.
    pub offline: bool,
}
