use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::binary::jid::{Jid, MessageId};
use crate::types::call::CallEvent;
use crate::types::message::{MessageKey, MessageStatus, WebMessage};

/// How a batch of upserted messages should be treated by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpsertKind {
    /// Live message; notify the user.
    Notify,
    /// Flushed from the offline queue; append silently.
    Append,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageUpdate {
    pub key: MessageKey,
    pub status: MessageStatus,
}

/// Per-user receipt progress inside a group chat.
#[derive(Debug, Clone, Serialize)]
pub struct UserReceipt {
    pub user_jid: Jid,
    pub receipt_timestamp: Option<i64>,
    pub read_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserReceiptUpdate {
    pub key: MessageKey,
    pub receipt: UserReceipt,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryMedia {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Outcome of a server-side media re-upload request.
#[derive(Debug, Clone, Serialize)]
pub struct MediaRetryUpdate {
    pub key: MessageKey,
    pub error_code: Option<u32>,
    pub media: Option<RetryMedia>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatUpsert {
    pub id: Jid,
    pub name: Option<String>,
    pub conversation_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupParticipant {
    pub jid: Jid,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMetadata {
    pub id: Jid,
    pub subject: String,
    pub owner: Option<Jid>,
    pub creation: i64,
    pub participants: Vec<GroupParticipant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactUpdate {
    pub jid: Jid,
    pub notify: Option<String>,
}

/// Credential material changed and should be re-persisted by the embedder.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CredsUpdate {
    pub push_name: Option<String>,
    /// Next one-time prekey index after a consumption.
    pub next_pre_key_id: Option<u32>,
}

/// Everything the pipeline reports to the embedding application.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    MessagesUpsert {
        messages: Vec<WebMessage>,
        kind: UpsertKind,
    },
    MessagesUpdate(Vec<MessageUpdate>),
    MediaUpdate(Vec<MediaRetryUpdate>),
    MessageReceiptUpdate(Vec<UserReceiptUpdate>),
    ChatsUpsert(Vec<ChatUpsert>),
    GroupsUpsert(Vec<GroupMetadata>),
    ContactsUpdate(Vec<ContactUpdate>),
    CredsUpdate(CredsUpdate),
    Call(CallEvent),
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle_event(&self, event: &Event) {
        self(event)
    }
}

/// Fan-out bus. Handlers run synchronously on the dispatching task, so they
/// observe events in emission order.
#[derive(Default, Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("event handler list poisoned")
            .push(handler);
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in self
            .handlers
            .read()
            .expect("event handler list poisoned")
            .iter()
        {
            handler.handle_event(event);
        }
    }
}
