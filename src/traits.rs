//! Seams to the external collaborators.
//!
//! The websocket stack, the Signal session store and ratchet, key
//! persistence, the message archive and the app-state resync engine all live
//! behind these traits; the pipeline never reaches them any other way.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::binary::jid::{Jid, MessageId};
use crate::binary::node::Node;
use crate::error::{DecryptionError, StoreError};
use crate::net::MediaConn;
use crate::types::message::{MessageContent, MessageEnvelope, MessageKey};

/// Stanza-level writes to the already-framed, already-encrypted socket.
#[async_trait]
pub trait StanzaTransport: Send + Sync {
    /// Fire-and-forget stanza write.
    async fn send_node(&self, node: Node) -> Result<()>;

    fn is_open(&self) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct RelayOptions {
    /// Reuse this id instead of generating a fresh one (resends).
    pub message_id: Option<MessageId>,
    pub participant: Option<Jid>,
}

/// The encrypted send path.
#[async_trait]
pub trait MessageRelay: Send + Sync {
    async fn relay_message(
        &self,
        jid: &Jid,
        content: &MessageContent,
        options: RelayOptions,
    ) -> Result<()>;

    /// Guarantees live Signal sessions with every listed device.
    async fn assert_sessions(&self, jids: &[Jid], force: bool) -> Result<()>;

    /// Drops the sender-key memory entry for one group participant so the
    /// next group send fans the key out to them again.
    async fn invalidate_sender_key(&self, group: &Jid, participant: &Jid);
}

/// The Signal decryption task for one inbound message stanza.
#[async_trait]
pub trait MessageDecryptor: Send + Sync {
    async fn decrypt(
        &self,
        node: &Node,
        envelope: &MessageEnvelope,
    ) -> Result<MessageContent, DecryptionError>;
}

/// Read-only view of the local credential material.
#[derive(Debug, Clone)]
pub struct CredsSnapshot {
    pub me: Jid,
    pub push_name: String,
    pub registration_id: u32,
    pub identity_public: [u8; 32],
    pub signed_pre_key_id: u32,
    pub signed_pre_key_public: [u8; 32],
    pub signed_pre_key_signature: Vec<u8>,
    /// Encoded device identity bundle, attached to retry key bundles.
    pub device_identity: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OneTimePreKey {
    pub id: u32,
    pub public: [u8; 32],
}

/// The transactional key store.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn snapshot(&self) -> CredsSnapshot;

    /// Consumes exactly one fresh one-time prekey inside a store
    /// transaction. Concurrent callers are serialized by the store.
    async fn take_one_prekey(&self) -> Result<OneTimePreKey, StoreError>;

    /// Replenishes the server-side prekey pool.
    async fn upload_pre_keys(&self) -> Result<(), StoreError>;
}

/// Source material for resending our own messages on a peer retry request.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get_message(&self, key: &MessageKey) -> Option<MessageContent>;
}

/// Chat-state delta observed while history batches were being ingested.
#[derive(Debug, Clone, Default)]
pub struct ChatDelta {
    pub last_message_recv_timestamp: i64,
}

/// The app-state (chat metadata) resync engine.
#[async_trait]
pub trait AppStateService: Send + Sync {
    async fn resync_main_app_state(&self, recv_chats: HashMap<Jid, ChatDelta>) -> Result<()>;
}

/// Hands out upload slots for encrypted media.
#[async_trait]
pub trait MediaConnSource: Send + Sync {
    async fn media_conn(&self) -> Result<MediaConn>;
}
