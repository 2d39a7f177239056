use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::binary::jid::{Jid, MessageId};
use crate::binary::node::Node;
use crate::config::{RetryCounterMap, SocketConfig};
use crate::sync::KeyedMutex;
use crate::traits::{
    AppStateService, ChatDelta, CredentialStore, MediaConnSource, MessageDecryptor, MessageRelay,
    MessageStore, StanzaTransport,
};
use crate::types::call::CallEvent;
use crate::types::events::EventBus;

/// The external collaborators one socket instance is wired to.
#[derive(Clone)]
pub struct Externals {
    pub transport: Arc<dyn StanzaTransport>,
    pub relay: Arc<dyn MessageRelay>,
    pub decryptor: Arc<dyn MessageDecryptor>,
    pub creds: Arc<dyn CredentialStore>,
    pub message_store: Arc<dyn MessageStore>,
    pub app_state: Arc<dyn AppStateService>,
    pub media_conn: Arc<dyn MediaConnSource>,
    pub http_client: Arc<dyn crate::net::HttpClient>,
}

/// One socket instance.
///
/// All mutable pipeline state lives here, never in module-level statics, so
/// multiple sockets can coexist in one process.
pub struct Client {
    pub(crate) config: SocketConfig,
    pub(crate) transport: Arc<dyn StanzaTransport>,
    pub(crate) relay: Arc<dyn MessageRelay>,
    pub(crate) decryptor: Arc<dyn MessageDecryptor>,
    pub(crate) creds: Arc<dyn CredentialStore>,
    pub(crate) message_store: Arc<dyn MessageStore>,
    pub(crate) app_state: Arc<dyn AppStateService>,
    pub(crate) media_conn: Arc<dyn MediaConnSource>,
    pub(crate) http_client: Arc<dyn crate::net::HttpClient>,

    pub event_bus: EventBus,

    /// Per-chat ordering locks. The post-upsert stage uses the same mutex
    /// under a `"p-"`-prefixed key, a disjoint key space.
    pub(crate) chat_locks: KeyedMutex,
    /// Serializes every retry submission globally so the key store never
    /// sees concurrent prekey-consuming transactions.
    pub(crate) retry_mutex: Mutex<()>,
    pub(crate) retry_counters: RetryCounterMap,

    pub(crate) call_offers: Mutex<HashMap<String, CallEvent>>,

    pub(crate) history_cache: Mutex<HashSet<String>>,
    pub(crate) recv_chats: Mutex<HashMap<Jid, ChatDelta>>,
    pub(crate) history_timer: Mutex<Option<JoinHandle<()>>>,

    pub(crate) send_active_receipts: AtomicBool,
}

impl Client {
    pub fn new(config: SocketConfig, externals: Externals) -> Arc<Self> {
        let retry_counters = config
            .retry_counters
            .clone()
            .unwrap_or_else(|| Arc::new(Mutex::new(HashMap::new())));

        Arc::new(Self {
            config,
            transport: externals.transport,
            relay: externals.relay,
            decryptor: externals.decryptor,
            creds: externals.creds,
            message_store: externals.message_store,
            app_state: externals.app_state,
            media_conn: externals.media_conn,
            http_client: externals.http_client,
            event_bus: EventBus::new(),
            chat_locks: KeyedMutex::new(),
            retry_mutex: Mutex::new(()),
            retry_counters,
            call_offers: Mutex::new(HashMap::new()),
            history_cache: Mutex::new(HashSet::new()),
            recv_chats: Mutex::new(HashMap::new()),
            history_timer: Mutex::new(None),
            send_active_receipts: AtomicBool::new(false),
        })
    }

    /// Inbound entry point: one decoded stanza from the transport.
    ///
    /// Per-chat ordering is enforced internally, so the embedder may spawn a
    /// task per stanza as long as stanzas are handed over in arrival order.
    pub async fn handle_stanza(self: &Arc<Self>, node: Node) {
        match node.tag.as_str() {
            "message" => self.handle_message(node).await,
            "receipt" => self.handle_receipt(node).await,
            "notification" => self.handle_notification(node).await,
            "call" => self.handle_call(node).await,
            other => {
                warn!(target: "Socket/Recv", "Dropping stanza with unhandled tag '{other}'");
                self.send_stanza_ack(&node, None).await;
            }
        }
    }

    /// Fire-and-forget write. A closed transport drops the stanza with a
    /// debug log; write errors never propagate into the pipeline.
    pub(crate) async fn send_node(&self, node: Node) {
        if !self.transport.is_open() {
            debug!(target: "Socket/Send", "Transport closed, dropping <{}> stanza", node.tag);
            return;
        }
        if let Err(e) = self.transport.send_node(node).await {
            debug!(target: "Socket/Send", "Stanza write dropped: {e:?}");
        }
    }

    /// Whether plain delivered-receipts are sent for incoming messages.
    /// Off until the embedder marks the client active (presence available).
    pub fn set_send_active_receipts(&self, active: bool) {
        self.send_active_receipts.store(active, Ordering::Relaxed);
    }

    pub(crate) fn sends_active_receipts(&self) -> bool {
        self.send_active_receipts.load(Ordering::Relaxed)
    }

    /// Generates an outbound message id in the client id space.
    pub fn generate_message_id(&self) -> MessageId {
        let mut bytes = [0u8; 9];
        rand::rng().fill(&mut bytes);
        let mut id = String::with_capacity(4 + bytes.len() * 2);
        id.push_str("3EB0");
        for b in bytes {
            id.push_str(&format!("{b:02X}"));
        }
        id
    }

    /// Routes a failure from a spawned task to the configured sink. Never
    /// panics, never aborts the pipeline.
    pub(crate) fn report_unexpected(&self, err: &anyhow::Error, context: &str) {
        match &self.config.on_unexpected_error {
            Some(hook) => hook(err, context),
            None => log::error!(target: "Socket", "Unexpected error in {context}: {err:?}"),
        }
    }
}
