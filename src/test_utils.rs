//! Mock collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::binary::builder::NodeBuilder;
use crate::binary::jid::Jid;
use crate::binary::node::Node;
use crate::client::{Client, Externals};
use crate::config::SocketConfig;
use crate::error::{DecryptionError, ProtocolViolation, StoreError};
use crate::net::{HttpClient, HttpRequest, HttpResponse, MediaConn, MediaHost};
use crate::traits::{
    AppStateService, ChatDelta, CredentialStore, CredsSnapshot, MediaConnSource, MessageDecryptor,
    MessageRelay, MessageStore, OneTimePreKey, RelayOptions, StanzaTransport,
};
use crate::types::events::Event;
use crate::types::message::{MessageContent, MessageEnvelope, MessageKey};

#[derive(Default)]
pub(crate) struct MockTransport {
    closed: AtomicBool,
    sent: Mutex<Vec<Node>>,
}

impl MockTransport {
    pub(crate) fn sent_nodes(&self) -> Vec<Node> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.closed.store(!open, Ordering::SeqCst);
    }
}

#[async_trait]
impl StanzaTransport for MockTransport {
    async fn send_node(&self, node: Node) -> Result<()> {
        self.sent.lock().unwrap().push(node);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct MockRelay {
    pub(crate) relayed: Mutex<Vec<(Jid, RelayOptions)>>,
    pub(crate) asserted: Mutex<Vec<(Vec<Jid>, bool)>>,
    pub(crate) invalidated: Mutex<Vec<(Jid, Jid)>>,
    pub(crate) fail_relay: AtomicBool,
}

#[async_trait]
impl MessageRelay for MockRelay {
    async fn relay_message(
        &self,
        jid: &Jid,
        _content: &MessageContent,
        options: RelayOptions,
    ) -> Result<()> {
        if self.fail_relay.load(Ordering::SeqCst) {
            anyhow::bail!("injected relay failure");
        }
        self.relayed.lock().unwrap().push((jid.clone(), options));
        Ok(())
    }

    async fn assert_sessions(&self, jids: &[Jid], force: bool) -> Result<()> {
        self.asserted.lock().unwrap().push((jids.to_vec(), force));
        Ok(())
    }

    async fn invalidate_sender_key(&self, group: &Jid, participant: &Jid) {
        self.invalidated
            .lock()
            .unwrap()
            .push((group.clone(), participant.clone()));
    }
}

/// Scripted per-message-id decryption outcomes; unscripted ids decrypt to a
/// plain text payload.
#[derive(Default)]
pub(crate) struct MockDecryptor {
    failures: Mutex<HashMap<String, ()>>,
    contents: Mutex<HashMap<String, MessageContent>>,
}

impl MockDecryptor {
    pub(crate) fn fail_for(&self, id: &str) {
        self.failures.lock().unwrap().insert(id.to_string(), ());
    }

    pub(crate) fn succeed_for(&self, id: &str) {
        self.failures.lock().unwrap().remove(id);
    }

    pub(crate) fn content_for(&self, id: &str, content: MessageContent) {
        self.contents
            .lock()
            .unwrap()
            .insert(id.to_string(), content);
    }
}

#[async_trait]
impl MessageDecryptor for MockDecryptor {
    async fn decrypt(
        &self,
        _node: &Node,
        envelope: &MessageEnvelope,
    ) -> Result<MessageContent, DecryptionError> {
        if self.failures.lock().unwrap().contains_key(&envelope.key.id) {
            return Err(DecryptionError::BadMac);
        }
        if let Some(content) = self.contents.lock().unwrap().get(&envelope.key.id) {
            return Ok(content.clone());
        }
        Ok(MessageContent::Conversation(format!(
            "payload of {}",
            envelope.key.id
        )))
    }
}

pub(crate) struct MockCreds {
    me: Jid,
    push_name: Mutex<String>,
    next_prekey: AtomicU32,
    fail_next: AtomicBool,
    uploads: AtomicUsize,
}

impl Default for MockCreds {
    fn default() -> Self {
        Self {
            me: Jid::user("999000111"),
            push_name: Mutex::new("tester".to_string()),
            next_prekey: AtomicU32::new(100),
            fail_next: AtomicBool::new(false),
            uploads: AtomicUsize::new(0),
        }
    }
}

impl MockCreds {
    pub(crate) fn fail_next_prekey(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MockCreds {
    async fn snapshot(&self) -> CredsSnapshot {
        CredsSnapshot {
            me: self.me.clone(),
            push_name: self.push_name.lock().unwrap().clone(),
            registration_id: 0x0001_0203,
            identity_public: [1u8; 32],
            signed_pre_key_id: 7,
            signed_pre_key_public: [2u8; 32],
            signed_pre_key_signature: vec![3u8; 64],
            device_identity: vec![9, 9, 9],
        }
    }

    async fn take_one_prekey(&self) -> Result<OneTimePreKey, StoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Tx("injected transaction failure".into()));
        }
        let id = self.next_prekey.fetch_add(1, Ordering::SeqCst);
        Ok(OneTimePreKey {
            id,
            public: [4u8; 32],
        })
    }

    async fn upload_pre_keys(&self) -> Result<(), StoreError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockMessageStore {
    messages: Mutex<HashMap<(String, String), MessageContent>>,
}

impl MockMessageStore {
    pub(crate) fn insert(&self, chat: &Jid, id: &str, content: MessageContent) {
        self.messages
            .lock()
            .unwrap()
            .insert((chat.to_string(), id.to_string()), content);
    }
}

#[async_trait]
impl MessageStore for MockMessageStore {
    async fn get_message(&self, key: &MessageKey) -> Option<MessageContent> {
        self.messages
            .lock()
            .unwrap()
            .get(&(key.remote_jid.to_string(), key.id.clone()))
            .cloned()
    }
}

#[derive(Default)]
pub(crate) struct MockAppState {
    pub(crate) resyncs: Mutex<Vec<HashMap<Jid, ChatDelta>>>,
}

#[async_trait]
impl AppStateService for MockAppState {
    async fn resync_main_app_state(&self, recv_chats: HashMap<Jid, ChatDelta>) -> Result<()> {
        self.resyncs.lock().unwrap().push(recv_chats);
        Ok(())
    }
}

pub(crate) struct MockMediaConn;

#[async_trait]
impl MediaConnSource for MockMediaConn {
    async fn media_conn(&self) -> Result<MediaConn> {
        Ok(MediaConn {
            hosts: vec![MediaHost {
                hostname: "mmg.whatsapp.net".to_string(),
            }],
            auth: "AUTH-TOKEN".to_string(),
        })
    }
}

#[derive(Default)]
pub(crate) struct MockHttpClient {
    pub(crate) requests: Mutex<Vec<HttpRequest>>,
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(HttpResponse {
            status_code: 200,
            body: br#"{"url":"https://mmg.whatsapp.net/d/f/abc","direct_path":"/d/f/abc"}"#.to_vec(),
        })
    }
}

pub(crate) struct TestContext {
    pub(crate) transport: Arc<MockTransport>,
    pub(crate) relay: Arc<MockRelay>,
    pub(crate) decryptor: Arc<MockDecryptor>,
    pub(crate) creds: Arc<MockCreds>,
    pub(crate) message_store: Arc<MockMessageStore>,
    pub(crate) app_state: Arc<MockAppState>,
    pub(crate) http: Arc<MockHttpClient>,
}

impl TestContext {
    pub(crate) async fn me(&self) -> Jid {
        self.creds.snapshot().await.me
    }

    pub(crate) fn collect_events(&self, client: &Arc<Client>) -> Arc<Mutex<Vec<Event>>> {
        let store = Arc::new(Mutex::new(Vec::new()));
        let sink = store.clone();
        client
            .event_bus
            .add_handler(Arc::new(move |event: &Event| {
                sink.lock().unwrap().push(event.clone());
            }));
        store
    }
}

pub(crate) async fn test_client_with(config: SocketConfig) -> (Arc<Client>, TestContext) {
    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = TestContext {
        transport: Arc::new(MockTransport::default()),
        relay: Arc::new(MockRelay::default()),
        decryptor: Arc::new(MockDecryptor::default()),
        creds: Arc::new(MockCreds::default()),
        message_store: Arc::new(MockMessageStore::default()),
        app_state: Arc::new(MockAppState::default()),
        http: Arc::new(MockHttpClient::default()),
    };

    let client = Client::new(
        config,
        Externals {
            transport: ctx.transport.clone(),
            relay: ctx.relay.clone(),
            decryptor: ctx.decryptor.clone(),
            creds: ctx.creds.clone(),
            message_store: ctx.message_store.clone(),
            app_state: ctx.app_state.clone(),
            media_conn: Arc::new(MockMediaConn),
            http_client: ctx.http.clone(),
        },
    );
    (client, ctx)
}

pub(crate) async fn test_client() -> (Arc<Client>, TestContext) {
    test_client_with(SocketConfig::default()).await
}

pub(crate) fn message_stanza(id: &str, from: &str, t: i64) -> Node {
    NodeBuilder::new("message")
        .attr("id", id)
        .attr("from", from)
        .attr("t", t.to_string())
        .children([NodeBuilder::new("enc")
            .attr("type", "pkmsg")
            .attr("v", "2")
            .bytes(vec![0xDE, 0xAD, 0xBE, 0xEF])
            .build()])
        .build()
}

pub(crate) fn group_message_stanza(id: &str, group: &str, participant: &str, t: i64) -> Node {
    NodeBuilder::new("message")
        .attr("id", id)
        .attr("from", group)
        .attr("participant", participant)
        .attr("t", t.to_string())
        .children([NodeBuilder::new("enc")
            .attr("type", "skmsg")
            .attr("v", "2")
            .bytes(vec![0xDE, 0xAD])
            .build()])
        .build()
}

pub(crate) fn envelope_for(node: &Node, me: &Jid) -> Result<MessageEnvelope, ProtocolViolation> {
    crate::handlers::message::parse_message_envelope(node, me)
}
