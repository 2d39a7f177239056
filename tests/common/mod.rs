//! Mock collaborators driving the pipeline through its public surface.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use wamux::binary::builder::NodeBuilder;
use wamux::binary::jid::Jid;
use wamux::binary::node::Node;
use wamux::config::SocketConfig;
use wamux::error::{DecryptionError, StoreError};
use wamux::net::{HttpClient, HttpRequest, HttpResponse, MediaConn, MediaHost};
use wamux::traits::{
    AppStateService, ChatDelta, CredentialStore, CredsSnapshot, MediaConnSource, MessageDecryptor,
    MessageRelay, MessageStore, OneTimePreKey, RelayOptions, StanzaTransport,
};
use wamux::types::events::Event;
use wamux::types::message::{MessageContent, MessageEnvelope, MessageKey};
use wamux::{Client, Externals};

#[derive(Default)]
pub struct MockTransport {
    closed: AtomicBool,
    sent: Mutex<Vec<Node>>,
}

impl MockTransport {
    pub fn sent_nodes(&self) -> Vec<Node> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_with_tag(&self, tag: &str) -> Vec<Node> {
        self.sent_nodes()
            .into_iter()
            .filter(|n| n.tag == tag)
            .collect()
    }

    pub fn set_open(&self, open: bool) {
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
pub struct MockRelay {
    pub relayed: Mutex<Vec<(Jid, RelayOptions)>>,
    pub asserted: Mutex<Vec<(Vec<Jid>, bool)>>,
    pub invalidated: Mutex<Vec<(Jid, Jid)>>,
}

#[async_trait]
impl MessageRelay for MockRelay {
    async fn relay_message(
        &self,
        jid: &Jid,
        _content: &MessageContent,
        options: RelayOptions,
    ) -> Result<()> {
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

#[derive(Default)]
pub struct MockDecryptor {
    failures: Mutex<HashMap<String, ()>>,
    contents: Mutex<HashMap<String, MessageContent>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl MockDecryptor {
    pub fn fail_for(&self, id: &str) {
        self.failures.lock().unwrap().insert(id.to_string(), ());
    }

    pub fn content_for(&self, id: &str, content: MessageContent) {
        self.contents
            .lock()
            .unwrap()
            .insert(id.to_string(), content);
    }

    pub fn delay_for(&self, id: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(id.to_string(), delay);
    }
}

#[async_trait]
impl MessageDecryptor for MockDecryptor {
    async fn decrypt(
        &self,
        _node: &Node,
        envelope: &MessageEnvelope,
    ) -> Result<MessageContent, DecryptionError> {
        let delay = self.delays.lock().unwrap().get(&envelope.key.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
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

pub struct MockCreds {
    pub me: Jid,
    next_prekey: AtomicU32,
    uploads: AtomicUsize,
}

impl Default for MockCreds {
    fn default() -> Self {
        Self {
            me: Jid::user("999000111"),
            next_prekey: AtomicU32::new(100),
            uploads: AtomicUsize::new(0),
        }
    }
}

impl MockCreds {
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MockCreds {
    async fn snapshot(&self) -> CredsSnapshot {
        CredsSnapshot {
            me: self.me.clone(),
            push_name: "tester".to_string(),
            registration_id: 0x0001_0203,
            identity_public: [1u8; 32],
            signed_pre_key_id: 7,
            signed_pre_key_public: [2u8; 32],
            signed_pre_key_signature: vec![3u8; 64],
            device_identity: vec![9, 9, 9],
        }
    }

    async fn take_one_prekey(&self) -> Result<OneTimePreKey, StoreError> {
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
pub struct MockMessageStore {
    messages: Mutex<HashMap<(String, String), MessageContent>>,
}

impl MockMessageStore {
    pub fn insert(&self, chat: &Jid, id: &str, content: MessageContent) {
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
pub struct MockAppState {
    pub resyncs: Mutex<Vec<HashMap<Jid, ChatDelta>>>,
}

#[async_trait]
impl AppStateService for MockAppState {
    async fn resync_main_app_state(&self, recv_chats: HashMap<Jid, ChatDelta>) -> Result<()> {
        self.resyncs.lock().unwrap().push(recv_chats);
        Ok(())
    }
}

pub struct MockMediaConn;

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

pub struct MockHttpClient {
    pub requests: Mutex<Vec<HttpRequest>>,
    response: Mutex<HttpResponse>,
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            response: Mutex::new(HttpResponse {
                status_code: 200,
                body: br#"{"url":"https://mmg.whatsapp.net/d/f/abc","direct_path":"/d/f/abc"}"#
                    .to_vec(),
            }),
        }
    }
}

impl MockHttpClient {
    pub fn set_response(&self, status_code: u16, body: &[u8]) {
        *self.response.lock().unwrap() = HttpResponse {
            status_code,
            body: body.to_vec(),
        };
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(self.response.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub relay: Arc<MockRelay>,
    pub decryptor: Arc<MockDecryptor>,
    pub creds: Arc<MockCreds>,
    pub message_store: Arc<MockMessageStore>,
    pub app_state: Arc<MockAppState>,
    pub http: Arc<MockHttpClient>,
}

impl Harness {
    pub fn me(&self) -> Jid {
        self.creds.me.clone()
    }

    pub fn collect_events(&self, client: &Arc<Client>) -> Arc<Mutex<Vec<Event>>> {
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

pub fn build_client(config: SocketConfig) -> (Arc<Client>, Harness) {
    let _ = env_logger::builder().is_test(true).try_init();

    let harness = Harness {
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
            transport: harness.transport.clone(),
            relay: harness.relay.clone(),
            decryptor: harness.decryptor.clone(),
            creds: harness.creds.clone(),
            message_store: harness.message_store.clone(),
            app_state: harness.app_state.clone(),
            media_conn: Arc::new(MockMediaConn),
            http_client: harness.http.clone(),
        },
    );
    (client, harness)
}

pub fn message_stanza(id: &str, from: &str, t: i64) -> Node {
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

pub fn attr<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.attrs.get(key).map(String::as_str)
}
