use std::sync::Arc;

use log::{debug, error, warn};

use crate::binary::jid::Jid;
use crate::binary::node::Node;
use crate::client::Client;
use crate::error::ProtocolViolation;
use crate::types::events::{ContactUpdate, CredsUpdate, Event, UpsertKind};
use crate::types::message::{
    MessageContent, MessageEnvelope, MessageKey, MessageStatus, ProtocolContent, StubType,
    WebMessage, clean_message,
};
use crate::types::receipt::ReceiptType;

/// Decodes the stanza envelope without touching the ciphertext.
pub(crate) fn parse_message_envelope(
    node: &Node,
    me: &Jid,
) -> Result<MessageEnvelope, ProtocolViolation> {
    let mut attrs = node.attrs();
    let from = attrs
        .optional_jid("from")
        .ok_or_else(|| ProtocolViolation("message stanza missing 'from'".into()))?;
    let id = attrs
        .optional_string("id")
        .ok_or_else(|| ProtocolViolation("message stanza missing 'id'".into()))?
        .to_string();
    let timestamp = attrs.optional_unix_time("t").unwrap_or_default();
    let push_name = attrs.optional_string("notify").map(str::to_string);
    let category = attrs.optional_string("category").map(str::to_string);
    let offline = attrs.has("offline");

    let (key, author) = if from.is_group() {
        let participant = attrs.optional_jid("participant").ok_or_else(|| {
            ProtocolViolation("group message stanza missing 'participant'".into())
        })?;
        (
            MessageKey {
                remote_jid: from,
                id,
                from_me: participant.is_same_user_as(me),
                participant: Some(participant.clone()),
            },
            participant,
        )
    } else if from.is_same_user_as(me) {
        // Sent by one of our own devices; the conversation is the recipient.
        let chat = attrs
            .optional_jid("recipient")
            .map(|j| j.to_non_ad())
            .unwrap_or_else(|| from.to_non_ad());
        (
            MessageKey {
                remote_jid: chat,
                id,
                from_me: true,
                participant: None,
            },
            from,
        )
    } else {
        (
            MessageKey {
                remote_jid: from.to_non_ad(),
                id,
                from_me: false,
                participant: None,
            },
            from,
        )
    };

    Ok(MessageEnvelope {
        key,
        author,
        category,
        push_name,
        timestamp,
        offline,
    })
}

impl Client {
    /// Inbound `message` stanza: ack, await decryption, then either emit the
    /// message or run the retry workflow for a ciphertext stub.
    pub(crate) async fn handle_message(self: &Arc<Self>, node: Node) {
        let me = self.creds.snapshot().await.me;

        let envelope = match parse_message_envelope(&node, &me) {
            Ok(envelope) => envelope,
            Err(violation) => {
                warn!(target: "Socket/Recv", "{violation}; dropping stanza");
                self.send_stanza_ack(&node, None).await;
                return;
            }
        };

        let chat_key = envelope.key.remote_jid.to_string();
        let _ordering = self.chat_locks.acquire(&chat_key).await;

        // Receipt of the stanza is acknowledged before the decryption task
        // resolves.
        self.send_stanza_ack(&node, None).await;

        let mut msg = WebMessage::new(envelope.key.clone(), envelope.timestamp);
        msg.push_name = envelope.push_name.clone();

        match self.decryptor.decrypt(&node, &envelope).await {
            Ok(content) => msg.message = Some(content),
            Err(err) => {
                error!(
                    target: "Socket/Recv",
                    "Failed to decrypt message {} from {}: {err}", envelope.key.id, envelope.author
                );
                msg.stub_type = Some(StubType::Ciphertext);
            }
        }

        if msg.is_ciphertext_stub() {
            {
                let _retry = self.retry_mutex.lock().await;
                if self.transport.is_open() {
                    if let Err(e) = self.request_retry(&node, &envelope).await {
                        self.report_unexpected(&e, "retry-request");
                    }
                    if let Some(delay) = self.config.retry_request_delay {
                        tokio::time::sleep(delay).await;
                    }
                } else {
                    debug!(
                        target: "Socket/Retry",
                        "Transport closed, skipping retry request for {}", envelope.key.id
                    );
                }
            }
            if !self.config.treat_ciphertext_messages_as_real {
                return;
            }
        } else {
            let mut receipt_participant = envelope.key.participant.clone();
            let receipt_type = if envelope.category.as_deref() == Some("peer") {
                ReceiptType::PeerMsg
            } else if envelope.key.from_me {
                if !envelope.key.remote_jid.is_group() {
                    // The receipt targets the actual sending device.
                    receipt_participant = Some(envelope.author.clone());
                }
                ReceiptType::Sender
            } else if !self.sends_active_receipts() {
                ReceiptType::Inactive
            } else {
                ReceiptType::Delivery
            };
            self.send_receipt(
                &envelope.key.remote_jid,
                receipt_participant.as_ref(),
                std::slice::from_ref(&envelope.key.id),
                receipt_type,
            )
            .await;
        }

        msg.advance_status(MessageStatus::ServerAck);
        clean_message(&mut msg, &me);

        let kind = if envelope.offline {
            UpsertKind::Append
        } else {
            UpsertKind::Notify
        };
        self.event_bus.dispatch(&Event::MessagesUpsert {
            messages: vec![msg.clone()],
            kind,
        });

        self.post_process_message(&msg, &envelope).await;
    }

    /// Second pipeline stage, serialized under the disjoint `"p-"` key space
    /// so it can never deadlock against intake holding the chat key.
    async fn post_process_message(self: &Arc<Self>, msg: &WebMessage, envelope: &MessageEnvelope) {
        let process_key = format!("p-{}", msg.key.remote_jid);
        let _guard = self.chat_locks.acquire(&process_key).await;

        if let Some(name) = &msg.push_name {
            if msg.key.from_me {
                let snapshot = self.creds.snapshot().await;
                if *name != snapshot.push_name {
                    self.event_bus.dispatch(&Event::CredsUpdate(CredsUpdate {
                        push_name: Some(name.clone()),
                        next_pre_key_id: None,
                    }));
                }
            } else {
                self.event_bus
                    .dispatch(&Event::ContactsUpdate(vec![ContactUpdate {
                        jid: envelope.author.to_non_ad(),
                        notify: Some(name.clone()),
                    }]));
            }
        }

        if let Some(MessageContent::Protocol(ProtocolContent::HistorySyncNotification(notice))) =
            &msg.message
        {
            if self.config.download_history {
                self.note_history_batch(msg, notice).await;
                let consumer = envelope.author.to_non_ad().to_consumer();
                self.send_receipt(
                    &consumer,
                    None,
                    std::slice::from_ref(&msg.key.id),
                    ReceiptType::HistSync,
                )
                .await;
            } else {
                debug!(
                    target: "Socket/Recv",
                    "History download disabled, ignoring sync notification {}", msg.key.id
                );
            }
        }
    }
}
