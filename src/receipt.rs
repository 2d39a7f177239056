use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use log::{debug, warn};

use crate::binary::builder::NodeBuilder;
use crate::binary::jid::{Jid, MessageId};
use crate::binary::node::Node;
use crate::client::Client;
use crate::retry::MAX_RETRY_COUNT;
use crate::traits::RelayOptions;
use crate::types::events::{Event, MessageUpdate, UserReceipt, UserReceiptUpdate};
use crate::types::message::{MessageKey, MessageStatus};
use crate::types::receipt::ReceiptType;

impl Client {
    /// Sends a semantic receipt for one or more message ids.
    ///
    /// `Delivery` travels without a `type` attribute. `Sender` receipts for
    /// 1:1 chats swap the addressing: the conversation goes into
    /// `recipient` and the acting device into `to`.
    pub async fn send_receipt(
        &self,
        jid: &Jid,
        participant: Option<&Jid>,
        ids: &[MessageId],
        receipt_type: ReceiptType,
    ) {
        let Some(first_id) = ids.first() else {
            return;
        };
        let mut builder = NodeBuilder::new("receipt").attr("id", first_id.clone());

        if matches!(receipt_type, ReceiptType::Read | ReceiptType::ReadSelf) {
            builder = builder.attr("t", Utc::now().timestamp().to_string());
        }

        if receipt_type == ReceiptType::Sender && jid.is_user() {
            builder = builder.attr("recipient", jid.to_string());
            if let Some(participant) = participant {
                builder = builder.attr("to", participant.to_string());
            }
        } else {
            builder = builder.attr("to", jid.to_string());
            if let Some(participant) = participant {
                builder = builder.attr("participant", participant.to_string());
            }
        }

        if let Some(attr) = receipt_type.as_attr() {
            builder = builder.attr("type", attr);
        }

        if ids.len() > 1 {
            let items: Vec<_> = ids[1..]
                .iter()
                .map(|id| NodeBuilder::new("item").attr("id", id.clone()).build())
                .collect();
            builder = builder.children([NodeBuilder::new("list").children(items).build()]);
        }

        self.send_node(builder.build()).await;
    }

    /// Inbound `receipt` stanza: map to status updates or trigger a resend
    /// of our own message for `retry` receipts.
    pub(crate) async fn handle_receipt(self: &Arc<Self>, node: Node) {
        let mut attrs = node.attrs();
        let Some(from) = attrs.optional_jid("from") else {
            warn!(target: "Socket/Recv", "Receipt without 'from', dropping");
            self.send_stanza_ack(&node, None).await;
            return;
        };
        let Some(first_id) = attrs.optional_string("id").map(str::to_string) else {
            warn!(target: "Socket/Recv", "Receipt without 'id', dropping");
            self.send_stanza_ack(&node, None).await;
            return;
        };
        let participant = attrs.optional_jid("participant");
        let recipient = attrs.optional_jid("recipient");
        let receipt_type = ReceiptType::from_attr(attrs.optional_string("type"));
        let timestamp = attrs
            .optional_unix_time("t")
            .unwrap_or_else(|| Utc::now().timestamp());

        let me = self.creds.snapshot().await.me;
        let actor = participant.clone().unwrap_or_else(|| from.clone());
        let is_node_from_me = actor.is_same_user_as(&me);
        let remote_jid = if !is_node_from_me || from.is_group() {
            from.clone()
        } else {
            recipient.clone().unwrap_or_else(|| from.clone())
        };
        let from_me =
            recipient.is_none() || (receipt_type == ReceiptType::Retry && is_node_from_me);

        let mut ids = vec![first_id];
        if let Some(list) = node.get_optional_child("list") {
            for item in list.get_children_by_tag("item") {
                if let Some(extra) = item.attrs().optional_string("id") {
                    ids.push(extra.to_string());
                }
            }
        }

        debug!(
            target: "Socket/Recv",
            "Receipt {receipt_type:?} for {} message(s) in {remote_jid}", ids.len()
        );

        let _ordering = self.chat_locks.acquire(&remote_jid.to_string()).await;

        let status = match &receipt_type {
            ReceiptType::Delivery => Some(MessageStatus::DeliveryAck),
            ReceiptType::Read | ReceiptType::ReadSelf => Some(MessageStatus::Read),
            ReceiptType::Played | ReceiptType::PlayedSelf => Some(MessageStatus::Played),
            _ => None,
        };

        if let Some(status) = status
            && (status > MessageStatus::DeliveryAck || !is_node_from_me)
        {
            if remote_jid.is_group() {
                let updates: Vec<_> = ids
                    .iter()
                    .map(|id| UserReceiptUpdate {
                        key: MessageKey {
                            remote_jid: remote_jid.clone(),
                            id: id.clone(),
                            from_me,
                            participant: participant.clone(),
                        },
                        receipt: UserReceipt {
                            user_jid: actor.to_non_ad(),
                            receipt_timestamp: (status == MessageStatus::DeliveryAck)
                                .then_some(timestamp),
                            read_timestamp: (status > MessageStatus::DeliveryAck)
                                .then_some(timestamp),
                        },
                    })
                    .collect();
                self.event_bus.dispatch(&Event::MessageReceiptUpdate(updates));
            } else {
                let updates: Vec<_> = ids
                    .iter()
                    .map(|id| MessageUpdate {
                        key: MessageKey {
                            remote_jid: remote_jid.clone(),
                            id: id.clone(),
                            from_me,
                            participant: None,
                        },
                        status,
                    })
                    .collect();
                self.event_bus.dispatch(&Event::MessagesUpdate(updates));
            }
        }

        let mut suppress_ack = false;
        if receipt_type == ReceiptType::Retry {
            let count = self.retry_count(&ids[0]).await;
            if count < MAX_RETRY_COUNT {
                let key = MessageKey {
                    remote_jid: remote_jid.clone(),
                    id: ids[0].clone(),
                    from_me,
                    participant: participant.clone().or_else(|| Some(from.clone())),
                };
                if key.from_me {
                    let _retry_guard = self.retry_mutex.lock().await;
                    if let Err(e) = self.resend_messages(&key, &ids).await {
                        self.report_unexpected(&e, "receipt-retry-resend");
                        // No ack; the peer re-issues the retry receipt.
                        suppress_ack = true;
                    }
                } else {
                    debug!(
                        target: "Socket/Retry",
                        "Retry receipt for message {} we did not send; ignoring", ids[0]
                    );
                }
            } else {
                debug!(
                    target: "Socket/Retry",
                    "Retry receipt for {} past the attempt cap; ignoring", ids[0]
                );
            }
        }

        if !suppress_ack {
            self.send_stanza_ack(&node, None).await;
        }
    }

    /// Re-encrypts and relays our own messages after a peer reported it
    /// could not decrypt them.
    async fn resend_messages(
        &self,
        key: &MessageKey,
        ids: &[MessageId],
    ) -> Result<(), anyhow::Error> {
        let participant = key
            .participant
            .clone()
            .ok_or_else(|| anyhow!("retry receipt without an addressable participant"))?;

        let mut available = Vec::new();
        for id in ids {
            let lookup = MessageKey {
                remote_jid: key.remote_jid.clone(),
                id: id.clone(),
                from_me: key.from_me,
                participant: None,
            };
            match self.message_store.get_message(&lookup).await {
                Some(content) => available.push((id.clone(), content)),
                None => debug!(
                    target: "Socket/Retry",
                    "No source material for resend of {id}; skipping"
                ),
            }
        }

        self.relay
            .assert_sessions(std::slice::from_ref(&participant), true)
            .await?;

        if key.remote_jid.is_group() {
            self.relay
                .invalidate_sender_key(&key.remote_jid, &participant)
                .await;
        }

        for (id, content) in available {
            self.bump_retry_counter(&id).await;
            self.relay
                .relay_message(
                    &key.remote_jid,
                    &content,
                    RelayOptions {
                        message_id: Some(id),
                        participant: Some(participant.clone()),
                    },
                )
                .await?;
        }

        Ok(())
    }
}
