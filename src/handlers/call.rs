use std::sync::Arc;

use chrono::{TimeZone, Utc};
use log::debug;

use crate::binary::node::Node;
use crate::client::Client;
use crate::types::call::{CallEvent, CallStatus};
use crate::types::events::{Event, UpsertKind};
use crate::types::message::{MessageKey, MessageStatus, StubType, WebMessage};

fn call_status_from_tag(child: &Node) -> CallStatus {
    match child.tag.as_str() {
        "offer" | "offer_notice" => CallStatus::Offer,
        "accept" => CallStatus::Accept,
        "reject" => CallStatus::Reject,
        "terminate" => {
            if child.attrs().optional_string("reason") == Some("timeout") {
                CallStatus::Timeout
            } else {
                CallStatus::Reject
            }
        }
        _ => CallStatus::Ringing,
    }
}

impl Client {
    /// Inbound `call` stanza: keep the offer cache current and surface a
    /// call event per signaling child.
    pub(crate) async fn handle_call(self: &Arc<Self>, node: Node) {
        let mut attrs = node.attrs();
        let Some(from) = attrs.optional_jid("from") else {
            debug!(target: "Socket/Recv", "Call stanza without 'from'");
            self.send_stanza_ack(&node, None).await;
            return;
        };
        let timestamp = attrs.optional_unix_time("t").unwrap_or_default();
        let date = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let offline = attrs.has("offline");

        let Some(child) = node.children().and_then(|c| c.first()) else {
            debug!(target: "Socket/Recv", "Call stanza without signaling content");
            self.send_stanza_ack(&node, None).await;
            return;
        };

        let mut child_attrs = child.attrs();
        let call_id = child_attrs.string("call-id");
        let caller = child_attrs
            .optional_jid("call-creator")
            .or_else(|| child_attrs.optional_jid("from"))
            .unwrap_or_else(|| from.clone());
        let status = call_status_from_tag(child);

        let event = if status == CallStatus::Offer {
            let event = CallEvent {
                chat_id: from.clone(),
                from: caller,
                id: call_id.clone(),
                date,
                offline,
                status,
                is_video: child.get_optional_child("video").is_some(),
                is_group: child_attrs.optional_string("type") == Some("group"),
            };
            self.call_offers
                .lock()
                .await
                .insert(call_id, event.clone());
            event
        } else {
            let mut offers = self.call_offers.lock().await;
            let cached = offers.get(&call_id);
            let event = CallEvent {
                chat_id: cached.map(|c| c.chat_id.clone()).unwrap_or(from.clone()),
                from: cached.map(|c| c.from.clone()).unwrap_or(caller),
                id: call_id.clone(),
                date,
                offline,
                status,
                is_video: cached.map(|c| c.is_video).unwrap_or(false),
                is_group: cached.map(|c| c.is_group).unwrap_or(false),
            };
            // The offer is owned by this handler and freed on terminal
            // status only.
            if status.is_terminal() {
                offers.remove(&call_id);
            }
            event
        };

        if event.status == CallStatus::Timeout {
            self.emit_missed_call_stub(&node, &event).await;
        }

        self.event_bus.dispatch(&Event::Call(event));
        self.send_stanza_ack(&node, None).await;
    }

    /// An incoming call that timed out shows up in the chat as a missed-call
    /// system message.
    async fn emit_missed_call_stub(&self, node: &Node, event: &CallEvent) {
        let me = self.creds.snapshot().await.me;
        if event.from.is_same_user_as(&me) {
            return;
        }
        let stanza_id = node.attrs().string("id");
        let mut msg = WebMessage::new(
            MessageKey {
                remote_jid: event.chat_id.to_non_ad(),
                id: stanza_id,
                from_me: false,
                participant: Some(event.from.clone()),
            },
            event.date.timestamp(),
        );
        msg.stub_type = Some(if event.is_video {
            StubType::CallMissedVideo
        } else {
            StubType::CallMissedVoice
        });
        msg.advance_status(MessageStatus::ServerAck);
        self.event_bus.dispatch(&Event::MessagesUpsert {
            messages: vec![msg],
            kind: UpsertKind::Notify,
        });
    }
}
