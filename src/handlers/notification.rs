use std::sync::Arc;

use log::{debug, info, warn};

use crate::binary::node::Node;
use crate::client::Client;
use crate::error::ProtocolViolation;
use crate::types::events::{ChatUpsert, Event, GroupMetadata, GroupParticipant, MediaRetryUpdate, RetryMedia, UpsertKind};
use crate::types::message::{
    MessageKey, MessageStatus, MessageContent, ProtocolContent, StubType, WebMessage,
};

/// Server-side prekey pool level below which the pool is replenished.
const MIN_PREKEY_COUNT: u64 = 5;

/// Pulls group metadata out of a `<create><group …/></create>` subtree.
fn extract_group_metadata(create_node: &Node) -> Result<GroupMetadata, ProtocolViolation> {
    let group_node = create_node
        .get_optional_child("group")
        .ok_or_else(|| ProtocolViolation("group create notification without <group>".into()))?;
    let mut attrs = group_node.attrs();
    let raw_id = attrs
        .optional_string("id")
        .ok_or_else(|| ProtocolViolation("group metadata missing id".into()))?;
    let id = if raw_id.contains('@') {
        raw_id
            .parse()
            .map_err(|e| ProtocolViolation(format!("bad group id: {e}")))?
    } else {
        crate::binary::jid::Jid::group(raw_id)
    };
    let subject = attrs.optional_string("subject").unwrap_or_default().to_string();
    let creation = attrs.optional_unix_time("creation").unwrap_or_default();
    let owner = attrs.optional_jid("creator").map(|j| j.to_non_ad());

    let participants = group_node
        .get_children_by_tag("participant")
        .into_iter()
        .filter_map(|p| {
            let mut p_attrs = p.attrs();
            let jid = p_attrs.optional_jid("jid")?;
            let is_admin = matches!(
                p_attrs.optional_string("type"),
                Some("admin") | Some("superadmin")
            );
            Some(GroupParticipant { jid, is_admin })
        })
        .collect();

    Ok(GroupMetadata {
        id,
        subject,
        owner,
        creation,
        participants,
    })
}

/// Decodes a `mediaretry` notification into a media-update payload.
pub(crate) fn decode_media_retry_node(node: &Node) -> Result<MediaRetryUpdate, ProtocolViolation> {
    let rmr = node
        .get_optional_child("rmr")
        .ok_or_else(|| ProtocolViolation("mediaretry notification without <rmr>".into()))?;
    let mut rmr_attrs = rmr.attrs();
    let key = MessageKey {
        remote_jid: rmr_attrs.jid("jid"),
        id: node.attrs().string("id"),
        from_me: rmr_attrs.optional_bool("from_me"),
        participant: rmr_attrs.optional_jid("participant"),
    };

    if let Some(error_node) = node.get_optional_child("error") {
        let code = error_node.attrs().optional_u64("code").unwrap_or(0) as u32;
        return Ok(MediaRetryUpdate {
            key,
            error_code: Some(code),
            media: None,
        });
    }

    let encrypt_node = node
        .get_optional_child("encrypt")
        .ok_or_else(|| ProtocolViolation("mediaretry result without <encrypt>".into()))?;
    let ciphertext = encrypt_node
        .get_optional_child("enc_p")
        .and_then(Node::bytes)
        .ok_or_else(|| ProtocolViolation("mediaretry result without ciphertext".into()))?;
    let iv = encrypt_node
        .get_optional_child("enc_iv")
        .and_then(Node::bytes)
        .ok_or_else(|| ProtocolViolation("mediaretry result without iv".into()))?;

    Ok(MediaRetryUpdate {
        key,
        error_code: None,
        media: Some(RetryMedia {
            ciphertext: ciphertext.to_vec(),
            iv: iv.to_vec(),
        }),
    })
}

impl Client {
    /// Inbound `notification` stanza. The ack goes out before interpretation
    /// dispatch so processing errors never block protocol flow.
    pub(crate) async fn handle_notification(self: &Arc<Self>, node: Node) {
        self.send_stanza_ack(&node, None).await;

        let notification_type = node
            .attrs()
            .optional_string("type")
            .unwrap_or_default()
            .to_string();

        match notification_type.as_str() {
            "w:gp2" => self.handle_group_notification(&node).await,
            "mediaretry" => match decode_media_retry_node(&node) {
                Ok(update) => {
                    self.event_bus.dispatch(&Event::MediaUpdate(vec![update]));
                }
                Err(violation) => warn!(target: "Socket/Recv", "{violation}; dropping"),
            },
            "encrypt" => self.handle_encrypt_notification(&node).await,
            "devices" => self.handle_devices_notification(&node).await,
            other => {
                debug!(target: "Socket/Recv", "Unhandled notification type '{other}'");
            }
        }
    }

    /// Group lifecycle changes become stub messages plus chat/group upserts.
    async fn handle_group_notification(self: &Arc<Self>, node: &Node) {
        let mut attrs = node.attrs();
        let Some(group) = attrs.optional_jid("from") else {
            warn!(target: "Socket/Recv", "Group notification without 'from'");
            return;
        };
        let actor = attrs.optional_jid("participant");
        let id = attrs.string("id");
        let timestamp = attrs.optional_unix_time("t").unwrap_or_default();

        let Some(child) = node.children().and_then(|c| c.first()) else {
            debug!(target: "Socket/Recv", "Group notification without content");
            return;
        };

        // Group state changes observe the same per-chat ordering as messages.
        let _ordering = self.chat_locks.acquire(&group.to_string()).await;

        let me = self.creds.snapshot().await.me;
        let from_me = actor.as_ref().is_some_and(|a| a.is_same_user_as(&me));
        let mut msg = WebMessage::new(
            MessageKey {
                remote_jid: group,
                id,
                from_me,
                participant: actor.clone(),
            },
            timestamp,
        );

        match child.tag.as_str() {
            "create" => {
                let metadata = match extract_group_metadata(child) {
                    Ok(metadata) => metadata,
                    Err(violation) => {
                        warn!(target: "Socket/Recv", "{violation}; dropping");
                        return;
                    }
                };
                self.event_bus.dispatch(&Event::ChatsUpsert(vec![ChatUpsert {
                    id: metadata.id.clone(),
                    name: Some(metadata.subject.clone()),
                    conversation_timestamp: Some(metadata.creation),
                }]));
                self.event_bus
                    .dispatch(&Event::GroupsUpsert(vec![metadata.clone()]));
                msg.key.participant = metadata.owner.clone();
                msg.stub_type = Some(StubType::GroupCreate);
                msg.stub_parameters = vec![metadata.subject];
            }
            "ephemeral" | "not_ephemeral" => {
                let expiration = if child.tag == "ephemeral" {
                    child.attrs().optional_u64("expiration").unwrap_or(0) as u32
                } else {
                    0
                };
                msg.message = Some(MessageContent::Protocol(ProtocolContent::EphemeralSetting {
                    expiration,
                }));
            }
            "promote" | "demote" | "remove" | "add" | "leave" => {
                let participants: Vec<String> = child
                    .get_children_by_tag("participant")
                    .into_iter()
                    .filter_map(|p| p.attrs().optional_string("jid").map(str::to_string))
                    .collect();

                let mut stub = match child.tag.as_str() {
                    "promote" => StubType::GroupParticipantPromote,
                    "demote" => StubType::GroupParticipantDemote,
                    "remove" => StubType::GroupParticipantRemove,
                    "add" => StubType::GroupParticipantAdd,
                    _ => StubType::GroupParticipantLeave,
                };
                // A member removing itself is a leave.
                if stub == StubType::GroupParticipantRemove
                    && participants.len() == 1
                    && actor
                        .as_ref()
                        .is_some_and(|a| a.to_string() == participants[0])
                {
                    stub = StubType::GroupParticipantLeave;
                }
                msg.stub_type = Some(stub);
                msg.stub_parameters = participants;
            }
            "subject" => {
                let subject = child.attrs().optional_string("subject").unwrap_or_default();
                msg.stub_type = Some(StubType::GroupChangeSubject);
                msg.stub_parameters = vec![subject.to_string()];
            }
            "announcement" | "not_announcement" => {
                msg.stub_type = Some(StubType::GroupChangeAnnounce);
                msg.stub_parameters =
                    vec![if child.tag == "announcement" { "on" } else { "off" }.to_string()];
            }
            "locked" | "unlocked" => {
                msg.stub_type = Some(StubType::GroupChangeRestrict);
                msg.stub_parameters =
                    vec![if child.tag == "locked" { "on" } else { "off" }.to_string()];
            }
            other => {
                debug!(target: "Socket/Recv", "Unhandled group notification child '{other}'");
                return;
            }
        }

        if msg.stub_type.is_some() || msg.message.is_some() {
            msg.advance_status(MessageStatus::ServerAck);
            self.event_bus.dispatch(&Event::MessagesUpsert {
                messages: vec![msg],
                kind: UpsertKind::Notify,
            });
        }
    }

    /// Server reports on the one-time prekey pool and identity changes.
    async fn handle_encrypt_notification(&self, node: &Node) {
        let from_server = node
            .attrs()
            .optional_jid("from")
            .is_some_and(|j| j.is_server());
        if !from_server {
            debug!(target: "Socket/Recv", "Ignoring encrypt notification from non-server origin");
            return;
        }

        if let Some(count_node) = node.get_optional_child("count") {
            let count = count_node.attrs().optional_u64("value").unwrap_or(0);
            if count < MIN_PREKEY_COUNT {
                info!(
                    target: "Socket",
                    "Server prekey pool down to {count}, replenishing"
                );
                if let Err(e) = self.creds.upload_pre_keys().await {
                    self.report_unexpected(&anyhow::Error::new(e), "upload-prekeys");
                }
            }
        } else if node.get_optional_child("identity").is_some() {
            info!(target: "Socket", "Own identity key changed on the server");
        } else {
            debug!(target: "Socket/Recv", "Unknown encrypt notification variant");
        }
    }

    /// Device-list reports are informational only.
    async fn handle_devices_notification(&self, node: &Node) {
        let me = self.creds.snapshot().await.me;
        for child in node.children().unwrap_or_default() {
            let jid = child.attrs().optional_jid("jid");
            if jid.is_some_and(|j| j.is_same_user_as(&me)) {
                let devices: Vec<String> = child
                    .get_children_by_tag("device")
                    .into_iter()
                    .filter_map(|d| d.attrs().optional_string("jid").map(str::to_string))
                    .collect();
                info!(target: "Socket", "Own device list reported: {devices:?}");
            }
        }
    }
}
