//! End-to-end pipeline scenarios driven through mock collaborators.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{attr, build_client, message_stanza};
use wamux::SocketConfig;
use wamux::binary::builder::NodeBuilder;
use wamux::binary::jid::Jid;
use wamux::types::events::{Event, UpsertKind};
use wamux::types::message::{
    HistorySyncKind, HistorySyncNotice, MessageContent, MessageStatus, ProtocolContent, StubType,
};

fn counters() -> wamux::config::RetryCounterMap {
    Arc::new(tokio::sync::Mutex::new(HashMap::new()))
}

/// Scenario: clean 1:1 receive.
#[tokio::test]
async fn clean_one_to_one_receive() {
    let (client, harness) = build_client(SocketConfig::default());
    client.set_send_active_receipts(true);
    let events = harness.collect_events(&client);

    client
        .handle_stanza(message_stanza("A1", "alice@s.whatsapp.net", 1000))
        .await;

    let sent = harness.transport.sent_nodes();
    assert_eq!(sent.len(), 2, "expected exactly ack + receipt");

    let ack = &sent[0];
    assert_eq!(ack.tag, "ack");
    assert_eq!(attr(ack, "id"), Some("A1"));
    assert_eq!(attr(ack, "to"), Some("alice@s.whatsapp.net"));
    assert_eq!(attr(ack, "class"), Some("message"));

    let receipt = &sent[1];
    assert_eq!(receipt.tag, "receipt");
    assert_eq!(attr(receipt, "id"), Some("A1"));
    assert_eq!(attr(receipt, "type"), None, "delivered receipt has no type");

    let upserts: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::MessagesUpsert { messages, kind } => Some((messages.clone(), *kind)),
            _ => None,
        })
        .collect();
    assert_eq!(upserts.len(), 1);
    let (messages, kind) = &upserts[0];
    assert_eq!(*kind, UpsertKind::Notify);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::ServerAck);
    assert_eq!(messages[0].key.id, "A1");
    assert!(matches!(
        messages[0].message,
        Some(MessageContent::Conversation(_))
    ));
}

/// Scenario: ciphertext with retry, escalating to a keys bundle.
#[tokio::test]
async fn ciphertext_triggers_capped_retry_workflow() {
    let retry_counters = counters();
    let config = SocketConfig {
        retry_counters: Some(retry_counters.clone()),
        ..Default::default()
    };
    let (client, harness) = build_client(config);
    let events = harness.collect_events(&client);
    harness.decryptor.fail_for("A1");

    client
        .handle_stanza(message_stanza("A1", "alice@s.whatsapp.net", 1000))
        .await;

    let sent = harness.transport.sent_nodes();
    assert_eq!(sent[0].tag, "ack");
    let retry_receipt = &sent[1];
    assert_eq!(retry_receipt.tag, "receipt");
    assert_eq!(attr(retry_receipt, "type"), Some("retry"));
    let retry = retry_receipt.get_optional_child("retry").unwrap();
    assert_eq!(attr(retry, "count"), Some("1"));
    assert_eq!(attr(retry, "v"), Some("1"));
    assert_eq!(attr(retry, "id"), Some("A1"));
    assert!(retry_receipt.get_optional_child("keys").is_none());
    assert_eq!(retry_counters.lock().await.get("A1").copied(), Some(2));

    // The stub is not surfaced while the retry workflow runs.
    assert!(
        events
            .lock()
            .unwrap()
            .iter()
            .all(|e| !matches!(e, Event::MessagesUpsert { .. }))
    );

    // Redelivery of the same id still fails to decrypt.
    client
        .handle_stanza(message_stanza("A1", "alice@s.whatsapp.net", 1000))
        .await;

    let sent = harness.transport.sent_nodes();
    let second_receipt = &sent[3];
    let retry = second_receipt.get_optional_child("retry").unwrap();
    assert_eq!(attr(retry, "count"), Some("2"));
    let keys = second_receipt
        .get_optional_child("keys")
        .expect("second retry bundles fresh keys");
    assert!(keys.get_optional_child("key").is_some());
    assert!(keys.get_optional_child("skey").is_some());
    assert!(keys.get_optional_child("identity").is_some());
    assert_eq!(retry_counters.lock().await.get("A1").copied(), Some(3));

    let creds_updates = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, Event::CredsUpdate(_)))
        .count();
    assert_eq!(creds_updates, 2, "each consumed prekey is reported");
}

/// Boundary: a counter at the cap silences the retry and clears the entry.
#[tokio::test]
async fn retry_cap_goes_silent() {
    let retry_counters = counters();
    retry_counters.lock().await.insert("A1".to_string(), 5);
    let config = SocketConfig {
        retry_counters: Some(retry_counters.clone()),
        ..Default::default()
    };
    let (client, harness) = build_client(config);
    harness.decryptor.fail_for("A1");

    client
        .handle_stanza(message_stanza("A1", "alice@s.whatsapp.net", 1000))
        .await;

    let sent = harness.transport.sent_nodes();
    assert_eq!(sent.len(), 1, "only the ack goes out at the cap");
    assert_eq!(sent[0].tag, "ack");
    assert!(!retry_counters.lock().await.contains_key("A1"));
}

/// Boundary: transport closed during retry writes nothing and panics never.
#[tokio::test]
async fn closed_transport_skips_retry_write() {
    let retry_counters = counters();
    let config = SocketConfig {
        retry_counters: Some(retry_counters.clone()),
        ..Default::default()
    };
    let (client, harness) = build_client(config);
    harness.decryptor.fail_for("A1");
    harness.transport.set_open(false);

    client
        .handle_stanza(message_stanza("A1", "alice@s.whatsapp.net", 1000))
        .await;

    assert!(harness.transport.sent_nodes().is_empty());
}

/// Scenario: group participant remove of itself reclassifies as leave.
#[tokio::test]
async fn group_self_remove_becomes_leave() {
    let (client, harness) = build_client(SocketConfig::default());
    let events = harness.collect_events(&client);

    let node = NodeBuilder::new("notification")
        .attr("id", "N1")
        .attr("type", "w:gp2")
        .attr("from", "123456789@g.us")
        .attr("participant", "bob@s.whatsapp.net")
        .attr("t", "1700000000")
        .children([NodeBuilder::new("remove")
            .children([NodeBuilder::new("participant")
                .attr("jid", "bob@s.whatsapp.net")
                .build()])
            .build()])
        .build();
    client.handle_stanza(node).await;

    // Notifications are acked before interpretation.
    assert_eq!(harness.transport.sent_with_tag("ack").len(), 1);

    let stubs: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::MessagesUpsert { messages, .. } => Some(messages[0].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(stubs.len(), 1);
    assert_eq!(stubs[0].stub_type, Some(StubType::GroupParticipantLeave));
    assert_eq!(stubs[0].stub_parameters, vec!["bob@s.whatsapp.net"]);
}

/// A remove of somebody else stays a remove.
#[tokio::test]
async fn group_remove_of_other_member_stays_remove() {
    let (client, harness) = build_client(SocketConfig::default());
    let events = harness.collect_events(&client);

    let node = NodeBuilder::new("notification")
        .attr("id", "N2")
        .attr("type", "w:gp2")
        .attr("from", "123456789@g.us")
        .attr("participant", "admin@s.whatsapp.net")
        .attr("t", "1700000000")
        .children([NodeBuilder::new("remove")
            .children([NodeBuilder::new("participant")
                .attr("jid", "bob@s.whatsapp.net")
                .build()])
            .build()])
        .build();
    client.handle_stanza(node).await;

    let stubs: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::MessagesUpsert { messages, .. } => Some(messages[0].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(stubs[0].stub_type, Some(StubType::GroupParticipantRemove));
}

/// Scenario: low prekey count triggers exactly one replenish.
#[tokio::test]
async fn prekey_replenish_on_low_count() {
    let (client, harness) = build_client(SocketConfig::default());

    let node = NodeBuilder::new("notification")
        .attr("id", "N3")
        .attr("type", "encrypt")
        .attr("from", "s.whatsapp.net")
        .children([NodeBuilder::new("count").attr("value", "3").build()])
        .build();
    client.handle_stanza(node).await;

    assert_eq!(harness.creds.upload_count(), 1);

    // A healthy pool does not trigger an upload.
    let node = NodeBuilder::new("notification")
        .attr("id", "N4")
        .attr("type", "encrypt")
        .attr("from", "s.whatsapp.net")
        .children([NodeBuilder::new("count").attr("value", "40").build()])
        .build();
    client.handle_stanza(node).await;
    assert_eq!(harness.creds.upload_count(), 1);
}

/// Scenario: peer retry receipt for our message triggers a resend.
#[tokio::test]
async fn peer_retry_receipt_resends_our_message() {
    let retry_counters = counters();
    let config = SocketConfig {
        retry_counters: Some(retry_counters.clone()),
        ..Default::default()
    };
    let (client, harness) = build_client(config);

    let carol: Jid = "carol@s.whatsapp.net".parse().unwrap();
    harness.message_store.insert(
        &carol,
        "X",
        MessageContent::Conversation("original".to_string()),
    );

    let node = NodeBuilder::new("receipt")
        .attr("id", "X")
        .attr("from", "carol@s.whatsapp.net")
        .attr("participant", "carol@s.whatsapp.net")
        .attr("type", "retry")
        .attr("t", "2000")
        .children([NodeBuilder::new("retry")
            .attr("id", "X")
            .attr("count", "1")
            .attr("v", "1")
            .build()])
        .build();
    client.handle_stanza(node).await;

    let asserted = harness.relay.asserted.lock().unwrap().clone();
    assert_eq!(asserted.len(), 1);
    assert_eq!(asserted[0].0[0], carol);
    assert!(asserted[0].1, "sessions are asserted with force");

    let relayed = harness.relay.relayed.lock().unwrap().clone();
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].0, carol);
    assert_eq!(relayed[0].1.message_id.as_deref(), Some("X"));

    assert_eq!(retry_counters.lock().await.get("X").copied(), Some(1));
    assert_eq!(harness.transport.sent_with_tag("ack").len(), 1);
}

/// A group retry receipt also invalidates the sender-key memory entry.
#[tokio::test]
async fn group_retry_receipt_invalidates_sender_key() {
    let (client, harness) = build_client(SocketConfig::default());

    let group: Jid = "123456789@g.us".parse().unwrap();
    harness.message_store.insert(
        &group,
        "GX",
        MessageContent::Conversation("group original".to_string()),
    );

    let node = NodeBuilder::new("receipt")
        .attr("id", "GX")
        .attr("from", "123456789@g.us")
        .attr("participant", "carol@s.whatsapp.net")
        .attr("type", "retry")
        .attr("t", "2000")
        .children([NodeBuilder::new("retry")
            .attr("id", "GX")
            .attr("count", "1")
            .attr("v", "1")
            .build()])
        .build();
    client.handle_stanza(node).await;

    let carol: Jid = "carol@s.whatsapp.net".parse().unwrap();
    let invalidated = harness.relay.invalidated.lock().unwrap().clone();
    assert_eq!(invalidated, vec![(group.clone(), carol)]);
    assert_eq!(harness.relay.relayed.lock().unwrap().len(), 1);
    assert_eq!(harness.transport.sent_with_tag("ack").len(), 1);
}

/// A retry receipt for a message we did not send is log-only.
#[tokio::test]
async fn peer_retry_receipt_for_foreign_message_is_ignored() {
    let (client, harness) = build_client(SocketConfig::default());

    let node = NodeBuilder::new("receipt")
        .attr("id", "Y")
        .attr("from", "carol@s.whatsapp.net")
        .attr("recipient", "dave@s.whatsapp.net")
        .attr("type", "retry")
        .attr("t", "2000")
        .build();
    client.handle_stanza(node).await;

    assert!(harness.relay.relayed.lock().unwrap().is_empty());
    assert!(harness.relay.asserted.lock().unwrap().is_empty());
    assert_eq!(harness.transport.sent_with_tag("ack").len(), 1);
}

/// Scenario: history-sync debounce collapses a burst into one resync.
#[tokio::test]
async fn history_sync_debounce_fires_once() {
    let config = SocketConfig {
        history_sync_debounce: Duration::from_millis(60),
        ..Default::default()
    };
    let (client, harness) = build_client(config);
    client.set_send_active_receipts(true);

    for i in 1..=3 {
        let id = format!("H{i}");
        harness.decryptor.content_for(
            &id,
            MessageContent::Protocol(ProtocolContent::HistorySyncNotification(
                HistorySyncNotice {
                    kind: HistorySyncKind::Recent,
                    chunk_order: i,
                    progress: None,
                },
            )),
        );
        client
            .handle_stanza(message_stanza(&id, "alice@s.whatsapp.net", 1000 + i as i64))
            .await;
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    assert!(
        harness.app_state.resyncs.lock().unwrap().is_empty(),
        "gate must stay quiet while batches keep arriving"
    );

    tokio::time::sleep(Duration::from_millis(120)).await;

    let resyncs = harness.app_state.resyncs.lock().unwrap().clone();
    assert_eq!(resyncs.len(), 1);
    let alice: Jid = "alice@s.whatsapp.net".parse().unwrap();
    assert_eq!(resyncs[0][&alice].last_message_recv_timestamp, 1003);

    // Each history message was confirmed to the sender's consumer JID.
    let hist_receipts: Vec<_> = harness
        .transport
        .sent_with_tag("receipt")
        .into_iter()
        .filter(|r| attr(r, "type") == Some("hist_sync"))
        .collect();
    assert_eq!(hist_receipts.len(), 3);
    assert_eq!(attr(&hist_receipts[0], "to"), Some("alice@c.us"));
}

/// Boundary: the offline attribute flips the upsert kind.
#[tokio::test]
async fn offline_messages_are_appended_not_notified() {
    let (client, harness) = build_client(SocketConfig::default());
    client.set_send_active_receipts(true);
    let events = harness.collect_events(&client);

    let mut node = message_stanza("A2", "alice@s.whatsapp.net", 1000);
    node.attrs.insert("offline".to_string(), "1".to_string());
    client.handle_stanza(node).await;
    client
        .handle_stanza(message_stanza("A3", "alice@s.whatsapp.net", 1001))
        .await;

    let kinds: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::MessagesUpsert { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![UpsertKind::Append, UpsertKind::Notify]);
}

/// Invariant: same-chat stanzas keep arrival order even when the first one
/// decrypts slowly.
#[tokio::test(flavor = "current_thread")]
async fn per_chat_ordering_survives_slow_decryption() {
    let (client, harness) = build_client(SocketConfig::default());
    client.set_send_active_receipts(true);
    let events = harness.collect_events(&client);
    harness
        .decryptor
        .delay_for("S1", Duration::from_millis(40));

    let c1 = client.clone();
    let first = tokio::spawn(async move {
        c1.handle_stanza(message_stanza("S1", "alice@s.whatsapp.net", 1)).await;
    });
    let c2 = client.clone();
    let second = tokio::spawn(async move {
        c2.handle_stanza(message_stanza("S2", "alice@s.whatsapp.net", 2)).await;
    });
    first.await.unwrap();
    second.await.unwrap();

    let ids: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::MessagesUpsert { messages, .. } => Some(messages[0].key.id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec!["S1", "S2"]);

    // The acks also follow arrival order.
    let acks: Vec<_> = harness
        .transport
        .sent_with_tag("ack")
        .iter()
        .map(|a| attr(a, "id").unwrap().to_string())
        .collect();
    assert_eq!(acks, vec!["S1", "S2"]);
}

/// Invariant: every inbound stanza is acked exactly once.
#[tokio::test]
async fn every_stanza_is_acked_exactly_once() {
    let (client, harness) = build_client(SocketConfig::default());
    client.set_send_active_receipts(true);
    harness.decryptor.fail_for("M2");

    let stanzas = vec![
        message_stanza("M1", "alice@s.whatsapp.net", 1),
        message_stanza("M2", "alice@s.whatsapp.net", 2),
        NodeBuilder::new("receipt")
            .attr("id", "M3")
            .attr("from", "alice@s.whatsapp.net")
            .attr("t", "3")
            .build(),
        NodeBuilder::new("notification")
            .attr("id", "M4")
            .attr("type", "unknown-kind")
            .attr("from", "alice@s.whatsapp.net")
            .build(),
        NodeBuilder::new("call")
            .attr("id", "M5")
            .attr("from", "alice@s.whatsapp.net")
            .attr("t", "5")
            .children([NodeBuilder::new("offer").attr("call-id", "C1").build()])
            .build(),
    ];

    for node in stanzas {
        client.handle_stanza(node).await;
    }

    let mut acked: Vec<_> = harness
        .transport
        .sent_with_tag("ack")
        .iter()
        .map(|a| attr(a, "id").unwrap().to_string())
        .collect();
    acked.sort();
    assert_eq!(acked, vec!["M1", "M2", "M3", "M4", "M5"]);
}

/// Receipt status mapping: delivery and read receipts update our messages.
#[tokio::test]
async fn receipts_map_to_status_updates() {
    let (client, harness) = build_client(SocketConfig::default());
    let events = harness.collect_events(&client);

    // Delivery receipt from the peer for a message we sent.
    let node = NodeBuilder::new("receipt")
        .attr("id", "OUT1")
        .attr("from", "alice@s.whatsapp.net")
        .attr("t", "100")
        .build();
    client.handle_stanza(node).await;

    // Read receipt in a group, carrying an extra id.
    let node = NodeBuilder::new("receipt")
        .attr("id", "OUT2")
        .attr("from", "123456789@g.us")
        .attr("participant", "bob@s.whatsapp.net")
        .attr("type", "read")
        .attr("t", "200")
        .children([NodeBuilder::new("list")
            .children([NodeBuilder::new("item").attr("id", "OUT3").build()])
            .build()])
        .build();
    client.handle_stanza(node).await;

    let collected = events.lock().unwrap().clone();

    let updates: Vec<_> = collected
        .iter()
        .filter_map(|e| match e {
            Event::MessagesUpdate(u) => Some(u.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0][0].status, MessageStatus::DeliveryAck);
    assert!(updates[0][0].key.from_me);
    assert_eq!(updates[0][0].key.id, "OUT1");

    let receipt_updates: Vec<_> = collected
        .iter()
        .filter_map(|e| match e {
            Event::MessageReceiptUpdate(u) => Some(u.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(receipt_updates.len(), 1);
    assert_eq!(receipt_updates[0].len(), 2, "both ids get a per-user update");
    assert_eq!(receipt_updates[0][0].receipt.read_timestamp, Some(200));
    assert_eq!(receipt_updates[0][0].receipt.receipt_timestamp, None);
    assert_eq!(
        receipt_updates[0][0].receipt.user_jid.to_string(),
        "bob@s.whatsapp.net"
    );
}

/// A plain delivery receipt from one of our own devices is not surfaced.
#[tokio::test]
async fn self_delivery_receipt_is_suppressed() {
    let (client, harness) = build_client(SocketConfig::default());
    let events = harness.collect_events(&client);

    let node = NodeBuilder::new("receipt")
        .attr("id", "OUT9")
        .attr("from", "999000111:3@s.whatsapp.net")
        .attr("recipient", "alice@s.whatsapp.net")
        .attr("t", "100")
        .build();
    client.handle_stanza(node).await;

    assert!(
        events
            .lock()
            .unwrap()
            .iter()
            .all(|e| !matches!(e, Event::MessagesUpdate(_)))
    );
    assert_eq!(harness.transport.sent_with_tag("ack").len(), 1);
}

/// The sender's push name feeds a contact update after the upsert.
#[tokio::test]
async fn push_name_queues_contact_update() {
    let (client, harness) = build_client(SocketConfig::default());
    client.set_send_active_receipts(true);
    let events = harness.collect_events(&client);

    let mut node = message_stanza("A7", "alice@s.whatsapp.net", 1000);
    node.attrs.insert("notify".to_string(), "Alice".to_string());
    client.handle_stanza(node).await;

    let contacts: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::ContactsUpdate(c) => Some(c.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0][0].jid.to_string(), "alice@s.whatsapp.net");
    assert_eq!(contacts[0][0].notify.as_deref(), Some("Alice"));
}

/// Messages from our own companion device get a sender receipt addressed to
/// the exact device; peer-category messages get a peer_msg receipt.
#[tokio::test]
async fn own_device_and_peer_receipt_types() {
    let (client, harness) = build_client(SocketConfig::default());

    let node = NodeBuilder::new("message")
        .attr("id", "D1")
        .attr("from", "999000111:5@s.whatsapp.net")
        .attr("recipient", "alice@s.whatsapp.net")
        .attr("t", "1000")
        .build();
    client.handle_stanza(node).await;

    let receipts = harness.transport.sent_with_tag("receipt");
    assert_eq!(attr(&receipts[0], "type"), Some("sender"));
    // Sender receipts for 1:1 chats address the acting device directly.
    assert_eq!(attr(&receipts[0], "to"), Some("999000111:5@s.whatsapp.net"));
    assert_eq!(attr(&receipts[0], "recipient"), Some("alice@s.whatsapp.net"));

    let node = NodeBuilder::new("message")
        .attr("id", "D2")
        .attr("from", "999000111@s.whatsapp.net")
        .attr("recipient", "999000111@s.whatsapp.net")
        .attr("category", "peer")
        .attr("t", "1001")
        .build();
    client.handle_stanza(node).await;

    let receipts = harness.transport.sent_with_tag("receipt");
    assert_eq!(attr(&receipts[1], "type"), Some("peer_msg"));
}

/// Ciphertext stubs are surfaced when the embedder opts in.
#[tokio::test]
async fn ciphertext_stub_can_be_surfaced() {
    let config = SocketConfig {
        treat_ciphertext_messages_as_real: true,
        ..Default::default()
    };
    let (client, harness) = build_client(config);
    let events = harness.collect_events(&client);
    harness.decryptor.fail_for("A1");

    client
        .handle_stanza(message_stanza("A1", "alice@s.whatsapp.net", 1000))
        .await;

    let stubs: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::MessagesUpsert { messages, .. } => Some(messages[0].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(stubs.len(), 1);
    assert_eq!(stubs[0].stub_type, Some(StubType::Ciphertext));
}
