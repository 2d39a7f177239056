use log::{debug, warn};

use crate::binary::builder::NodeBuilder;
use crate::binary::node::Node;
use crate::client::Client;
use crate::types::events::{CredsUpdate, Event};
use crate::types::message::MessageEnvelope;

/// Retry attempts honored per message id. Once the counter reaches this the
/// entry is dropped and the message stays a ciphertext stub.
pub(crate) const MAX_RETRY_COUNT: u8 = 5;

/// First byte of the key-bundle-type marker attached to retry key bundles.
const KEY_BUNDLE_TYPE: u8 = 5;

/// One-time and signed prekey ids travel as 3-byte big-endian node content.
fn prekey_id_bytes(id: u32) -> Vec<u8> {
    id.to_be_bytes()[1..].to_vec()
}

impl Client {
    /// Requests redelivery of a message that failed to decrypt.
    ///
    /// Builds a `receipt type="retry"` carrying the attempt count and the
    /// local registration id; from the second attempt on it also bundles a
    /// freshly consumed one-time prekey so the sender can build a new
    /// session. Callers hold the global retry mutex.
    pub(crate) async fn request_retry(
        &self,
        node: &Node,
        envelope: &MessageEnvelope,
    ) -> Result<(), anyhow::Error> {
        let message_id = envelope.key.id.clone();

        let retry_count = {
            let mut counters = self.retry_counters.lock().await;
            let count = *counters.get(&message_id).unwrap_or(&1);
            if count >= MAX_RETRY_COUNT {
                counters.remove(&message_id);
                debug!(
                    target: "Socket/Retry",
                    "Dropping retry for {message_id}: cap of {MAX_RETRY_COUNT} reached"
                );
                return Ok(());
            }
            counters.insert(message_id.clone(), count + 1);
            count
        };

        let snapshot = self.creds.snapshot().await;
        // Consumed on every attempt; the consumption is the store's
        // transaction. On failure the stanza is not sent and the counter is
        // left bumped, so the next attempt uses a higher count.
        let prekey = self.creds.take_one_prekey().await?;

        warn!(
            target: "Socket/Retry",
            "Requesting retry #{retry_count} for message {message_id} from {}", envelope.author
        );

        let retry_node = NodeBuilder::new("retry")
            .attr("count", retry_count.to_string())
            .attr("id", message_id.clone())
            .attr("t", envelope.timestamp.to_string())
            .attr("v", "1")
            .build();

        let registration_node = NodeBuilder::new("registration")
            .bytes(snapshot.registration_id.to_be_bytes().to_vec())
            .build();

        let receipt_to = if envelope.key.remote_jid.is_group() {
            envelope.key.remote_jid.to_string()
        } else {
            // Device-specific encoding so the reply targets the exact
            // sending device rather than the account.
            envelope.author.to_string()
        };

        let mut builder = NodeBuilder::new("receipt")
            .attr("id", message_id.clone())
            .attr("to", receipt_to)
            .attr("type", "retry");

        let mut attrs = node.attrs();
        if let Some(participant) = attrs.optional_string("participant") {
            builder = builder.attr("participant", participant);
        }
        if let Some(recipient) = attrs.optional_string("recipient") {
            builder = builder.attr("recipient", recipient);
        }

        let mut children = vec![retry_node, registration_node];
        if retry_count > 1 {
            children.push(
                NodeBuilder::new("keys")
                    .children([
                        NodeBuilder::new("type").bytes(vec![KEY_BUNDLE_TYPE]).build(),
                        NodeBuilder::new("identity")
                            .bytes(snapshot.identity_public.to_vec())
                            .build(),
                        NodeBuilder::new("key")
                            .children([
                                NodeBuilder::new("id")
                                    .bytes(prekey_id_bytes(prekey.id))
                                    .build(),
                                NodeBuilder::new("value").bytes(prekey.public.to_vec()).build(),
                            ])
                            .build(),
                        NodeBuilder::new("skey")
                            .children([
                                NodeBuilder::new("id")
                                    .bytes(prekey_id_bytes(snapshot.signed_pre_key_id))
                                    .build(),
                                NodeBuilder::new("value")
                                    .bytes(snapshot.signed_pre_key_public.to_vec())
                                    .build(),
                                NodeBuilder::new("signature")
                                    .bytes(snapshot.signed_pre_key_signature.clone())
                                    .build(),
                            ])
                            .build(),
                        NodeBuilder::new("device-identity")
                            .bytes(snapshot.device_identity.clone())
                            .build(),
                    ])
                    .build(),
            );
        }

        self.send_node(builder.children(children).build()).await;

        self.event_bus.dispatch(&Event::CredsUpdate(CredsUpdate {
            push_name: None,
            next_pre_key_id: Some(prekey.id + 1),
        }));

        Ok(())
    }

    /// Counter step used by receipt-driven resends of our own messages.
    pub(crate) async fn bump_retry_counter(&self, message_id: &str) -> u8 {
        let mut counters = self.retry_counters.lock().await;
        let next = counters.get(message_id).copied().unwrap_or(0) + 1;
        counters.insert(message_id.to_string(), next);
        next
    }

    pub(crate) async fn retry_count(&self, message_id: &str) -> u8 {
        *self
            .retry_counters
            .lock()
            .await
            .get(message_id)
            .unwrap_or(&1)
    }
}
