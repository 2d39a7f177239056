use crate::binary::builder::NodeBuilder;
use crate::binary::node::Node;
use crate::client::Client;

impl Client {
    /// Acknowledges receipt of an inbound stanza.
    ///
    /// Exactly one ack is sent per inbound stanza, whether or not its
    /// interpretation succeeded. `participant` and `recipient` are mirrored
    /// from the input when present; `type` is mirrored for every tag except
    /// `message` unless the caller overrides it.
    pub(crate) async fn send_stanza_ack(&self, node: &Node, override_type: Option<&str>) {
        let mut attrs = node.attrs();
        let id = match attrs.optional_string("id") {
            Some(id) => id.to_string(),
            None => {
                log::warn!(target: "Socket/Send", "Cannot ack <{}> stanza without id", node.tag);
                return;
            }
        };
        let to = match attrs.optional_string("from") {
            Some(from) => from.to_string(),
            None => {
                log::warn!(target: "Socket/Send", "Cannot ack <{}> stanza without from", node.tag);
                return;
            }
        };

        let mut builder = NodeBuilder::new("ack")
            .attr("id", id)
            .attr("to", to)
            .attr("class", node.tag.clone());

        if let Some(participant) = attrs.optional_string("participant") {
            builder = builder.attr("participant", participant);
        }
        if let Some(recipient) = attrs.optional_string("recipient") {
            builder = builder.attr("recipient", recipient);
        }
        if let Some(t) = override_type {
            builder = builder.attr("type", t);
        } else if node.tag != "message"
            && let Some(t) = attrs.optional_string("type")
        {
            builder = builder.attr("type", t);
        }

        self.send_node(builder.build()).await;
    }
}
