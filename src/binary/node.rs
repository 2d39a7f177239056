use crate::binary::attrs::AttrParser;
use indexmap::IndexMap;

/// Attribute order is preserved because it is meaningful on the wire.
pub type Attrs = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Bytes(Vec<u8>),
    String(String),
    Nodes(Vec<Node>),
}

/// One decoded protocol frame: a tagged element with string attributes and
/// either nested children or a byte-string body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: Option<NodeContent>,
}

impl Node {
    pub fn new(tag: &str, attrs: Attrs, content: Option<NodeContent>) -> Self {
        Self {
            tag: tag.to_string(),
            attrs,
            content,
        }
    }

    pub fn children(&self) -> Option<&[Node]> {
        match &self.content {
            Some(NodeContent::Nodes(nodes)) => Some(nodes),
            _ => None,
        }
    }

    pub fn attrs(&self) -> AttrParser<'_> {
        AttrParser::new(self)
    }

    pub fn get_optional_child(&self, tag: &str) -> Option<&Node> {
        self.children()
            .and_then(|nodes| nodes.iter().find(|node| node.tag == tag))
    }

    pub fn get_children_by_tag(&self, tag: &str) -> Vec<&Node> {
        match self.children() {
            Some(children) => children.iter().filter(|c| c.tag == tag).collect(),
            None => Vec::new(),
        }
    }

    /// Byte content of this node, if it carries any.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Some(NodeContent::Bytes(b)) => Some(b.as_slice()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::builder::NodeBuilder;

    #[test]
    fn child_lookup() {
        let node = NodeBuilder::new("receipt")
            .attr("id", "ABC")
            .children([
                NodeBuilder::new("retry").attr("count", "1").build(),
                NodeBuilder::new("registration")
                    .bytes(vec![0, 0, 0, 1])
                    .build(),
            ])
            .build();

        assert!(node.get_optional_child("retry").is_some());
        assert!(node.get_optional_child("keys").is_none());
        assert_eq!(node.get_children_by_tag("registration").len(), 1);
        assert_eq!(
            node.get_optional_child("registration").unwrap().bytes(),
            Some(&[0u8, 0, 0, 1][..])
        );
    }
}
