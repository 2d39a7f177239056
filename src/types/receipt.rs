use serde::Serialize;

/// Receipt semantics carried in the `type` attribute of a `receipt` stanza.
///
/// `Delivery` is the wire default and carries no attribute at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ReceiptType {
    Delivery,
    Read,
    ReadSelf,
    Played,
    PlayedSelf,
    Retry,
    Sender,
    Inactive,
    PeerMsg,
    HistSync,
    Other(String),
}

impl ReceiptType {
    pub fn from_attr(attr: Option<&str>) -> Self {
        match attr {
            None | Some("") => ReceiptType::Delivery,
            Some("read") => ReceiptType::Read,
            Some("read-self") => ReceiptType::ReadSelf,
            Some("played") => ReceiptType::Played,
            Some("played-self") => ReceiptType::PlayedSelf,
            Some("retry") => ReceiptType::Retry,
            Some("sender") => ReceiptType::Sender,
            Some("inactive") => ReceiptType::Inactive,
            Some("peer_msg") => ReceiptType::PeerMsg,
            Some("hist_sync") => ReceiptType::HistSync,
            Some(other) => ReceiptType::Other(other.to_string()),
        }
    }

    /// Value for the outbound `type` attribute; `None` means the attribute
    /// is omitted (plain delivery receipt).
    pub fn as_attr(&self) -> Option<&str> {
        match self {
            ReceiptType::Delivery => None,
            ReceiptType::Read => Some("read"),
            ReceiptType::ReadSelf => Some("read-self"),
            ReceiptType::Played => Some("played"),
            ReceiptType::PlayedSelf => Some("played-self"),
            ReceiptType::Retry => Some("retry"),
            ReceiptType::Sender => Some("sender"),
            ReceiptType::Inactive => Some("inactive"),
            ReceiptType::PeerMsg => Some("peer_msg"),
            ReceiptType::HistSync => Some("hist_sync"),
            ReceiptType::Other(s) => Some(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_has_no_attr() {
        assert_eq!(ReceiptType::from_attr(None), ReceiptType::Delivery);
        assert_eq!(ReceiptType::Delivery.as_attr(), None);
    }

    #[test]
    fn attr_roundtrip() {
        for raw in ["read", "read-self", "played", "retry", "sender", "inactive", "peer_msg", "hist_sync"] {
            let parsed = ReceiptType::from_attr(Some(raw));
            assert_eq!(parsed.as_attr(), Some(raw));
        }
    }
}
