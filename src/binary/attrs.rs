use std::str::FromStr;

use crate::binary::jid::Jid;
use crate::binary::node::Node;

/// Accumulating attribute reader.
///
/// Parse errors are collected instead of aborting so a malformed stanza can
/// still be inspected (and acked) before being dropped.
pub struct AttrParser<'a> {
    node: &'a Node,
    pub errors: Vec<String>,
}

impl<'a> AttrParser<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self {
            node,
            errors: Vec::new(),
        }
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn get_raw(&mut self, key: &str, require: bool) -> Option<&'a str> {
        let val = self.node.attrs.get(key).map(|s| s.as_str());
        if require && val.is_none() {
            self.errors
                .push(format!("required attribute '{key}' not found"));
        }
        val
    }

    pub fn optional_string(&mut self, key: &str) -> Option<&'a str> {
        self.get_raw(key, false)
    }

    /// Required string attribute; records an error and yields "" if missing.
    pub fn string(&mut self, key: &str) -> String {
        self.get_raw(key, true).unwrap_or_default().to_string()
    }

    pub fn optional_jid(&mut self, key: &str) -> Option<Jid> {
        let raw = self.get_raw(key, false)?;
        match Jid::from_str(raw) {
            Ok(jid) => Some(jid),
            Err(e) => {
                self.errors.push(format!("invalid JID in '{key}': {e}"));
                None
            }
        }
    }

    pub fn jid(&mut self, key: &str) -> Jid {
        self.get_raw(key, true);
        self.optional_jid(key).unwrap_or_default()
    }

    pub fn optional_u64(&mut self, key: &str) -> Option<u64> {
        let raw = self.get_raw(key, false)?;
        match raw.parse::<u64>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors
                    .push(format!("failed to parse u64 from '{raw}' for '{key}': {e}"));
                None
            }
        }
    }

    /// Unix-seconds timestamp attribute, defaulting to 0 when missing.
    pub fn unix_time(&mut self, key: &str) -> i64 {
        self.get_raw(key, true);
        self.optional_unix_time(key).unwrap_or_default()
    }

    pub fn optional_unix_time(&mut self, key: &str) -> Option<i64> {
        let raw = self.get_raw(key, false)?;
        match raw.parse::<i64>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors
                    .push(format!("failed to parse i64 from '{raw}' for '{key}': {e}"));
                None
            }
        }
    }

    pub fn optional_bool(&mut self, key: &str) -> bool {
        matches!(self.get_raw(key, false), Some("true") | Some("1"))
    }

    /// Present-at-all flag attributes such as `offline`.
    pub fn has(&mut self, key: &str) -> bool {
        self.get_raw(key, false).is_some()
    }
}
