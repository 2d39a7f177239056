use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::binary::jid::Jid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallStatus {
    Offer,
    Ringing,
    Accept,
    Reject,
    Timeout,
}

impl CallStatus {
    /// Terminal states free the cached offer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Reject | CallStatus::Accept | CallStatus::Timeout)
    }
}

/// One signaling update for a call, enriched from the cached offer as the
/// call progresses.
#[derive(Debug, Clone, Serialize)]
pub struct CallEvent {
    pub chat_id: Jid,
    pub from: Jid,
    pub id: String,
    pub date: DateTime<Utc>,
    pub offline: bool,
    pub status: CallStatus,
    pub is_video: bool,
    pub is_group: bool,
}
