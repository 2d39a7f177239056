pub mod call;
pub mod events;
pub mod message;
pub mod receipt;

pub use crate::binary::jid::{Jid, MessageId};
