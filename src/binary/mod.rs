pub mod attrs;
pub mod builder;
pub mod jid;
pub mod node;
