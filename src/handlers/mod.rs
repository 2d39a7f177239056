pub mod call;
pub mod message;
pub mod notification;
