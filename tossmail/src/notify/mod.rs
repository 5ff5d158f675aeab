//! Real-time delivery notifications

pub mod hub;

pub use hub::{BroadcastHub, NewMessageNotice, NotificationHub};
