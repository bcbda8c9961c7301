//! Shared domain types.

pub mod key;
pub mod message;

pub use key::{normalize_origin, KeyError, SubscriptionKey};
pub use message::{EventKind, Message};
