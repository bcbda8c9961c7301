pub mod manager;
pub mod recovery;

pub use manager::{MessageStream, StatusStream, StreamManager, UnreadCount};
