pub mod api;
pub mod app;
pub mod error;
pub mod inbox;
pub mod storage;
pub mod utils;

pub use api::client::{EngagementSource, RemoteSource, SeedFile};
pub use api::models::{Conversation, ConversationKey, EngagementRecord, Message};
pub use error::{InboxError, Result};
pub use inbox::Inbox;
pub use storage::{MemoryStore, MessageStore, SqliteStore};
