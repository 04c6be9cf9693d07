//! Local conversation store where editing a past message forks the
//! timeline instead of rewriting it.
mod branches;
pub mod conversations;
mod database;
pub mod error;
pub mod messages;
mod migration;
pub mod models;
pub mod projects;
mod rows;
pub mod store;

pub use conversations::Conversations;
pub use error::{Error, ErrorKind, Result};
pub use messages::Messages;
pub use models::{
    Attachment, Branch, ContextRef, Conversation, ConversationOp, CreateConversationInput,
    DeleteMode, DeleteOutcome, Message, MessageVersionResult, NewMessage, PathSource, Project,
    Role, SwitchOutcome,
};
pub use projects::Projects;
pub use store::Store;

/// Schema version a freshly opened store ends up at.
pub const SCHEMA_VERSION: i64 = migration::LATEST_VERSION;
