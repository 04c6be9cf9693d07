use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown message role '{other}'")),
        }
    }
}

/// Opaque file payload carried alongside a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes: data.len() as u64,
            data,
        }
    }
}

/// Cross-conversation context a message was written against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextRef {
    Conversation { id: String, title: String },
    Project { id: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub references: Vec<ContextRef>,
    /// The message this one is a revision of.
    pub parent_message_id: Option<String>,
    /// Root message of the version group; `None` on the root itself.
    pub version_of: Option<String>,
    pub version_number: i64,
    /// Branch snapshot that last claimed this message.
    pub branch_id: Option<String>,
    pub created_at_ms: i64,
}

impl Message {
    /// Id shared by every message in this message's version group.
    pub fn version_root_id(&self) -> &str {
        self.version_of.as_deref().unwrap_or(&self.id)
    }
}

/// Immutable snapshot of a conversation path, recorded when an edit forks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub name: String,
    pub path: Vec<String>,
    /// The message whose edit produced this snapshot.
    pub parent_version_id: String,
    pub created_at_ms: i64,
}

impl Branch {
    pub fn contains(&self, message_id: &str) -> bool {
        self.path.iter().any(|id| id == message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub project_id: Option<String>,
    pub title: Option<String>,
    /// Currently active linear history, oldest first.
    pub path: Vec<String>,
    /// Append-only, in recording order.
    pub branches: Vec<Branch>,
    pub active_branch_id: Option<String>,
    pub tags: Vec<String>,
    pub pinned: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Conversation {
    pub fn branch(&self, branch_id: &str) -> Option<&Branch> {
        self.branches.iter().find(|branch| branch.id == branch_id)
    }

    pub fn position_in_path(&self, message_id: &str) -> Option<usize> {
        self.path.iter().position(|id| id == message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationOp {
    pub seq: i64,
    pub conversation_id: String,
    pub op_type: String,
    pub payload: serde_json::Value,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateConversationInput {
    pub title: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub references: Vec<ContextRef>,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageVersionResult {
    pub new_message: Message,
    pub new_path: Vec<String>,
}

/// How a version switch arrived at the restored path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathSource {
    /// Copied verbatim from a recorded branch snapshot.
    Snapshot,
    /// Rebuilt around the version's anchor in the current path. `ambiguous`
    /// is set when the descendant walk hit a fork and stopped there.
    Reconstructed { ambiguous: bool },
    /// Nothing to anchor on; the path is the version alone.
    Singleton,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchOutcome {
    pub path: Vec<String>,
    pub active_branch_id: Option<String>,
    pub source: PathSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// A version was dropped and the conversation went back to a snapshot
    /// holding its parent.
    Revert,
    /// The message and everything after it left the active path.
    Cascade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub mode: DeleteMode,
    pub path: Vec<String>,
    /// Records physically removed.
    pub deleted: Vec<String>,
    /// Records dropped from the path but kept because a branch still references them.
    pub retained: Vec<String>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}
