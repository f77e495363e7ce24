//! Persistence collaborators.
//!
//! The runtime never talks to a database directly. Messages, conversations and usage counters go through
//! the traits below; [`memory`] holds process-local implementations for tests and tooling.
//!
//! | Trait | Used by |
//! |-------|---------|
//! | [`MessageStore`] | history loading, final message persistence, continuation |
//! | [`UsageStore`] | token quota check and usage recording |
//! | [`ConversationStore`] | conversation naming from recent user messages |

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::message::{
    ContentPart, ConversationId, MessageId, NewMessage, StoredMessage, UserId,
};
use crate::types::source::Source;
use crate::Result;

pub use memory::{InMemoryConversationStore, InMemoryMessageStore, InMemoryUsageStore};

/// Replacement content for an existing message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub content: Vec<ContentPart>,
    pub tools: Vec<String>,
    pub sources: Vec<Source>,
    pub debug: Vec<String>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(&self, message: NewMessage) -> Result<StoredMessage>;

    /// Replace the content of an existing message in place.
    async fn update(&self, id: MessageId, update: MessageUpdate) -> Result<StoredMessage>;

    async fn find(&self, id: MessageId) -> Result<Option<StoredMessage>>;

    /// Most recently created message of a conversation.
    async fn find_latest(&self, conversation_id: ConversationId) -> Result<Option<StoredMessage>>;

    /// The branch ending at `leaf`, oldest first. `None` yields an empty thread.
    async fn thread(
        &self,
        conversation_id: ConversationId,
        leaf: Option<MessageId>,
    ) -> Result<Vec<StoredMessage>>;
}

/// Naming state of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub name: Option<String>,
    /// The user chose the name; it is never replaced by a generated one.
    #[serde(default)]
    pub is_name_set_manually: bool,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            name: None,
            is_name_set_manually: false,
        }
    }

    pub fn named_by_user(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.is_name_set_manually = true;
        self
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find(&self, id: ConversationId) -> Result<Option<Conversation>>;

    /// Replace the name. `manual` records whether the user chose it.
    async fn rename(&self, id: ConversationId, name: String, manual: bool) -> Result<()>;
}

/// Whose consumption a usage query sums up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UsageScope {
    User(UserId),
    Group(String),
}

/// One usage increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub user_id: UserId,
    pub user_group: Option<String>,
    /// Provider key.
    pub llm: String,
    pub model: String,
    pub count: u64,
    /// Milliseconds since the Unix epoch.
    pub at: u64,
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Add to the counters. Implementations must make this an atomic increment.
    async fn increment(&self, record: UsageRecord) -> Result<()>;

    /// Total count for `scope` recorded at or after `since` (epoch millis).
    async fn sum_since(&self, scope: &UsageScope, since: u64) -> Result<u64>;
}
