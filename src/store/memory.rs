//! In-memory stores.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::{
    Conversation, ConversationStore, MessageStore, MessageUpdate, UsageRecord, UsageScope,
    UsageStore,
};
use crate::types::message::{now_millis, ConversationId, MessageId, NewMessage, StoredMessage};
use crate::{Error, Result};

fn poisoned<T>(_: T) -> Error {
    Error::Persistence("store lock poisoned".into())
}

#[derive(Default)]
struct Messages {
    next_id: MessageId,
    rows: BTreeMap<MessageId, StoredMessage>,
}

/// Message store backed by a map; ids are assigned sequentially.
#[derive(Clone)]
pub struct InMemoryMessageStore {
    inner: Arc<RwLock<Messages>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::with_next_id(1)
    }

    /// Start id assignment at `next_id`.
    pub fn with_next_id(next_id: MessageId) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Messages {
                next_id,
                rows: BTreeMap::new(),
            })),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent write fail, to exercise persistence failures.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All messages of a conversation in id order.
    pub fn messages(&self, conversation_id: ConversationId) -> Vec<StoredMessage> {
        self.inner
            .read()
            .map(|m| {
                m.rows
                    .values()
                    .filter(|r| r.conversation_id == conversation_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("writes are disabled".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save(&self, message: NewMessage) -> Result<StoredMessage> {
        self.check_writable()?;
        let mut inner = self.inner.write().map_err(poisoned)?;
        let id = inner.next_id;
        inner.next_id += 1;

        let now = now_millis();
        let stored = StoredMessage {
            id,
            conversation_id: message.conversation_id,
            parent_id: message.parent_id,
            role: message.role,
            content: message.content,
            tools: message.tools,
            sources: message.sources,
            debug: message.debug,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, id: MessageId, update: MessageUpdate) -> Result<StoredMessage> {
        self.check_writable()?;
        let mut inner = self.inner.write().map_err(poisoned)?;
        let row = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("message {}", id)))?;
        row.content = update.content;
        row.tools = update.tools;
        row.sources = update.sources;
        row.debug = update.debug;
        row.updated_at = now_millis();
        Ok(row.clone())
    }

    async fn find(&self, id: MessageId) -> Result<Option<StoredMessage>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.rows.get(&id).cloned())
    }

    async fn find_latest(&self, conversation_id: ConversationId) -> Result<Option<StoredMessage>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .rows
            .values()
            .rev()
            .find(|r| r.conversation_id == conversation_id)
            .cloned())
    }

    async fn thread(
        &self,
        conversation_id: ConversationId,
        leaf: Option<MessageId>,
    ) -> Result<Vec<StoredMessage>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut thread = Vec::new();
        let mut cursor = leaf;
        while let Some(id) = cursor {
            match inner.rows.get(&id) {
                Some(row) if row.conversation_id == conversation_id => {
                    cursor = row.parent_id;
                    thread.push(row.clone());
                }
                _ => break,
            }
            // Stop on parent cycles.
            if thread.len() > inner.rows.len() {
                break;
            }
        }
        thread.reverse();
        Ok(thread)
    }
}

/// Conversations keyed by id.
#[derive(Clone, Default)]
pub struct InMemoryConversationStore {
    rows: Arc<RwLock<BTreeMap<ConversationId, Conversation>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conversation: Conversation) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert(conversation.id, conversation);
        }
    }

    pub fn get(&self, id: ConversationId) -> Option<Conversation> {
        self.rows.read().ok().and_then(|rows| rows.get(&id).cloned())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn find(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self.rows.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn rename(&self, id: ConversationId, name: String, manual: bool) -> Result<()> {
        let mut rows = self.rows.write().map_err(poisoned)?;
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("conversation {}", id)))?;
        row.name = Some(name);
        row.is_name_set_manually = manual;
        Ok(())
    }
}

/// Usage counters kept as a list of increments.
#[derive(Clone, Default)]
pub struct InMemoryUsageStore {
    records: Arc<RwLock<Vec<UsageRecord>>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn increment(&self, record: UsageRecord) -> Result<()> {
        self.records.write().map_err(poisoned)?.push(record);
        Ok(())
    }

    async fn sum_since(&self, scope: &UsageScope, since: u64) -> Result<u64> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .iter()
            .filter(|r| r.at >= since)
            .filter(|r| match scope {
                UsageScope::User(id) => &r.user_id == id,
                UsageScope::Group(group) => r.user_group.as_deref() == Some(group.as_str()),
            })
            .map(|r| r.count)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::{ContentPart, MessageRole};

    fn message(conversation_id: ConversationId, parent_id: Option<MessageId>, text: &str) -> NewMessage {
        NewMessage {
            conversation_id,
            parent_id,
            role: MessageRole::Human,
            content: vec![ContentPart::text(text)],
            tools: vec![],
            sources: vec![],
            debug: vec![],
        }
    }

    #[tokio::test]
    async fn thread_follows_parent_links() {
        let store = InMemoryMessageStore::new();
        let a = store.save(message(1, None, "a")).await.unwrap();
        let b = store.save(message(1, Some(a.id), "b")).await.unwrap();
        let _sibling = store.save(message(1, Some(a.id), "b'")).await.unwrap();
        let c = store.save(message(1, Some(b.id), "c")).await.unwrap();
        store.save(message(2, None, "other")).await.unwrap();

        let thread = store.thread(1, Some(c.id)).await.unwrap();
        let texts: Vec<_> = thread.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert!(store.thread(1, None).await.unwrap().is_empty());
        assert_eq!(store.find_latest(1).await.unwrap().unwrap().id, c.id);
    }

    #[tokio::test]
    async fn update_replaces_in_place() {
        let store = InMemoryMessageStore::with_next_id(42);
        let m = store.save(message(1, None, "old")).await.unwrap();
        assert_eq!(m.id, 42);

        let updated = store
            .update(
                m.id,
                MessageUpdate {
                    content: vec![ContentPart::text("new")],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.text(), "new");
        assert_eq!(store.len(), 1);
        assert!(matches!(
            store.update(7, MessageUpdate::default()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn usage_sums_per_scope_and_window() {
        let store = InMemoryUsageStore::new();
        for (user, group, at) in [("u1", "g1", 10), ("u2", "g1", 20), ("u1", "g1", 5)] {
            store
                .increment(UsageRecord {
                    user_id: user.into(),
                    user_group: Some(group.into()),
                    llm: "openai".into(),
                    model: "gpt".into(),
                    count: 100,
                    at,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.sum_since(&UsageScope::User("u1".into()), 0).await.unwrap(), 200);
        assert_eq!(store.sum_since(&UsageScope::Group("g1".into()), 10).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn conversations_are_renamed_in_place() {
        let store = InMemoryConversationStore::new();
        store.insert(Conversation::new(3));

        store.rename(3, "Travel plans".into(), false).await.unwrap();
        let row = store.find(3).await.unwrap().unwrap();
        assert_eq!(row.name.as_deref(), Some("Travel plans"));
        assert!(!row.is_name_set_manually);
        assert!(matches!(
            store.rename(4, "x".into(), false).await,
            Err(Error::NotFound(_))
        ));
    }
}
