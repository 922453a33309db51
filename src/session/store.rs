//! In-memory conversation registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use uuid::Uuid;

use super::conversation::{Conversation, ConversationState};
use crate::config::ChatConfig;

/// Thread-safe store of conversations keyed by UUID.
///
/// New conversations start from the configured prompts; each one can then
/// edit its own copy.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    generation_prompt: String,
    orchestration_prompt: String,
}

impl ConversationStore {
    #[must_use]
    pub fn new(generation_prompt: impl Into<String>, orchestration_prompt: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                conversations: RwLock::new(HashMap::new()),
                generation_prompt: generation_prompt.into(),
                orchestration_prompt: orchestration_prompt.into(),
            }),
        }
    }

    /// Store seeded with the prompts of `config`.
    #[must_use]
    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(
            config.generation_config.prompt.clone(),
            config.orchestration_config.prompt.clone(),
        )
    }

    #[must_use]
    pub fn create(&self) -> Conversation {
        self.create_with_id(Uuid::new_v4())
    }

    #[must_use]
    pub fn create_with_id(&self, id: Uuid) -> Conversation {
        let conversation = Conversation::new(
            id,
            ConversationState::new(
                self.inner.generation_prompt.clone(),
                self.inner.orchestration_prompt.clone(),
            ),
        );
        self.write().insert(id, conversation.clone());
        tracing::debug!(conversation_id = %id, name = %conversation.name(), "Conversation created");
        conversation
    }

    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<Conversation> {
        self.read().get(id).cloned()
    }

    #[must_use]
    pub fn get_or_create(&self, id: Uuid) -> Conversation {
        if let Some(conversation) = self.get(&id) {
            return conversation;
        }
        // Re-check under the write lock so racing callers share one entry.
        let mut guard = self.write();
        guard
            .entry(id)
            .or_insert_with(|| {
                Conversation::new(
                    id,
                    ConversationState::new(
                        self.inner.generation_prompt.clone(),
                        self.inner.orchestration_prompt.clone(),
                    ),
                )
            })
            .clone()
    }

    /// Drop a conversation with its history and knowledge base session.
    pub fn remove(&self, id: &Uuid) -> Option<Conversation> {
        self.write().remove(id)
    }

    /// All conversations, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<Conversation> {
        let mut all: Vec<Conversation> = self.read().values().cloned().collect();
        all.sort_by_key(Conversation::created_at);
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove conversations idle longer than `timeout`. A conversation with a
    /// turn in flight is never removed.
    ///
    /// Returns the number removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = self.write();
        let before = guard.len();
        guard.retain(|_, c| c.is_busy() || !c.is_expired_with_timeout(timeout));
        before - guard.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Conversation>> {
        self.inner
            .conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Conversation>> {
        self.inner
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
