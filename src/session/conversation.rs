//! A single chat conversation and its turn history.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::bedrock::KnowledgeBaseClient;
use crate::chat::{ChatOutcome, chat_with_model};
use crate::citation::Reference;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::format::{clean_html_text, escape_dollars};

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    /// Display text. Assistant text is already cleaned for the page.
    pub text: String,
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Stable id, used to key reference anchors per turn in the page.
    pub unique_id: Uuid,
    /// Knowledge base session in effect after this turn.
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    fn new(role: Role, text: String, references: Vec<Reference>, session_id: Option<String>) -> Self {
        Self {
            role,
            text,
            references,
            unique_id: Uuid::new_v4(),
            session_id,
            created_at: Utc::now(),
        }
    }
}

/// Mutable state of a conversation: the knowledge base session, the
/// transcript and the prompts used for the next turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: Option<String>,
    pub turns: Vec<ChatTurn>,
    pub generation_prompt: String,
    pub orchestration_prompt: String,
}

impl ConversationState {
    pub fn new(generation_prompt: impl Into<String>, orchestration_prompt: impl Into<String>) -> Self {
        Self {
            session_id: None,
            turns: Vec::new(),
            generation_prompt: generation_prompt.into(),
            orchestration_prompt: orchestration_prompt.into(),
        }
    }

    pub fn record_user(&mut self, question: &str) -> &ChatTurn {
        self.push(ChatTurn::new(
            Role::User,
            question.to_string(),
            Vec::new(),
            self.session_id.clone(),
        ))
    }

    /// Store an answer for display and adopt its session id.
    pub fn record_assistant(&mut self, outcome: ChatOutcome) -> &ChatTurn {
        if outcome.session_id.is_some() {
            self.session_id = outcome.session_id;
        }
        let references = outcome
            .references
            .into_iter()
            .map(|r| Reference {
                text: escape_dollars(&r.text),
                ..r
            })
            .collect();
        self.push(ChatTurn::new(
            Role::Assistant,
            clean_html_text(&outcome.text),
            references,
            self.session_id.clone(),
        ))
    }

    /// Forget the transcript and the knowledge base session.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.session_id = None;
    }

    fn push(&mut self, turn: ChatTurn) -> &ChatTurn {
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }
}

/// Longest accepted conversation name, in chars.
pub const MAX_NAME_CHARS: usize = 50;

/// Shared handle to a conversation.
///
/// Cloning is cheap. The state sits behind an async mutex that a chat turn
/// holds for its whole duration, so turns of one conversation never overlap.
/// Listing reads a separate snapshot and never waits on a running turn.
#[derive(Debug, Clone)]
pub struct Conversation {
    inner: Arc<ConversationInner>,
}

#[derive(Debug)]
struct ConversationInner {
    id: Uuid,
    created_at: DateTime<Utc>,
    /// Unix millis of the last lock.
    last_activity: AtomicI64,
    meta: RwLock<ConversationMeta>,
    state: Mutex<ConversationState>,
}

/// What listing needs, republished whenever the state changes.
#[derive(Debug, Clone)]
struct ConversationMeta {
    name: String,
    turn_count: usize,
    session_id: Option<String>,
}

/// Listing view of a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub turn_count: usize,
    pub session_id: Option<String>,
    /// A turn is in flight; `turn_count` includes its question.
    pub busy: bool,
}

/// Locked state of a conversation. Changes are republished to the listing
/// snapshot when the guard is dropped.
#[derive(Debug)]
pub struct ConversationGuard<'a> {
    conversation: &'a Conversation,
    state: MutexGuard<'a, ConversationState>,
}

impl ConversationGuard<'_> {
    fn publish(&self) {
        let mut meta = self
            .conversation
            .inner
            .meta
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        meta.turn_count = self.state.turns.len();
        meta.session_id.clone_from(&self.state.session_id);
    }
}

impl Deref for ConversationGuard<'_> {
    type Target = ConversationState;

    fn deref(&self) -> &ConversationState {
        &self.state
    }
}

impl DerefMut for ConversationGuard<'_> {
    fn deref_mut(&mut self) -> &mut ConversationState {
        &mut self.state
    }
}

impl Drop for ConversationGuard<'_> {
    fn drop(&mut self) {
        self.publish();
    }
}

impl Conversation {
    pub(super) fn new(id: Uuid, state: ConversationState) -> Self {
        let now = Utc::now();
        let meta = ConversationMeta {
            name: readable_name(&id),
            turn_count: state.turns.len(),
            session_id: state.session_id.clone(),
        };
        Self {
            inner: Arc::new(ConversationInner {
                id,
                created_at: now,
                last_activity: AtomicI64::new(now.timestamp_millis()),
                meta: RwLock::new(meta),
                state: Mutex::new(state),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.meta().name
    }

    /// Set the display name. Surrounding whitespace is trimmed.
    pub fn rename(&self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("name must not be empty".to_string()));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(ChatError::InvalidInput(format!(
                "name must be at most {MAX_NAME_CHARS} characters"
            )));
        }
        self.write_meta().name = name.to_string();
        Ok(name.to_string())
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.inner.last_activity.load(Ordering::Relaxed))
            .unwrap_or(self.inner.created_at)
    }

    /// Lock the state, waiting for any running turn to finish.
    pub async fn lock(&self) -> ConversationGuard<'_> {
        let state = self.inner.state.lock().await;
        self.touch();
        ConversationGuard {
            conversation: self,
            state,
        }
    }

    /// True while a turn holds the state.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.state.try_lock().is_err()
    }

    /// Run one turn. The question is recorded before the call; the answer
    /// only if the call succeeds.
    pub async fn ask(
        &self,
        client: &dyn KnowledgeBaseClient,
        config: &ChatConfig,
        question: &str,
    ) -> Result<ChatTurn> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::InvalidInput("question must not be empty".to_string()));
        }

        let mut state = self.lock().await;
        state.record_user(question);
        state.publish();

        let outcome = chat_with_model(
            client,
            config,
            state.session_id.as_deref(),
            question,
            &state.generation_prompt,
            &state.orchestration_prompt,
        )
        .await?;

        Ok(state.record_assistant(outcome).clone())
    }

    /// Start over in place: no history, no knowledge base session and a
    /// fresh name. Prompts are kept.
    pub async fn clear(&self) {
        let mut state = self.lock().await;
        state.clear();
        self.write_meta().name = readable_name(&Uuid::new_v4());
    }

    /// Never waits on a running turn.
    #[must_use]
    pub fn summary(&self) -> ConversationSummary {
        let meta = self.meta();
        ConversationSummary {
            id: self.inner.id,
            name: meta.name,
            created_at: self.inner.created_at,
            last_activity: self.last_activity(),
            turn_count: meta.turn_count,
            session_id: meta.session_id,
            busy: self.is_busy(),
        }
    }

    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        // Negative means clock skew; treat as fresh.
        (Utc::now() - self.last_activity())
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }

    fn meta(&self) -> ConversationMeta {
        self.inner
            .meta
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_meta(&self) -> RwLockWriteGuard<'_, ConversationMeta> {
        self.inner
            .meta
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        self.inner
            .last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(super) fn set_last_activity(&self, at: DateTime<Utc>) {
        self.inner
            .last_activity
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }
}

const ADJECTIVES: [&str; 16] = [
    "amber", "brave", "calm", "clever", "eager", "gentle", "golden", "happy", "keen", "lively",
    "lucky", "merry", "quiet", "swift", "tidy", "witty",
];

const ANIMALS: [&str; 16] = [
    "badger", "beaver", "crane", "falcon", "ferret", "heron", "lynx", "marten", "otter", "owl",
    "panda", "puffin", "raven", "seal", "stoat", "wren",
];

/// Two-word display name derived from the id, e.g. `swift-otter`.
fn readable_name(id: &Uuid) -> String {
    let bytes = id.as_bytes();
    format!(
        "{}-{}",
        ADJECTIVES[usize::from(bytes[0]) % ADJECTIVES.len()],
        ANIMALS[usize::from(bytes[1]) % ANIMALS.len()]
    )
}
