//! Conversation state management.
//!
//! This module provides in-memory storage for chat conversations. Each
//! conversation is identified by UUID and holds its transcript, the knowledge
//! base session it continues, and its own copy of the prompt templates.
//!
//! # Architecture
//!
//! - [`Conversation`]: Shared handle; turns lock its [`ConversationState`]
//!   through a [`ConversationGuard`], while listing reads a snapshot
//! - [`ConversationStore`]: Thread-safe registry of live conversations
//!
//! # Example
//!
//! ```rust
//! use kb_chat::session::{ConversationStore, Role};
//!
//! let store = ConversationStore::new("generation prompt", "orchestration prompt");
//! let conversation = store.create();
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! runtime.block_on(async {
//!     let mut state = conversation.lock().await;
//!     state.record_user("Hello!");
//!     assert_eq!(state.turns[0].role, Role::User);
//! });
//! ```

mod conversation;
mod store;

pub use conversation::{
    ChatTurn, Conversation, ConversationGuard, ConversationState, ConversationSummary,
    MAX_NAME_CHARS, Role,
};
pub use store::ConversationStore;
