//! Browser chat over a Bedrock Knowledge Base
//!
//! Forwards questions to the managed `RetrieveAndGenerateStream` API and
//! renders answers with inline, numbered citation links.
//!
//! # Architecture
//!
//! - **Stream aggregation**: rebuilds the full answer, its citation spans and
//!   the session id from the incremental event stream
//! - **Citation splicing**: inserts reference markers at span ends while
//!   earlier insertions shift later offsets
//! - **Server**: Axum JSON API plus a single HTML page
//!
//! # Modules
//!
//! - [`stream`]: Event model and the stream aggregator
//! - [`citation`]: Citation records and the splicer
//! - [`bedrock`]: Signed, streaming knowledge base client
//! - [`chat`]: One question/answer turn
//! - [`format`]: Display clean-up of answer text
//! - [`session`]: Conversation state management

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod bedrock;
pub mod chat;
pub mod citation;
pub mod config;
pub mod error;
pub mod format;
pub mod page;
pub mod rate_limit;
pub mod server;
pub mod session;
pub mod stream;

use crate::bedrock::KnowledgeBaseClient;
use crate::config::AppConfig;
use crate::rate_limit::RequestRateLimiter;

use session::ConversationStore;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Global Configuration
    pub config: Arc<AppConfig>,
    /// Knowledge base every chat turn is sent to.
    pub client: Arc<dyn KnowledgeBaseClient>,
    /// Conversation store.
    pub conversations: ConversationStore,
    /// Global Rate Limiter
    pub rate_limiter: Arc<RequestRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, client: Arc<dyn KnowledgeBaseClient>) -> Self {
        Self {
            conversations: ConversationStore::from_config(&config.bedrock),
            rate_limiter: Arc::new(RequestRateLimiter::new(&config.resilience)),
            config,
            client,
        }
    }
}
