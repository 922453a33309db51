//! Bedrock Knowledge Base runtime: request body, SigV4 signing, event
//! stream framing and the streaming client.

pub mod client;
pub mod events;
pub mod eventstream;
pub mod request;
pub mod signing;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::stream::StreamEvent;

pub use client::{BedrockKnowledgeBase, SESSION_ID_HEADER};
pub use request::RetrieveAndGenerateRequest;
pub use signing::AwsCredentials;

/// Decoded answer stream of one request.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// A knowledge base that answers a question as a stream of events.
///
/// Implemented by [`BedrockKnowledgeBase`]; tests script their own.
#[async_trait]
pub trait KnowledgeBaseClient: Send + Sync {
    /// Send the request and return its event stream.
    ///
    /// Errors before the first event (transport, status, signing) are
    /// returned directly; errors after that arrive as stream items.
    async fn retrieve_and_generate_stream(
        &self,
        request: &RetrieveAndGenerateRequest,
    ) -> Result<EventStream>;
}
