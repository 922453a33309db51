//! One question/answer turn against the knowledge base.

use chrono::{DateTime, Utc};

use crate::bedrock::{KnowledgeBaseClient, RetrieveAndGenerateRequest};
use crate::citation::Reference;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::stream::{AggregateOptions, aggregate};

/// Placeholder substituted with the request time in both prompts.
pub const CURRENT_TIME_PLACEHOLDER: &str = "{current_time}";

/// Annotated answer of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    /// Session to continue with. Falls back to the caller's session when the
    /// endpoint did not report one.
    pub session_id: Option<String>,
    /// Answer text with inline citation markers.
    pub text: String,
    /// References in marker order.
    pub references: Vec<Reference>,
}

/// Replace every `{current_time}` with `now` as `YYYY-MM-DD HH:MM:SS UTC`.
pub fn fill_prompt(template: &str, now: DateTime<Utc>) -> String {
    template.replace(
        CURRENT_TIME_PLACEHOLDER,
        &now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

/// Ask `question`, drain the answer stream and splice its citations.
///
/// The prompts must keep the knowledge base placeholders
/// (`$search_results$` for generation; `$conversation_history$` and
/// `$output_format_instructions$` for orchestration). They are passed
/// through unchecked.
#[tracing::instrument(
    name = "chat.turn",
    skip_all,
    fields(continues_session = session_id.is_some(), question_length = question.len())
)]
pub async fn chat_with_model(
    client: &dyn KnowledgeBaseClient,
    config: &ChatConfig,
    session_id: Option<&str>,
    question: &str,
    generation_prompt: &str,
    orchestration_prompt: &str,
) -> Result<ChatOutcome> {
    if question.trim().is_empty() {
        return Err(ChatError::InvalidInput("question must not be empty".to_string()));
    }

    let now = Utc::now();
    let request = RetrieveAndGenerateRequest::build(
        config,
        question,
        session_id,
        &fill_prompt(generation_prompt, now),
        &fill_prompt(orchestration_prompt, now),
    );

    let started = std::time::Instant::now();
    let events = client.retrieve_and_generate_stream(&request).await?;
    let aggregated = aggregate(
        events,
        AggregateOptions {
            deadline: Some(config.stream_deadline()),
            keep_partial: false,
        },
    )
    .await?;

    let (text, references) = aggregated.annotate()?;
    let session_id = aggregated
        .session_id
        .or_else(|| session_id.map(str::to_string));

    tracing::info!(
        name: "chat.turn.completed",
        session_id = session_id.as_deref().unwrap_or(""),
        answer_length = aggregated.full_text.len(),
        citation_count = aggregated.groups.len(),
        reference_count = references.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Chat turn completed"
    );

    Ok(ChatOutcome {
        session_id,
        text,
        references,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use futures::stream;

    use super::*;
    use crate::bedrock::EventStream;
    use crate::bedrock::request::tests::sample_config;
    use crate::citation::ReferencedChunk;
    use crate::stream::{Span, StreamEvent};

    /// Replays canned events and records the requests it saw.
    struct ScriptedClient {
        events: Vec<StreamEvent>,
        seen: Mutex<Vec<serde_json::Value>>,
    }

    impl ScriptedClient {
        fn new(events: Vec<StreamEvent>) -> Self {
            Self {
                events,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl KnowledgeBaseClient for ScriptedClient {
        async fn retrieve_and_generate_stream(
            &self,
            request: &RetrieveAndGenerateRequest,
        ) -> Result<EventStream> {
            self.seen
                .lock()
                .unwrap()
                .push(serde_json::to_value(request).unwrap());
            Ok(Box::pin(stream::iter(self.events.clone().into_iter().map(Ok))))
        }
    }

    fn answer_events() -> Vec<StreamEvent> {
        vec![
            StreamEvent::SessionMarker {
                id: "sess-1".to_string(),
            },
            StreamEvent::OutputChunk {
                text: "The sky is blue.".to_string(),
            },
            StreamEvent::OutputChunk {
                text: " Water is wet.".to_string(),
            },
            StreamEvent::Citation {
                span: Span { start: 0, end: 16 },
                references: vec![ReferencedChunk::new("Skies", "s3://kb/sky.pdf")],
            },
            StreamEvent::Citation {
                span: Span { start: 17, end: 30 },
                references: vec![
                    ReferencedChunk::new("Water", "s3://kb/water.pdf"),
                    ReferencedChunk::new("Wet", "s3://kb/wet.pdf"),
                ],
            },
        ]
    }

    #[test]
    fn test_fill_prompt() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            fill_prompt("at {current_time} and {current_time}", now),
            "at 2025-01-02 03:04:05 UTC and 2025-01-02 03:04:05 UTC"
        );
        assert_eq!(fill_prompt("$search_results$", now), "$search_results$");
    }

    #[tokio::test]
    async fn test_chat_turn_annotates_answer() {
        let client = ScriptedClient::new(answer_events());
        let config = sample_config();

        let outcome = chat_with_model(&client, &config, None, "Why?", "G {current_time}", "O")
            .await
            .unwrap();

        assert_eq!(outcome.session_id.as_deref(), Some("sess-1"));
        assert_eq!(
            outcome.text,
            concat!(
                r##"The sky is blue.<a href="#ref-1" target="_self">[1]</a>"##,
                r##" Water is wet.<a href="#ref-2" target="_self">[2]</a><a href="#ref-3" target="_self">[3]</a>"##
            )
        );
        let ids: Vec<usize> = outcome.references.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(outcome.references[2].source, "s3://kb/wet.pdf");

        let seen = client.seen.lock().unwrap();
        let prompt = seen[0]["retrieveAndGenerateConfiguration"]["knowledgeBaseConfiguration"]
            ["generationConfiguration"]["promptTemplate"]["textPromptTemplate"]
            .as_str()
            .unwrap();
        assert!(prompt.starts_with("G "));
        assert!(prompt.ends_with(" UTC"));
        assert!(!prompt.contains("{current_time}"));
    }

    #[tokio::test]
    async fn test_session_is_forwarded_and_kept_without_marker() {
        let client = ScriptedClient::new(vec![StreamEvent::OutputChunk {
            text: "No sources.".to_string(),
        }]);
        let config = sample_config();

        let outcome = chat_with_model(&client, &config, Some("prior"), "q", "G", "O")
            .await
            .unwrap();

        assert_eq!(outcome.session_id.as_deref(), Some("prior"));
        assert_eq!(outcome.text, "No sources.");
        assert!(outcome.references.is_empty());
        assert_eq!(client.seen.lock().unwrap()[0]["sessionId"], "prior");
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected_before_calling() {
        let client = ScriptedClient::new(answer_events());
        let config = sample_config();

        let err = chat_with_model(&client, &config, None, "  ", "G", "O")
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::InvalidInput(_)));
        assert!(client.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_span_fails_the_turn() {
        let client = ScriptedClient::new(vec![
            StreamEvent::OutputChunk {
                text: "short".to_string(),
            },
            StreamEvent::Citation {
                span: Span { start: 0, end: 99 },
                references: vec![ReferencedChunk::new("x", "s3://kb/x.pdf")],
            },
        ]);
        let config = sample_config();

        let err = chat_with_model(&client, &config, None, "q", "G", "O")
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::InvalidSpan { end: 99, len: 5 }));
    }
}
