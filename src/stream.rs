//! Reassembly of a streamed knowledge-base answer.
//!
//! The endpoint interleaves text chunks with citation events whose spans
//! refer to the *complete* answer, so citations are collected during the
//! stream and resolved in one pass afterwards by
//! [`splice`](crate::citation::splice).

use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::citation::{CitationGroup, Reference, ReferencedChunk, try_splice};
use crate::error::{ChatError, Result};

/// Character interval `[start, end]` over the full answer text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// First cited character.
    pub start: usize,
    /// Offset just past the cited text.
    pub end: usize,
}

/// One decoded event of a streaming answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of generated text.
    OutputChunk {
        /// Text to append.
        text: String,
    },
    /// A citation over a span of the full answer.
    Citation {
        /// Span in full-text coordinates.
        span: Span,
        /// Supporting source fragments, in order.
        references: Vec<ReferencedChunk>,
    },
    /// Conversation identifier assigned by the endpoint.
    SessionMarker {
        /// Opaque session id.
        id: String,
    },
}

/// Result of draining a stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregated {
    /// First session id seen, if any.
    pub session_id: Option<String>,
    /// Concatenation of every output chunk in stream order.
    pub full_text: String,
    /// Citations in arrival order.
    pub groups: Vec<CitationGroup>,
}

impl Aggregated {
    /// Splice the collected citations into the text.
    pub fn annotate(&self) -> Result<(String, Vec<Reference>)> {
        try_splice(&self.full_text, &self.groups)
    }
}

/// Push-style accumulator behind [`aggregate`].
#[derive(Debug, Default)]
pub struct StreamAggregator {
    state: Aggregated,
}

impl StreamAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the running state.
    pub fn push(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::OutputChunk { text } => {
                tracing::trace!(delta_length = text.len(), "Output chunk");
                self.state.full_text.push_str(&text);
            }
            StreamEvent::Citation { span, references } => {
                tracing::trace!(
                    start = span.start,
                    end = span.end,
                    reference_count = references.len(),
                    "Citation collected"
                );
                self.state.groups.push(CitationGroup {
                    start: span.start,
                    end: span.end,
                    references,
                });
            }
            StreamEvent::SessionMarker { id } => {
                if self.state.session_id.is_none() {
                    tracing::debug!(session_id = %id, "Session id captured");
                    self.state.session_id = Some(id);
                } else {
                    tracing::debug!(session_id = %id, "Ignoring repeated session marker");
                }
            }
        }
    }

    /// Text buffered so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.state.full_text
    }

    /// Consume the aggregator.
    #[must_use]
    pub fn finish(self) -> Aggregated {
        self.state
    }
}

impl Extend<StreamEvent> for StreamAggregator {
    fn extend<I: IntoIterator<Item = StreamEvent>>(&mut self, iter: I) {
        for event in iter {
            self.push(event);
        }
    }
}

/// How [`aggregate`] treats slow or broken streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateOptions {
    /// Give up if the stream has not ended after this long.
    pub deadline: Option<Duration>,
    /// Attach whatever was buffered to the failure.
    pub keep_partial: bool,
}

/// A stream that ended abnormally.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct AggregateFailure {
    /// The transport or deadline error, unchanged.
    #[source]
    pub error: ChatError,
    /// Buffered state, only when [`AggregateOptions::keep_partial`] was set.
    pub partial: Option<Aggregated>,
}

impl From<AggregateFailure> for ChatError {
    fn from(failure: AggregateFailure) -> Self {
        failure.error
    }
}

/// Drain `events` into an [`Aggregated`] answer.
///
/// The first `Err` item ends the drain and is returned as-is; nothing
/// buffered up to that point is surfaced unless the caller opted in with
/// `keep_partial`.
pub async fn aggregate<S>(
    events: S,
    options: AggregateOptions,
) -> std::result::Result<Aggregated, AggregateFailure>
where
    S: Stream<Item = Result<StreamEvent>>,
{
    let mut aggregator = StreamAggregator::new();

    let outcome = {
        let drain = drain(events, &mut aggregator);
        match options.deadline {
            Some(limit) => tokio::time::timeout(limit, drain)
                .await
                .unwrap_or(Err(ChatError::Deadline(limit))),
            None => drain.await,
        }
    };

    match outcome {
        Ok(()) => Ok(aggregator.finish()),
        Err(error) => {
            tracing::warn!(
                error = %error,
                buffered_length = aggregator.text().len(),
                keep_partial = options.keep_partial,
                "Answer stream failed"
            );
            Err(AggregateFailure {
                error,
                partial: options.keep_partial.then(|| aggregator.finish()),
            })
        }
    }
}

async fn drain<S>(events: S, aggregator: &mut StreamAggregator) -> Result<()>
where
    S: Stream<Item = Result<StreamEvent>>,
{
    futures::pin_mut!(events);
    while let Some(event) = events.next().await {
        aggregator.push(event?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunk(text: &str) -> Result<StreamEvent> {
        Ok(StreamEvent::OutputChunk {
            text: text.to_string(),
        })
    }

    fn citation(start: usize, end: usize, locations: &[&str]) -> Result<StreamEvent> {
        Ok(StreamEvent::Citation {
            span: Span { start, end },
            references: locations
                .iter()
                .map(|l| ReferencedChunk::new("fragment", *l))
                .collect(),
        })
    }

    fn session(id: &str) -> Result<StreamEvent> {
        Ok(StreamEvent::SessionMarker { id: id.to_string() })
    }

    #[tokio::test]
    async fn test_stream_reconstruction() {
        let events = stream::iter(vec![
            chunk("A"),
            citation(0, 1, &["s3://kb/a.pdf"]),
            chunk("B"),
            session("s1"),
        ]);

        let out = aggregate(events, AggregateOptions::default()).await.unwrap();

        assert_eq!(out.full_text, "AB");
        assert_eq!(out.session_id.as_deref(), Some("s1"));
        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.groups[0].start, 0);
        assert_eq!(out.groups[0].end, 1);
        assert_eq!(out.groups[0].references[0].location, "s3://kb/a.pdf");
    }

    #[tokio::test]
    async fn test_first_session_marker_wins() {
        let events = stream::iter(vec![session("first"), chunk("x"), session("second")]);

        let out = aggregate(events, AggregateOptions::default()).await.unwrap();

        assert_eq!(out.session_id.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_citations_keep_arrival_order() {
        let events = stream::iter(vec![
            chunk("one two"),
            citation(4, 7, &["late"]),
            citation(0, 3, &["early"]),
        ]);

        let out = aggregate(events, AggregateOptions::default()).await.unwrap();

        let ends: Vec<usize> = out.groups.iter().map(|g| g.end).collect();
        assert_eq!(ends, vec![7, 3]);
    }

    #[tokio::test]
    async fn test_error_drops_partial_by_default() {
        let events = stream::iter(vec![
            chunk("half an ans"),
            Err(ChatError::Stream("connection reset".to_string())),
            chunk("wer"),
        ]);

        let failure = aggregate(events, AggregateOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(failure.error, ChatError::Stream(ref m) if m == "connection reset"));
        assert!(failure.partial.is_none());
    }

    #[tokio::test]
    async fn test_error_keeps_partial_on_request() {
        let events = stream::iter(vec![
            chunk("half"),
            citation(0, 4, &["s3://kb/h.pdf"]),
            Err(ChatError::Stream("connection reset".to_string())),
        ]);
        let options = AggregateOptions {
            keep_partial: true,
            ..AggregateOptions::default()
        };

        let failure = aggregate(events, options).await.unwrap_err();

        let partial = failure.partial.unwrap();
        assert_eq!(partial.full_text, "half");
        assert_eq!(partial.groups.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_stalled_stream() {
        let events = stream::iter(vec![chunk("stuck")]).chain(stream::pending());
        let options = AggregateOptions {
            deadline: Some(Duration::from_secs(5)),
            keep_partial: true,
        };

        let failure = aggregate(events, options).await.unwrap_err();

        assert!(matches!(failure.error, ChatError::Deadline(d) if d == Duration::from_secs(5)));
        assert_eq!(failure.partial.unwrap().full_text, "stuck");
    }

    #[test]
    fn test_push_style_aggregation() {
        let mut aggregator = StreamAggregator::new();
        aggregator.extend([
            StreamEvent::OutputChunk {
                text: "The sky is blue.".to_string(),
            },
            StreamEvent::Citation {
                span: Span { start: 0, end: 16 },
                references: vec![ReferencedChunk::new("sky", "s3://kb/sky.pdf")],
            },
        ]);

        let (text, refs) = aggregator.finish().annotate().unwrap();

        assert!(text.ends_with("[1]</a>"));
        assert_eq!(refs.len(), 1);
    }
}
