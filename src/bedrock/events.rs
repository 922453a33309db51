//! Mapping of decoded frames onto [`StreamEvent`]s.

use serde::Deserialize;

use super::eventstream::Message;
use crate::citation::{Metadata, ReferencedChunk};
use crate::error::{ChatError, Result};
use crate::stream::{Span, StreamEvent};

#[derive(Debug, Deserialize)]
struct OutputPayload {
    text: String,
}

/// Citation events arrive either bare or wrapped in a `citation` object,
/// depending on API version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CitationPayload {
    Nested { citation: CitationBody },
    Flat(CitationBody),
}

impl CitationPayload {
    fn into_body(self) -> CitationBody {
        match self {
            Self::Nested { citation } | Self::Flat(citation) => citation,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CitationBody {
    generated_response_part: GeneratedResponsePart,
    #[serde(default)]
    retrieved_references: Vec<RetrievedReference>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedResponsePart {
    text_response_part: TextResponsePart,
}

#[derive(Debug, Deserialize)]
struct TextResponsePart {
    span: Span,
}

#[derive(Debug, Deserialize)]
struct RetrievedReference {
    #[serde(default)]
    content: ReferenceContent,
    #[serde(default)]
    location: ReferenceLocation,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Default, Deserialize)]
struct ReferenceContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceLocation {
    s3_location: Option<UriLocation>,
    web_location: Option<UrlLocation>,
}

#[derive(Debug, Deserialize)]
struct UriLocation {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct UrlLocation {
    url: String,
}

impl ReferenceLocation {
    fn into_locator(self) -> String {
        self.s3_location
            .map(|l| l.uri)
            .or_else(|| self.web_location.map(|l| l.url))
            .unwrap_or_default()
    }
}

impl From<RetrievedReference> for ReferencedChunk {
    fn from(reference: RetrievedReference) -> Self {
        Self {
            content: reference.content.text,
            location: reference.location.into_locator(),
            metadata: reference.metadata.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExceptionPayload {
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

/// Turn one frame into an event.
///
/// Exception frames become [`ChatError::Api`]; guardrail traces and event
/// types this client does not use yield `Ok(None)`.
pub fn decode_message(message: &Message) -> Result<Option<StreamEvent>> {
    if message.is_exception() {
        let kind = message.exception_type().unwrap_or("UnknownException");
        let detail = serde_json::from_slice::<ExceptionPayload>(message.payload())
            .ok()
            .and_then(|p| p.message)
            .unwrap_or_else(|| String::from_utf8_lossy(message.payload()).into_owned());
        return Err(ChatError::Api {
            status: 0,
            message: format!("{kind}: {detail}"),
        });
    }

    match message.event_type() {
        Some("output") => {
            let payload: OutputPayload = serde_json::from_slice(message.payload())?;
            Ok(Some(StreamEvent::OutputChunk { text: payload.text }))
        }
        Some("citation") => {
            let body = serde_json::from_slice::<CitationPayload>(message.payload())?.into_body();
            Ok(Some(StreamEvent::Citation {
                span: body.generated_response_part.text_response_part.span,
                references: body
                    .retrieved_references
                    .into_iter()
                    .map(ReferencedChunk::from)
                    .collect(),
            }))
        }
        other => {
            tracing::debug!(event_type = ?other, "Skipping event");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bedrock::eventstream::{EventStreamDecoder, encode_event, encode_frame};
    use serde_json::json;

    fn decode(frame: &[u8]) -> Result<Option<StreamEvent>> {
        let mut decoder = EventStreamDecoder::new();
        decoder.feed(frame);
        let message = decoder.next_message().unwrap().unwrap();
        decode_message(&message)
    }

    fn citation_body() -> serde_json::Value {
        json!({
            "generatedResponsePart": {
                "textResponsePart": { "span": { "start": 0, "end": 16 }, "text": "The sky is blue." }
            },
            "retrievedReferences": [
                {
                    "content": { "text": "Rayleigh scattering" },
                    "location": { "type": "S3", "s3Location": { "uri": "s3://kb/sky.pdf" } },
                    "metadata": { "page": 3 }
                },
                {
                    "content": { "text": "Blue sky article" },
                    "location": { "type": "WEB", "webLocation": { "url": "https://example.com/sky" } }
                }
            ]
        })
    }

    #[test]
    fn test_output_event() {
        let event = decode(&encode_event("output", &json!({ "text": "Hello" }))).unwrap();

        assert_eq!(
            event,
            Some(StreamEvent::OutputChunk {
                text: "Hello".to_string()
            })
        );
    }

    #[test]
    fn test_flat_citation_event() {
        let event = decode(&encode_event("citation", &citation_body()))
            .unwrap()
            .unwrap();

        let StreamEvent::Citation { span, references } = event else {
            panic!("expected citation, got {event:?}");
        };
        assert_eq!(span, Span { start: 0, end: 16 });
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].content, "Rayleigh scattering");
        assert_eq!(references[0].location, "s3://kb/sky.pdf");
        assert_eq!(references[0].metadata["page"], 3);
        assert_eq!(references[1].location, "https://example.com/sky");
        assert!(references[1].metadata.is_empty());
    }

    #[test]
    fn test_nested_citation_event() {
        let payload = json!({ "citation": citation_body() });
        let event = decode(&encode_event("citation", &payload)).unwrap().unwrap();

        assert!(matches!(event, StreamEvent::Citation { ref references, .. } if references.len() == 2));
    }

    #[test]
    fn test_guardrail_event_is_skipped() {
        let event = decode(&encode_event("guardrail", &json!({ "action": "NONE" }))).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_exception_frame_becomes_api_error() {
        let frame = encode_frame(
            &[
                (":message-type", "exception"),
                (":exception-type", "throttlingException"),
            ],
            br#"{"message":"Rate exceeded"}"#,
        );

        let err = decode(&frame).unwrap_err();

        assert!(matches!(
            err,
            ChatError::Api { status: 0, ref message } if message == "throttlingException: Rate exceeded"
        ));
    }

    #[test]
    fn test_malformed_output_is_decode_error() {
        let err = decode(&encode_event("output", &json!({ "nope": 1 }))).unwrap_err();
        assert!(matches!(err, ChatError::Decode(_)));
    }
}
