use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use url::Url;

use super::eventstream::EventStreamDecoder;
use super::events::decode_message;
use super::request::RetrieveAndGenerateRequest;
use super::signing::{AwsCredentials, SigV4Signer};
use super::{EventStream, KnowledgeBaseClient};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::stream::StreamEvent;

/// Response header carrying the conversation id.
pub const SESSION_ID_HEADER: &str = "x-amzn-bedrock-knowledge-base-session-id";

const OPERATION_PATH: &str = "retrieveAndGenerateStream";

/// Signed HTTP client for the agent runtime.
#[derive(Debug, Clone)]
pub struct BedrockKnowledgeBase {
    http: Client,
    endpoint: Url,
    signer: SigV4Signer,
}

impl BedrockKnowledgeBase {
    pub fn new(config: &ChatConfig, credentials: AwsCredentials) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Self::with_http_client(http, config, credentials)
    }

    pub fn with_http_client(
        http: Client,
        config: &ChatConfig,
        credentials: AwsCredentials,
    ) -> Result<Self> {
        let base = config.endpoint();
        let base = if base.ends_with('/') {
            base
        } else {
            format!("{base}/")
        };
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join(OPERATION_PATH))
            .map_err(|e| ChatError::Config(format!("invalid endpoint {base}: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            signer: SigV4Signer::new(credentials, config.aws_region.clone()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl KnowledgeBaseClient for BedrockKnowledgeBase {
    async fn retrieve_and_generate_stream(
        &self,
        request: &RetrieveAndGenerateRequest,
    ) -> Result<EventStream> {
        let body = serde_json::to_vec(request)?;
        let content_type = [("content-type", "application/json")];
        let signed = self.signer.sign(
            "POST",
            &self.endpoint,
            &content_type,
            &body,
            chrono::Utc::now(),
        )?;

        let mut builder = self
            .http
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .header("accept", "application/vnd.amazon.eventstream");
        for (name, value) in &signed {
            // reqwest derives Host from the URL
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            continues_session = request.session_id.is_some(),
            "Calling retrieveAndGenerateStream"
        );

        let response = builder.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Knowledge base request rejected");
            return Err(ChatError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let session_id = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Box::pin(decode_body(session_id, response.bytes_stream())))
    }
}

/// Frame and decode a response body. The session id, when the endpoint sent
/// one, is emitted ahead of any content.
fn decode_body<S>(
    session_id: Option<String>,
    bytes: S,
) -> impl Stream<Item = Result<StreamEvent>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    async_stream::try_stream! {
        if let Some(id) = session_id {
            yield StreamEvent::SessionMarker { id };
        }

        futures::pin_mut!(bytes);
        let mut decoder = EventStreamDecoder::new();
        while let Some(chunk) = bytes.next().await {
            decoder.feed(&chunk?);
            while let Some(message) = decoder.next_message()? {
                if let Some(event) = decode_message(&message)? {
                    yield event;
                }
            }
        }

        if !decoder.is_empty() {
            Err::<(), _>(ChatError::Stream("stream ended mid-frame".to_string()))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bedrock::request::tests::sample_config;

    fn credentials() -> AwsCredentials {
        AwsCredentials::new("AKID", "secret", None)
    }

    #[test]
    fn test_default_endpoint() {
        let client = BedrockKnowledgeBase::new(&sample_config(), credentials()).unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "https://bedrock-agent-runtime.us-west-2.amazonaws.com/retrieveAndGenerateStream"
        );
    }

    #[test]
    fn test_endpoint_override_keeps_path_prefix() {
        let mut config = sample_config();
        config.endpoint_url = Some("http://127.0.0.1:4566/bedrock".to_string());

        let client = BedrockKnowledgeBase::new(&config, credentials()).unwrap();

        assert_eq!(
            client.endpoint().as_str(),
            "http://127.0.0.1:4566/bedrock/retrieveAndGenerateStream"
        );
    }

    #[test]
    fn test_invalid_endpoint_is_config_error() {
        let mut config = sample_config();
        config.endpoint_url = Some("not a url".to_string());

        let err = BedrockKnowledgeBase::new(&config, credentials()).unwrap_err();

        assert!(matches!(err, ChatError::Config(_)));
    }
}
