//! Remote completion client.
//!
//! One request per user turn: the prompt, the full ordered history and a
//! fixed system instruction go out; a single text reply comes back. No
//! streaming and no retries.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use wgpt_core::config::CompletionConfig;
use wgpt_core::types::{Message, Role};

use crate::error::ChatError;

/// Returned in place of an empty reply.
pub const FALLBACK_REPLY: &str =
    "I apologize, but I couldn't generate a response. Please try again.";

/// System instruction sent with every request unless overridden in config.
pub const DEFAULT_PREAMBLE: &str = "You are WGPT, an automotive assistant. You help drivers \
understand their vehicles: maintenance schedules, warning lights, buying advice, electric and \
hybrid technology, and basic troubleshooting.

Formatting rules:
- Write plain text only. Never use bold, italics, headings or other markdown emphasis.
- Give instructions as numbered steps, one step per line.
- Give feature or option lists as bullet points starting with \"- \".
- Keep a professional, friendly tone and be concise.

If a question is not about cars or driving, say briefly that you focus on automotive topics and \
offer to help with a related vehicle question instead.";

// =============================================================================
// Wire types
// =============================================================================

/// Speaker tag in the completion service's history vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnRole {
    User,
    Chatbot,
}

impl From<Role> for TurnRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => TurnRole::User,
            Role::Assistant => TurnRole::Chatbot,
        }
    }
}

/// One entry of `chat_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub message: String,
}

impl From<&Message> for ChatTurn {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.into(),
            message: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    message: &'a str,
    chat_history: &'a [ChatTurn],
    preamble: &'a str,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponseBody {
    #[serde(default)]
    text: Option<String>,
}

// =============================================================================
// Client trait
// =============================================================================

/// Text generation backend.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a reply to `prompt` given the prior `history`.
    ///
    /// Fails with `ChatError::Service` on transport errors, timeouts and
    /// non-success statuses. An empty reply becomes `FALLBACK_REPLY`.
    async fn generate_response(
        &self,
        prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, ChatError>;
}

/// Client for the Cohere v1 chat endpoint.
pub struct CohereClient {
    client: Client,
    config: CompletionConfig,
}

impl std::fmt::Debug for CohereClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CohereClient")
            .field("endpoint", &self.config.endpoint)
            .field("model", &self.config.model)
            .finish()
    }
}

impl CohereClient {
    pub fn new(config: CompletionConfig) -> Result<Self, ChatError> {
        if config.api_key.is_empty() {
            warn!("No completion API key configured; requests will be rejected");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChatError::Service(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn preamble(&self) -> &str {
        self.config.preamble.as_deref().unwrap_or(DEFAULT_PREAMBLE)
    }
}

#[async_trait]
impl CompletionClient for CohereClient {
    async fn generate_response(
        &self,
        prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, ChatError> {
        let body = ChatRequest {
            model: &self.config.model,
            message: prompt,
            chat_history: history,
            preamble: self.preamble(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        debug!(
            endpoint = %self.config.endpoint,
            history_len = history.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Service(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "Completion request rejected");
            return Err(ChatError::Service(format!("HTTP {}: {}", status, text)));
        }

        let reply: ChatResponseBody = response
            .json()
            .await
            .map_err(|e| ChatError::Service(format!("invalid response: {}", e)))?;

        match reply.text {
            Some(text) if !text.trim().is_empty() => {
                info!(reply_len = text.len(), "Completion received");
                Ok(text)
            }
            _ => {
                warn!("Completion returned no text; using fallback reply");
                Ok(FALLBACK_REPLY.to_string())
            }
        }
    }
}

// =============================================================================
// Mock
// =============================================================================

/// A recorded call to `MockCompletionClient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub prompt: String,
    pub history: Vec<ChatTurn>,
}

/// Scripted completion client for tests.
///
/// Replies are served in order; once the queue is empty every call answers
/// `"Mock answer"`. `Err` entries surface as `ChatError::Service`.
#[derive(Debug, Default)]
pub struct MockCompletionClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
    gate: Option<Arc<Notify>>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// Queue a failure.
    pub fn fail(self, reason: impl Into<String>) -> Self {
        self.push(Err(reason.into()));
        self
    }

    /// Hold every call until `gate` is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn push(&self, reply: Result<String, String>) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn generate_response(
        &self,
        prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, ChatError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                prompt: prompt.to_string(),
                history: history.to_vec(),
            });

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let next = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(ChatError::Service(reason)),
            None => Ok("Mock answer".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> CompletionConfig {
        CompletionConfig {
            endpoint: format!("{}/v1/chat", server.uri()),
            api_key: "test-key".to_string(),
            timeout_secs: 1,
            ..CompletionConfig::default()
        }
    }

    fn history() -> Vec<ChatTurn> {
        vec![
            ChatTurn {
                role: TurnRole::User,
                message: "Hi".to_string(),
            },
            ChatTurn {
                role: TurnRole::Chatbot,
                message: "Hello! Ask me about your car.".to_string(),
            },
        ]
    }

    #[test]
    fn test_turn_role_wire_names() {
        assert_eq!(serde_json::to_value(TurnRole::User).unwrap(), "USER");
        assert_eq!(serde_json::to_value(TurnRole::Chatbot).unwrap(), "CHATBOT");
        assert_eq!(TurnRole::from(Role::Assistant), TurnRole::Chatbot);
    }

    #[test]
    fn test_turn_from_message() {
        let turn = ChatTurn::from(&Message::assistant("Rotate every 6k miles"));
        assert_eq!(turn.role, TurnRole::Chatbot);
        assert_eq!(turn.message, "Rotate every 6k miles");
    }

    #[tokio::test]
    async fn test_request_shape_and_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "command-r-plus",
                "message": "How often should I rotate tires?",
                "chat_history": [
                    {"role": "USER", "message": "Hi"},
                    {"role": "CHATBOT", "message": "Hello! Ask me about your car."}
                ],
                "max_tokens": 1000,
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": "Every 5,000 to 7,500 miles."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = CohereClient::new(config_for(&server)).unwrap();
        let reply = client
            .generate_response("How often should I rotate tires?", &history())
            .await
            .unwrap();
        assert_eq!(reply, "Every 5,000 to 7,500 miles.");
    }

    #[tokio::test]
    async fn test_default_preamble_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "preamble": DEFAULT_PREAMBLE })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "ok" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = CohereClient::new(config_for(&server)).unwrap();
        assert_eq!(client.generate_response("hi", &[]).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_custom_preamble_overrides_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "preamble": "Be brief." })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "ok" })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config_for(&server);
        config.preamble = Some("Be brief.".to_string());
        let client = CohereClient::new(config).unwrap();
        assert_eq!(client.generate_response("hi", &[]).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_non_success_status_is_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = CohereClient::new(config_for(&server)).unwrap();
        let err = client.generate_response("hi", &[]).await.unwrap_err();
        match err {
            ChatError::Service(msg) => {
                assert!(msg.contains("500"));
                assert!(msg.contains("upstream down"));
            }
            other => panic!("expected Service error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_is_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = CohereClient::new(config_for(&server)).unwrap();
        assert!(matches!(
            client.generate_response("hi", &[]).await,
            Err(ChatError::Service(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_text_uses_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "  " })))
            .mount(&server)
            .await;

        let client = CohereClient::new(config_for(&server)).unwrap();
        assert_eq!(
            client.generate_response("hi", &[]).await.unwrap(),
            FALLBACK_REPLY
        );
    }

    #[tokio::test]
    async fn test_missing_text_uses_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "generation_id": "abc" })),
            )
            .mount(&server)
            .await;

        let client = CohereClient::new(config_for(&server)).unwrap();
        assert_eq!(
            client.generate_response("hi", &[]).await.unwrap(),
            FALLBACK_REPLY
        );
    }

    #[tokio::test]
    async fn test_timeout_is_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "text": "late" }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = CohereClient::new(config_for(&server)).unwrap();
        assert!(matches!(
            client.generate_response("hi", &[]).await,
            Err(ChatError::Service(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_serves_queue_then_default() {
        let mock = MockCompletionClient::new().reply("first").fail("boom");
        assert_eq!(mock.generate_response("a", &[]).await.unwrap(), "first");
        assert!(matches!(
            mock.generate_response("b", &history()).await,
            Err(ChatError::Service(ref m)) if m == "boom"
        ));
        assert_eq!(mock.generate_response("c", &[]).await.unwrap(), "Mock answer");

        let calls = mock.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].prompt, "b");
        assert_eq!(calls[1].history, history());
    }
}
