use crate::feedback::Feedback;
use crate::message::{self, Message};
use crate::session::{SessionConfig, SessionType};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Substituted for the assistant's reply whenever the backend cannot answer.
pub const APOLOGY: &str =
    "I'm sorry, I'm having trouble responding right now. Could you please repeat that?";

/// How many of the most recent messages are sent with each request.
pub const HISTORY_WINDOW: usize = 15;

// Both operations are infallible by signature: implementations absorb their
// own transport and server errors and hand back a usable substitute.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    /// The assistant's next line, or [`APOLOGY`] on failure.
    async fn get_reply(&self, history: &[Message], config: &SessionConfig) -> String;

    /// End-of-session feedback, or [`Feedback::fallback`] on failure.
    async fn get_feedback(&self, history: &[Message], config: &SessionConfig) -> Feedback;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role().as_str().to_string(),
            content: message.content().to_string(),
        }
    }
}

/// Body shared by `/ai-reply` and `/ai-feedback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRequest {
    pub messages: Vec<WireMessage>,
    pub session_type: SessionType,
    pub topic: String,
    pub notes: String,
    pub details: BTreeMap<String, Value>,
}

impl ConversationRequest {
    /// Builds the request from the most recent [`HISTORY_WINDOW`] messages.
    pub fn new(history: &[Message], config: &SessionConfig) -> Self {
        Self {
            messages: message::recent(history, HISTORY_WINDOW)
                .iter()
                .map(WireMessage::from)
                .collect(),
            session_type: config.session_type,
            topic: config.topic.clone(),
            notes: config.notes.clone(),
            details: config.details.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReplyResponse {
    response: String,
}

/// Gateway backed by the application's own `/ai-reply` and `/ai-feedback` endpoints.
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build gateway HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn try_reply(&self, history: &[Message], config: &SessionConfig) -> Result<String> {
        let body = ConversationRequest::new(history, config);
        let resp = self
            .client
            .post(format!("{}/ai-reply", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Reply request failed")?
            .error_for_status()
            .context("Reply endpoint returned an error")?
            .json::<ReplyResponse>()
            .await
            .context("Failed to parse reply response")?;

        let text = resp.response.trim();
        if text.is_empty() {
            return Err(anyhow!("Reply endpoint returned an empty response"));
        }
        Ok(text.to_string())
    }

    async fn try_feedback(&self, history: &[Message], config: &SessionConfig) -> Result<Feedback> {
        let body = ConversationRequest::new(history, config);
        let feedback = self
            .client
            .post(format!("{}/ai-feedback", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Feedback request failed")?
            .error_for_status()
            .context("Feedback endpoint returned an error")?
            .json::<Feedback>()
            .await
            .context("Failed to parse feedback response")?;

        if !feedback.is_complete() {
            return Err(anyhow!("Feedback endpoint returned an empty summary"));
        }
        Ok(feedback)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn get_reply(&self, history: &[Message], config: &SessionConfig) -> String {
        self.try_reply(history, config)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to apology reply: {:#}", e);
                APOLOGY.to_string()
            })
    }

    async fn get_feedback(&self, history: &[Message], config: &SessionConfig) -> Feedback {
        self.try_feedback(history, config)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to canned feedback: {:#}", e);
                Feedback::fallback(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new("Graphs", SessionType::Qa)
            .with_notes("prefers examples")
            .with_detail("experience", "junior")
    }

    #[test]
    fn request_is_bounded_and_camel_cased() {
        let history: Vec<Message> = (0..20)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("q{i}"))
                } else {
                    Message::assistant(format!("a{i}"))
                }
            })
            .collect();

        let request = ConversationRequest::new(&history, &config());
        assert_eq!(request.messages.len(), HISTORY_WINDOW);
        assert_eq!(request.messages[0].content, "a5");
        assert_eq!(request.messages[14].content, "a19");

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["sessionType"], "qa");
        assert_eq!(json["topic"], "Graphs");
        assert_eq!(json["notes"], "prefers examples");
        assert_eq!(json["details"]["experience"], "junior");
        assert_eq!(json["messages"][1]["role"], "user");
    }

    #[tokio::test]
    async fn unreachable_backend_yields_apology() {
        let gateway = HttpGateway::new("http://127.0.0.1:9").unwrap();
        let history = vec![Message::user("What is Dijkstra's algorithm?")];
        let reply = gateway.get_reply(&history, &config()).await;
        assert_eq!(reply, APOLOGY);
    }

    #[tokio::test]
    async fn unreachable_backend_yields_canned_feedback() {
        let gateway = HttpGateway::new("http://127.0.0.1:9").unwrap();
        let history = vec![Message::user("hi")];
        let feedback = gateway.get_feedback(&history, &config()).await;
        assert_eq!(feedback, Feedback::fallback(&config()));
    }
}
