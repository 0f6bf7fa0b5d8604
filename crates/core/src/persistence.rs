use crate::feedback::Feedback;
use crate::message::Message;
use crate::session::{Session, SessionType};
use crate::{Event, EventTx};
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub topic: String,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMessageRequest {
    pub session_id: String,
    pub content: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFeedbackRequest {
    pub session_id: String,
    pub feedback: Feedback,
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionResponse {
    id: Option<String>,
}

/// Backend that records sessions. Every call is best-effort.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the durable id, or `None` when the backend does not persist this session.
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<Option<String>>;

    async fn save_message(&self, request: &SaveMessageRequest) -> Result<()>;

    async fn save_feedback(&self, request: &SaveFeedbackRequest) -> Result<()>;
}

/// Persistence switched off: no id is ever issued, so nothing is saved.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl SessionStore for NoopStore {
    async fn create_session(&self, _request: &CreateSessionRequest) -> Result<Option<String>> {
        Ok(None)
    }

    async fn save_message(&self, _request: &SaveMessageRequest) -> Result<()> {
        Ok(())
    }

    async fn save_feedback(&self, _request: &SaveFeedbackRequest) -> Result<()> {
        Ok(())
    }
}

pub struct HttpSessionStore {
    client: Client,
    base_url: String,
}

impl HttpSessionStore {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build persistence HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        self.client
            .post(format!("{}/{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST /{path} failed"))?
            .error_for_status()
            .with_context(|| format!("POST /{path} returned an error"))
    }
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<Option<String>> {
        let resp = self.post("create-session", request).await?;
        // A body without an id just means this session is not persisted.
        let body = resp
            .json::<CreateSessionResponse>()
            .await
            .unwrap_or_default();
        Ok(body.id.filter(|id| !id.trim().is_empty()))
    }

    async fn save_message(&self, request: &SaveMessageRequest) -> Result<()> {
        self.post("save-message", request).await?;
        Ok(())
    }

    async fn save_feedback(&self, request: &SaveFeedbackRequest) -> Result<()> {
        self.post("save-feedback", request).await?;
        Ok(())
    }
}

/// Fire-and-forget front end to a [`SessionStore`].
///
/// Each call spawns its own task and returns immediately. Failures are logged
/// and dropped. Saves are skipped until the session has a durable id.
pub struct Persistence {
    store: Arc<dyn SessionStore>,
    events: EventTx,
}

impl Persistence {
    pub fn new(store: Arc<dyn SessionStore>, events: EventTx) -> Self {
        Self { store, events }
    }

    /// Registers the session. A durable id comes back as [`Event::SessionPersisted`].
    pub fn create_session(&self, session: &Session) {
        let request = CreateSessionRequest {
            topic: session.config().topic.clone(),
            session_type: session.config().session_type,
            notes: session.config().notes.clone(),
        };
        let store = self.store.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match store.create_session(&request).await {
                Ok(Some(id)) => {
                    tracing::info!("Session persisted with id {}", id);
                    let _ = events.send(Event::SessionPersisted(id));
                }
                Ok(None) => tracing::debug!("Persistence disabled for this session"),
                Err(e) => tracing::warn!("Failed to create session record: {:#}", e),
            }
        });
    }

    pub fn save_message(&self, session: &Session, message: &Message) {
        let Some(session_id) = session.durable_id() else {
            tracing::debug!("No durable session id; not saving message {}", message.id());
            return;
        };
        let request = SaveMessageRequest {
            session_id: session_id.to_string(),
            content: message.content().to_string(),
            role: message.role().as_str().to_string(),
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save_message(&request).await {
                tracing::warn!("Failed to save message: {:#}", e);
            }
        });
    }

    pub fn save_feedback(&self, session: &Session, feedback: &Feedback) {
        let Some(session_id) = session.durable_id() else {
            tracing::debug!("No durable session id; not saving feedback");
            return;
        };
        let request = SaveFeedbackRequest {
            session_id: session_id.to_string(),
            feedback: feedback.clone(),
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save_feedback(&request).await {
                tracing::warn!("Failed to save feedback: {:#}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use anyhow::anyhow;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn session() -> Session {
        Session::new(SessionConfig::new("Graphs", SessionType::Qa).with_notes("n"))
    }

    #[tokio::test]
    async fn create_session_reports_durable_id() {
        let mut store = MockSessionStore::new();
        store
            .expect_create_session()
            .withf(|req| req.topic == "Graphs" && req.session_type == SessionType::Qa)
            .times(1)
            .returning(|_| Ok(Some("srv-1".to_string())));

        let (tx, mut rx) = crate::channel();
        let persistence = Persistence::new(Arc::new(store), tx);
        persistence.create_session(&session());

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(Event::SessionPersisted("srv-1".to_string())));
    }

    #[tokio::test]
    async fn create_session_failure_is_swallowed() {
        let mut store = MockSessionStore::new();
        store
            .expect_create_session()
            .returning(|_| Err(anyhow!("connection refused")));

        let (tx, mut rx) = crate::channel();
        let persistence = Persistence::new(Arc::new(store), tx);
        persistence.create_session(&session());

        let waited = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(waited.is_err(), "no event expected");
    }

    #[tokio::test]
    async fn saves_are_skipped_without_durable_id() {
        let mut store = MockSessionStore::new();
        store.expect_save_message().never();
        store.expect_save_feedback().never();

        let (tx, _rx) = crate::channel();
        let persistence = Persistence::new(Arc::new(store), tx);
        let session = session();
        persistence.save_message(&session, &Message::user("hello"));
        persistence.save_feedback(&session, &Feedback::fallback(session.config()));
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn saves_use_durable_id() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let mut store = MockSessionStore::new();
        store.expect_save_message().times(1).returning(move |req| {
            let _ = seen_tx.send(req.clone());
            Ok(())
        });

        let (tx, _rx) = crate::channel();
        let persistence = Persistence::new(Arc::new(store), tx);
        let mut session = session();
        session.adopt_durable_id("srv-9".to_string());
        persistence.save_message(&session, &Message::assistant("Welcome"));

        let request = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.session_id, "srv-9");
        assert_eq!(request.role, "assistant");
        assert_eq!(request.content, "Welcome");
    }

    #[test]
    fn wire_bodies_match_endpoints() {
        let create = CreateSessionRequest {
            topic: "Graphs".into(),
            session_type: SessionType::Mock,
            notes: String::new(),
        };
        let json = serde_json::to_value(&create).unwrap();
        assert_eq!(json["type"], "mock");

        let save = SaveMessageRequest {
            session_id: "s".into(),
            content: "c".into(),
            role: "user".into(),
        };
        let json = serde_json::to_value(&save).unwrap();
        assert_eq!(json["sessionId"], "s");
    }
}
