use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Mock,
    Topic,
    Qa,
    Language,
    Other,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Mock => "mock",
            SessionType::Topic => "topic",
            SessionType::Qa => "qa",
            SessionType::Language => "language",
            SessionType::Other => "other",
        }
    }

    /// How the session is referred to in user-facing text.
    pub fn describe(&self) -> &'static str {
        match self {
            SessionType::Mock => "mock interview",
            SessionType::Topic => "topic discussion",
            SessionType::Qa => "Q&A session",
            SessionType::Language => "language practice session",
            SessionType::Other => "session",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Unknown kinds are not an error; they are just "other".
impl FromStr for SessionType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "mock" => SessionType::Mock,
            "topic" => SessionType::Topic,
            "qa" => SessionType::Qa,
            "language" => SessionType::Language,
            _ => SessionType::Other,
        })
    }
}

/// What the caller asked for when starting a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub topic: String,
    pub session_type: SessionType,
    /// Free-form settings such as `role`, `company`, `experience` or `focusAreas`.
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
    #[serde(default)]
    pub notes: String,
}

impl SessionConfig {
    pub fn new(topic: impl Into<String>, session_type: SessionType) -> Self {
        Self {
            topic: topic.into(),
            session_type,
            details: BTreeMap::new(),
            notes: String::new(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// A detail rendered as plain text, if present and non-empty.
    pub fn detail(&self, key: &str) -> Option<String> {
        let text = match self.details.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }

    /// The opening line the assistant narrates once the session is ready.
    pub fn greeting(&self) -> String {
        let topic = &self.topic;
        match self.session_type {
            SessionType::Mock => {
                let position = match (self.detail("role"), self.detail("company")) {
                    (Some(role), Some(company)) => format!(" for the {role} position at {company}"),
                    (Some(role), None) => format!(" for the {role} position"),
                    (None, Some(company)) => format!(" at {company}"),
                    (None, None) => String::new(),
                };
                format!(
                    "Hello, and thanks for joining. I'll be your interviewer today{position}. \
                     We'll focus on {topic}. To start, could you briefly introduce yourself?"
                )
            }
            SessionType::Topic => format!(
                "Hi! Today we're going to explore {topic} together. \
                 Tell me what you already know about it, and we'll build from there."
            ),
            SessionType::Qa => format!(
                "Welcome to this Q&A session on {topic}. \
                 Ask me anything you'd like to understand better."
            ),
            SessionType::Language => format!(
                "Hello! Let's practice {topic}. \
                 Don't worry about mistakes, just try to answer in full sentences. How are you today?"
            ),
            SessionType::Other => format!(
                "Hi there! Let's talk about {topic}. What would you like to start with?"
            ),
        }
    }
}

/// One interview, from connect to end.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    persisted: bool,
    config: SessionConfig,
    start_time: DateTime<Utc>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            persisted: false,
            config,
            start_time: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The server-issued id, once persistence has acknowledged the session.
    pub fn durable_id(&self) -> Option<&str> {
        self.persisted.then_some(self.id.as_str())
    }

    /// Replaces the locally generated id with the one the backend issued.
    pub fn adopt_durable_id(&mut self, id: String) {
        self.id = id;
        self.persisted = true;
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_type_parses_loosely() {
        assert_eq!("QA".parse::<SessionType>().unwrap(), SessionType::Qa);
        assert_eq!(" mock ".parse::<SessionType>().unwrap(), SessionType::Mock);
        assert_eq!("debate".parse::<SessionType>().unwrap(), SessionType::Other);
    }

    #[test]
    fn greeting_mentions_topic_for_every_kind() {
        for kind in [
            SessionType::Mock,
            SessionType::Topic,
            SessionType::Qa,
            SessionType::Language,
            SessionType::Other,
        ] {
            let config = SessionConfig::new("Graphs", kind);
            assert!(config.greeting().contains("Graphs"), "{kind} greeting");
        }
    }

    #[test]
    fn mock_greeting_uses_role_and_company() {
        let config = SessionConfig::new("system design", SessionType::Mock)
            .with_detail("role", "Backend Engineer")
            .with_detail("company", "Acme");
        let greeting = config.greeting();
        assert!(greeting.contains("Backend Engineer position at Acme"));
    }

    #[test]
    fn detail_joins_arrays() {
        let config = SessionConfig::new("Rust", SessionType::Topic)
            .with_detail("focusAreas", serde_json::json!(["ownership", "lifetimes"]))
            .with_detail("company", "  ");
        assert_eq!(config.detail("focusAreas").as_deref(), Some("ownership, lifetimes"));
        assert_eq!(config.detail("company"), None);
        assert_eq!(config.detail("missing"), None);
    }

    #[test]
    fn durable_id_replaces_local_id() {
        let mut session = Session::new(SessionConfig::new("Graphs", SessionType::Qa));
        assert!(session.durable_id().is_none());
        let local = session.id().to_string();

        session.adopt_durable_id("srv-42".to_string());
        assert_ne!(session.id(), local);
        assert_eq!(session.durable_id(), Some("srv-42"));
    }
}
