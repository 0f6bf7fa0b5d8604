use crate::feedback::Feedback;
use crate::gateway::{APOLOGY, Gateway, HISTORY_WINDOW, WireMessage};
use crate::message::{self, Message};
use crate::session::{SessionConfig, SessionType};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";

const FEEDBACK_KEY: &str = "feedback";

const DEFAULT_MOCK_PROMPT: &str = r#"You are a professional interviewer running a mock interview about {topic}.
Session details: {details}
Candidate notes: {notes}
Ask one question at a time, follow up on vague answers, and keep each turn under 80 words.
Your replies are read aloud, so avoid markdown, lists and code blocks."#;

const DEFAULT_TOPIC_PROMPT: &str = r#"You are a patient tutor helping the user understand {topic}.
Session details: {details}
Learner notes: {notes}
Check what the user already knows, explain step by step, and end each turn with a short question.
Your replies are read aloud, so avoid markdown, lists and code blocks."#;

const DEFAULT_QA_PROMPT: &str = r#"You are an expert answering questions about {topic}.
Session details: {details}
Notes: {notes}
Answer clearly and concisely, offer a concrete example when it helps, and invite follow-up questions.
Your replies are read aloud, so avoid markdown, lists and code blocks."#;

const DEFAULT_LANGUAGE_PROMPT: &str = r#"You are a friendly conversation partner helping the user practice {topic}.
Session details: {details}
Notes: {notes}
Keep sentences simple, gently correct important mistakes, and keep the conversation going with a question.
Your replies are read aloud, so avoid markdown, lists and code blocks."#;

const DEFAULT_OTHER_PROMPT: &str = r#"You are a helpful coach having a conversation about {topic}.
Session details: {details}
Notes: {notes}
Keep each turn short and conversational.
Your replies are read aloud, so avoid markdown, lists and code blocks."#;

const DEFAULT_FEEDBACK_PROMPT: &str = r#"You are reviewing a {session_type} about {topic}.
Session details: {details}
Notes: {notes}
Read the transcript and assess the user's performance.
Respond with STRICT JSON of the form:
{"summary": "<two or three sentences>", "strengths": ["<strength>", ...], "improvements": ["<improvement>", ...]}
Give at least one strength and one improvement."#;

/// System prompts keyed by session type, plus the feedback prompt.
///
/// Templates may use `{topic}`, `{session_type}`, `{notes}` and `{details}`.
#[derive(Debug, Clone, Default)]
pub struct Prompts {
    overrides: HashMap<String, String>,
}

impl Prompts {
    /// Uses the built-in prompts for any key missing from `overrides`.
    pub fn from_map(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }

    fn template(&self, key: &str) -> &str {
        if let Some(prompt) = self.overrides.get(key) {
            return prompt;
        }
        match key {
            "mock" => DEFAULT_MOCK_PROMPT,
            "topic" => DEFAULT_TOPIC_PROMPT,
            "qa" => DEFAULT_QA_PROMPT,
            "language" => DEFAULT_LANGUAGE_PROMPT,
            FEEDBACK_KEY => DEFAULT_FEEDBACK_PROMPT,
            _ => DEFAULT_OTHER_PROMPT,
        }
    }

    pub fn system_prompt(&self, config: &SessionConfig) -> String {
        render(self.template(config.session_type.as_str()), config)
    }

    pub fn feedback_prompt(&self, config: &SessionConfig) -> String {
        render(self.template(FEEDBACK_KEY), config)
    }
}

fn render(template: &str, config: &SessionConfig) -> String {
    let details = if config.details.is_empty() {
        "none".to_string()
    } else {
        config
            .details
            .keys()
            .filter_map(|key| config.detail(key).map(|value| format!("{key}: {value}")))
            .collect::<Vec<_>>()
            .join("; ")
    };
    let notes = if config.notes.trim().is_empty() {
        "none"
    } else {
        config.notes.trim()
    };

    template
        .replace("{topic}", &config.topic)
        .replace("{session_type}", config.session_type.describe())
        .replace("{notes}", notes)
        .replace("{details}", &details)
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

/// Gateway that talks to an OpenAI-compatible chat completions API directly.
pub struct OpenAiGateway {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    prompts: Prompts,
}

impl OpenAiGateway {
    pub fn new(base_url: &str, api_key: String, model: String, prompts: Prompts) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build chat HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            prompts,
        })
    }

    async fn complete(&self, body: serde_json::Value) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Chat completion request failed")?
            .error_for_status()
            .context("Chat completion API returned an error")?
            .json::<LlmResponse>()
            .await
            .context("Failed to parse chat completion response")?;

        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("No response from LLM"))?;
        let content = content.trim();
        if content.is_empty() {
            return Err(anyhow!("LLM returned an empty message"));
        }
        Ok(content.to_string())
    }

    async fn try_reply(&self, history: &[Message], config: &SessionConfig) -> Result<String> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": self.prompts.system_prompt(config),
        })];
        messages.extend(
            message::recent(history, HISTORY_WINDOW)
                .iter()
                .map(|m| serde_json::to_value(WireMessage::from(m)))
                .collect::<Result<Vec<_>, _>>()?,
        );

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.7,
        });
        self.complete(body).await
    }

    async fn try_feedback(&self, history: &[Message], config: &SessionConfig) -> Result<Feedback> {
        let transcript = transcript(message::recent(history, HISTORY_WINDOW));
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.prompts.feedback_prompt(config) },
                { "role": "user", "content": transcript },
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.2,
        });

        let answer = self.complete(body).await?;
        parse_feedback(&answer)
    }
}

fn transcript(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role().as_str(), m.content()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses the model's JSON verdict, insisting on a usable summary.
pub fn parse_feedback(answer: &str) -> Result<Feedback> {
    let feedback: Feedback = serde_json::from_str(answer)
        .map_err(|e| anyhow!("Failed to parse feedback JSON from LLM: {e}"))?;
    if !feedback.is_complete() {
        return Err(anyhow!("LLM feedback has an empty summary"));
    }
    Ok(feedback)
}

#[async_trait]
impl Gateway for OpenAiGateway {
    async fn get_reply(&self, history: &[Message], config: &SessionConfig) -> String {
        match self.try_reply(history, config).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Falling back to apology reply: {:#}", e);
                APOLOGY.to_string()
            }
        }
    }

    async fn get_feedback(&self, history: &[Message], config: &SessionConfig) -> Feedback {
        match self.try_feedback(history, config).await {
            Ok(feedback) => feedback,
            Err(e) => {
                tracing::warn!("Falling back to canned feedback: {:#}", e);
                Feedback::fallback(config)
            }
        }
    }
}

/// Prompt keys recognised in a prompt directory.
pub fn prompt_keys() -> [&'static str; 6] {
    [
        SessionType::Mock.as_str(),
        SessionType::Topic.as_str(),
        SessionType::Qa.as_str(),
        SessionType::Language.as_str(),
        SessionType::Other.as_str(),
        FEEDBACK_KEY,
    ]
}
