use crate::session::{SessionConfig, SessionType};
use serde::{Deserialize, Serialize};

/// End-of-session assessment handed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

impl Feedback {
    /// Canned feedback built only from the session's topic and type.
    ///
    /// Used when there was no conversation to assess or the feedback request failed.
    pub fn fallback(config: &SessionConfig) -> Self {
        let topic = &config.topic;
        let kind = config.session_type.describe();

        let summary = format!(
            "Thanks for completing this {kind} on {topic}. Detailed feedback isn't available \
             right now, so here are some general pointers for your next session."
        );

        let strengths = vec![
            format!("You set aside time to practice {topic}."),
            "You engaged with the session format, which is the hardest step.".to_string(),
        ];

        let improvements = match config.session_type {
            SessionType::Mock => vec![
                "Structure answers with situation, task, action and result.".to_string(),
                format!("Prepare two or three concrete examples related to {topic}."),
            ],
            SessionType::Topic => vec![
                format!("Try explaining the core ideas of {topic} in your own words."),
                "Connect each concept to an example you have worked with.".to_string(),
            ],
            SessionType::Qa => vec![
                format!("Come with specific questions about {topic} you want answered."),
                "Ask follow-up questions until each answer is clear to you.".to_string(),
            ],
            SessionType::Language => vec![
                "Answer in full sentences to practice grammar and flow.".to_string(),
                "Speak a little longer each turn to build fluency.".to_string(),
            ],
            SessionType::Other => vec![
                format!("Spend more time talking through {topic} to get detailed feedback."),
            ],
        };

        Self {
            summary,
            strengths,
            improvements,
        }
    }

    /// A response that can be shown to the user as-is.
    pub fn is_complete(&self) -> bool {
        !self.summary.trim().is_empty()
    }
}
