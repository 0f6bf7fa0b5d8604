//! Line-oriented console front end: turns typed lines into controller events
//! and controller notifications into transcript lines.

use coach_core::{Event, Feedback, Notification, Role, TurnState};

pub const HELP: &str = "\
Commands:
  /talk       start answering out loud
  /send       finish speaking and send the answer
  /stop       stop the coach mid-sentence
  /rate <x>   narration speed, 0.5 to 2.0
  /end        finish the session and get feedback
  /help       show this help
Anything else is sent as a typed answer.";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Events(Vec<Event>),
    Help,
    Invalid(String),
}

pub fn parse_line(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Events(Vec::new());
    }
    let Some(command) = line.strip_prefix('/') else {
        // The draft doubles as the fallback answer if a capture is running.
        return Input::Events(vec![
            Event::DraftChanged(line.to_string()),
            Event::Submit(line.to_string()),
        ]);
    };

    let mut words = command.split_whitespace();
    match (words.next(), words.next()) {
        (Some("talk"), None) => Input::Events(vec![Event::StartCapture]),
        (Some("send"), None) => Input::Events(vec![Event::StopCapture]),
        (Some("stop"), None) => Input::Events(vec![Event::CancelSpeech]),
        (Some("end"), None) => Input::Events(vec![Event::End]),
        (Some("help"), None) => Input::Help,
        (Some("rate"), Some(value)) => match value.parse::<f32>() {
            Ok(rate) if rate.is_finite() => Input::Events(vec![Event::SetRate(rate)]),
            _ => Input::Invalid(format!("Not a rate: {value}")),
        },
        _ => Input::Invalid(format!("Unknown command: /{command}")),
    }
}

/// The transcript line for a notification, if it should be shown.
pub fn render(notification: &Notification) -> Option<String> {
    match notification {
        Notification::MessageAppended(message) => {
            let speaker = match message.role() {
                Role::User => "You",
                Role::Assistant => "Coach",
            };
            Some(format!("{speaker}: {}", message.content()))
        }
        Notification::StateChanged(TurnState::UserCapturing) => {
            Some("[listening, type /send when you are done]".to_string())
        }
        Notification::StateChanged(TurnState::AwaitingReply) => Some("[thinking]".to_string()),
        Notification::StateChanged(TurnState::Ending) => {
            Some("[wrapping up, preparing feedback]".to_string())
        }
        Notification::StateChanged(_) => None,
        Notification::LiveTranscript(text) => Some(format!("  ... {text}")),
        Notification::Notice(text) => Some(format!("! {text}")),
    }
}

pub fn render_feedback(feedback: &Feedback) -> String {
    let mut out = format!("\n=== Session feedback ===\n{}\n", feedback.summary);
    if !feedback.strengths.is_empty() {
        out.push_str("\nStrengths:\n");
        for strength in &feedback.strengths {
            out.push_str(&format!("  + {strength}\n"));
        }
    }
    if !feedback.improvements.is_empty() {
        out.push_str("\nTo work on:\n");
        for improvement in &feedback.improvements {
            out.push_str(&format!("  - {improvement}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::Message;

    #[test]
    fn commands_map_to_events() {
        assert_eq!(parse_line("/talk"), Input::Events(vec![Event::StartCapture]));
        assert_eq!(parse_line(" /send "), Input::Events(vec![Event::StopCapture]));
        assert_eq!(parse_line("/stop"), Input::Events(vec![Event::CancelSpeech]));
        assert_eq!(parse_line("/end"), Input::Events(vec![Event::End]));
        assert_eq!(parse_line("/rate 1.5"), Input::Events(vec![Event::SetRate(1.5)]));
        assert_eq!(parse_line("/help"), Input::Help);
    }

    #[test]
    fn typed_text_is_drafted_and_submitted() {
        assert_eq!(
            parse_line("  What is a DAG?  "),
            Input::Events(vec![
                Event::DraftChanged("What is a DAG?".into()),
                Event::Submit("What is a DAG?".into()),
            ])
        );
        assert_eq!(parse_line("   "), Input::Events(vec![]));
    }

    #[test]
    fn bad_commands_are_reported() {
        assert!(matches!(parse_line("/rate fast"), Input::Invalid(_)));
        assert!(matches!(parse_line("/rate NaN"), Input::Invalid(_)));
        assert!(matches!(parse_line("/dance"), Input::Invalid(_)));
        assert!(matches!(parse_line("/end now"), Input::Invalid(_)));
    }

    #[test]
    fn transcript_lines() {
        let line = render(&Notification::MessageAppended(Message::assistant("Hello!")));
        assert_eq!(line.as_deref(), Some("Coach: Hello!"));
        let line = render(&Notification::MessageAppended(Message::user("Hi")));
        assert_eq!(line.as_deref(), Some("You: Hi"));
        assert!(render(&Notification::StateChanged(TurnState::Idle)).is_none());
        assert_eq!(
            render(&Notification::Notice("Microphone unavailable.".into())).as_deref(),
            Some("! Microphone unavailable.")
        );
    }

    #[test]
    fn feedback_lists_strengths_and_improvements() {
        let text = render_feedback(&Feedback {
            summary: "Solid session.".into(),
            strengths: vec!["Clear".into()],
            improvements: vec!["Slow down".into()],
        });
        assert!(text.contains("Solid session."));
        assert!(text.contains("  + Clear"));
        assert!(text.contains("  - Slow down"));
    }
}
