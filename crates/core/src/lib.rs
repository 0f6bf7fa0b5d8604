pub mod capture;
pub mod controller;
pub mod feedback;
pub mod gateway;
pub mod message;
pub mod openai;
pub mod persistence;
pub mod session;
pub mod speech;
pub mod transcription;

pub use capture::{LiveTranscript, RecognitionEvent, RecordedAudio};
pub use controller::{Adapters, TurnController, TurnState};
pub use feedback::Feedback;
pub use message::{Message, MessageLog, Role};
pub use session::{Session, SessionConfig, SessionType};
pub use speech::{SpeechEvent, UtteranceId};

use tokio::sync::mpsc;

pub type EventTx = mpsc::UnboundedSender<Event>;
pub type EventRx = mpsc::UnboundedReceiver<Event>;
pub type NotificationTx = mpsc::UnboundedSender<Notification>;
pub type NotificationRx = mpsc::UnboundedReceiver<Notification>;

/// Creates the channel that feeds a [`TurnController`].
///
/// Adapters that report asynchronously (speech output, live recognition) are
/// handed a clone of the sender before the controller is built.
pub fn channel() -> (EventTx, EventRx) {
    mpsc::unbounded_channel()
}

/// Everything the turn controller reacts to.
///
/// User actions, adapter callbacks and the results of background work all
/// arrive through this one enum and are handled strictly in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Acquire the microphone and greet the user.
    Connect,
    /// Begin capturing a spoken answer.
    StartCapture,
    /// Finish capturing and submit whatever was heard.
    StopCapture,
    /// Submit typed text.
    Submit(String),
    /// The typed text box changed. Used as the last-resort answer at capture stop.
    DraftChanged(String),
    /// Stop narration without waiting for it to finish.
    CancelSpeech,
    /// Change the narration rate.
    SetRate(f32),
    /// Finish the session and collect feedback.
    End,
    Recognition(RecognitionEvent),
    Speech(SpeechEvent),
    /// The recorded audio of the last capture has been transcribed.
    TranscriptionReady(String),
    /// The gateway answered the last user message.
    ReplyReceived(String),
    /// The persistence backend issued a durable session id.
    SessionPersisted(String),
}

/// Updates the controller publishes for whoever renders the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StateChanged(TurnState),
    MessageAppended(Message),
    /// The live transcript of the capture in progress.
    LiveTranscript(String),
    /// A one-off, user-facing notice such as a lost capability.
    Notice(String),
}
