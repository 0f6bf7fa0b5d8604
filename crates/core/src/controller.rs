//! Conversation turn controller.
//!
//! Owns "whose turn is it" for one session. Every input arrives as an
//! [`Event`] and is handled to completion before the next one, so the
//! controller needs no locks. Slow work (transcribing the recording, fetching
//! the reply, persisting) runs in spawned tasks that post their result back
//! as another event.

use crate::capture::{self, LiveTranscript, Microphone, RecognitionEvent, Recognizer, Recorder, Transcriber};
use crate::feedback::Feedback;
use crate::gateway::Gateway;
use crate::message::{Message, MessageLog};
use crate::persistence::{Persistence, SessionStore};
use crate::session::{Session, SessionConfig};
use crate::speech::{self, SpeechEvent, SpeechOutput, UtteranceId};
use crate::{Event, EventRx, EventTx, Notification, NotificationTx};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Disconnected,
    Connecting,
    Idle,
    UserCapturing,
    AwaitingReply,
    AssistantSpeaking,
    Ending,
}

/// What an `AwaitingReply` controller is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    /// Capture stopped; the live recognizer is flushing and the recording is
    /// being transcribed. Both must land before the answer is chosen.
    Capture {
        live_done: bool,
        recorded: Option<String>,
    },
    Reply,
}

/// The platform capabilities a session runs on.
pub struct Adapters {
    pub microphone: Box<dyn Microphone>,
    pub recognizer: Box<dyn Recognizer>,
    pub recorder: Box<dyn Recorder>,
    pub transcriber: Arc<dyn Transcriber>,
    pub speech: Box<dyn SpeechOutput>,
    pub gateway: Arc<dyn Gateway>,
    pub store: Arc<dyn SessionStore>,
}

type OnEnd = Box<dyn FnOnce(Feedback) + Send>;

pub struct TurnController {
    session: Session,
    state: TurnState,
    messages: MessageLog,
    live: LiveTranscript,
    draft: String,
    pending: Option<Pending>,
    recognizing: bool,

    microphone: Box<dyn Microphone>,
    recognizer: Box<dyn Recognizer>,
    recorder: Box<dyn Recorder>,
    transcriber: Arc<dyn Transcriber>,
    speech: Box<dyn SpeechOutput>,
    gateway: Arc<dyn Gateway>,
    persistence: Persistence,

    events: EventTx,
    notifications: Option<NotificationTx>,
    on_end: Option<OnEnd>,

    rate: f32,
    text_only: bool,
    ending: bool,
    speech_notice_sent: bool,
    next_utterance: u64,
    current_utterance: Option<UtteranceId>,
    started_at: Option<Instant>,
    frozen_elapsed: Option<Duration>,
    feedback: Option<Feedback>,
}

impl TurnController {
    /// `events` must be the sender half of the channel later passed to [`run`](Self::run).
    pub fn new(
        config: SessionConfig,
        adapters: Adapters,
        events: EventTx,
        on_end: impl FnOnce(Feedback) + Send + 'static,
    ) -> Self {
        let persistence = Persistence::new(adapters.store, events.clone());
        Self {
            session: Session::new(config),
            state: TurnState::Disconnected,
            messages: MessageLog::new(),
            live: LiveTranscript::new(),
            draft: String::new(),
            pending: None,
            recognizing: false,
            microphone: adapters.microphone,
            recognizer: adapters.recognizer,
            recorder: adapters.recorder,
            transcriber: adapters.transcriber,
            speech: adapters.speech,
            gateway: adapters.gateway,
            persistence,
            events,
            notifications: None,
            on_end: Some(Box::new(on_end)),
            rate: speech::DEFAULT_RATE,
            text_only: false,
            ending: false,
            speech_notice_sent: false,
            next_utterance: 0,
            current_utterance: None,
            started_at: None,
            frozen_elapsed: None,
            feedback: None,
        }
    }

    pub fn with_notifications(mut self, notifications: NotificationTx) -> Self {
        self.notifications = Some(notifications);
        self
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = speech::clamp_rate(rate);
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn messages(&self) -> &[Message] {
        self.messages.as_slice()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn live_transcript(&self) -> String {
        self.live.text()
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// True when the microphone could not be acquired.
    pub fn is_text_only(&self) -> bool {
        self.text_only
    }

    /// Time since the session became ready; frozen once it starts ending.
    pub fn elapsed(&self) -> Duration {
        if let Some(frozen) = self.frozen_elapsed {
            return frozen;
        }
        self.started_at
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    /// Processes events until the session has ended and returns its feedback.
    pub async fn run(mut self, mut events: EventRx) -> Option<Feedback> {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
            if self.feedback.is_some() {
                break;
            }
        }
        self.feedback.take()
    }

    pub async fn handle(&mut self, event: Event) {
        tracing::trace!("Handling {:?} in {:?}", event, self.state);
        match event {
            Event::Connect => self.connect().await,
            Event::StartCapture => self.start_capture(),
            Event::StopCapture => self.stop_capture(),
            Event::Submit(text) => self.submit(&text),
            Event::DraftChanged(text) => self.set_draft(text),
            Event::CancelSpeech => self.cancel_speech(),
            Event::SetRate(rate) => self.set_rate(rate),
            Event::End => self.end().await,
            Event::Recognition(event) => self.on_recognition(event),
            Event::Speech(event) => self.on_speech(event),
            Event::TranscriptionReady(text) => self.on_transcription(text),
            Event::ReplyReceived(text) => self.on_reply(text),
            Event::SessionPersisted(id) => self.session.adopt_durable_id(id),
        }
    }

    async fn connect(&mut self) {
        if self.state != TurnState::Disconnected {
            tracing::debug!("Connect ignored in {:?}", self.state);
            return;
        }
        self.set_state(TurnState::Connecting);

        match self.microphone.acquire().await {
            Ok(()) => tracing::info!("Microphone acquired"),
            Err(e) => {
                tracing::warn!("Microphone unavailable, continuing text-only: {:#}", e);
                self.text_only = true;
                self.notice("Microphone unavailable. You can keep going by typing your answers.");
            }
        }

        self.persistence.create_session(&self.session);
        self.ready();
    }

    fn ready(&mut self) {
        self.started_at = Some(Instant::now());
        self.set_state(TurnState::Idle);
        tracing::info!(
            "Session {} ready: {} on {}",
            self.session.id(),
            self.session.config().session_type,
            self.session.config().topic
        );
        let greeting = self.session.config().greeting();
        self.say(greeting);
    }

    fn start_capture(&mut self) {
        if self.state != TurnState::Idle {
            tracing::debug!("Start capture ignored in {:?}", self.state);
            return;
        }
        if self.text_only {
            tracing::debug!("Start capture ignored: no microphone");
            return;
        }

        self.live.reset();
        self.draft.clear();
        self.recognizing = match self.recognizer.start() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Live transcription unavailable for this capture: {:#}", e);
                false
            }
        };
        if let Err(e) = self.recorder.start() {
            tracing::warn!("Recording unavailable for this capture: {:#}", e);
        }
        self.set_state(TurnState::UserCapturing);
    }

    fn stop_capture(&mut self) {
        if self.state != TurnState::UserCapturing {
            tracing::debug!("Stop capture ignored in {:?}", self.state);
            return;
        }

        self.recognizer.stop();
        let live_done = !std::mem::take(&mut self.recognizing);
        let recording = self.recorder.stop().filter(|audio| !audio.is_empty());
        let recorded = match recording {
            Some(audio) => {
                tracing::debug!("Transcribing {:.1}s of recorded audio", audio.duration_secs());
                let transcriber = self.transcriber.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    let text = capture::transcribe_or_empty(transcriber.as_ref(), &audio).await;
                    let _ = events.send(Event::TranscriptionReady(text));
                });
                None
            }
            None => Some(String::new()),
        };
        self.pending = Some(Pending::Capture {
            live_done,
            recorded,
        });
        self.set_state(TurnState::AwaitingReply);
        self.finish_capture();
    }

    fn on_transcription(&mut self, text: String) {
        match &mut self.pending {
            Some(Pending::Capture { recorded, .. }) if recorded.is_none() => {
                *recorded = Some(text);
            }
            _ => {
                tracing::debug!("Stale transcription dropped");
                return;
            }
        }
        self.finish_capture();
    }

    /// Chooses the answer once both halves of a stopped capture are in.
    fn finish_capture(&mut self) {
        let recorded = match &self.pending {
            Some(Pending::Capture {
                live_done: true,
                recorded: Some(recorded),
            }) => recorded.clone(),
            _ => return,
        };
        self.pending = None;

        let live = self.live.text();
        match capture::reconcile(&live, &recorded, &self.draft) {
            Some(text) => {
                self.draft.clear();
                self.send_user_message(text);
            }
            None => {
                tracing::info!("Nothing was captured; back to idle");
                self.set_state(TurnState::Idle);
            }
        }
    }

    /// The typed text only backs up a capture in progress.
    fn set_draft(&mut self, text: String) {
        if self.state == TurnState::UserCapturing {
            self.draft = text;
        } else {
            tracing::debug!("Draft ignored in {:?}", self.state);
        }
    }

    fn submit(&mut self, text: &str) {
        if self.state != TurnState::Idle {
            tracing::debug!("Submit ignored in {:?}", self.state);
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.draft.clear();
        self.set_state(TurnState::AwaitingReply);
        self.send_user_message(text.to_string());
    }

    fn send_user_message(&mut self, text: String) {
        self.record(Message::user(text));
        self.pending = Some(Pending::Reply);

        let gateway = self.gateway.clone();
        let history = self.messages.as_slice().to_vec();
        let config = self.session.config().clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let reply = gateway.get_reply(&history, &config).await;
            let _ = events.send(Event::ReplyReceived(reply));
        });
    }

    fn on_reply(&mut self, text: String) {
        if self.pending != Some(Pending::Reply) || self.state != TurnState::AwaitingReply {
            tracing::debug!("Reply dropped in {:?}", self.state);
            return;
        }
        self.pending = None;
        self.say(text);
    }

    /// Appends an assistant message and narrates it.
    fn say(&mut self, text: String) {
        let message = Message::assistant(text);
        let content = message.content().to_string();
        self.record(message);

        self.next_utterance += 1;
        let id = UtteranceId(self.next_utterance);
        self.current_utterance = Some(id);
        self.set_state(TurnState::AssistantSpeaking);

        if let Err(e) = self.speech.speak(id, &content, self.rate) {
            tracing::warn!("Speech output failed: {:#}", e);
            if !self.speech_notice_sent {
                self.speech_notice_sent = true;
                self.notice("Speech output unavailable. Replies will be shown as text only.");
            }
            self.current_utterance = None;
            self.set_state(TurnState::Idle);
        }
    }

    fn on_speech(&mut self, event: SpeechEvent) {
        if self.current_utterance != Some(event.utterance()) {
            tracing::debug!("Ignoring {:?} for a superseded utterance", event);
            return;
        }
        if let SpeechEvent::Failed(_, reason) = &event {
            tracing::warn!("Speech engine error: {}", reason);
        }
        self.current_utterance = None;
        if self.state == TurnState::AssistantSpeaking {
            self.set_state(TurnState::Idle);
        }
    }

    fn cancel_speech(&mut self) {
        if self.state != TurnState::AssistantSpeaking {
            tracing::debug!("Cancel speech ignored in {:?}", self.state);
            return;
        }
        self.speech.cancel();
        self.current_utterance = None;
        self.set_state(TurnState::Idle);
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = speech::clamp_rate(rate);
        self.speech.set_rate(self.rate);
        tracing::debug!("Speaking rate set to {:.2}", self.rate);
    }

    fn on_recognition(&mut self, event: RecognitionEvent) {
        let flushing = matches!(
            self.pending,
            Some(Pending::Capture {
                live_done: false,
                ..
            })
        );
        if self.state != TurnState::UserCapturing && !flushing {
            tracing::debug!("Recognition result dropped in {:?}", self.state);
            return;
        }

        match &event {
            RecognitionEvent::Error(reason) => {
                tracing::warn!("Live transcription stopped: {}", reason);
                self.recognizing = false;
            }
            RecognitionEvent::Ended if flushing => {}
            RecognitionEvent::Ended => {
                tracing::debug!("Recognizer ended while still capturing");
                self.recognizing = false;
                return;
            }
            RecognitionEvent::Interim(_) | RecognitionEvent::Final(_) => {
                if self.live.apply(&event) {
                    self.notify(Notification::LiveTranscript(self.live.text()));
                }
                return;
            }
        }

        if flushing {
            if let Some(Pending::Capture { live_done, .. }) = &mut self.pending {
                *live_done = true;
            }
            self.finish_capture();
        }
    }

    async fn end(&mut self) {
        if self.ending {
            tracing::debug!("End already in progress");
            return;
        }
        if self.state == TurnState::Disconnected {
            tracing::debug!("End ignored: session never connected");
            return;
        }
        self.ending = true;
        self.frozen_elapsed = Some(self.elapsed());
        self.set_state(TurnState::Ending);

        self.speech.cancel();
        self.current_utterance = None;
        self.recognizer.cancel();
        self.recognizing = false;
        let _ = self.recorder.stop();
        self.pending = None;
        self.microphone.release();

        tracing::info!(
            "Session {} ending after {}s and {} messages",
            self.session.id(),
            self.elapsed().as_secs(),
            self.messages.len()
        );

        let feedback = if self.messages.has_user_turn() {
            self.gateway
                .get_feedback(self.messages.as_slice(), self.session.config())
                .await
        } else {
            Feedback::fallback(self.session.config())
        };

        self.persistence.save_feedback(&self.session, &feedback);
        if let Some(on_end) = self.on_end.take() {
            on_end(feedback.clone());
        }
        self.feedback = Some(feedback);
    }

    fn record(&mut self, message: Message) {
        self.persistence.save_message(&self.session, &message);
        self.notify(Notification::MessageAppended(message.clone()));
        self.messages.push(message);
    }

    fn set_state(&mut self, state: TurnState) {
        if self.state == state {
            return;
        }
        tracing::debug!("Turn state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.notify(Notification::StateChanged(state));
    }

    fn notice(&self, text: &str) {
        self.notify(Notification::Notice(text.to_string()));
    }

    fn notify(&self, notification: Notification) {
        if let Some(tx) = &self.notifications {
            let _ = tx.send(notification);
        }
    }
}

impl Drop for TurnController {
    // A controller dropped mid-session still gives the devices back.
    fn drop(&mut self) {
        if self.microphone.is_held() {
            self.speech.cancel();
            self.recognizer.cancel();
            let _ = self.recorder.stop();
            self.microphone.release();
        }
    }
}
