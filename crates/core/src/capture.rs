//! Speech input contracts.
//!
//! A capture runs two producers side by side: a streaming [`Recognizer`] that
//! keeps a low-latency [`LiveTranscript`] up to date, and a [`Recorder`] whose
//! buffer is handed to a [`Transcriber`] once capture stops.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Best guess for the segment in progress; replaces the previous guess.
    Interim(String),
    /// Settled text for a segment; appended to the transcript.
    Final(String),
    /// The recognizer stopped producing results.
    Error(String),
    /// Everything heard before `stop` has been reported.
    Ended,
}

/// Running text of the streaming recognizer for one capture.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LiveTranscript {
    finalized: String,
    interim: String,
}

impl LiveTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a recognition event in. Returns true if the visible text changed.
    pub fn apply(&mut self, event: &RecognitionEvent) -> bool {
        match event {
            RecognitionEvent::Interim(text) => {
                let text = text.trim();
                if self.interim == text {
                    return false;
                }
                self.interim = text.to_string();
                true
            }
            RecognitionEvent::Final(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    if !self.finalized.is_empty() {
                        self.finalized.push(' ');
                    }
                    self.finalized.push_str(text);
                }
                self.interim.clear();
                true
            }
            RecognitionEvent::Error(_) | RecognitionEvent::Ended => false,
        }
    }

    pub fn text(&self) -> String {
        match (self.finalized.is_empty(), self.interim.is_empty()) {
            (true, _) => self.interim.clone(),
            (false, true) => self.finalized.clone(),
            (false, false) => format!("{} {}", self.finalized, self.interim),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty() && self.interim.is_empty()
    }

    pub fn reset(&mut self) {
        self.finalized.clear();
        self.interim.clear();
    }
}

/// Chooses the text to submit when a capture stops.
///
/// The live transcript wins whenever it is non-empty, regardless of which
/// result arrived last; then the recorded transcription; then whatever was
/// typed. `None` when all three are blank.
pub fn reconcile(live: &str, recorded: &str, typed: &str) -> Option<String> {
    [live, recorded, typed]
        .into_iter()
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// Mono PCM captured from the microphone.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAudio {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl RecordedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Encodes the samples as a 16-bit mono WAV file.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).context("Failed to start WAV encoding")?;
            for sample in &self.samples {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer
                    .write_sample(value)
                    .context("Failed to write WAV sample")?;
            }
            writer.finalize().context("Failed to finalize WAV data")?;
        }
        Ok(cursor.into_inner())
    }
}

/// Exclusive access to the capture device, held from connect until the session ends.
#[async_trait]
pub trait Microphone: Send {
    async fn acquire(&mut self) -> Result<()>;

    /// Gives the device back. Safe to call when not held.
    fn release(&mut self);

    fn is_held(&self) -> bool;
}

/// Streaming recognizer. Results are posted as [`RecognitionEvent`]s on the
/// controller's event channel.
pub trait Recognizer: Send {
    fn start(&mut self) -> Result<()>;

    /// Stops listening. Audio already heard is still reported, followed by
    /// [`RecognitionEvent::Ended`]. Safe to call when not running.
    fn stop(&mut self);

    /// Stops listening and discards anything not yet reported.
    fn cancel(&mut self);
}

/// Buffers raw audio for the duration of a capture.
pub trait Recorder: Send {
    fn start(&mut self) -> Result<()>;

    /// Ends the recording and hands back what was buffered, if anything.
    /// Safe to call when not recording.
    fn stop(&mut self) -> Option<RecordedAudio>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &RecordedAudio) -> Result<String>;
}

/// Transcribes a finished recording, reducing every failure to an empty transcript.
pub async fn transcribe_or_empty(transcriber: &dyn Transcriber, audio: &RecordedAudio) -> String {
    match transcriber.transcribe(audio).await {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::warn!("Transcription of recorded audio failed: {:#}", e);
            String::new()
        }
    }
}

/// Stand-in for every speech input capability when voice input is disabled.
#[derive(Debug, Clone)]
pub struct Unavailable {
    reason: String,
}

impl Unavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Microphone for Unavailable {
    async fn acquire(&mut self) -> Result<()> {
        Err(anyhow!(self.reason.clone()))
    }

    fn release(&mut self) {}

    fn is_held(&self) -> bool {
        false
    }
}

impl Recognizer for Unavailable {
    fn start(&mut self) -> Result<()> {
        Err(anyhow!(self.reason.clone()))
    }

    fn stop(&mut self) {}

    fn cancel(&mut self) {}
}

impl Recorder for Unavailable {
    fn start(&mut self) -> Result<()> {
        Err(anyhow!(self.reason.clone()))
    }

    fn stop(&mut self) -> Option<RecordedAudio> {
        None
    }
}

#[async_trait]
impl Transcriber for Unavailable {
    async fn transcribe(&self, _audio: &RecordedAudio) -> Result<String> {
        Err(anyhow!(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interim_overwrites_and_final_appends() {
        let mut live = LiveTranscript::new();
        live.apply(&RecognitionEvent::Interim("what is".into()));
        live.apply(&RecognitionEvent::Interim("what is dyke".into()));
        assert_eq!(live.text(), "what is dyke");

        live.apply(&RecognitionEvent::Final("What is Dijkstra's".into()));
        assert_eq!(live.text(), "What is Dijkstra's");

        live.apply(&RecognitionEvent::Interim("algo".into()));
        assert_eq!(live.text(), "What is Dijkstra's algo");

        live.apply(&RecognitionEvent::Final("algorithm?".into()));
        assert_eq!(live.text(), "What is Dijkstra's algorithm?");
    }

    #[test]
    fn errors_leave_the_transcript_alone() {
        let mut live = LiveTranscript::new();
        live.apply(&RecognitionEvent::Final("hello".into()));
        assert!(!live.apply(&RecognitionEvent::Error("network".into())));
        assert!(!live.apply(&RecognitionEvent::Ended));
        assert_eq!(live.text(), "hello");

        live.reset();
        assert!(live.is_empty());
    }

    #[test]
    fn live_transcript_takes_precedence() {
        assert_eq!(
            reconcile("live words", "recorded words", "typed").as_deref(),
            Some("live words")
        );
        assert_eq!(
            reconcile("  ", "recorded words", "typed").as_deref(),
            Some("recorded words")
        );
        assert_eq!(reconcile("", "", " typed ").as_deref(), Some("typed"));
        assert_eq!(reconcile(" ", "\n", ""), None);
    }

    #[test]
    fn wav_encoding_has_header_and_samples() {
        let audio = RecordedAudio::new(vec![0.0, 0.5, -0.5, 1.0], 16_000);
        let wav = audio.to_wav().unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert!(wav.len() >= 44 + 4 * 2);
        assert!((audio.duration_secs() - 0.00025).abs() < 1e-6);
    }

    #[tokio::test]
    async fn failed_transcription_becomes_empty() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .times(1)
            .returning(|_| Err(anyhow!("503 Service Unavailable")));

        let audio = RecordedAudio::new(vec![0.1; 160], 16_000);
        assert_eq!(transcribe_or_empty(&transcriber, &audio).await, "");
    }

    #[tokio::test]
    async fn successful_transcription_is_trimmed() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_| Ok("  hello there \n".to_string()));

        let audio = RecordedAudio::new(vec![0.1; 160], 16_000);
        assert_eq!(transcribe_or_empty(&transcriber, &audio).await, "hello there");
    }

    #[tokio::test]
    async fn unavailable_refuses_everything() {
        let mut unavailable = Unavailable::new("voice input disabled");
        assert!(Microphone::acquire(&mut unavailable).await.is_err());
        assert!(!unavailable.is_held());
        assert!(Recognizer::start(&mut unavailable).is_err());
        assert!(Recorder::stop(&mut unavailable).is_none());
    }
}
