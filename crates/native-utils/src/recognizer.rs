//! Live recognition built from a batch transcriber.
//!
//! Audio is cut into fixed segments. Each full segment is transcribed and
//! posted as a final result; between segments the partial audio is
//! transcribed on a timer and posted as an interim guess. Stopping flushes
//! whatever is left as a final result before reporting the end.

use crate::audio::{prepare_for_transcription, rms};
use crate::capture::{AudioFrame, CaptureTap};
use anyhow::{Context, Result};
use coach_core::capture::{RecognitionEvent, Recognizer, Transcriber};
use coach_core::{Event, EventTx, RecordedAudio};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_SEGMENT: Duration = Duration::from_secs(4);
pub const DEFAULT_INTERIM_EVERY: Duration = Duration::from_millis(1500);

/// Below this level a segment is treated as silence and never uploaded.
const SILENCE_RMS: f32 = 0.01;
/// Consecutive failed uploads before the recognizer gives up for this capture.
const MAX_FAILURES: usize = 3;

pub struct ChunkedRecognizer {
    tap: CaptureTap,
    transcriber: Arc<dyn Transcriber>,
    events: EventTx,
    segment: Duration,
    interim_every: Duration,
    running: Option<Running>,
}

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ChunkedRecognizer {
    pub fn new(tap: CaptureTap, transcriber: Arc<dyn Transcriber>, events: EventTx) -> Self {
        Self {
            tap,
            transcriber,
            events,
            segment: DEFAULT_SEGMENT,
            interim_every: DEFAULT_INTERIM_EVERY,
            running: None,
        }
    }

    pub fn with_timing(mut self, segment: Duration, interim_every: Duration) -> Self {
        self.segment = segment;
        self.interim_every = interim_every;
        self
    }
}

impl Recognizer for ChunkedRecognizer {
    fn start(&mut self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("Live recognition needs a running tokio runtime")?;
        self.cancel();

        let worker = Worker {
            transcriber: self.transcriber.clone(),
            events: self.events.clone(),
            segment: self.segment,
            failures: 0,
        };
        let frames = self.tap.subscribe();
        let (stop, stopped) = oneshot::channel();
        let task = runtime.spawn(worker.run(frames, stopped, self.interim_every));
        self.running = Some(Running { stop, task });
        tracing::debug!("Live recognition started");
        Ok(())
    }

    // The worker finishes on its own after flushing.
    fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            if running.stop.send(()).is_err() {
                tracing::debug!("Live recognition had already finished");
            } else {
                tracing::debug!("Live recognition stopping");
            }
        }
    }

    fn cancel(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
            tracing::debug!("Live recognition cancelled");
        }
    }
}

impl Drop for ChunkedRecognizer {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Worker {
    transcriber: Arc<dyn Transcriber>,
    events: EventTx,
    segment: Duration,
    failures: usize,
}

impl Worker {
    async fn run(
        mut self,
        mut frames: broadcast::Receiver<AudioFrame>,
        mut stopped: oneshot::Receiver<()>,
        interim_every: Duration,
    ) {
        let mut pending: Vec<f32> = Vec::new();
        let mut sample_rate = 0u32;
        let mut interim_sent_at = 0usize;
        let mut ticker = tokio::time::interval_at(Instant::now() + interim_every, interim_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Ok(frame) => {
                        sample_rate = frame.sample_rate;
                        pending.extend_from_slice(&frame.samples);
                        let segment_len = (self.segment.as_secs_f32() * sample_rate as f32) as usize;
                        if pending.len() >= segment_len.max(1) {
                            let segment = std::mem::take(&mut pending);
                            interim_sent_at = 0;
                            if !self.transcribe(segment, sample_rate, true).await {
                                return;
                            }
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Live recognition fell behind and lost {} audio frames", missed);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = &mut stopped => {
                    loop {
                        match frames.try_recv() {
                            Ok(frame) => {
                                sample_rate = frame.sample_rate;
                                pending.extend_from_slice(&frame.samples);
                            }
                            Err(TryRecvError::Lagged(missed)) => {
                                tracing::warn!("Live recognition lost {} audio frames at stop", missed);
                            }
                            Err(_) => break,
                        }
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if pending.len() > interim_sent_at {
                        interim_sent_at = pending.len();
                        if !self.transcribe(pending.clone(), sample_rate, false).await {
                            return;
                        }
                    }
                }
            }
        }

        if !pending.is_empty() && !self.transcribe(pending, sample_rate, true).await {
            return;
        }
        let _ = self.events.send(Event::Recognition(RecognitionEvent::Ended));
    }

    /// Returns false once the recognizer should give up.
    async fn transcribe(&mut self, samples: Vec<f32>, sample_rate: u32, is_final: bool) -> bool {
        if rms(&samples) < SILENCE_RMS {
            return true;
        }

        let result = match prepare_for_transcription(RecordedAudio::new(samples, sample_rate)) {
            Ok(audio) => self.transcriber.transcribe(&audio).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(text) => {
                self.failures = 0;
                let text = text.trim().to_string();
                if text.is_empty() {
                    return true;
                }
                let event = if is_final {
                    RecognitionEvent::Final(text)
                } else {
                    RecognitionEvent::Interim(text)
                };
                self.events.send(Event::Recognition(event)).is_ok()
            }
            Err(e) => {
                self.failures += 1;
                tracing::warn!("Live transcription request failed: {:#}", e);
                if self.failures < MAX_FAILURES {
                    return true;
                }
                let _ = self.events.send(Event::Recognition(RecognitionEvent::Error(format!(
                    "gave up after {MAX_FAILURES} failed requests: {e}"
                ))));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        answer: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transcriber for Scripted {
        async fn transcribe(&self, audio: &RecordedAudio) -> Result<String> {
            assert_eq!(audio.sample_rate(), 16_000);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .map(str::to_string)
                .ok_or_else(|| anyhow!("service unavailable"))
        }
    }

    fn speech(len: usize) -> AudioFrame {
        AudioFrame {
            samples: vec![0.2; len].into(),
            sample_rate: 16_000,
        }
    }

    async fn next(rx: &mut coach_core::EventRx) -> Event {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn full_segments_become_final_results() {
        let tap = CaptureTap::new();
        let (tx, mut rx) = coach_core::channel();
        let transcriber = Arc::new(Scripted {
            answer: Some(" hello there "),
            calls: AtomicUsize::new(0),
        });
        let mut recognizer = ChunkedRecognizer::new(tap.clone(), transcriber, tx)
            .with_timing(Duration::from_millis(500), Duration::from_secs(60));

        recognizer.start().unwrap();
        tap.publish(speech(8_000));

        assert_eq!(
            next(&mut rx).await,
            Event::Recognition(RecognitionEvent::Final("hello there".into()))
        );
        recognizer.stop();
    }

    #[tokio::test]
    async fn partial_audio_produces_interim_guesses() {
        let tap = CaptureTap::new();
        let (tx, mut rx) = coach_core::channel();
        let transcriber = Arc::new(Scripted {
            answer: Some("what is"),
            calls: AtomicUsize::new(0),
        });
        let mut recognizer = ChunkedRecognizer::new(tap.clone(), transcriber, tx)
            .with_timing(Duration::from_secs(10), Duration::from_millis(50));

        recognizer.start().unwrap();
        tap.publish(speech(1_600));

        assert_eq!(
            next(&mut rx).await,
            Event::Recognition(RecognitionEvent::Interim("what is".into()))
        );
    }

    #[tokio::test]
    async fn silence_is_never_uploaded() {
        let tap = CaptureTap::new();
        let (tx, mut rx) = coach_core::channel();
        let transcriber = Arc::new(Scripted {
            answer: Some("thank you"),
            calls: AtomicUsize::new(0),
        });
        let mut recognizer = ChunkedRecognizer::new(tap.clone(), transcriber.clone(), tx)
            .with_timing(Duration::from_millis(100), Duration::from_millis(50));

        recognizer.start().unwrap();
        tap.publish(AudioFrame {
            samples: vec![0.0; 3_200].into(),
            sample_rate: 16_000,
        });

        let waited = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(waited.is_err());
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);
    }

    /// Answers with the number of samples it was sent.
    struct Counting;

    #[async_trait]
    impl Transcriber for Counting {
        async fn transcribe(&self, audio: &RecordedAudio) -> Result<String> {
            Ok(format!("{} samples", audio.samples().len()))
        }
    }

    #[tokio::test]
    async fn stopping_flushes_the_unfinished_segment() {
        let tap = CaptureTap::new();
        let (tx, mut rx) = coach_core::channel();
        let mut recognizer = ChunkedRecognizer::new(tap.clone(), Arc::new(Counting), tx)
            .with_timing(Duration::from_secs(10), Duration::from_millis(50));

        recognizer.start().unwrap();
        tap.publish(speech(24_000));
        assert_eq!(
            next(&mut rx).await,
            Event::Recognition(RecognitionEvent::Interim("24000 samples".into()))
        );

        tap.publish(speech(8_000));
        recognizer.stop();

        let mut event = next(&mut rx).await;
        while matches!(event, Event::Recognition(RecognitionEvent::Interim(_))) {
            event = next(&mut rx).await;
        }
        assert_eq!(
            event,
            Event::Recognition(RecognitionEvent::Final("32000 samples".into()))
        );
        assert_eq!(next(&mut rx).await, Event::Recognition(RecognitionEvent::Ended));
    }

    #[tokio::test]
    async fn stopping_during_silence_only_reports_the_end() {
        let tap = CaptureTap::new();
        let (tx, mut rx) = coach_core::channel();
        let transcriber = Arc::new(Scripted {
            answer: Some("thank you"),
            calls: AtomicUsize::new(0),
        });
        let mut recognizer = ChunkedRecognizer::new(tap.clone(), transcriber.clone(), tx)
            .with_timing(Duration::from_secs(10), Duration::from_secs(60));

        recognizer.start().unwrap();
        tap.publish(AudioFrame {
            samples: vec![0.0; 1_600].into(),
            sample_rate: 16_000,
        });
        recognizer.stop();

        assert_eq!(next(&mut rx).await, Event::Recognition(RecognitionEvent::Ended));
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelling_discards_pending_audio() {
        let tap = CaptureTap::new();
        let (tx, mut rx) = coach_core::channel();
        let mut recognizer = ChunkedRecognizer::new(tap.clone(), Arc::new(Counting), tx)
            .with_timing(Duration::from_secs(10), Duration::from_secs(60));

        recognizer.start().unwrap();
        tap.publish(speech(8_000));
        recognizer.cancel();

        let waited = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(!matches!(waited, Ok(Some(_))));
    }

    #[tokio::test]
    async fn repeated_failures_end_recognition() {
        let tap = CaptureTap::new();
        let (tx, mut rx) = coach_core::channel();
        let transcriber = Arc::new(Scripted {
            answer: None,
            calls: AtomicUsize::new(0),
        });
        let mut recognizer = ChunkedRecognizer::new(tap.clone(), transcriber.clone(), tx)
            .with_timing(Duration::from_millis(100), Duration::from_secs(60));

        recognizer.start().unwrap();
        for _ in 0..MAX_FAILURES {
            tap.publish(speech(1_600));
        }

        let event = next(&mut rx).await;
        assert!(matches!(event, Event::Recognition(RecognitionEvent::Error(_))));
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), MAX_FAILURES);
    }
}
