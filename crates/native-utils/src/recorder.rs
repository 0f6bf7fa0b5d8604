use crate::audio::{TRANSCRIPTION_SAMPLE_RATE, prepare_for_transcription};
use crate::capture::{AudioFrame, CaptureTap};
use anyhow::{Context, Result};
use coach_core::capture::Recorder;
use coach_core::RecordedAudio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;

/// Longest answer kept in memory; anything after this is dropped.
const MAX_RECORDING_SECS: usize = 300;
/// Must stay well inside the tap's backlog.
const DRAIN_EVERY: Duration = Duration::from_millis(100);

/// The tap subscription and everything taken from it so far. `stop` drains
/// the subscription itself, so frames published just before it are kept.
struct Buffer {
    frames: broadcast::Receiver<AudioFrame>,
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Buffer {
    /// Moves every queued frame into the buffer. False once the tap is gone.
    fn drain(&mut self) -> bool {
        loop {
            match self.frames.try_recv() {
                Ok(frame) => self.push(&frame),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!("Recorder fell behind and lost {} audio frames", missed);
                }
                Err(TryRecvError::Closed) => return false,
            }
        }
    }

    fn push(&mut self, frame: &AudioFrame) {
        self.sample_rate = frame.sample_rate;
        let limit = frame.sample_rate as usize * MAX_RECORDING_SECS;
        let room = limit.saturating_sub(self.samples.len());
        let take = room.min(frame.samples.len());
        self.samples.extend_from_slice(&frame.samples[..take]);
    }
}

struct Recording {
    buffer: Arc<Mutex<Buffer>>,
    task: JoinHandle<()>,
}

/// Buffers everything the microphone produces between `start` and `stop`.
pub struct BufferedRecorder {
    tap: CaptureTap,
    active: Option<Recording>,
}

impl BufferedRecorder {
    pub fn new(tap: CaptureTap) -> Self {
        Self { tap, active: None }
    }
}

impl Recorder for BufferedRecorder {
    fn start(&mut self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("Recording needs a running tokio runtime")?;
        if let Some(previous) = self.active.take() {
            previous.task.abort();
        }

        let buffer = Arc::new(Mutex::new(Buffer {
            frames: self.tap.subscribe(),
            samples: Vec::new(),
            sample_rate: 0,
        }));
        let sink = buffer.clone();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(DRAIN_EVERY);
            loop {
                ticker.tick().await;
                if !sink.lock().unwrap_or_else(|e| e.into_inner()).drain() {
                    break;
                }
            }
        });

        tracing::debug!("Recording started");
        self.active = Some(Recording { buffer, task });
        Ok(())
    }

    fn stop(&mut self) -> Option<RecordedAudio> {
        let recording = self.active.take()?;
        recording.task.abort();

        let (samples, sample_rate) = {
            let mut buffer = recording.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.drain();
            (std::mem::take(&mut buffer.samples), buffer.sample_rate)
        };
        if samples.is_empty() || sample_rate == 0 {
            tracing::debug!("Recording stopped with no audio");
            return None;
        }

        let audio = RecordedAudio::new(samples, sample_rate);
        tracing::debug!("Recording stopped after {:.1}s", audio.duration_secs());
        match prepare_for_transcription(audio.clone()) {
            Ok(prepared) => Some(prepared),
            Err(e) => {
                tracing::warn!(
                    "Could not resample recording to {} Hz, uploading as-is: {:#}",
                    TRANSCRIPTION_SAMPLE_RATE,
                    e
                );
                Some(audio)
            }
        }
    }
}

impl Drop for BufferedRecorder {
    fn drop(&mut self) {
        if let Some(recording) = self.active.take() {
            recording.task.abort();
        }
    }
}
