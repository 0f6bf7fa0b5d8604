//! Speech output.
//!
//! [`EspeakNarrator`] drives the `espeak-ng` command line synthesizer, one
//! child process per utterance. [`ConsoleNarrator`] is used when no speech
//! engine is available: it speaks nothing and reports each utterance finished
//! after roughly the time it takes to read it.

use crate::error::NarratorError;
use anyhow::{Context, Result, bail};
use coach_core::speech::{self, SpeechEvent, SpeechOutput, UtteranceId, VoiceInfo};
use coach_core::{Event, EventTx};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

pub const ESPEAK_PROGRAM: &str = "espeak-ng";

/// espeak-ng words per minute at rate 1.0.
const BASE_WPM: f32 = 175.0;
const MIN_WPM: f32 = 80.0;
const MAX_WPM: f32 = 450.0;

/// Words per minute passed to espeak-ng for a normalized rate.
pub fn words_per_minute(rate: f32) -> u32 {
    (BASE_WPM * speech::clamp_rate(rate)).clamp(MIN_WPM, MAX_WPM).round() as u32
}

/// Parses the table printed by `espeak-ng --voices`.
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US            (en 2)(en-r 5)
/// ```
pub fn parse_voice_list(output: &str) -> Vec<VoiceInfo> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let _priority = columns.next()?;
            let language = columns.next()?;
            let _age_gender = columns.next()?;
            let name = columns.next()?;
            Some(VoiceInfo {
                id: language.to_string(),
                name: name.replace('_', " "),
                language: language.to_string(),
            })
        })
        .collect()
}

fn current_runtime() -> Result<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|_| NarratorError::NoRuntime.into())
}

pub struct EspeakNarrator {
    program: String,
    voice: Option<VoiceInfo>,
    events: EventTx,
    rate: f32,
    current: Option<JoinHandle<()>>,
}

impl EspeakNarrator {
    /// Checks that espeak-ng runs and picks the voice closest to `locale`.
    pub async fn probe(events: EventTx, locale: &str) -> Result<Self> {
        Self::probe_program(ESPEAK_PROGRAM, events, locale).await
    }

    pub async fn probe_program(program: &str, events: EventTx, locale: &str) -> Result<Self> {
        let output = Command::new(program)
            .arg("--voices")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|_| NarratorError::NotInstalled(program.to_string()))?;
        if !output.status.success() {
            bail!("{} --voices exited with {}", program, output.status);
        }

        let voices = parse_voice_list(&String::from_utf8_lossy(&output.stdout));
        let voice = speech::select_voice(&voices, locale).cloned();
        match &voice {
            Some(voice) => tracing::info!("Narrating with voice {} ({})", voice.name, voice.language),
            None => tracing::info!(
                "No {} voice among {} installed voices, using the engine default",
                locale,
                voices.len()
            ),
        }

        Ok(Self {
            program: program.to_string(),
            voice,
            events,
            rate: speech::DEFAULT_RATE,
            current: None,
        })
    }

    fn spawn_engine(&self, rate: f32) -> Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .arg("-s")
            .arg(words_per_minute(rate).to_string())
            .arg("--stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(voice) = &self.voice {
            command.arg("-v").arg(&voice.id);
        }
        command
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program))
    }
}

async fn narrate(mut child: Child, text: String) -> Result<()> {
    let mut stdin = child
        .stdin
        .take()
        .context("Speech engine has no stdin")?;
    stdin
        .write_all(text.as_bytes())
        .await
        .context("Failed to pass text to the speech engine")?;
    drop(stdin);

    let output = child
        .wait_with_output()
        .await
        .context("Speech engine did not finish")?;
    if !output.status.success() {
        bail!(
            "speech engine exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

impl SpeechOutput for EspeakNarrator {
    fn speak(&mut self, id: UtteranceId, text: &str, rate: f32) -> Result<()> {
        let runtime = current_runtime()?;
        self.cancel();
        self.rate = speech::clamp_rate(rate);

        let child = self.spawn_engine(self.rate)?;
        let events = self.events.clone();
        let text = text.to_string();
        self.current = Some(runtime.spawn(async move {
            let event = match narrate(child, text).await {
                Ok(()) => SpeechEvent::Finished(id),
                Err(e) => SpeechEvent::Failed(id, format!("{e:#}")),
            };
            let _ = events.send(Event::Speech(event));
        }));
        Ok(())
    }

    fn cancel(&mut self) {
        // Dropping the task drops the child, which kills it.
        if let Some(task) = self.current.take() {
            task.abort();
        }
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = speech::clamp_rate(rate);
    }
}

impl Drop for EspeakNarrator {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Typical reading speed at rate 1.0.
const READING_WORDS_PER_SECOND: f32 = 3.0;

pub struct ConsoleNarrator {
    events: EventTx,
    words_per_second: f32,
    rate: f32,
    current: Option<JoinHandle<()>>,
}

impl ConsoleNarrator {
    pub fn new(events: EventTx) -> Self {
        Self {
            events,
            words_per_second: READING_WORDS_PER_SECOND,
            rate: speech::DEFAULT_RATE,
            current: None,
        }
    }

    pub fn with_words_per_second(mut self, words_per_second: f32) -> Self {
        self.words_per_second = words_per_second.max(f32::MIN_POSITIVE);
        self
    }

    fn reading_time(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count() as f32;
        Duration::from_secs_f32(words / (self.words_per_second * self.rate))
    }
}

impl SpeechOutput for ConsoleNarrator {
    fn speak(&mut self, id: UtteranceId, text: &str, rate: f32) -> Result<()> {
        let runtime = current_runtime()?;
        self.cancel();
        self.rate = speech::clamp_rate(rate);

        let delay = self.reading_time(text);
        let events = self.events.clone();
        self.current = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::Speech(SpeechEvent::Finished(id)));
        }));
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(task) = self.current.take() {
            task.abort();
        }
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = speech::clamp_rate(rate);
    }
}

impl Drop for ConsoleNarrator {
    fn drop(&mut self) {
        self.cancel();
    }
}
