mod config;
mod console;
mod prompt_loader;

use crate::config::{Config, GatewayConfig};
use crate::console::Input;
use anyhow::{Context, Result};
use clap::Parser;
use coach_core::capture::{Microphone, Recognizer, Recorder, Transcriber, Unavailable};
use coach_core::gateway::{Gateway, HttpGateway};
use coach_core::openai::{OpenAiGateway, Prompts};
use coach_core::persistence::{HttpSessionStore, NoopStore, SessionStore};
use coach_core::speech::SpeechOutput;
use coach_core::transcription::WhisperTranscriber;
use coach_core::{Adapters, Event, EventTx, SessionConfig, SessionType, TurnController};
use coach_native_utils::{
    BufferedRecorder, CaptureTap, ChunkedRecognizer, ConsoleNarrator, CpalMicrophone,
    EspeakNarrator,
};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Practice interviews and tutoring sessions by voice or text")]
struct Cli {
    /// What the session is about, e.g. "Graphs" or "Spanish"
    #[arg(required_unless_present = "list_devices")]
    topic: Option<String>,

    /// mock, topic, qa, language or other
    #[arg(long, default_value = "topic")]
    session_type: SessionType,

    /// Anything the coach should know about you
    #[arg(long, default_value = "")]
    notes: String,

    /// Extra session detail such as role=SRE or company=Acme; repeatable
    #[arg(long = "detail", value_parser = parse_detail)]
    details: Vec<(String, String)>,

    /// Type answers instead of speaking them, and skip narration
    #[arg(long)]
    text_only: bool,

    /// Narration speed between 0.5 and 2.0
    #[arg(long, default_value_t = 1.0)]
    rate: f32,

    /// Directory of prompt overrides
    #[arg(long, default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/prompts"))]
    prompts: PathBuf,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn parse_detail(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in {raw:?}"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    // stderr keeps the transcript on stdout readable.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();

    if args.list_devices {
        let inputs = coach_native_utils::device::available_inputs()
            .context("Failed to list capture devices")?;
        println!("{}", coach_native_utils::device::describe_inputs(&inputs));
        return Ok(());
    }

    // --- 4. Load Prompts ---
    let prompts = match prompt_loader::load_prompts(&args.prompts) {
        Ok(prompts) => {
            tracing::info!("Loaded {} prompt overrides.", prompts.len());
            for key in prompt_loader::unknown_keys(&prompts, &coach_core::openai::prompt_keys()) {
                tracing::warn!("Ignoring prompt {:?}: no session type uses it", key);
            }
            prompts
        }
        Err(e) => {
            tracing::warn!("{:#}; using built-in prompts", e);
            HashMap::new()
        }
    };

    // --- 5. Session Setup ---
    let topic = args.topic.clone().unwrap_or_default();
    let mut session_config =
        SessionConfig::new(topic, args.session_type).with_notes(args.notes.clone());
    for (key, value) in &args.details {
        session_config = session_config.with_detail(key.clone(), value.clone());
    }

    let (events_tx, events_rx) = coach_core::channel();
    let (notify_tx, mut notify_rx) = tokio::sync::mpsc::unbounded_channel();

    let adapters = build_adapters(&config, &args, prompts, events_tx.clone()).await?;
    let controller = TurnController::new(session_config, adapters, events_tx.clone(), |feedback| {
        println!("{}", console::render_feedback(&feedback));
    })
    .with_notifications(notify_tx)
    .with_rate(args.rate);

    let printer = tokio::spawn(async move {
        while let Some(notification) = notify_rx.recv().await {
            if let Some(line) = console::render(&notification) {
                println!("{line}");
            }
        }
    });

    // --- 6. Console Input ---
    // A plain thread: a blocked stdin read must not hold up runtime shutdown.
    let input_tx = events_tx.clone();
    std::thread::Builder::new()
        .name("coach-stdin".into())
        .spawn(move || read_console(input_tx))
        .context("Failed to start console input thread")?;

    tokio::spawn(watch_interrupts(events_tx.clone()));

    println!("{}\n", console::HELP);
    events_tx
        .send(Event::Connect)
        .context("Controller channel closed before the session started")?;
    drop(events_tx);

    // --- 7. Run ---
    if controller.run(events_rx).await.is_none() {
        tracing::warn!("Session stopped before feedback was produced");
    }
    let _ = printer.await;

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    EndSession,
    Exit,
}

/// The first Ctrl-C asks for feedback; any later one quits without it.
fn interrupt_action(presses: usize) -> Interrupt {
    if presses <= 1 {
        Interrupt::EndSession
    } else {
        Interrupt::Exit
    }
}

async fn watch_interrupts(events: EventTx) {
    let mut presses = 0;
    while tokio::signal::ctrl_c().await.is_ok() {
        presses += 1;
        match interrupt_action(presses) {
            Interrupt::EndSession => {
                tracing::info!("Interrupted, ending the session (press Ctrl-C again to quit)");
                let _ = events.send(Event::End);
            }
            Interrupt::Exit => {
                tracing::warn!("Interrupted again, quitting without feedback");
                std::process::exit(130);
            }
        }
    }
}

fn read_console(events: EventTx) {
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else {
            break;
        };
        match console::parse_line(&line) {
            Input::Events(batch) => {
                for event in batch {
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
            Input::Help => println!("{}", console::HELP),
            Input::Invalid(reason) => println!("{reason}. Type /help for commands."),
        }
    }
    // End of input finishes the session.
    let _ = events.send(Event::End);
}

async fn build_adapters(
    config: &Config,
    args: &Cli,
    prompts: HashMap<String, String>,
    events: EventTx,
) -> Result<Adapters> {
    let gateway: Arc<dyn Gateway> = match &config.gateway {
        GatewayConfig::OpenAi { api_key } => {
            tracing::info!("Replies from {} via {}", config.chat_model, config.openai_base_url);
            Arc::new(OpenAiGateway::new(
                &config.openai_base_url,
                api_key.clone(),
                config.chat_model.clone(),
                Prompts::from_map(prompts),
            )?)
        }
        GatewayConfig::Http { api_url } => {
            tracing::info!("Replies from backend at {}", api_url);
            Arc::new(HttpGateway::new(api_url)?)
        }
    };

    let store: Arc<dyn SessionStore> = match &config.api_url {
        Some(api_url) => Arc::new(HttpSessionStore::new(api_url)?),
        None => {
            tracing::info!("COACH_API_URL not set; sessions will not be saved");
            Arc::new(NoopStore)
        }
    };

    let voice_disabled = if args.text_only {
        Some("voice input disabled by --text-only")
    } else if config.openai_api_key.is_none() {
        Some("voice input needs OPENAI_API_KEY for transcription")
    } else {
        None
    };

    let (microphone, recognizer, recorder, transcriber): (
        Box<dyn Microphone>,
        Box<dyn Recognizer>,
        Box<dyn Recorder>,
        Arc<dyn Transcriber>,
    ) = match (voice_disabled, &config.openai_api_key) {
        (None, Some(api_key)) => {
            let transcriber: Arc<dyn Transcriber> = Arc::new(WhisperTranscriber::new(
                &config.openai_base_url,
                api_key.clone(),
                config.transcription_model.clone(),
            )?);
            let tap = CaptureTap::new();
            let microphone: Box<dyn Microphone> =
                Box::new(CpalMicrophone::new(config.input_device.clone(), tap.clone()));
            let recognizer: Box<dyn Recognizer> = Box::new(ChunkedRecognizer::new(
                tap.clone(),
                transcriber.clone(),
                events.clone(),
            ));
            let recorder: Box<dyn Recorder> = Box::new(BufferedRecorder::new(tap));
            (microphone, recognizer, recorder, transcriber)
        }
        (reason, _) => {
            let reason = reason.unwrap_or("voice input unavailable");
            tracing::info!("{}", reason);
            let unavailable = Unavailable::new(reason);
            let microphone: Box<dyn Microphone> = Box::new(unavailable.clone());
            let recognizer: Box<dyn Recognizer> = Box::new(unavailable.clone());
            let recorder: Box<dyn Recorder> = Box::new(unavailable.clone());
            let transcriber: Arc<dyn Transcriber> = Arc::new(unavailable);
            (microphone, recognizer, recorder, transcriber)
        }
    };

    let speech: Box<dyn SpeechOutput> = if args.text_only {
        Box::new(ConsoleNarrator::new(events))
    } else {
        match EspeakNarrator::probe(events.clone(), &config.locale).await {
            Ok(narrator) => Box::new(narrator),
            Err(e) => {
                tracing::warn!("Spoken replies unavailable, showing text only: {:#}", e);
                Box::new(ConsoleNarrator::new(events))
            }
        }
    };

    Ok(Adapters {
        microphone,
        recognizer,
        recorder,
        transcriber,
        speech,
        gateway,
        store,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn details_and_session_type_parse() {
        let cli = Cli::try_parse_from([
            "coach",
            "Distributed systems",
            "--session-type",
            "mock",
            "--detail",
            "role=SRE",
            "--detail",
            "company = Acme",
        ])
        .unwrap();
        assert_eq!(cli.session_type, SessionType::Mock);
        assert_eq!(
            cli.details,
            vec![
                ("role".to_string(), "SRE".to_string()),
                ("company".to_string(), "Acme".to_string()),
            ]
        );
        assert_eq!(cli.rate, 1.0);
    }

    #[test]
    fn topic_is_required_unless_listing_devices() {
        assert!(Cli::try_parse_from(["coach"]).is_err());
        assert!(Cli::try_parse_from(["coach", "--list-devices"]).is_ok());
        assert!(Cli::try_parse_from(["coach", "Graphs", "--detail", "oops"]).is_err());
    }

    #[test]
    fn second_interrupt_quits() {
        assert_eq!(interrupt_action(1), Interrupt::EndSession);
        assert_eq!(interrupt_action(2), Interrupt::Exit);
        assert_eq!(interrupt_action(5), Interrupt::Exit);
    }

    #[test]
    fn unknown_session_types_become_other() {
        let cli = Cli::try_parse_from(["coach", "Chess", "--session-type", "openings"]).unwrap();
        assert_eq!(cli.session_type, SessionType::Other);
    }
}
