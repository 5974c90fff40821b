use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use kitsune::api::{RelayServer, RelayState};
use kitsune::voice::{
    AudioCapture, AudioPlayback, SAMPLE_RATE, SpeakerSink, SpeechSynthesizer, SpeechToText,
    TextToSpeech, Transcriber, TtsBackend, VoiceSelection,
};
use kitsune::{
    AnimationController, AnimationSignal, CompanionEvent, Config, Gesture, PlaybackDirective,
    ReplyGenerator, TerminalDisplay, TurnInput, TurnOrchestrator, TurnOutcome, TurnServices,
};

/// How long the terminal pretends a one-shot clip takes
const ONE_SHOT_CLIP: Duration = Duration::from_secs(2);

/// Kitsune - a fox companion you can talk to
#[derive(Parser)]
#[command(name = "kitsune", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Voice to speak with (overrides saved settings)
    #[arg(long, env = "KITSUNE_VOICE", global = true)]
    voice: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Talk to the companion (default)
    Chat {
        /// Never open the microphone
        #[arg(long)]
        text_only: bool,
    },
    /// Run the local relay server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "KITSUNE_PORT")]
        port: Option<u16>,
    },
    /// Speak a line with the configured voice
    Say {
        /// Text to speak
        text: Option<String>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,kitsune=info",
        1 => "info,kitsune=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command.unwrap_or(Command::Chat { text_only: false });

    match command {
        Command::TestMic { duration } => return test_mic(duration).await,
        Command::TestSpeaker => return test_speaker().await,
        _ => {}
    }

    let mut config = Config::load()?;
    if let Some(voice) = cli.voice {
        config.tts.voice.provider_voice_id = voice;
    }
    tracing::debug!(?config, "loaded configuration");

    match command {
        Command::Chat { text_only } => chat(config, text_only).await,
        Command::Serve { port } => serve(config, port).await,
        Command::Say { text } => say(&config, text).await,
        Command::TestMic { .. } | Command::TestSpeaker => Ok(()),
    }
}

/// Build the speech client used for local playback
fn synthesizer(config: &Config) -> anyhow::Result<SpeechSynthesizer> {
    Ok(SpeechSynthesizer::new(
        Arc::new(config.speech_provider()?),
        Arc::new(SpeakerSink),
        Arc::new(TerminalDisplay::default()),
        config.tts.voice.clone(),
        config.timeout,
    )
    .with_pitch(config.tts.pitch.clone()))
}

/// Interactive companion on the terminal
#[allow(clippy::future_not_send)]
async fn chat(config: Config, text_only: bool) -> anyhow::Result<()> {
    let transcriber: Arc<dyn Transcriber> = Arc::new(config.transcriber()?);
    let replies = ReplyGenerator::new(
        config.chat_provider()?,
        config.persona.clone(),
        config.reply_options(),
    );

    let (directive_tx, directive_rx) = mpsc::unbounded_channel();
    let orchestrator = TurnOrchestrator::new(
        TurnServices {
            transcriber,
            replies,
            speech: synthesizer(&config)?,
        },
        AnimationController::with_default_clips(directive_tx),
    );

    tokio::spawn(terminal_renderer(directive_rx, orchestrator.signal_sender()));
    tokio::spawn(print_events(orchestrator.subscribe(), config.persona.name.clone()));

    let mut capture = if text_only {
        None
    } else {
        AudioCapture::new()
            .inspect_err(|e| {
                tracing::warn!(error = %e, "microphone unavailable, text input only");
            })
            .ok()
    };

    let settings = config.settings_store();
    println!(
        "{} is here. Type to talk{}, /help for commands.",
        config.persona.name,
        if capture.is_some() { " or /talk to speak" } else { "" }
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));

        match cmd {
            "" => {}
            "/quit" | "/exit" => break,
            "/help" => print_help(),
            "/talk" => match capture.as_mut() {
                Some(capture) => push_to_talk(&orchestrator, capture, &mut lines).await?,
                None => println!("(no microphone, type instead)"),
            },
            "/voice" => {
                if arg.is_empty() {
                    println!("voice: {}", orchestrator.voice().provider_voice_id);
                    continue;
                }
                let mut parts = arg.split_whitespace();
                let id = parts.next().unwrap_or_default();
                let language = parts
                    .next()
                    .map_or_else(|| orchestrator.voice().language, ToString::to_string);
                orchestrator.set_voice(VoiceSelection::new(id, language));
                if let Err(e) = settings.set_voice(id) {
                    tracing::warn!(error = %e, "failed to save voice");
                }
            }
            "/key" => match settings.set_api_key(arg) {
                Ok(_) => println!("(API key saved, used from next start)"),
                Err(e) => println!("(could not save API key: {e})"),
            },
            "/memory" => {
                for utterance in orchestrator.memory() {
                    println!("  {}: {}", utterance.role.as_str(), utterance.text);
                }
            }
            _ if cmd.starts_with('/') => match cmd.trim_start_matches('/').parse::<Gesture>() {
                Ok(gesture) => {
                    orchestrator.perform(gesture).await;
                }
                Err(_) => println!("(unknown command {cmd}, try /help)"),
            },
            _ => {
                if orchestrator.submit_text(line).await == TurnOutcome::Busy {
                    println!("(still busy)");
                }
            }
        }
    }

    Ok(())
}

/// Record until the user presses Enter, then run the turn
#[allow(clippy::future_not_send)]
async fn push_to_talk(
    orchestrator: &TurnOrchestrator,
    capture: &mut AudioCapture,
    lines: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<()> {
    let Some(token) = orchestrator.begin_capture() else {
        println!("(still busy)");
        return Ok(());
    };

    if let Err(e) = capture.start() {
        println!("(microphone failed: {e}, type instead)");
        orchestrator.cancel_capture(token);
        return Ok(());
    }

    println!("(listening, press Enter to stop)");
    lines.next_line().await?;

    match capture.finish() {
        Ok(Some(clip)) => {
            orchestrator
                .complete_capture(token, TurnInput::Audio(clip))
                .await;
        }
        Ok(None) => {
            println!("(didn't catch that)");
            orchestrator.cancel_capture(token);
        }
        Err(e) => {
            println!("(recording failed: {e}, type instead)");
            orchestrator.cancel_capture(token);
        }
    }

    Ok(())
}

fn print_help() {
    println!("  <text>            say something");
    println!("  /talk             push-to-talk with the microphone");
    println!("  /pat /kiss /dance /flirt /joke");
    println!("  /voice [id] [lang] show or change the voice");
    println!("  /key <api key>    save an OpenAI API key");
    println!("  /memory           show the conversation so far");
    println!("  /quit");
}

/// Stand-in renderer: logs directives and reports one-shot clips finished
async fn terminal_renderer(
    mut directives: mpsc::UnboundedReceiver<PlaybackDirective>,
    signals: mpsc::UnboundedSender<AnimationSignal>,
) {
    while let Some(directive) = directives.recv().await {
        tracing::debug!(
            from = ?directive.from_clip,
            to = %directive.to_clip,
            looping = directive.looping,
            yaw = directive.yaw_degrees,
            "animation"
        );

        if !directive.looping {
            let signals = signals.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ONE_SHOT_CLIP).await;
                let _ = signals.send(directive.finished());
            });
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<CompanionEvent>, name: String) {
    loop {
        match events.recv().await {
            Ok(CompanionEvent::Reply { text, .. }) => println!("{name}: {text}"),
            Ok(CompanionEvent::Reaction(text)) => println!("{name}: *{text}*"),
            Ok(CompanionEvent::NoSpeech) => println!("(no speech detected)"),
            Ok(CompanionEvent::Status(status)) => tracing::debug!(status, "status"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Run the relay server
async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let openai_key = config
        .api_keys
        .openai
        .clone()
        .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY required for the relay"))?;
    let deepinfra_key = config
        .api_keys
        .deepinfra
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DEEPINFRA_API_KEY required for the relay"))?;

    // the relay always talks to the providers directly
    let transcriber = SpeechToText::new_whisper(openai_key, config.stt.model.clone(), config.timeout)?;
    let speech = TextToSpeech::new(
        TtsBackend::Kokoro {
            api_key: deepinfra_key,
            url: config.tts.kokoro_url.clone(),
            stream: config.tts.stream,
        },
        config.tts.speed,
    )?;

    let state = RelayState {
        transcriber: Arc::new(transcriber),
        speech: Arc::new(speech),
        default_voice: VoiceSelection::new("af_bella", config.tts.voice.language.clone()),
        default_speed: config.tts.speed,
    };

    let port = port.unwrap_or(config.relay.port);
    RelayServer::new(state, port)
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

/// Speak one line through the configured provider
async fn say(config: &Config, text: Option<String>) -> anyhow::Result<()> {
    let text = text.unwrap_or_else(|| config.persona.voice_test_line());
    println!("Speaking with {}: \"{text}\"", config.tts.voice.provider_voice_id);

    let outcome = synthesizer(config)?.speak(&text).await;
    println!("Result: {outcome:?}");

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        capture.clear_buffer();
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    tokio::task::spawn_blocking(move || AudioPlayback::new(sample_rate)?.play_blocking(samples))
        .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}
