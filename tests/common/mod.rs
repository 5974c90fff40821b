//! Shared test utilities
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use kitsune::chat::ChatRequest;
use kitsune::voice::{AudioClip, AudioFormat, AudioSink, SpeechProvider, Transcriber, VoiceSelection};
use kitsune::{
    AnimationController, ChatProvider, CompanionEvent, ConversationState, Error, Persona,
    PlaybackDirective, ReplyGenerator, ReplyOptions, Result, TextDisplay, TurnOrchestrator,
    TurnServices,
};

/// Chat provider that replies from a script and records every request
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Result<String>>>,
    pub requests: Mutex<Vec<ChatRequest>>,
    delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedChat {
    pub fn new(replies: impl IntoIterator<Item = Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Replies `reply-N` to every request
    pub fn numbered() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("reply-{call}")))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Transcriber that always returns the same result
pub struct FixedTranscriber(pub Option<String>);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _audio: &AudioClip) -> Result<String> {
        self.0
            .clone()
            .ok_or_else(|| Error::Stt("no speech detected".to_string()))
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Speech provider that succeeds, fails or never answers
pub struct FakeSpeech {
    pub fail: bool,
    pub stall: bool,
    pub spoken: Mutex<Vec<(String, VoiceSelection, f32)>>,
}

impl FakeSpeech {
    pub fn new(fail: bool) -> Self {
        Self {
            fail,
            stall: false,
            spoken: Mutex::new(Vec::new()),
        }
    }

    /// Provider whose requests hang forever
    pub fn stalling() -> Self {
        Self {
            stall: true,
            ..Self::new(false)
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.spoken.lock().unwrap().iter().map(|(t, _, _)| t.clone()).collect()
    }
}

#[async_trait]
impl SpeechProvider for FakeSpeech {
    async fn synthesize(&self, text: &str, voice: &VoiceSelection) -> Result<AudioClip> {
        self.synthesize_at(text, voice, 1.0).await
    }

    async fn synthesize_at(&self, text: &str, voice: &VoiceSelection, speed: f32) -> Result<AudioClip> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(Error::Tts("provider unavailable".to_string()));
        }
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), voice.clone(), speed));
        Ok(AudioClip::new(b"ID3fake".to_vec(), AudioFormat::Mp3))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Sink that records what it was asked to play
#[derive(Default)]
pub struct RecordingSink {
    pub played: Mutex<Vec<AudioClip>>,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, clip: AudioClip, _pitch: f32) -> Result<()> {
        self.played.lock().unwrap().push(clip);
        Ok(())
    }
}

/// Display that records what it showed and for how long
#[derive(Default)]
pub struct RecordingDisplay {
    pub shown: Mutex<Vec<(String, Duration)>>,
}

#[async_trait]
impl TextDisplay for RecordingDisplay {
    async fn show(&self, text: &str, hold: Duration) {
        self.shown.lock().unwrap().push((text.to_string(), hold));
    }
}

/// An orchestrator wired to fakes
pub struct Harness {
    pub orchestrator: TurnOrchestrator,
    pub chat: Arc<ScriptedChat>,
    pub speech: Arc<FakeSpeech>,
    pub sink: Arc<RecordingSink>,
    pub display: Arc<RecordingDisplay>,
    pub directives: mpsc::UnboundedReceiver<PlaybackDirective>,
}

impl Harness {
    pub fn new(chat: ScriptedChat) -> Self {
        Self::build(chat, FixedTranscriber(Some("hello there".to_string())), false, ReplyOptions::default())
    }

    pub fn build(
        chat: ScriptedChat,
        transcriber: FixedTranscriber,
        speech_fails: bool,
        options: ReplyOptions,
    ) -> Self {
        Self::with_speech(chat, transcriber, FakeSpeech::new(speech_fails), options)
    }

    pub fn with_speech(
        chat: ScriptedChat,
        transcriber: FixedTranscriber,
        speech: FakeSpeech,
        options: ReplyOptions,
    ) -> Self {
        let chat = Arc::new(chat);
        let speech = Arc::new(speech);
        let sink = Arc::new(RecordingSink::default());
        let display = Arc::new(RecordingDisplay::default());
        let (tx, directives) = mpsc::unbounded_channel();

        let services = TurnServices {
            transcriber: Arc::new(transcriber),
            replies: ReplyGenerator::new(chat.clone(), Persona::default(), options),
            speech: kitsune::voice::SpeechSynthesizer::new(
                speech.clone(),
                sink.clone(),
                display.clone(),
                VoiceSelection::default(),
                Duration::from_secs(1),
            ),
        };

        Self {
            orchestrator: TurnOrchestrator::new(services, AnimationController::with_default_clips(tx)),
            chat,
            speech,
            sink,
            display,
            directives,
        }
    }
}

/// Everything currently queued on `events`
pub fn drain(events: &mut broadcast::Receiver<CompanionEvent>) -> Vec<CompanionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// The most recent directive queued for `clip`
pub fn last_directive(
    directives: &mut mpsc::UnboundedReceiver<PlaybackDirective>,
    clip: &str,
) -> PlaybackDirective {
    let mut last = None;
    while let Ok(directive) = directives.try_recv() {
        if directive.to_clip == clip {
            last = Some(directive);
        }
    }
    last.unwrap_or_else(|| panic!("no directive for {clip}"))
}

/// The sequence of states entered, in order
pub fn state_path(events: &[CompanionEvent]) -> Vec<ConversationState> {
    events
        .iter()
        .filter_map(|e| match e {
            CompanionEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

/// A short WAV clip of silence
pub fn wav_clip() -> AudioClip {
    let wav = kitsune::voice::samples_to_wav(&vec![0.0; 8000], kitsune::voice::SAMPLE_RATE).unwrap();
    AudioClip::new(wav, AudioFormat::Wav)
}
