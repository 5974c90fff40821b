//! Turn orchestrator
//!
//! The conversation state machine. A turn runs
//! `listening -> thinking -> speaking -> idle` and at most one turn exists
//! at a time: the pending-turn slot is checked and claimed under a single
//! lock that is never held across an `.await`. Gestures borrow the
//! character between turns without touching conversation memory.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::actions::Gesture;
use crate::animation::{AnimationController, AnimationSignal};
use crate::chat::{Reply, ReplyGenerator};
use crate::memory::Utterance;
use crate::state::{ConversationState, status};
use crate::voice::{AudioClip, SpeechOutcome, SpeechSynthesizer, Transcriber, VoiceSelection};

/// Capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 256;

/// Observable notifications from the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanionEvent {
    StateChanged {
        from: ConversationState,
        to: ConversationState,
    },
    Status(&'static str),
    UserUtterance(String),
    Reply { text: String, fallback: bool },
    /// Canned line shown for an animated gesture
    Reaction(String),
    /// Reply shown as text because speech failed
    DisplayText(String),
    NoSpeech,
    /// A turn or gesture was requested while a turn was active
    Busy,
}

/// Raw input of a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    Audio(AudioClip),
    Text(String),
}

/// The turn currently in flight
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub id: Uuid,
    /// Known once capture completes
    pub raw_input: Option<TurnInput>,
    pub started_at: DateTime<Utc>,
}

/// Proof of owning the pending turn, handed out by
/// [`TurnOrchestrator::begin_capture`]
///
/// Dropping a token that was neither completed nor cancelled cancels the
/// capture, so an abandoned caller cannot leave the companion listening.
#[derive(Debug)]
#[must_use = "dropping the token cancels the capture"]
pub struct TurnToken {
    id: Uuid,
    inner: Weak<Inner>,
    armed: bool,
}

impl TurnToken {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Take the turn id, leaving nothing for `Drop` to undo
    fn consume(mut self) -> Uuid {
        self.armed = false;
        self.id
    }
}

impl Drop for TurnToken {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(inner) = self.inner.upgrade()
            && inner.abandon_capture(self.id)
        {
            tracing::debug!(turn = %self.id, "capture token dropped");
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Another turn was active; nothing happened
    Busy,

    /// The token did not match the pending turn
    Stale,

    /// Transcription failed or produced nothing
    NoSpeech,

    /// A reply was produced and spoken or displayed
    Completed { reply: Reply, speech: SpeechOutcome },
}

/// How a gesture request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureOutcome {
    /// A turn was active
    Ignored,

    /// The renderer has no clip for this gesture
    Unavailable,

    /// The character is acting; it returns to idle on its own
    Acting,

    /// The gesture ran as a conversational turn
    Spoken(TurnOutcome),
}

/// The providers a turn calls, in order
pub struct TurnServices {
    pub transcriber: Arc<dyn Transcriber>,
    pub replies: ReplyGenerator,
    pub speech: SpeechSynthesizer,
}

struct Machine {
    state: ConversationState,
    pending: Option<PendingTurn>,
    animation: AnimationController,
}

struct Inner {
    services: TurnServices,
    machine: Mutex<Machine>,
    events: broadcast::Sender<CompanionEvent>,
}

/// Handle to the conversation state machine
///
/// Cheap to clone; every clone drives the same companion.
#[derive(Clone)]
pub struct TurnOrchestrator {
    inner: Arc<Inner>,
}

impl TurnOrchestrator {
    /// Create an idle orchestrator
    #[must_use]
    pub fn new(services: TurnServices, mut animation: AnimationController) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        animation.apply(ConversationState::Idle);

        Self {
            inner: Arc::new(Inner {
                services,
                machine: Mutex::new(Machine {
                    state: ConversationState::Idle,
                    pending: None,
                    animation,
                }),
                events,
            }),
        }
    }

    /// Receive every event emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CompanionEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.inner.lock().state
    }

    /// Whether a turn is in flight
    #[must_use]
    pub fn is_turn_active(&self) -> bool {
        self.inner.lock().pending.is_some()
    }

    /// Copy of the pending turn record
    #[must_use]
    pub fn pending_turn(&self) -> Option<PendingTurn> {
        self.inner.lock().pending.clone()
    }

    /// Conversation memory, oldest first
    #[must_use]
    pub fn memory(&self) -> Vec<Utterance> {
        self.inner.services.replies.memory()
    }

    #[must_use]
    pub fn voice(&self) -> VoiceSelection {
        self.inner.services.speech.voice()
    }

    pub fn set_voice(&self, voice: VoiceSelection) {
        self.inner.services.speech.set_voice(voice);
    }

    /// Tell the renderer which clips it has loaded
    pub fn set_clip_loaded(&self, clip: &str, loaded: bool) {
        self.inner.lock().animation.set_loaded(clip, loaded);
    }

    /// Start listening for user input
    ///
    /// Returns `None` (and emits [`CompanionEvent::Busy`]) if a turn is
    /// already in flight.
    #[must_use]
    pub fn begin_capture(&self) -> Option<TurnToken> {
        self.inner
            .claim_turn(None, ConversationState::Listening, status::LISTENING)
    }

    /// Abandon a capture that produced no usable input
    ///
    /// Returns whether the turn was still listening.
    pub fn cancel_capture(&self, token: TurnToken) -> bool {
        let id = token.consume();
        self.inner.abandon_capture(id)
    }

    /// Finish capture and run the rest of the turn
    pub async fn complete_capture(&self, token: TurnToken, input: TurnInput) -> TurnOutcome {
        let id = token.consume();
        let _turn = TurnGuard::new(&self.inner, id);

        {
            let mut machine = self.inner.lock();
            match machine.pending.as_mut() {
                Some(pending) if pending.id == id => {
                    pending.raw_input = Some(input.clone());
                }
                _ => {
                    tracing::warn!(turn = %id, "completion for a turn that is not pending");
                    return TurnOutcome::Stale;
                }
            }
            self.inner
                .transition(&mut machine, ConversationState::Thinking, Some(status::PROCESSING));
        }

        let text = match input {
            TurnInput::Text(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            TurnInput::Audio(clip) => match self.inner.services.transcriber.transcribe(&clip).await {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(
                        turn = %id,
                        provider = self.inner.services.transcriber.name(),
                        error = %e,
                        "transcription failed"
                    );
                    None
                }
            },
        };

        let Some(text) = text else {
            self.inner.emit(CompanionEvent::NoSpeech);
            self.inner.emit(CompanionEvent::Status(status::NO_SPEECH));
            return TurnOutcome::NoSpeech;
        };

        self.inner.emit(CompanionEvent::UserUtterance(text.clone()));
        self.inner.reply_and_speak(&text).await
    }

    /// Run a full turn from typed text
    pub async fn submit_text(&self, text: impl Into<String>) -> TurnOutcome {
        match self.begin_capture() {
            Some(token) => self.complete_capture(token, TurnInput::Text(text.into())).await,
            None => TurnOutcome::Busy,
        }
    }

    /// Run a full turn from an already captured clip
    pub async fn submit_audio(&self, clip: AudioClip) -> TurnOutcome {
        match self.begin_capture() {
            Some(token) => self.complete_capture(token, TurnInput::Audio(clip)).await,
            None => TurnOutcome::Busy,
        }
    }

    /// Perform a gesture
    ///
    /// Animated gestures return as soon as the clip starts; the character
    /// goes back to idle when the renderer signals the end of the clip or,
    /// for continuous gestures, when the auto-cancel timer fires. Spoken
    /// gestures run a whole turn and return its outcome.
    pub async fn perform(&self, gesture: Gesture) -> GestureOutcome {
        let line = gesture.pick_line(&mut rand::thread_rng());

        if gesture.is_spoken() {
            let Some(token) = self.inner.claim_turn(
                Some(TurnInput::Text(line.clone())),
                ConversationState::Thinking,
                status::THINKING,
            ) else {
                return GestureOutcome::Ignored;
            };
            let id = token.consume();
            let _turn = TurnGuard::new(&self.inner, id);

            tracing::info!(gesture = %gesture, turn = %id, "spoken gesture");
            self.inner.emit(CompanionEvent::UserUtterance(line.clone()));
            return GestureOutcome::Spoken(self.inner.reply_and_speak(&line).await);
        }

        let run = {
            let mut machine = self.inner.lock();
            if machine.pending.is_some() {
                tracing::debug!(gesture = %gesture, "turn active, gesture ignored");
                self.inner.emit(CompanionEvent::Busy);
                return GestureOutcome::Ignored;
            }

            let acting = ConversationState::Acting(gesture);
            if !machine.animation.can_play(acting) {
                tracing::debug!(gesture = %gesture, "no clip loaded for gesture");
                return GestureOutcome::Unavailable;
            }

            self.inner.transition(&mut machine, acting, None);
            self.inner.emit(CompanionEvent::Reaction(line.clone()));
            machine.animation.current_run()
        };

        // voiced without claiming the turn; playback is serialized by the synthesizer
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            if let Some(inner) = weak.upgrade() {
                inner.services.speech.speak(&line).await;
            }
        });

        if let (Some(after), Some(clip)) = (gesture.auto_cancel_after(), gesture.clip()) {
            let weak = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if let Some(inner) = weak.upgrade() {
                    tracing::debug!(gesture = %gesture, "auto-cancelling gesture");
                    inner.end_gesture(&AnimationSignal::Cancelled {
                        clip: clip.to_string(),
                        run,
                    });
                }
            });
        }

        GestureOutcome::Acting
    }

    /// Feed back a clip signal from the renderer
    ///
    /// Signals for clips that are no longer playing are ignored.
    pub fn handle_signal(&self, signal: &AnimationSignal) {
        self.inner.end_gesture(signal);
    }

    /// Channel the renderer can send [`AnimationSignal`]s on
    ///
    /// Spawns a task that forwards signals to [`Self::handle_signal`]; it
    /// ends when every sender is dropped or the orchestrator is gone. Must
    /// be called from within a tokio runtime.
    #[must_use]
    pub fn signal_sender(&self) -> mpsc::UnboundedSender<AnimationSignal> {
        let (tx, mut rx) = mpsc::unbounded_channel::<AnimationSignal>();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.end_gesture(&signal);
            }
        });

        tx
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CompanionEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, machine: &mut Machine, to: ConversationState, status: Option<&'static str>) {
        let from = machine.state;
        if from != to {
            machine.state = to;
            machine.animation.apply(to);
            tracing::debug!(from = %from, to = %to, "state transition");
            self.emit(CompanionEvent::StateChanged { from, to });
        }
        if let Some(status) = status {
            self.emit(CompanionEvent::Status(status));
        }
    }

    fn claim_turn(
        self: &Arc<Self>,
        raw_input: Option<TurnInput>,
        to: ConversationState,
        status: &'static str,
    ) -> Option<TurnToken> {
        let mut machine = self.lock();
        if let Some(pending) = &machine.pending {
            tracing::debug!(active = %pending.id, "turn already in progress, ignoring");
            self.emit(CompanionEvent::Busy);
            return None;
        }

        let id = Uuid::new_v4();
        machine.pending = Some(PendingTurn {
            id,
            raw_input,
            started_at: Utc::now(),
        });
        tracing::info!(turn = %id, "turn started");
        self.transition(&mut machine, to, Some(status));

        Some(TurnToken {
            id,
            inner: Arc::downgrade(self),
            armed: true,
        })
    }

    /// Drop a turn that is still listening; returns whether it was
    fn abandon_capture(&self, id: Uuid) -> bool {
        let mut machine = self.lock();
        let listening = machine.state == ConversationState::Listening
            && machine.pending.as_ref().is_some_and(|p| p.id == id);
        if listening {
            machine.pending = None;
            tracing::info!(turn = %id, "capture cancelled");
            self.transition(&mut machine, ConversationState::Idle, Some(status::READY));
        }
        listening
    }

    fn finish_turn(&self, id: Uuid) {
        let mut machine = self.lock();
        let Some(started_at) = machine
            .pending
            .as_ref()
            .filter(|p| p.id == id)
            .map(|p| p.started_at)
        else {
            return;
        };

        let elapsed = Utc::now() - started_at;
        tracing::info!(turn = %id, elapsed_ms = elapsed.num_milliseconds(), "turn finished");
        machine.pending = None;
        self.transition(&mut machine, ConversationState::Idle, Some(status::READY));
    }

    async fn reply_and_speak(&self, text: &str) -> TurnOutcome {
        let reply = self.services.replies.reply(text).await;

        {
            let mut machine = self.lock();
            self.emit(CompanionEvent::Reply {
                text: reply.text.clone(),
                fallback: reply.fallback,
            });
            self.transition(&mut machine, ConversationState::Speaking, Some(status::SPEAKING));
        }

        let speech = self.services.speech.speak(&reply.text).await;
        if speech == SpeechOutcome::DisplayedAsFallback {
            self.emit(CompanionEvent::DisplayText(reply.text.clone()));
        }

        TurnOutcome::Completed { reply, speech }
    }

    fn end_gesture(&self, signal: &AnimationSignal) {
        let mut machine = self.lock();
        let ConversationState::Acting(current) = machine.state else {
            tracing::trace!(clip = signal.clip(), "signal while not acting, ignored");
            return;
        };

        let same_clip = current.clip() == Some(signal.clip());
        let same_run = signal.run() == machine.animation.current_run();
        if same_clip && same_run {
            tracing::debug!(gesture = %current, signal = ?signal, "gesture ended");
            self.transition(&mut machine, ConversationState::Idle, Some(status::READY));
        }
    }
}

/// Returns the companion to idle when a turn ends, however it ends
///
/// Covers early returns and the turn future being dropped mid-flight.
struct TurnGuard<'a> {
    inner: &'a Inner,
    id: Uuid,
}

impl<'a> TurnGuard<'a> {
    const fn new(inner: &'a Inner, id: Uuid) -> Self {
        Self { inner, id }
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.inner.finish_turn(self.id);
    }
}
