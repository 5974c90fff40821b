//! Character animation controller
//!
//! Maps each [`ConversationState`] to an animation clip and emits a
//! crossfade [`PlaybackDirective`] to whatever renders the character. The
//! renderer reports back with [`AnimationSignal`]s when a one-shot clip
//! ends. Every directive carries a run number and signals echo it, so a
//! late report about an earlier playback of the same clip can be told
//! apart from the current one.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::actions::Gesture;
use crate::state::ConversationState;

/// Crossfade length between clips
pub const CROSSFADE: Duration = Duration::from_millis(500);

/// Yaw applied while the character is speaking
pub const SPEAKING_YAW_DEGREES: f32 = -30.0;

/// How a bound clip plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipMode {
    Loop,
    Once,
}

/// A clip bound to a state label
#[derive(Debug, Clone)]
struct ClipBinding {
    clip: String,
    mode: ClipMode,
    loaded: bool,
}

/// Crossfade command for the renderer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackDirective {
    /// Clip currently playing, if any
    pub from_clip: Option<String>,
    pub to_clip: String,
    #[serde(with = "duration_secs")]
    pub fade: Duration,
    pub looping: bool,
    pub yaw_degrees: f32,

    /// Identifies this playback; signals about it carry the same number
    pub run: u64,
}

impl PlaybackDirective {
    /// Signal that this playback reached its end
    #[must_use]
    pub fn finished(&self) -> AnimationSignal {
        AnimationSignal::Finished {
            clip: self.to_clip.clone(),
            run: self.run,
        }
    }

    /// Signal that this playback was stopped early
    #[must_use]
    pub fn cancelled(&self) -> AnimationSignal {
        AnimationSignal::Cancelled {
            clip: self.to_clip.clone(),
            run: self.run,
        }
    }
}

/// Message from the renderer (or a timer) about a playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnimationSignal {
    /// A one-shot clip played to its end
    Finished { clip: String, run: u64 },

    /// A clip was stopped early
    Cancelled { clip: String, run: u64 },
}

impl AnimationSignal {
    #[must_use]
    pub fn clip(&self) -> &str {
        match self {
            Self::Finished { clip, .. } | Self::Cancelled { clip, .. } => clip,
        }
    }

    /// Run number of the playback this signal is about
    #[must_use]
    pub const fn run(&self) -> u64 {
        match self {
            Self::Finished { run, .. } | Self::Cancelled { run, .. } => *run,
        }
    }
}

/// Drives the character's animation from conversation state
#[derive(Debug)]
pub struct AnimationController {
    bindings: HashMap<&'static str, ClipBinding>,
    current: Option<String>,
    run: u64,
    directives: mpsc::UnboundedSender<PlaybackDirective>,
}

impl AnimationController {
    /// Controller with no clips bound
    #[must_use]
    pub fn new(directives: mpsc::UnboundedSender<PlaybackDirective>) -> Self {
        Self {
            bindings: HashMap::new(),
            current: None,
            run: 0,
            directives,
        }
    }

    /// Controller with the standard clip set, all marked loaded
    #[must_use]
    pub fn with_default_clips(directives: mpsc::UnboundedSender<PlaybackDirective>) -> Self {
        let mut controller = Self::new(directives);
        for state in [
            ConversationState::Idle,
            ConversationState::Listening,
            ConversationState::Thinking,
            ConversationState::Speaking,
        ] {
            controller.bind(state, state.label(), ClipMode::Loop);
        }
        for gesture in Gesture::ALL {
            if let Some(clip) = gesture.clip() {
                let mode = if gesture.is_continuous() {
                    ClipMode::Loop
                } else {
                    ClipMode::Once
                };
                controller.bind(ConversationState::Acting(gesture), clip, mode);
            }
        }
        controller
    }

    /// Bind `state` to `clip` and mark it loaded
    pub fn bind(&mut self, state: ConversationState, clip: impl Into<String>, mode: ClipMode) {
        self.bindings.insert(
            state.label(),
            ClipBinding {
                clip: clip.into(),
                mode,
                loaded: true,
            },
        );
    }

    /// Record whether the renderer has `clip` available
    pub fn set_loaded(&mut self, clip: &str, loaded: bool) {
        for binding in self.bindings.values_mut().filter(|b| b.clip == clip) {
            binding.loaded = loaded;
        }
    }

    /// Whether `state` has a loaded clip
    #[must_use]
    pub fn can_play(&self, state: ConversationState) -> bool {
        self.bindings
            .get(state.label())
            .is_some_and(|b| b.loaded)
    }

    /// Clip currently playing
    #[must_use]
    pub fn current_clip(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Run number of the latest directive (0 before the first)
    #[must_use]
    pub const fn current_run(&self) -> u64 {
        self.run
    }

    /// Crossfade to the clip bound to `state`
    ///
    /// Unknown or unloaded states are ignored and return `None`.
    pub fn apply(&mut self, state: ConversationState) -> Option<PlaybackDirective> {
        let Some(binding) = self.bindings.get(state.label()).filter(|b| b.loaded) else {
            tracing::debug!(state = %state, "no loaded clip for state");
            return None;
        };

        self.run += 1;
        let directive = PlaybackDirective {
            from_clip: self.current.clone(),
            to_clip: binding.clip.clone(),
            fade: CROSSFADE,
            looping: binding.mode == ClipMode::Loop,
            yaw_degrees: if state == ConversationState::Speaking {
                SPEAKING_YAW_DEGREES
            } else {
                0.0
            },
            run: self.run,
        };

        self.current = Some(binding.clip.clone());
        tracing::trace!(from = ?directive.from_clip, to = %directive.to_clip, "crossfade");

        // no renderer attached is fine
        let _ = self.directives.send(directive.clone());
        Some(directive)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> (AnimationController, mpsc::UnboundedReceiver<PlaybackDirective>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AnimationController::with_default_clips(tx), rx)
    }

    #[test]
    fn test_crossfade_from_previous_clip() {
        let (mut anim, mut rx) = controller();

        anim.apply(ConversationState::Idle);
        let directive = anim.apply(ConversationState::Listening).unwrap();

        assert_eq!(directive.from_clip.as_deref(), Some("idle"));
        assert_eq!(directive.to_clip, "listening");
        assert_eq!(directive.fade, CROSSFADE);
        assert!(directive.looping);

        assert_eq!(rx.try_recv().unwrap().to_clip, "idle");
        assert_eq!(rx.try_recv().unwrap(), directive);
    }

    #[test]
    fn test_speaking_turns_the_character() {
        let (mut anim, _rx) = controller();

        assert_eq!(anim.apply(ConversationState::Speaking).unwrap().yaw_degrees, SPEAKING_YAW_DEGREES);
        assert!(anim.apply(ConversationState::Idle).unwrap().yaw_degrees.abs() < f32::EPSILON);
    }

    #[test]
    fn test_one_shot_gesture_does_not_loop() {
        let (mut anim, _rx) = controller();

        let pat = anim.apply(ConversationState::Acting(Gesture::Pat)).unwrap();
        assert!(!pat.looping);
        let dance = anim.apply(ConversationState::Acting(Gesture::Dance)).unwrap();
        assert!(dance.looping);
    }

    #[test]
    fn test_unloaded_and_unknown_states_are_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut anim = AnimationController::new(tx);
        anim.bind(ConversationState::Idle, "idle", ClipMode::Loop);
        anim.apply(ConversationState::Idle);
        let _ = rx.try_recv();

        assert!(anim.apply(ConversationState::Thinking).is_none());

        anim.set_loaded("idle", false);
        assert!(anim.apply(ConversationState::Idle).is_none());
        assert!(!anim.can_play(ConversationState::Idle));
        assert_eq!(anim.current_clip(), Some("idle"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_each_playback_gets_a_new_run() {
        let (mut anim, _rx) = controller();

        let first = anim.apply(ConversationState::Acting(Gesture::Pat)).unwrap();
        anim.apply(ConversationState::Idle);
        let second = anim.apply(ConversationState::Acting(Gesture::Pat)).unwrap();

        assert!(second.run > first.run);
        assert_eq!(anim.current_run(), second.run);
        assert_eq!(first.finished().clip(), "pat");
        assert_ne!(first.finished(), second.finished());
        assert_eq!(second.cancelled().run(), second.run);
    }

    #[test]
    fn test_send_without_renderer_is_harmless() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut anim = AnimationController::with_default_clips(tx);
        assert!(anim.apply(ConversationState::Thinking).is_some());
    }
}
