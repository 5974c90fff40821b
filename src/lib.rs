//! Kitsune - turn-taking pipeline for an animated voice companion
//!
//! This library provides the core functionality for the companion:
//! - The turn orchestrator (listening, thinking, speaking, idle)
//! - Speech-to-text, reply generation and text-to-speech clients
//! - Bounded conversation memory
//! - Animation directives for whatever renders the character
//! - A local relay server for the speech providers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Terminal companion  │  Renderer bridge      │
//! └────────────────────┬────────────────────────────────┘
//!                      │ CompanionEvent / PlaybackDirective
//! ┌────────────────────▼────────────────────────────────┐
//! │                Turn Orchestrator                     │
//! │   Animation  │  Memory  │  Gestures                  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   STT (Whisper, relay)  │  Chat  │  TTS (OpenAI,     │
//! │                         │        │  Kokoro, Coqui)   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod animation;
pub mod api;
pub mod chat;
pub mod config;
pub mod display;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod persona;
pub mod settings;
pub mod state;
pub mod voice;

pub use actions::Gesture;
pub use animation::{AnimationController, AnimationSignal, PlaybackDirective};
pub use chat::{ChatProvider, OpenAiChat, Reply, ReplyGenerator, ReplyOptions};
pub use config::Config;
pub use display::{TerminalDisplay, TextDisplay};
pub use error::{Error, Result};
pub use memory::{ConversationMemory, Role, Utterance};
pub use orchestrator::{
    CompanionEvent, GestureOutcome, TurnInput, TurnOrchestrator, TurnOutcome, TurnServices,
};
pub use persona::Persona;
pub use settings::{Settings, SettingsStore};
pub use state::ConversationState;
