//! Voice processing module
//!
//! Microphone capture, speech-to-text, text-to-speech and speaker playback.

mod capture;
mod playback;
pub mod stt;
pub mod tts;

pub use capture::{AudioCapture, MAX_CAPTURE_SECS, SAMPLE_RATE, samples_to_wav};
pub use playback::{AudioPlayback, SpeakerSink, decode, pitch_shift};
pub use stt::{SpeechToText, SttBackend, Transcriber};
pub use tts::{
    AudioSink, SpeechOutcome, SpeechProvider, SpeechSynthesizer, TextToSpeech, TtsBackend,
    VoiceSelection,
};

/// Container format of an audio buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    WebM,
}

impl AudioFormat {
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::WebM => "audio/webm",
        }
    }

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::WebM => "webm",
        }
    }

    /// Guess from a MIME type, ignoring parameters like `;codecs=opus`
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        let base = mime.split(';').next().unwrap_or_default().trim();
        match base {
            "audio/wav" | "audio/wave" | "audio/x-wav" => Some(Self::Wav),
            "audio/mpeg" | "audio/mp3" => Some(Self::Mp3),
            "audio/webm" | "video/webm" => Some(Self::WebM),
            _ => None,
        }
    }

    /// Sniff the container from magic bytes
    #[must_use]
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match data {
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Some(Self::Wav),
            [0x1a, 0x45, 0xdf, 0xa3, ..] => Some(Self::WebM),
            [b'I', b'D', b'3', ..] => Some(Self::Mp3),
            [0xff, b, ..] if b & 0xe0 == 0xe0 => Some(Self::Mp3),
            _ => None,
        }
    }
}

/// An encoded audio buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub format: AudioFormat,
}

impl AudioClip {
    #[must_use]
    pub const fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self { data, format }
    }

    /// File name used for multipart uploads
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("audio.{}", self.format.extension())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
