//! Speech capture (speech-to-text) and playback (text-to-speech) contract.
//!
//! The session controller only talks to [`SpeechCapabilities`]. Platform
//! specific primitives are wrapped by [`adapter::SpeechAdapter`], which
//! enforces the contract on top of them.

pub mod adapter;

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpeechError {
    #[error("speech is not supported on this platform")]
    Unsupported,
    #[error("speech engine is busy")]
    Busy,
    #[error("no speech was detected")]
    NoSpeech,
    #[error("microphone permission was denied")]
    PermissionDenied,
    #[error("speech capture failed: {0}")]
    Capture(String),
    #[error("speech playback failed: {0}")]
    Playback(String),
}

impl SpeechError {
    /// Transient errors are retried by the capture layer instead of being
    /// reported to the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, SpeechError::NoSpeech)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// The whole answer heard so far. `is_final` marks a confirmed result.
    Transcript { text: String, is_final: bool },
    Failed(SpeechError),
}

pub type CaptureCallback = Arc<dyn Fn(CaptureEvent) + Send + Sync>;
pub type PlaybackCallback = Box<dyn FnOnce(Result<(), SpeechError>) + Send>;

pub trait SpeechCapabilities: Send + Sync {
    /// Both capture and playback are usable.
    fn capability_check(&self) -> bool;

    /// Starts continuous capture. May be called while a previous capture is
    /// still shutting down; the new one starts once the old one has ended.
    fn start_capture(&self, on_result: CaptureCallback) -> Result<(), SpeechError>;

    /// Idempotent.
    fn stop_capture(&self);

    /// Speaks `text`, then calls `on_done` exactly once. Rejected with
    /// [`SpeechError::Busy`] while another utterance is playing.
    fn speak(&self, text: &str, on_done: PlaybackCallback) -> Result<(), SpeechError>;

    /// Stops playback. The pending `on_done` is dropped without being called.
    fn cancel_speech(&self);
}

/// Speech implementation for sessions without any speech support. Forces the
/// controller into typed input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSpeech;

impl SpeechCapabilities for NoSpeech {
    fn capability_check(&self) -> bool {
        false
    }

    fn start_capture(&self, _on_result: CaptureCallback) -> Result<(), SpeechError> {
        Err(SpeechError::Unsupported)
    }

    fn stop_capture(&self) {}

    fn speak(&self, _text: &str, _on_done: PlaybackCallback) -> Result<(), SpeechError> {
        Err(SpeechError::Unsupported)
    }

    fn cancel_speech(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    /// BCP 47 tag, e.g. `en-US`.
    pub lang: String,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceRule {
    /// Language tag contains this locale, e.g. `en-IN`.
    Locale(String),
    /// Voice name contains this text.
    NameContains(String),
    /// Language tag starts with this language, e.g. `en`.
    Language(String),
}

/// Ordered voice preferences. The first rule with a matching voice wins.
#[derive(Debug, Clone, PartialEq)]
pub struct VoicePreference {
    pub rules: Vec<VoiceRule>,
}

impl Default for VoicePreference {
    fn default() -> Self {
        Self {
            rules: vec![
                VoiceRule::Locale("en-IN".to_string()),
                VoiceRule::NameContains("Indian".to_string()),
                VoiceRule::Locale("en-US".to_string()),
                VoiceRule::Language("en".to_string()),
            ],
        }
    }
}

impl VoicePreference {
    /// Best-effort selection; `None` means "let the platform decide".
    pub fn select(&self, voices: &[Voice]) -> Option<Voice> {
        self.rules.iter().find_map(|rule| {
            voices
                .iter()
                .find(|voice| match rule {
                    VoiceRule::Locale(locale) => voice.lang.contains(locale.as_str()),
                    VoiceRule::NameContains(text) => voice.name.contains(text.as_str()),
                    VoiceRule::Language(lang) => voice.lang.starts_with(lang.as_str()),
                })
                .cloned()
        })
    }
}
