//! Speech primitives for a plain terminal.
//!
//! "Playback" prints the utterance and finishes after roughly the time it
//! takes to read it. "Recognition" turns typed lines into final results
//! while a capture is active.

use coach_core::speech::SpeechError;
use coach_core::speech::Voice;
use coach_core::speech::adapter::{PlatformEvent, PlatformSender, RecognitionSegment, SpeechPlatform, Utterance};
use parking_lot::Mutex;
use std::io::Write;
use std::time::Duration;
use tokio::task::JoinHandle;

const PER_WORD: Duration = Duration::from_millis(120);
const MIN_READING_TIME: Duration = Duration::from_millis(400);

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineInput {
    Skip,
    Stop,
    /// Submit what has been captured so far.
    Done,
    Unknown(String),
    Text(String),
}

pub fn parse_line(line: &str) -> LineInput {
    match line.trim() {
        "/skip" => LineInput::Skip,
        "/stop" => LineInput::Stop,
        "/done" => LineInput::Done,
        cmd if cmd.starts_with('/') => LineInput::Unknown(cmd.to_string()),
        _ => LineInput::Text(line.to_string()),
    }
}

pub fn reading_time(text: &str) -> Duration {
    let words = text.split_whitespace().count() as u32;
    (PER_WORD * words).max(MIN_READING_TIME)
}

struct Playing {
    id: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct TerminalState {
    recognition: Option<(u64, PlatformSender)>,
    playing: Option<Playing>,
}

pub struct TerminalPlatform {
    state: Mutex<TerminalState>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl Default for TerminalPlatform {
    fn default() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }
}

impl TerminalPlatform {
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            state: Mutex::new(TerminalState::default()),
            out: Mutex::new(out),
        }
    }

    /// Feeds a typed line to the active capture. Returns false when nothing
    /// is listening, in which case the line is a typed answer.
    pub fn deliver_line(&self, line: &str) -> bool {
        let state = self.state.lock();
        let Some((session, events)) = &state.recognition else {
            return false;
        };
        events.send(PlatformEvent::RecognitionResult {
            session: *session,
            segments: vec![RecognitionSegment {
                text: line.to_string(),
                is_final: true,
            }],
        });
        true
    }

    fn print(&self, text: &str) {
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "\nCoach: {text}").and_then(|_| out.flush()) {
            tracing::warn!("Failed to write to the terminal: {}", e);
        }
    }
}

impl SpeechPlatform for TerminalPlatform {
    fn recognition_available(&self) -> bool {
        true
    }

    fn synthesis_available(&self) -> bool {
        true
    }

    fn voices(&self) -> Vec<Voice> {
        vec![Voice::new("Terminal", "en-US")]
    }

    fn start_recognition(&self, session: u64, events: PlatformSender) -> Result<(), SpeechError> {
        let mut state = self.state.lock();
        if state.recognition.is_some() {
            return Err(SpeechError::Busy);
        }
        state.recognition = Some((session, events));
        Ok(())
    }

    fn stop_recognition(&self, session: u64) {
        let mut state = self.state.lock();
        if let Some((active, events)) = state.recognition.take() {
            if active == session {
                events.send(PlatformEvent::RecognitionEnded { session });
            } else {
                state.recognition = Some((active, events));
            }
        }
    }

    fn speak(&self, utterance: Utterance, events: PlatformSender) -> Result<(), SpeechError> {
        self.print(&utterance.text);
        let id = utterance.id;
        let delay = reading_time(&utterance.text);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.send(PlatformEvent::UtteranceEnded { id });
        });

        if let Some(previous) = self.state.lock().playing.replace(Playing { id, timer }) {
            tracing::debug!("Utterance {} replaced before it finished", previous.id);
            previous.timer.abort();
        }
        Ok(())
    }

    fn cancel_speech(&self) {
        if let Some(playing) = self.state.lock().playing.take() {
            playing.timer.abort();
        }
    }
}
