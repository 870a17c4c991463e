//! [`SpeechAdapter`] turns raw platform speech primitives into the
//! [`SpeechCapabilities`] contract.
//!
//! Platforms report everything through a [`PlatformSender`]. A single pump
//! task owns the event stream, so platform callbacks never re-enter the
//! adapter or the platform while they are running.

use super::{
    CaptureCallback, CaptureEvent, PlaybackCallback, SpeechCapabilities, SpeechError, Voice,
    VoicePreference,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Delay before capture is restarted after a transient failure.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionSegment {
    pub text: String,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub voice: Option<Voice>,
    pub rate: f32,
    pub pitch: f32,
}

/// Raw notifications from a platform. `session` and `id` echo the values the
/// adapter passed in when starting the operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// New recognition segments since the previous result event.
    RecognitionResult {
        session: u64,
        segments: Vec<RecognitionSegment>,
    },
    RecognitionError { session: u64, error: SpeechError },
    /// Must be sent once for every started session, after a stop or error.
    RecognitionEnded { session: u64 },
    UtteranceEnded { id: u64 },
    UtteranceFailed { id: u64, error: SpeechError },
}

enum AdapterEvent {
    Platform(PlatformEvent),
    RestartCapture { session: u64 },
}

#[derive(Clone)]
pub struct PlatformSender {
    tx: mpsc::UnboundedSender<AdapterEvent>,
}

impl PlatformSender {
    pub fn send(&self, event: PlatformEvent) {
        if self.tx.send(AdapterEvent::Platform(event)).is_err() {
            tracing::debug!("Speech adapter is gone, dropping platform event");
        }
    }
}

/// Speech primitives of one platform (browser engine, OS service, terminal).
pub trait SpeechPlatform: Send + Sync + 'static {
    fn recognition_available(&self) -> bool;

    fn synthesis_available(&self) -> bool;

    fn voices(&self) -> Vec<Voice>;

    fn start_recognition(&self, session: u64, events: PlatformSender) -> Result<(), SpeechError>;

    fn stop_recognition(&self, session: u64);

    fn speak(&self, utterance: Utterance, events: PlatformSender) -> Result<(), SpeechError>;

    fn cancel_speech(&self);
}

struct ActiveCapture {
    session: u64,
    on_result: CaptureCallback,
    finalized: String,
    /// The platform session has ended and a restart is due after the backoff.
    awaiting_restart: bool,
}

enum CaptureSlot {
    Idle,
    Active(ActiveCapture),
    Stopping {
        session: u64,
        pending: Option<CaptureCallback>,
    },
}

struct ActiveUtterance {
    id: u64,
    on_done: PlaybackCallback,
}

struct AdapterState {
    next_id: u64,
    capture: CaptureSlot,
    utterance: Option<ActiveUtterance>,
}

impl AdapterState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct Shared {
    platform: Arc<dyn SpeechPlatform>,
    state: Mutex<AdapterState>,
    sender: PlatformSender,
    preference: VoicePreference,
    retry_backoff: Duration,
}

pub struct SpeechAdapter {
    shared: Arc<Shared>,
    pump: tokio::task::JoinHandle<()>,
}

impl SpeechAdapter {
    /// Must be called inside a Tokio runtime; spawns the event pump.
    pub fn new(
        platform: Arc<dyn SpeechPlatform>,
        preference: VoicePreference,
        retry_backoff: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            platform,
            state: Mutex::new(AdapterState {
                next_id: 0,
                capture: CaptureSlot::Idle,
                utterance: None,
            }),
            sender: PlatformSender { tx },
            preference,
            retry_backoff,
        });

        let pump_shared = Arc::downgrade(&shared);
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(shared) = pump_shared.upgrade() else {
                    break;
                };
                shared.handle(event);
            }
            tracing::debug!("Speech adapter pump stopped");
        });

        Self { shared, pump }
    }
}

impl Drop for SpeechAdapter {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl Shared {
    fn handle(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::Platform(PlatformEvent::RecognitionResult { session, segments }) => {
                self.on_recognition_result(session, segments)
            }
            AdapterEvent::Platform(PlatformEvent::RecognitionError { session, error }) => {
                self.on_recognition_error(session, error)
            }
            AdapterEvent::Platform(PlatformEvent::RecognitionEnded { session }) => {
                self.on_recognition_ended(session)
            }
            AdapterEvent::Platform(PlatformEvent::UtteranceEnded { id }) => self.finish_utterance(id, Ok(())),
            AdapterEvent::Platform(PlatformEvent::UtteranceFailed { id, error }) => {
                self.finish_utterance(id, Err(error))
            }
            AdapterEvent::RestartCapture { session } => self.restart_capture(session),
        }
    }

    fn on_recognition_result(&self, session: u64, segments: Vec<RecognitionSegment>) {
        let (callback, event) = {
            let mut state = self.state.lock();
            let CaptureSlot::Active(active) = &mut state.capture else {
                return;
            };
            if active.session != session || segments.is_empty() {
                return;
            }

            let mut interim = String::new();
            for segment in &segments {
                if segment.is_final {
                    active.finalized.push_str(&segment.text);
                    active.finalized.push(' ');
                } else {
                    interim.push_str(&segment.text);
                }
            }
            let is_final = segments.last().is_some_and(|s| s.is_final);
            let text = format!("{}{}", active.finalized, interim).trim().to_string();
            (active.on_result.clone(), CaptureEvent::Transcript { text, is_final })
        };
        callback(event);
    }

    fn on_recognition_error(&self, session: u64, error: SpeechError) {
        if error.is_transient() {
            // The platform follows up with `RecognitionEnded`, which restarts capture.
            tracing::debug!("No speech detected in capture session {}, will retry", session);
            return;
        }

        let (callback, still_running) = {
            let mut state = self.state.lock();
            let (callback, still_running) = match &state.capture {
                CaptureSlot::Active(active) if active.session == session => {
                    (active.on_result.clone(), !active.awaiting_restart)
                }
                _ => return,
            };
            state.capture = if still_running {
                CaptureSlot::Stopping { session, pending: None }
            } else {
                CaptureSlot::Idle
            };
            (callback, still_running)
        };
        tracing::warn!("Speech capture failed: {}", error);
        if still_running {
            self.platform.stop_recognition(session);
        }
        callback(CaptureEvent::Failed(error));
    }

    fn on_recognition_ended(&self, session: u64) {
        let pending = {
            let mut state = self.state.lock();
            let pending = match &mut state.capture {
                CaptureSlot::Stopping {
                    session: stopping,
                    pending,
                } if *stopping == session => pending.take(),
                // The platform ended a continuous capture on its own.
                CaptureSlot::Active(active) if active.session == session && !active.awaiting_restart => {
                    active.awaiting_restart = true;
                    None
                }
                _ => return,
            };
            match pending {
                Some(callback) => {
                    let next = Self::activate(&mut state, callback.clone());
                    Some((next, callback))
                }
                None if matches!(state.capture, CaptureSlot::Stopping { .. }) => {
                    state.capture = CaptureSlot::Idle;
                    return;
                }
                None => None,
            }
        };

        match pending {
            Some((next, callback)) => {
                tracing::debug!("Previous capture ended, starting queued capture");
                if let Err(e) = self.launch(next) {
                    callback(CaptureEvent::Failed(e));
                }
            }
            None => self.spawn_restart(session),
        }
    }

    fn spawn_restart(&self, session: u64) {
        let tx = self.sender.tx.clone();
        let backoff = self.retry_backoff;
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = tx.send(AdapterEvent::RestartCapture { session });
        });
    }

    fn restart_capture(&self, session: u64) {
        let (new_session, callback) = {
            let mut state = self.state.lock();
            let new_session = state.next_id();
            match &mut state.capture {
                CaptureSlot::Active(active) if active.session == session && active.awaiting_restart => {
                    active.session = new_session;
                    active.awaiting_restart = false;
                    (new_session, active.on_result.clone())
                }
                _ => return,
            }
        };
        tracing::debug!("Restarting capture as session {}", new_session);
        if let Err(e) = self.launch(new_session) {
            callback(CaptureEvent::Failed(e));
        }
    }

    /// Puts a new capture in the slot. The caller starts it with [`Shared::launch`]
    /// once the lock is released.
    fn activate(state: &mut AdapterState, on_result: CaptureCallback) -> u64 {
        let session = state.next_id();
        state.capture = CaptureSlot::Active(ActiveCapture {
            session,
            on_result,
            finalized: String::new(),
            awaiting_restart: false,
        });
        session
    }

    fn launch(&self, session: u64) -> Result<(), SpeechError> {
        tracing::debug!("Starting capture session {}", session);
        let started = self.platform.start_recognition(session, self.sender.clone());

        // A stop may have landed between activating the slot and starting.
        let mut state = self.state.lock();
        let stopping = matches!(&state.capture, CaptureSlot::Stopping { session: s, .. } if *s == session);
        match started {
            Ok(()) => {
                drop(state);
                if stopping {
                    self.platform.stop_recognition(session);
                }
                Ok(())
            }
            Err(e) if stopping => {
                // Nothing started, so no end event will arrive for this session.
                let pending = match &mut state.capture {
                    CaptureSlot::Stopping { pending, .. } => pending.take(),
                    _ => None,
                };
                state.capture = CaptureSlot::Idle;
                let next = pending.map(|callback| (Self::activate(&mut state, callback.clone()), callback));
                drop(state);
                if let Some((next, callback)) = next {
                    if let Err(e) = self.launch(next) {
                        callback(CaptureEvent::Failed(e));
                    }
                }
                Err(e)
            }
            Err(e) => {
                if matches!(&state.capture, CaptureSlot::Active(active) if active.session == session) {
                    state.capture = CaptureSlot::Idle;
                }
                Err(e)
            }
        }
    }

    fn finish_utterance(&self, id: u64, result: Result<(), SpeechError>) {
        let on_done = {
            let mut state = self.state.lock();
            match state.utterance.take() {
                Some(active) if active.id == id => active.on_done,
                other => {
                    state.utterance = other;
                    return;
                }
            }
        };
        if let Err(e) = &result {
            tracing::warn!("Utterance {} failed: {}", id, e);
        }
        on_done(result);
    }
}

impl SpeechCapabilities for SpeechAdapter {
    fn capability_check(&self) -> bool {
        self.shared.platform.recognition_available() && self.shared.platform.synthesis_available()
    }

    fn start_capture(&self, on_result: CaptureCallback) -> Result<(), SpeechError> {
        if !self.shared.platform.recognition_available() {
            return Err(SpeechError::Unsupported);
        }
        let session = {
            let mut state = self.shared.state.lock();
            match &mut state.capture {
                CaptureSlot::Idle => {}
                CaptureSlot::Active(_) => return Err(SpeechError::Busy),
                CaptureSlot::Stopping { pending, .. } => {
                    tracing::debug!("Capture still shutting down, queueing start");
                    *pending = Some(on_result);
                    return Ok(());
                }
            }
            Shared::activate(&mut state, on_result)
        };
        self.shared.launch(session)
    }

    fn stop_capture(&self) {
        let session = {
            let mut state = self.shared.state.lock();
            let (session, running) = match &mut state.capture {
                CaptureSlot::Idle => return,
                CaptureSlot::Stopping { pending, .. } => {
                    *pending = None;
                    return;
                }
                CaptureSlot::Active(active) => (active.session, !active.awaiting_restart),
            };
            if !running {
                // Already ended on the platform side; only the restart is cancelled.
                tracing::debug!("Cancelling pending restart of capture session {}", session);
                state.capture = CaptureSlot::Idle;
                return;
            }
            state.capture = CaptureSlot::Stopping { session, pending: None };
            session
        };
        tracing::debug!("Stopping capture session {}", session);
        self.shared.platform.stop_recognition(session);
    }

    fn speak(&self, text: &str, on_done: PlaybackCallback) -> Result<(), SpeechError> {
        if !self.shared.platform.synthesis_available() {
            return Err(SpeechError::Unsupported);
        }
        let id = {
            let mut state = self.shared.state.lock();
            if state.utterance.is_some() {
                return Err(SpeechError::Busy);
            }
            let id = state.next_id();
            state.utterance = Some(ActiveUtterance { id, on_done });
            id
        };

        let utterance = Utterance {
            id,
            text: text.to_string(),
            voice: self.shared.preference.select(&self.shared.platform.voices()),
            rate: 1.0,
            pitch: 1.0,
        };
        self.shared
            .platform
            .speak(utterance, self.shared.sender.clone())
            .inspect_err(|_| self.shared.state.lock().utterance = None)
    }

    fn cancel_speech(&self) {
        let cancelled = self.shared.state.lock().utterance.take();
        if let Some(active) = cancelled {
            tracing::debug!("Cancelling utterance {}", active.id);
            self.shared.platform.cancel_speech();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeState {
        started: Vec<u64>,
        stopped: Vec<u64>,
        utterances: Vec<Utterance>,
        cancels: usize,
        sender: Option<PlatformSender>,
    }

    struct FakePlatform {
        state: Mutex<FakeState>,
        voices: Vec<Voice>,
    }

    impl FakePlatform {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(FakeState::default()),
                voices: vec![Voice::new("Daniel", "en-GB"), Voice::new("Priya", "en-IN")],
            })
        }

        fn emit(&self, event: PlatformEvent) {
            let sender = self.state.lock().sender.clone().expect("no operation started yet");
            sender.send(event);
        }
    }

    impl SpeechPlatform for FakePlatform {
        fn recognition_available(&self) -> bool {
            true
        }

        fn synthesis_available(&self) -> bool {
            true
        }

        fn voices(&self) -> Vec<Voice> {
            self.voices.clone()
        }

        fn start_recognition(&self, session: u64, events: PlatformSender) -> Result<(), SpeechError> {
            let mut state = self.state.lock();
            state.started.push(session);
            state.sender = Some(events);
            Ok(())
        }

        fn stop_recognition(&self, session: u64) {
            self.state.lock().stopped.push(session);
        }

        fn speak(&self, utterance: Utterance, events: PlatformSender) -> Result<(), SpeechError> {
            let mut state = self.state.lock();
            state.utterances.push(utterance);
            state.sender = Some(events);
            Ok(())
        }

        fn cancel_speech(&self) {
            self.state.lock().cancels += 1;
        }
    }

    fn adapter(platform: &Arc<FakePlatform>) -> SpeechAdapter {
        SpeechAdapter::new(platform.clone(), VoicePreference::default(), DEFAULT_RETRY_BACKOFF)
    }

    fn recorder() -> (CaptureCallback, Arc<Mutex<Vec<CaptureEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (Arc::new(move |event| sink.lock().push(event)), events)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_playback_never_calls_on_done() {
        let platform = FakePlatform::new();
        let speech = adapter(&platform);
        let calls = Arc::new(AtomicUsize::new(0));
        let spy = calls.clone();

        speech
            .speak("Tell me about yourself.", Box::new(move |_| {
                spy.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        speech.cancel_speech();
        let id = platform.state.lock().utterances[0].id;
        platform.emit(PlatformEvent::UtteranceEnded { id });
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(platform.state.lock().cancels, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_speak_is_rejected() {
        let platform = FakePlatform::new();
        let speech = adapter(&platform);
        let done = Arc::new(AtomicUsize::new(0));
        let spy = done.clone();

        speech
            .speak("first", Box::new(move |result| {
                assert!(result.is_ok());
                spy.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(speech.speak("second", Box::new(|_| {})), Err(SpeechError::Busy));

        let first = platform.state.lock().utterances[0].clone();
        assert_eq!(first.voice, Some(Voice::new("Priya", "en-IN")));
        platform.emit(PlatformEvent::UtteranceEnded { id: first.id });
        // A duplicate end event for the same utterance is ignored.
        platform.emit(PlatformEvent::UtteranceEnded { id: first.id });
        settle().await;

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(speech.speak("third", Box::new(|_| {})).is_ok());
        assert_eq!(platform.state.lock().utterances.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_failure_is_reported_through_on_done() {
        let platform = FakePlatform::new();
        let speech = adapter(&platform);
        let result = Arc::new(Mutex::new(None));
        let sink = result.clone();

        speech
            .speak("hello", Box::new(move |r| *sink.lock() = Some(r)))
            .unwrap();
        let id = platform.state.lock().utterances[0].id;
        platform.emit(PlatformEvent::UtteranceFailed {
            id,
            error: SpeechError::Playback("audio device lost".into()),
        });
        settle().await;

        assert_eq!(
            *result.lock(),
            Some(Err(SpeechError::Playback("audio device lost".into())))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_accumulate_final_and_interim_text() {
        let platform = FakePlatform::new();
        let speech = adapter(&platform);
        let (callback, events) = recorder();

        speech.start_capture(callback).unwrap();
        let session = platform.state.lock().started[0];
        platform.emit(PlatformEvent::RecognitionResult {
            session,
            segments: vec![RecognitionSegment {
                text: "I would".into(),
                is_final: false,
            }],
        });
        platform.emit(PlatformEvent::RecognitionResult {
            session,
            segments: vec![
                RecognitionSegment {
                    text: "I would use a queue".into(),
                    is_final: true,
                },
                RecognitionSegment {
                    text: "with retries".into(),
                    is_final: false,
                },
            ],
        });
        settle().await;

        assert_eq!(
            *events.lock(),
            vec![
                CaptureEvent::Transcript {
                    text: "I would".into(),
                    is_final: false
                },
                CaptureEvent::Transcript {
                    text: "I would use a queue with retries".into(),
                    is_final: false
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_capture_is_idempotent_and_drops_late_results() {
        let platform = FakePlatform::new();
        let speech = adapter(&platform);
        let (callback, events) = recorder();

        speech.stop_capture();
        speech.start_capture(callback).unwrap();
        let session = platform.state.lock().started[0];
        speech.stop_capture();
        speech.stop_capture();
        platform.emit(PlatformEvent::RecognitionResult {
            session,
            segments: vec![RecognitionSegment {
                text: "late".into(),
                is_final: true,
            }],
        });
        settle().await;

        assert_eq!(platform.state.lock().stopped, vec![session]);
        assert!(events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_during_teardown_is_serialized() {
        let platform = FakePlatform::new();
        let speech = adapter(&platform);
        let (first, _) = recorder();
        let (second, _) = recorder();

        speech.start_capture(first).unwrap();
        let old = platform.state.lock().started[0];
        speech.stop_capture();
        speech.start_capture(second).unwrap();
        assert_eq!(platform.state.lock().started.len(), 1, "must not overlap");

        platform.emit(PlatformEvent::RecognitionEnded { session: old });
        settle().await;

        let started = platform.state.lock().started.clone();
        assert_eq!(started.len(), 2);
        assert_ne!(started[1], old);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_speech_is_retried_after_backoff() {
        let platform = FakePlatform::new();
        let speech = adapter(&platform);
        let (callback, events) = recorder();

        speech.start_capture(callback).unwrap();
        let session = platform.state.lock().started[0];
        platform.emit(PlatformEvent::RecognitionError {
            session,
            error: SpeechError::NoSpeech,
        });
        platform.emit(PlatformEvent::RecognitionEnded { session });
        settle().await;
        assert_eq!(platform.state.lock().started.len(), 1, "restart waits for the backoff");

        tokio::time::sleep(DEFAULT_RETRY_BACKOFF).await;
        assert_eq!(platform.state.lock().started.len(), 2);
        assert!(events.lock().is_empty(), "transient errors are not reported");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_retry_backoff_lets_next_capture_start() {
        // Arrange: the first capture heard nothing and is waiting to restart.
        let platform = FakePlatform::new();
        let speech = adapter(&platform);
        let (first, first_events) = recorder();
        let (second, _) = recorder();
        speech.start_capture(first).unwrap();
        let session = platform.state.lock().started[0];
        platform.emit(PlatformEvent::RecognitionError {
            session,
            error: SpeechError::NoSpeech,
        });
        platform.emit(PlatformEvent::RecognitionEnded { session });
        settle().await;

        // Act
        speech.stop_capture();
        speech.start_capture(second).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        // Assert: the ended session is not stopped again, and the old restart
        // does not start a third session.
        let state = platform.state.lock();
        assert_eq!(state.started.len(), 2, "second capture must start");
        assert!(state.stopped.is_empty());
        assert!(first_events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_restart_after_platform_ended_capture() {
        let platform = FakePlatform::new();
        let speech = adapter(&platform);
        let (callback, _) = recorder();

        speech.start_capture(callback.clone()).unwrap();
        let session = platform.state.lock().started[0];
        platform.emit(PlatformEvent::RecognitionEnded { session });
        settle().await;
        speech.stop_capture();
        tokio::time::sleep(DEFAULT_RETRY_BACKOFF * 3).await;

        assert_eq!(platform.state.lock().started, vec![session], "no restart after stop");
        assert!(speech.start_capture(callback).is_ok());
        assert_eq!(platform.state.lock().started.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_capture_error_is_reported() {
        let platform = FakePlatform::new();
        let speech = adapter(&platform);
        let (callback, events) = recorder();

        speech.start_capture(callback.clone()).unwrap();
        let session = platform.state.lock().started[0];
        platform.emit(PlatformEvent::RecognitionError {
            session,
            error: SpeechError::PermissionDenied,
        });
        platform.emit(PlatformEvent::RecognitionEnded { session });
        settle().await;

        assert_eq!(
            *events.lock(),
            vec![CaptureEvent::Failed(SpeechError::PermissionDenied)]
        );
        // The failed session has fully ended, so a new capture can start.
        assert!(speech.start_capture(callback).is_ok());
    }
}
