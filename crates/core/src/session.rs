//! Turn-taking session controller.
//!
//! One [`SessionController`] drives one interview. Everything that happens
//! to it (user actions, speech callbacks, oracle replies, timers) arrives as an
//! [`Intent`] on a single queue and is applied by [`SessionController::handle`].
//! Each awaited operation is tagged with a generation number; a callback whose
//! generation is no longer current is dropped.

use crate::model::{Feedback, InterviewPlan, Turn};
use crate::oracle::FeedbackOracle;
use crate::speech::{CaptureEvent, SpeechCapabilities, SpeechError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Message recorded (and spoken) when the feedback oracle fails.
pub const ORACLE_FAILURE_MESSAGE: &str = "Sorry, I had trouble processing your response.";
pub const DEFAULT_CLOSING_REMARK: &str =
    "That completes the interview. Thank you for your time, I'll put together your results now.";

const EMPTY_ANSWER_MESSAGE: &str = "Please provide an answer before submitting.";
const COUNTDOWN_TICK: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Asking,
    Listening,
    Processing,
    Feedback,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Voice,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Completed,
    Stopped,
    TimedOut,
}

/// Read-only view of the session published after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub current_index: usize,
    pub question_count: usize,
    pub question: Option<String>,
    pub live_transcript: String,
    pub turns: Vec<Turn>,
    pub last_feedback: Option<Feedback>,
    pub error: Option<String>,
    pub input_mode: InputMode,
    pub remaining: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Expiry behaves like [`SessionHandle::stop`].
    pub max_duration: Option<Duration>,
    /// Guard delay before capture is re-armed after an empty result.
    pub rearm_delay: Duration,
    /// Never use speech, even when it is available.
    pub text_only: bool,
    pub closing_remark: String,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_duration: Some(Duration::from_secs(30 * 60)),
            rearm_delay: Duration::from_millis(1000),
            text_only: false,
            closing_remark: DEFAULT_CLOSING_REMARK.to_string(),
        }
    }
}

/// Collaborators and policy for one session. Created before the session
/// starts and torn down when it ends.
pub struct SessionContext {
    pub user_id: String,
    pub speech: Arc<dyn SpeechCapabilities>,
    pub oracle: Arc<dyn FeedbackOracle>,
    pub policy: SessionPolicy,
}

impl SessionContext {
    pub fn new(
        user_id: impl Into<String>,
        speech: Arc<dyn SpeechCapabilities>,
        oracle: Arc<dyn FeedbackOracle>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            speech,
            oracle,
            policy: SessionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Releases speech resources. Safe to call more than once.
    pub fn teardown(&self) {
        self.speech.cancel_speech();
        self.speech.stop_capture();
    }
}

/// What a finished session hands back. Partial transcripts are valid.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub user_id: String,
    pub plan: Option<InterviewPlan>,
    pub turns: Vec<Turn>,
    pub end: SessionEnd,
    pub elapsed: Duration,
}

enum Intent {
    Start(InterviewPlan),
    SubmitAnswer(String),
    FinishAnswer,
    Skip,
    Stop,
    PlaybackDone {
        generation: u64,
        result: Result<(), SpeechError>,
    },
    Capture {
        generation: u64,
        event: CaptureEvent,
    },
    RearmCapture {
        generation: u64,
    },
    FeedbackReady {
        generation: u64,
        answer: String,
        result: anyhow::Result<Feedback>,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("the interview session has ended")]
pub struct SessionClosed;

/// UI side of a session: dispatches intents and observes snapshots.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Intent>,
    state: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    fn send(&self, intent: Intent) -> Result<(), SessionClosed> {
        self.tx.send(intent).map_err(|_| SessionClosed)
    }

    pub fn start(&self, plan: InterviewPlan) -> Result<(), SessionClosed> {
        self.send(Intent::Start(plan))
    }

    /// Typed answer. Accepted while the question is being asked or while
    /// listening.
    pub fn submit_answer(&self, text: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(Intent::SubmitAnswer(text.into()))
    }

    /// Stop capture and submit whatever has been heard so far.
    pub fn finish_answer(&self) -> Result<(), SessionClosed> {
        self.send(Intent::FinishAnswer)
    }

    pub fn skip(&self) -> Result<(), SessionClosed> {
        self.send(Intent::Skip)
    }

    pub fn stop(&self) -> Result<(), SessionClosed> {
        self.send(Intent::Stop)
    }

    pub fn state(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }
}

struct SessionState {
    phase: Phase,
    current_index: usize,
    live_transcript: String,
    turns: Vec<Turn>,
    last_feedback: Option<Feedback>,
    error: Option<String>,
    input_mode: InputMode,
}

pub struct SessionController {
    context: SessionContext,
    intents: mpsc::UnboundedReceiver<Intent>,
    // Weak so that dropping every handle closes the queue.
    intent_tx: mpsc::WeakUnboundedSender<Intent>,
    snapshots: watch::Sender<SessionSnapshot>,
    plan: Option<InterviewPlan>,
    state: SessionState,
    generation: u64,
    speech_enabled: bool,
    pending_feedback: Option<JoinHandle<()>>,
    started_at: Option<Instant>,
    deadline: Option<Instant>,
    end: Option<SessionEnd>,
}

impl SessionController {
    pub fn new(context: SessionContext) -> (Self, SessionHandle) {
        let (tx, intents) = mpsc::unbounded_channel();
        let state = SessionState {
            phase: Phase::Idle,
            current_index: 0,
            live_transcript: String::new(),
            turns: Vec::new(),
            last_feedback: None,
            error: None,
            input_mode: InputMode::Text,
        };
        let (snapshots, snapshot_rx) = watch::channel(SessionSnapshot {
            phase: Phase::Idle,
            current_index: 0,
            question_count: 0,
            question: None,
            live_transcript: String::new(),
            turns: Vec::new(),
            last_feedback: None,
            error: None,
            input_mode: InputMode::Text,
            remaining: None,
        });

        let controller = Self {
            context,
            intents,
            intent_tx: tx.downgrade(),
            snapshots,
            plan: None,
            state,
            generation: 0,
            speech_enabled: false,
            pending_feedback: None,
            started_at: None,
            deadline: None,
            end: None,
        };
        let handle = SessionHandle { tx, state: snapshot_rx };
        (controller, handle)
    }

    /// Runs until the interview completes, is stopped, times out, or every
    /// handle is dropped.
    pub async fn run(mut self) -> SessionOutcome {
        let mut countdown = tokio::time::interval(COUNTDOWN_TICK);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.end.is_none() {
            tokio::select! {
                intent = self.intents.recv() => match intent {
                    Some(intent) => self.handle(intent),
                    None => {
                        tracing::debug!("All session handles dropped, stopping");
                        self.stop(SessionEnd::Stopped);
                    }
                },
                _ = expiry(self.deadline) => {
                    tracing::info!("Interview time limit reached");
                    self.stop(SessionEnd::TimedOut);
                    self.state.error = Some("Time is up for this interview.".to_string());
                    self.publish();
                }
                _ = countdown.tick() => self.publish(),
            }
        }
        self.finish()
    }

    fn handle(&mut self, intent: Intent) {
        match intent {
            Intent::Start(plan) => self.start(plan),
            Intent::SubmitAnswer(text) => self.submit_answer(text),
            Intent::FinishAnswer => self.finish_answer(),
            Intent::Skip => self.skip(),
            Intent::Stop => self.stop(SessionEnd::Stopped),
            Intent::PlaybackDone { generation, result } => {
                if self.is_stale(generation) {
                    tracing::trace!("Dropping stale playback completion");
                    return;
                }
                self.playback_done(result);
            }
            Intent::Capture { generation, event } => {
                if self.is_stale(generation) || self.state.phase != Phase::Listening {
                    tracing::trace!("Dropping stale capture event");
                    return;
                }
                self.capture_event(event);
            }
            Intent::RearmCapture { generation } => {
                if self.is_stale(generation) || self.state.phase != Phase::Listening {
                    return;
                }
                self.start_capture();
                self.publish();
            }
            Intent::FeedbackReady {
                generation,
                answer,
                result,
            } => {
                if self.is_stale(generation) || self.state.phase != Phase::Processing {
                    tracing::debug!("Dropping feedback for an abandoned answer");
                    return;
                }
                self.feedback_ready(answer, result);
            }
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation != self.generation
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn set_phase(&mut self, phase: Phase) {
        tracing::debug!("Session phase {:?} -> {:?}", self.state.phase, phase);
        self.state.phase = phase;
        self.state.error = None;
    }

    fn current_question(&self) -> Option<&str> {
        self.plan.as_ref()?.question(self.state.current_index)
    }

    fn start(&mut self, plan: InterviewPlan) {
        if self.state.phase != Phase::Idle {
            tracing::warn!("Session already started, ignoring start request");
            return;
        }
        self.speech_enabled = !self.context.policy.text_only && self.context.speech.capability_check();
        self.state.input_mode = if self.speech_enabled {
            InputMode::Voice
        } else {
            InputMode::Text
        };
        tracing::info!(
            "Starting interview for '{}' with {} questions ({:?} input)",
            plan.setup().role,
            plan.len(),
            self.state.input_mode
        );

        let now = Instant::now();
        self.started_at = Some(now);
        self.deadline = self.context.policy.max_duration.and_then(|d| now.checked_add(d));
        self.plan = Some(plan);
        self.enter_asking(0);
    }

    fn enter_asking(&mut self, index: usize) {
        debug_assert_eq!(self.state.turns.len(), index);
        self.set_phase(Phase::Asking);
        self.state.current_index = index;
        self.state.live_transcript.clear();
        self.state.last_feedback = None;

        let Some(question) = self.current_question().map(str::to_string) else {
            self.enter_complete();
            return;
        };
        if !self.speak(&question) {
            self.enter_listening();
            return;
        }
        self.publish();
    }

    fn enter_listening(&mut self) {
        debug_assert_eq!(self.state.turns.len(), self.state.current_index);
        let error = self.state.error.take();
        self.set_phase(Phase::Listening);
        // A playback failure on the way in stays visible.
        self.state.error = error;
        self.state.live_transcript.clear();
        self.next_generation();
        if self.state.input_mode == InputMode::Voice {
            self.start_capture();
        }
        self.publish();
    }

    fn start_capture(&mut self) {
        let generation = self.generation;
        let tx = self.intent_tx.clone();
        let on_result = Arc::new(move |event: CaptureEvent| {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Intent::Capture { generation, event });
            }
        });
        if let Err(e) = self.context.speech.start_capture(on_result) {
            self.fall_back_to_text(e);
        }
    }

    fn fall_back_to_text(&mut self, error: SpeechError) {
        tracing::warn!("Speech capture unavailable ({}), switching to typed answers", error);
        self.context.speech.stop_capture();
        self.next_generation();
        self.state.input_mode = InputMode::Text;
        self.state.error = Some(format!("{error}. Please type your answer instead."));
    }

    fn capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Transcript { text, is_final: false } => {
                self.state.live_transcript = text;
            }
            CaptureEvent::Transcript { text, is_final: true } => {
                let answer = text.trim();
                if answer.is_empty() {
                    self.rearm_capture();
                } else {
                    let answer = answer.to_string();
                    self.begin_processing(answer);
                    return;
                }
            }
            CaptureEvent::Failed(e) if e.is_transient() => self.rearm_capture(),
            CaptureEvent::Failed(e) => self.fall_back_to_text(e),
        }
        self.publish();
    }

    fn rearm_capture(&mut self) {
        tracing::debug!("Empty capture result, re-arming after {:?}", self.context.policy.rearm_delay);
        self.context.speech.stop_capture();
        self.state.live_transcript.clear();
        let generation = self.next_generation();
        let delay = self.context.policy.rearm_delay;
        let tx = self.intent_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Intent::RearmCapture { generation });
            }
        });
    }

    fn submit_answer(&mut self, text: String) {
        if !matches!(self.state.phase, Phase::Asking | Phase::Listening) {
            tracing::debug!("Ignoring typed answer in phase {:?}", self.state.phase);
            return;
        }
        let answer = text.trim();
        if answer.is_empty() {
            self.state.error = Some(EMPTY_ANSWER_MESSAGE.to_string());
            self.publish();
            return;
        }
        let answer = answer.to_string();
        self.context.speech.cancel_speech();
        self.begin_processing(answer);
    }

    fn finish_answer(&mut self) {
        if self.state.phase != Phase::Listening {
            tracing::debug!("Ignoring finish request in phase {:?}", self.state.phase);
            return;
        }
        let answer = self.state.live_transcript.trim().to_string();
        if answer.is_empty() {
            self.state.error = Some(EMPTY_ANSWER_MESSAGE.to_string());
            self.publish();
            return;
        }
        self.begin_processing(answer);
    }

    fn skip(&mut self) {
        if !matches!(self.state.phase, Phase::Asking | Phase::Listening) {
            tracing::debug!("Ignoring skip in phase {:?}", self.state.phase);
            return;
        }
        let Some(question) = self.current_question().map(str::to_string) else {
            return;
        };
        tracing::info!("Skipping question {}", self.state.current_index + 1);
        self.context.speech.cancel_speech();
        self.context.speech.stop_capture();
        self.state.turns.push(Turn::skipped(question));
        self.state.last_feedback = Some(Feedback::Skipped);
        self.enter_feedback();
    }

    fn begin_processing(&mut self, answer: String) {
        self.context.speech.stop_capture();
        self.set_phase(Phase::Processing);
        self.state.live_transcript = answer.clone();
        let generation = self.next_generation();

        let (Some(plan), Some(question)) = (self.plan.as_ref(), self.current_question()) else {
            return;
        };
        let question = question.to_string();
        let role = plan.setup().role.clone();
        let level = plan.setup().difficulty.to_string();
        let oracle = self.context.oracle.clone();
        let tx = self.intent_tx.clone();

        tracing::debug!("Requesting feedback for question {}", self.state.current_index + 1);
        self.pending_feedback = Some(tokio::spawn(async move {
            let result = oracle.feedback(&question, &answer, &role, &level).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Intent::FeedbackReady {
                    generation,
                    answer,
                    result,
                });
            }
        }));
        self.publish();
    }

    fn feedback_ready(&mut self, answer: String, result: anyhow::Result<Feedback>) {
        self.pending_feedback = None;
        let Some(question) = self.current_question().map(str::to_string) else {
            return;
        };
        let (feedback, failed) = match result {
            Ok(feedback) => (feedback, false),
            Err(e) => {
                tracing::error!("Feedback request failed: {:#}", e);
                (
                    Feedback::Error {
                        message: ORACLE_FAILURE_MESSAGE.to_string(),
                    },
                    true,
                )
            }
        };
        self.state.turns.push(Turn::answered(question, answer, feedback.clone()));
        self.state.last_feedback = Some(feedback);
        self.enter_feedback();
        if failed {
            self.state.error = Some(ORACLE_FAILURE_MESSAGE.to_string());
            self.publish();
        }
    }

    fn enter_feedback(&mut self) {
        self.set_phase(Phase::Feedback);
        self.state.live_transcript.clear();
        let text = self
            .state
            .last_feedback
            .as_ref()
            .map(Feedback::spoken_text)
            .unwrap_or_default();
        if !self.speak(&text) {
            self.advance();
            return;
        }
        self.publish();
    }

    fn advance(&mut self) {
        let next = self.state.current_index + 1;
        let count = self.plan.as_ref().map_or(0, InterviewPlan::len);
        if next < count {
            self.enter_asking(next);
        } else {
            self.enter_complete();
        }
    }

    fn enter_complete(&mut self) {
        self.set_phase(Phase::Complete);
        self.context.speech.stop_capture();
        tracing::info!("Interview complete after {} turns", self.state.turns.len());
        let closing = self.context.policy.closing_remark.clone();
        if closing.is_empty() || !self.speak(&closing) {
            self.end = Some(SessionEnd::Completed);
        }
        self.publish();
    }

    fn playback_done(&mut self, result: Result<(), SpeechError>) {
        let error = result.err().map(|e| {
            tracing::warn!("Playback failed: {}", e);
            e.to_string()
        });
        match self.state.phase {
            Phase::Asking => {
                self.state.error = error;
                self.enter_listening();
            }
            Phase::Feedback => {
                self.advance();
                if error.is_some() {
                    self.state.error = error;
                    self.publish();
                }
            }
            Phase::Complete => self.end = Some(SessionEnd::Completed),
            phase => tracing::debug!("Unexpected playback completion in phase {:?}", phase),
        }
    }

    /// Starts playback of `text` tagged with a fresh generation. Returns false
    /// when nothing is playing, so the caller should continue immediately.
    fn speak(&mut self, text: &str) -> bool {
        let generation = self.next_generation();
        if !self.speech_enabled || text.is_empty() {
            return false;
        }
        self.context.speech.cancel_speech();
        let tx = self.intent_tx.clone();
        let on_done = Box::new(move |result: Result<(), SpeechError>| {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Intent::PlaybackDone { generation, result });
            }
        });
        match self.context.speech.speak(text, on_done) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Playback could not start: {}", e);
                self.state.error = Some(e.to_string());
                false
            }
        }
    }

    fn stop(&mut self, end: SessionEnd) {
        if self.end.is_some() {
            return;
        }
        self.next_generation();
        if let Some(task) = self.pending_feedback.take() {
            tracing::debug!("Abandoning in-flight feedback request");
            task.abort();
        }
        self.context.teardown();

        let end = if self.state.phase == Phase::Complete {
            SessionEnd::Completed
        } else {
            tracing::info!(
                "Interview ended ({:?}) after {} of {} questions",
                end,
                self.state.turns.len(),
                self.plan.as_ref().map_or(0, InterviewPlan::len)
            );
            end
        };
        self.set_phase(Phase::Complete);
        self.state.live_transcript.clear();
        self.end = Some(end);
        self.publish();
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.state.phase,
            current_index: self.state.current_index,
            question_count: self.plan.as_ref().map_or(0, InterviewPlan::len),
            question: self.current_question().map(str::to_string),
            live_transcript: self.state.live_transcript.clone(),
            turns: self.state.turns.clone(),
            last_feedback: self.state.last_feedback.clone(),
            error: self.state.error.clone(),
            input_mode: self.state.input_mode,
            remaining: self
                .deadline
                .map(|deadline| deadline.saturating_duration_since(Instant::now())),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    fn finish(self) -> SessionOutcome {
        self.context.teardown();
        SessionOutcome {
            user_id: self.context.user_id,
            plan: self.plan,
            turns: self.state.turns,
            end: self.end.unwrap_or(SessionEnd::Stopped),
            elapsed: self.started_at.map(|t| t.elapsed()).unwrap_or_default(),
        }
    }
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
