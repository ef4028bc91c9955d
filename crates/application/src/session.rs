//! Detection session controller.
//!
//! A session ties the pipeline together for one target:
//!
//! ```text
//! CaptureLoop ──landmarks──▶ ThrottledDispatcher ──req_handsign──▶ ConnectionManager
//!                                                                      │
//!          EventBus ◀── session:* / composer:* ◀── reconciler ◀── res_handsign
//! ```
//!
//! In question mode predictions are reconciled against the target sequence
//! and the answer is reported to the host; in compose mode confirmed signs
//! edit free-form text. Start and stop are serialized by the capture lock.
//! Connection callbacks never block on capture: completion only signals the
//! capture thread, the join happens on the next `stop`/`start`.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use handsign_capture::{
    CameraError, CaptureLoop, CaptureResources, CaptureSnapshot, CaptureStopHandle,
    LandmarksCallback,
};
use handsign_events::{
    emit_json, event_names, AnswerSubmission, AutocompleteResponse, CameraErrorEvent,
    ConnectionState, EventBusRef, HandSignResponse, SessionCompleted, SessionProgress,
    SessionStalled, SessionStopped,
};
use handsign_landmarks::RawHand;
use handsign_socket::{ConnectionManager, HandlerId, Subscription};
use serde::Serialize;
use serde_json::Value;

use crate::composer::TextComposer;
use crate::config::DetectorConfig;
use crate::dispatcher::{DispatchStats, ThrottledDispatcher};
use crate::reconciler::{PredictionReconciler, Reconciled};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("question {question_id} has nothing to sign")]
    EmptyTarget { question_id: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// What a session is detecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// Sign `sequence` one character at a time.
    Question {
        question_id: String,
        sequence: String,
        /// Answered correctly before; predictions are ignored.
        already_correct: bool,
    },
    /// Free-form text composition.
    Compose,
}

impl SessionTarget {
    pub fn question(question_id: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self::Question {
            question_id: question_id.into(),
            sequence: sequence.into(),
            already_correct: false,
        }
    }

    fn question_id(&self) -> &str {
        match self {
            Self::Question { question_id, .. } => question_id,
            Self::Compose => "",
        }
    }
}

/// Builds fresh capture resources for every session start.
pub trait CaptureFactory: Send + Sync {
    fn create(&self) -> std::result::Result<CaptureResources, CameraError>;
}

impl<F> CaptureFactory for F
where
    F: Fn() -> std::result::Result<CaptureResources, CameraError> + Send + Sync,
{
    fn create(&self) -> std::result::Result<CaptureResources, CameraError> {
        self()
    }
}

/// Serializable view of the session for a host UI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub active: bool,
    pub question_id: Option<String>,
    pub current_char_index: usize,
    pub consecutive_count: u32,
    pub threshold: u32,
    pub character_progress: f32,
    pub sequence_progress: f32,
    pub attempted: bool,
    pub has_submitted: bool,
    pub stalled: bool,
    pub camera_error: Option<String>,
    /// Latest raw prediction, if it is recent enough to show.
    pub latest_prediction: Option<HandSignResponse>,
    pub composed_text: String,
    pub suggestions: Vec<String>,
    pub dispatch: DispatchStats,
    pub capture: CaptureSnapshot,
}

struct SessionState {
    target: SessionTarget,
    session_id: String,
    active: bool,
    /// Bumped on every start/stop so callbacks from an older session are ignored.
    epoch: u64,
    attempted: bool,
    has_submitted: bool,
    last_detected: Option<String>,
    latest: Option<(HandSignResponse, Instant)>,
    stalled: bool,
    last_connected: Option<bool>,
    camera_error: Option<String>,
    reconciler: Option<PredictionReconciler>,
    composer: TextComposer,
}

impl SessionState {
    fn new(target: SessionTarget, threshold: u32) -> Self {
        let reconciler = match &target {
            SessionTarget::Question { sequence, .. } => {
                Some(PredictionReconciler::new(sequence, threshold))
            }
            SessionTarget::Compose => None,
        };
        Self {
            target,
            session_id: String::new(),
            active: false,
            epoch: 0,
            attempted: false,
            has_submitted: false,
            last_detected: None,
            latest: None,
            stalled: false,
            last_connected: None,
            camera_error: None,
            reconciler,
            composer: TextComposer::new(threshold),
        }
    }

    /// Fresh state for the same target, keeping the epoch counter.
    fn reset(&mut self, threshold: u32) {
        let epoch = self.epoch;
        *self = Self::new(self.target.clone(), threshold);
        self.epoch = epoch;
    }

    fn progress(&self) -> Option<SessionProgress> {
        let reconciler = self.reconciler.as_ref()?;
        Some(SessionProgress {
            session_id: self.session_id.clone(),
            question_id: self.target.question_id().to_string(),
            last_detected: self.last_detected.clone(),
            current_char_index: reconciler.current_index(),
            consecutive_count: reconciler.consecutive_count(),
            threshold: reconciler.threshold(),
            completed_chars: reconciler.completed().iter().map(|s| s.label()).collect(),
            character_progress: reconciler.character_progress(),
            sequence_progress: reconciler.sequence_progress(),
        })
    }
}

/// Side effects decided under the state lock, applied after it is released.
enum Effect {
    Publish(&'static str, Value),
    Emit(&'static str, Value),
    StopCapture,
    Detach,
}

fn publish<T: Serialize>(effects: &mut Vec<Effect>, topic: &'static str, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => effects.push(Effect::Publish(topic, value)),
        Err(e) => tracing::warn!(topic, error = %e, "Failed to serialize session event"),
    }
}

struct Attachments {
    _state: Subscription,
    prediction: HandlerId,
    autocomplete: HandlerId,
}

struct SessionCore {
    config: DetectorConfig,
    bus: EventBusRef,
    connection: ConnectionManager,
    stop_capture: CaptureStopHandle,
    state: Mutex<SessionState>,
    attachments: Mutex<Option<Attachments>>,
}

pub struct DetectionSessionController {
    core: Arc<SessionCore>,
    capture: Mutex<CaptureLoop>,
    dispatcher: Arc<ThrottledDispatcher>,
    factory: Arc<dyn CaptureFactory>,
}

impl DetectionSessionController {
    pub fn new(
        config: DetectorConfig,
        connection: ConnectionManager,
        bus: EventBusRef,
        factory: Arc<dyn CaptureFactory>,
    ) -> Self {
        let capture = CaptureLoop::new();
        let dispatcher = Arc::new(ThrottledDispatcher::new(
            Arc::new(connection.clone()),
            config.process_interval_ms,
        ));
        let state = SessionState::new(SessionTarget::Compose, config.consecutive_threshold);

        let core = Arc::new(SessionCore {
            stop_capture: capture.stop_handle(),
            config,
            bus,
            connection,
            state: Mutex::new(state),
            attachments: Mutex::new(None),
        });

        Self {
            core,
            capture: Mutex::new(capture),
            dispatcher,
            factory,
        }
    }

    /// Point the controller at a new target. An active session is stopped
    /// first; nothing is captured until [`start`](Self::start).
    pub fn set_target(&self, target: SessionTarget) {
        self.stop();
        let mut state = self.core.lock_state();
        state.target = target;
        state.reset(self.core.config.consecutive_threshold);
        tracing::debug!(question_id = state.target.question_id(), "Session target set");
    }

    /// Start detecting. No-op if a session is already running or the question
    /// was already answered correctly.
    pub fn start(&self) -> Result<()> {
        let mut capture = self.lock_capture();

        let epoch = {
            let mut state = self.core.lock_state();
            if state.active {
                tracing::debug!(session_id = %state.session_id, "Session already active");
                return Ok(());
            }
            if let SessionTarget::Question {
                already_correct: true,
                question_id,
                ..
            } = &state.target
            {
                tracing::info!(%question_id, "Question already answered, not starting");
                return Ok(());
            }

            state.reset(self.core.config.consecutive_threshold);
            if state.reconciler.as_ref().is_some_and(|r| r.target_len() == 0) {
                let question_id = state.target.question_id().to_string();
                tracing::warn!(%question_id, "Target has no signable characters");
                return Err(SessionError::EmptyTarget { question_id });
            }
            state.session_id = uuid::Uuid::new_v4().to_string();
            state.active = true;
            state.epoch += 1;
            state.epoch
        };
        // Reap a capture thread that ended on its own
        capture.stop();
        self.dispatcher.reset();

        self.core.connection.connect();
        SessionCore::attach(&self.core, epoch);

        let mut resources = match self.factory.create() {
            Ok(resources) => resources,
            Err(e) => return Err(self.core.fail_camera(e)),
        };
        if !self.core.config.draw_overlay && resources.overlay.take().is_some() {
            tracing::debug!("Overlay drawing disabled");
        }
        let dispatcher = Arc::clone(&self.dispatcher);
        let callback: LandmarksCallback = Arc::new(move |hands: &[RawHand]| {
            dispatcher.dispatch_now(hands);
        });
        if let Err(e) = capture.start(resources, callback) {
            return Err(self.core.fail_camera(e));
        }

        let state = self.core.lock_state();
        tracing::info!(
            session_id = %state.session_id,
            question_id = state.target.question_id(),
            "Detection session started"
        );
        Ok(())
    }

    /// Stop the session: unsubscribe, release the camera, and report an
    /// incorrect answer if the question was attempted but not completed.
    pub fn stop(&self) {
        let mut capture = self.lock_capture();
        self.core.detach();
        capture.stop();

        let mut effects = Vec::new();
        {
            let mut state = self.core.lock_state();
            if !state.active {
                return;
            }
            state.active = false;
            state.epoch += 1;

            let report = matches!(
                state.target,
                SessionTarget::Question {
                    already_correct: false,
                    ..
                }
            ) && state.attempted
                && !state.has_submitted;

            if report {
                state.has_submitted = true;
                publish(
                    &mut effects,
                    event_names::SESSION_ANSWER,
                    &AnswerSubmission {
                        question_id: state.target.question_id().to_string(),
                        answer: state.last_detected.clone().unwrap_or_default(),
                        is_correct: false,
                    },
                );
            }
            publish(
                &mut effects,
                event_names::SESSION_STOPPED,
                &SessionStopped {
                    session_id: state.session_id.clone(),
                    question_id: state.target.question_id().to_string(),
                    reported_incorrect: report,
                },
            );
            tracing::info!(session_id = %state.session_id, reported_incorrect = report, "Detection session stopped");
        }
        self.core.apply(effects);
    }

    /// Tear the session down and start a fresh one with new capture resources.
    pub async fn restart(&self) -> Result<()> {
        self.stop();
        tokio::time::sleep(self.core.config.restart_delay()).await;
        self.start()
    }

    pub fn is_active(&self) -> bool {
        self.core.lock_state().active
    }

    pub fn is_capturing(&self) -> bool {
        self.lock_capture().is_running()
    }

    pub fn dispatcher(&self) -> &ThrottledDispatcher {
        &self.dispatcher
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let capture = self.lock_capture().stats();
        let state = self.core.lock_state();
        let ttl = self.core.config.prediction_ttl();

        let reconciler = state.reconciler.as_ref();
        SessionSnapshot {
            session_id: state.session_id.clone(),
            active: state.active,
            question_id: match &state.target {
                SessionTarget::Question { question_id, .. } => Some(question_id.clone()),
                SessionTarget::Compose => None,
            },
            current_char_index: reconciler.map_or(0, |r| r.current_index()),
            consecutive_count: reconciler.map_or(state.composer.gate().count(), |r| {
                r.consecutive_count()
            }),
            threshold: self.core.config.consecutive_threshold,
            character_progress: reconciler.map_or(0.0, |r| r.character_progress()),
            sequence_progress: reconciler.map_or(0.0, |r| r.sequence_progress()),
            attempted: state.attempted,
            has_submitted: state.has_submitted,
            stalled: state.stalled,
            camera_error: state.camera_error.clone(),
            latest_prediction: state
                .latest
                .as_ref()
                .filter(|(_, at)| at.elapsed() < ttl)
                .map(|(response, _)| response.clone()),
            composed_text: state.composer.text().to_string(),
            suggestions: state.composer.suggestions().to_vec(),
            dispatch: self.dispatcher.stats(),
            capture,
        }
    }

    fn lock_capture(&self) -> MutexGuard<'_, CaptureLoop> {
        self.capture.lock().expect("capture mutex poisoned")
    }
}

impl Drop for DetectionSessionController {
    fn drop(&mut self) {
        self.core.detach();
    }
}

impl SessionCore {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().expect("session state mutex poisoned")
    }

    fn attach(core: &Arc<SessionCore>, epoch: u64) {
        let weak: Weak<SessionCore> = Arc::downgrade(core);

        let on_prediction = weak.clone();
        let prediction = core
            .connection
            .on(event_names::RES_HANDSIGN, move |payload: &Value| {
                if let Some(core) = on_prediction.upgrade() {
                    core.handle_prediction(epoch, payload);
                }
            });

        let on_autocomplete = weak.clone();
        let autocomplete = core
            .connection
            .on(event_names::RES_AUTOCOMP, move |payload: &Value| {
                if let Some(core) = on_autocomplete.upgrade() {
                    core.handle_autocomplete(epoch, payload);
                }
            });

        // Called once right away with the current state
        let state = core.connection.subscribe(move |state: ConnectionState| {
            if let Some(core) = weak.upgrade() {
                core.handle_connection(epoch, state);
            }
        });

        let previous = core
            .attachments
            .lock()
            .expect("attachments mutex poisoned")
            .replace(Attachments {
                _state: state,
                prediction,
                autocomplete,
            });
        if let Some(previous) = previous {
            core.release(previous);
        }
    }

    fn detach(&self) {
        let attachments = self
            .attachments
            .lock()
            .expect("attachments mutex poisoned")
            .take();
        if let Some(attachments) = attachments {
            self.release(attachments);
        }
    }

    fn release(&self, attachments: Attachments) {
        self.connection
            .off(event_names::RES_HANDSIGN, attachments.prediction);
        self.connection
            .off(event_names::RES_AUTOCOMP, attachments.autocomplete);
    }

    fn fail_camera(&self, error: CameraError) -> SessionError {
        tracing::warn!(error = %error, "Camera unavailable, session not started");
        self.detach();

        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            state.active = false;
            state.epoch += 1;
            state.camera_error = Some(error.to_string());
            publish(
                &mut effects,
                event_names::SESSION_CAMERA_ERROR,
                &CameraErrorEvent {
                    session_id: state.session_id.clone(),
                    message: error.to_string(),
                },
            );
        }
        self.apply(effects);
        SessionError::Camera(error)
    }

    fn handle_prediction(&self, epoch: u64, payload: &Value) {
        let response: HandSignResponse = match serde_json::from_value(payload.clone()) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, %payload, "Ignoring malformed prediction");
                return;
            }
        };

        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            if !state.active || state.epoch != epoch {
                return;
            }
            effects.push(Effect::Publish(
                event_names::DETECTION_PREDICTION,
                payload.clone(),
            ));
            state.last_detected = Some(response.pred.clone());
            state.latest = Some((response.clone(), Instant::now()));

            let state = &mut *state;
            match state.target.clone() {
                SessionTarget::Question {
                    question_id,
                    sequence,
                    ..
                } => {
                    if !state.attempted {
                        state.attempted = true;
                        publish(
                            &mut effects,
                            event_names::SESSION_ATTEMPTED,
                            &AnswerSubmission {
                                question_id: question_id.clone(),
                                answer: String::new(),
                                is_correct: false,
                            },
                        );
                    }

                    let Some(reconciler) = state.reconciler.as_mut() else {
                        return;
                    };
                    let outcome = reconciler.observe(&response.pred);
                    if let Some(progress) = state.progress() {
                        publish(&mut effects, event_names::SESSION_PROGRESS, &progress);
                    }

                    match outcome {
                        Reconciled::Pending => {}
                        Reconciled::Mismatch(label) => {
                            tracing::debug!(%label, "Confirmed sign does not match target");
                        }
                        Reconciled::Advanced { symbol, index } => {
                            tracing::debug!(%symbol, index, "Target character confirmed");
                        }
                        Reconciled::Completed => {
                            state.has_submitted = true;
                            state.active = false;
                            state.epoch += 1;
                            tracing::info!(session_id = %state.session_id, %question_id, "Sequence completed");

                            publish(
                                &mut effects,
                                event_names::SESSION_ANSWER,
                                &AnswerSubmission {
                                    question_id: question_id.clone(),
                                    answer: sequence.clone(),
                                    is_correct: true,
                                },
                            );
                            publish(
                                &mut effects,
                                event_names::SESSION_COMPLETED,
                                &SessionCompleted {
                                    session_id: state.session_id.clone(),
                                    question_id,
                                    sequence,
                                },
                            );
                            effects.push(Effect::StopCapture);
                            effects.push(Effect::Detach);
                        }
                    }
                }
                SessionTarget::Compose => {
                    let changed = match state.composer.observe(&response.pred) {
                        Some(symbol) => {
                            let changed = state.composer.apply(symbol);
                            tracing::debug!(%symbol, changed, text = state.composer.text(), "Sign confirmed");
                            changed
                        }
                        None => false,
                    };
                    if changed {
                        match serde_json::to_value(state.composer.autocomplete_request()) {
                            Ok(request) => {
                                effects.push(Effect::Emit(event_names::REQ_AUTOCOMP, request))
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to serialize autocomplete request")
                            }
                        }
                        publish(
                            &mut effects,
                            event_names::COMPOSER_TEXT,
                            &state.composer.update(),
                        );
                    }
                }
            }
        }
        self.apply(effects);
    }

    fn handle_autocomplete(&self, epoch: u64, payload: &Value) {
        let response: AutocompleteResponse = match serde_json::from_value(payload.clone()) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed autocomplete response");
                return;
            }
        };

        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            if !state.active || state.epoch != epoch || state.target != SessionTarget::Compose {
                return;
            }
            state.composer.set_suggestions(response.suggestions);
            publish(
                &mut effects,
                event_names::COMPOSER_TEXT,
                &state.composer.update(),
            );
        }
        self.apply(effects);
    }

    fn handle_connection(&self, epoch: u64, connection: ConnectionState) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            if !state.active || state.epoch != epoch {
                return;
            }
            let was_connected = state.last_connected.replace(connection.is_connected);

            if was_connected == Some(true) && !connection.is_connected {
                // Never resume a half-counted sign after a gap
                state.stalled = true;
                if let Some(reconciler) = state.reconciler.as_mut() {
                    reconciler.reset_gate();
                }
                state.composer.reset_gate();
                tracing::warn!(session_id = %state.session_id, "Connection lost, session stalled");
            } else if connection.is_connected && state.stalled {
                state.stalled = false;
                tracing::info!(session_id = %state.session_id, "Connection restored, session resumed");
            } else {
                return;
            }

            publish(
                &mut effects,
                event_names::SESSION_STALLED,
                &SessionStalled {
                    session_id: state.session_id.clone(),
                    stalled: state.stalled,
                },
            );
        }
        self.apply(effects);
    }

    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Publish(topic, payload) => self.bus.emit(topic, payload),
                Effect::Emit(event, payload) => {
                    self.connection.emit(event, payload);
                }
                Effect::StopCapture => self.stop_capture.request_stop(),
                Effect::Detach => self.detach(),
            }
        }
    }
}

/// Publish a connection state change on the host bus.
pub fn publish_connection_state(bus: &EventBusRef, state: ConnectionState) {
    emit_json(bus.as_ref(), event_names::CONNECTION_STATE, &state);
}

/// Keeps `connection:state` on the bus in sync with the connection.
pub fn mirror_connection_state(connection: &ConnectionManager, bus: EventBusRef) -> Subscription {
    connection.subscribe(move |state| publish_connection_state(&bus, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_question_id() {
        assert_eq!(SessionTarget::question("q1", "AB").question_id(), "q1");
        assert_eq!(SessionTarget::Compose.question_id(), "");
    }

    #[test]
    fn test_progress_payload() {
        let mut state = SessionState::new(SessionTarget::question("q7", "HI"), 3);
        state.session_id = "s".to_string();
        state.last_detected = Some("H".to_string());
        let reconciler = state.reconciler.as_mut().unwrap();
        reconciler.observe("H");
        reconciler.observe("H");

        let progress = state.progress().unwrap();
        assert_eq!(progress.question_id, "q7");
        assert_eq!(progress.consecutive_count, 2);
        assert_eq!(progress.threshold, 3);
        assert_eq!(progress.current_char_index, 0);
        assert!(progress.completed_chars.is_empty());
    }

    #[test]
    fn test_reset_keeps_epoch_and_target() {
        let mut state = SessionState::new(SessionTarget::Compose, 6);
        state.epoch = 4;
        state.attempted = true;
        state.reset(6);
        assert_eq!(state.epoch, 4);
        assert!(!state.attempted);
        assert_eq!(state.target, SessionTarget::Compose);
    }
}
