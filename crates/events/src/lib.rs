//! Shared event contracts for the hand-sign pipeline.
//!
//! Two families of payloads live here:
//! - wire payloads exchanged with the inference service (`req_handsign`,
//!   `res_handsign`, `req_autocomp`, `res_autocomp`)
//! - host events published on the [`EventBus`] so a UI (or the headless
//!   detector) can follow connection and session progress
//!
//! Keeping both in one crate means producers and consumers agree on field
//! names at compile time.

mod bus;

pub use bus::{emit_json, EmittedEvent, EventBus, EventBusRef, InMemoryEventBus};

use handsign_landmarks::{LandmarkFrame, LandmarkPoint};
use serde::{Deserialize, Serialize};

// =============================================================================
// Wire payloads
// =============================================================================

/// Outbound landmark request.
///
/// Producers: throttled dispatcher
/// Consumers: inference service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandSignRequest {
    pub landmarks: Vec<LandmarkPoint>,
}

impl From<&LandmarkFrame> for HandSignRequest {
    fn from(frame: &LandmarkFrame) -> Self {
        Self {
            landmarks: frame.points().to_vec(),
        }
    }
}

/// Prediction returned by the inference service for one landmark frame.
///
/// Producers: inference service
/// Consumers: prediction reconciler, session controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandSignResponse {
    /// Server timestamp (ms) at which the request was received.
    pub time: i64,
    /// Predicted label (`A`..`Z`, `delete`, `space`, `autocmp`).
    pub pred: String,
    /// Probability of the predicted label.
    pub prob: f32,
    /// Inference duration in milliseconds.
    pub infer: i64,
}

/// Outbound autocomplete request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocompleteRequest {
    pub text: String,
}

/// Autocomplete suggestions for the composed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocompleteResponse {
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Greeting sent by the service once the namespace is joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionAck {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sid: String,
}

// =============================================================================
// Host events
// =============================================================================

/// Observable state of the inference connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub is_connected: bool,
    pub show_connection_error: bool,
}

/// Answer reported to the host for a question.
///
/// Producers: session controller
/// Consumers: host (progress tracking)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question_id: String,
    pub answer: String,
    pub is_correct: bool,
}

/// Per-prediction progress of an active session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub session_id: String,
    pub question_id: String,
    pub last_detected: Option<String>,
    pub current_char_index: usize,
    pub consecutive_count: u32,
    pub threshold: u32,
    pub completed_chars: Vec<String>,
    /// Progress of the current character, in `[0, 1]`.
    pub character_progress: f32,
    /// Progress of the whole target sequence, in `[0, 1]`.
    pub sequence_progress: f32,
}

/// A session finished because every target character was confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCompleted {
    pub session_id: String,
    pub question_id: String,
    pub sequence: String,
}

/// A session was stopped before completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStopped {
    pub session_id: String,
    pub question_id: String,
    /// Whether an incorrect answer was reported on stop.
    pub reported_incorrect: bool,
}

/// The connection dropped (or came back) while a session was active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStalled {
    pub session_id: String,
    pub stalled: bool,
}

/// The video source could not be acquired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraErrorEvent {
    pub session_id: String,
    pub message: String,
}

/// Composed text changed in free-form detecting mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposerUpdate {
    pub text: String,
    pub suggestions: Vec<String>,
}

/// Event names as constants to prevent typos.
pub mod event_names {
    /// Outbound landmark frame.
    pub const REQ_HANDSIGN: &str = "req_handsign";
    /// Inbound prediction.
    pub const RES_HANDSIGN: &str = "res_handsign";
    /// Outbound autocomplete request.
    pub const REQ_AUTOCOMP: &str = "req_autocomp";
    /// Inbound autocomplete suggestions.
    pub const RES_AUTOCOMP: &str = "res_autocomp";
    /// Inbound greeting after namespace connect.
    pub const CONNECTION_ACK: &str = "connection_ack";

    /// Connection state changed.
    pub const CONNECTION_STATE: &str = "connection:state";
    /// Raw prediction received for the active session.
    pub const DETECTION_PREDICTION: &str = "detection:prediction";
    /// First prediction of a session (provisional incorrect answer).
    pub const SESSION_ATTEMPTED: &str = "session:attempted";
    /// Consecutive-count progress.
    pub const SESSION_PROGRESS: &str = "session:progress";
    /// Answer reported to the host.
    pub const SESSION_ANSWER: &str = "session:answer";
    /// Target sequence fully confirmed.
    pub const SESSION_COMPLETED: &str = "session:completed";
    /// Session stopped manually.
    pub const SESSION_STOPPED: &str = "session:stopped";
    /// Connection lost or restored during a session.
    pub const SESSION_STALLED: &str = "session:stalled";
    /// Camera could not be acquired.
    pub const SESSION_CAMERA_ERROR: &str = "session:camera_error";
    /// Free-form composer text changed.
    pub const COMPOSER_TEXT: &str = "composer:text";
}
