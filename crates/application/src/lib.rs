mod composer;
mod config;
mod constants;
mod dispatcher;
mod reconciler;
mod session;

pub use composer::TextComposer;
pub use config::{
    ConfigError, DetectorConfig, ENV_CONSECUTIVE_THRESHOLD, ENV_PROCESS_INTERVAL_MS, ENV_WS_URL,
};
pub use constants::*;
pub use dispatcher::{DispatchOutcome, DispatchStats, ThrottledDispatcher};
pub use reconciler::{ConsecutiveGate, PredictionReconciler, Reconciled, SignSymbol};
pub use session::{
    mirror_connection_state, publish_connection_state, CaptureFactory,
    DetectionSessionController, Result, SessionError, SessionSnapshot, SessionTarget,
};
