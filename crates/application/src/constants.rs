/// Inference service endpoint used when nothing is configured
pub const DEFAULT_WS_URL: &str = "http://localhost:15100";

/// Minimum time between two landmark requests
pub const DEFAULT_PROCESS_INTERVAL_MS: u64 = 250; // 4 requests per second

/// Identical predictions in a row needed to confirm a sign
pub const DEFAULT_CONSECUTIVE_THRESHOLD: u32 = 6;

/// Failed connects/disconnects tolerated before the error is shown
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before an automatic reconnect
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;

/// Pause between teardown and connect on a manual reconnect
pub const DEFAULT_RECONNECT_SETTLE_MS: u64 = 500;

/// Pause between teardown and construction on a session restart
pub const DEFAULT_RESTART_DELAY_MS: u64 = 100;

/// How long the latest raw prediction stays visible
pub const DEFAULT_PREDICTION_TTL_MS: u64 = 5000;

/// Suggestions the autocomplete service sends instead of real words
pub const AUTOCOMPLETE_PLACEHOLDERS: [&str; 2] = ["<none>", "<no input>"];
