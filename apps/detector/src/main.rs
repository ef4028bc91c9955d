//! Headless detector.
//!
//! Replays a recorded landmark session through the full pipeline against a
//! running inference service and logs every host event.
//!
//! Usage:
//!   handsign-detector [--config detector.json] <recording.jsonl> [TARGET]
//!
//! With a TARGET (e.g. `HELLO`) the session runs in question mode; without one
//! confirmed signs are composed into free text.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use handsign_application::{
    mirror_connection_state, CaptureFactory, DetectionSessionController, DetectorConfig,
    SessionTarget,
};
use handsign_capture::replay::{Pacing, Recording};
use handsign_capture::{CameraError, CaptureResources};
use handsign_events::{EventBus, EventBusRef};
use handsign_socket::ConnectionManager;
use tracing_subscriber::EnvFilter;

/// Grace period for predictions still in flight when the recording ends.
const DRAIN_DELAY: Duration = Duration::from_secs(1);

struct Args {
    config: Option<PathBuf>,
    recording: PathBuf,
    target: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config = None;
    let mut positional = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                println!("usage: handsign-detector [--config FILE] <recording.jsonl> [TARGET]");
                std::process::exit(0);
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let Some(recording) = positional.next() else {
        bail!("missing recording path (see --help)");
    };
    Ok(Args {
        config,
        recording: PathBuf::from(recording),
        target: positional.next(),
    })
}

/// Logs host events instead of forwarding them to a UI.
struct LogEventBus;

impl EventBus for LogEventBus {
    fn emit(&self, topic: &str, payload: serde_json::Value) {
        tracing::info!(topic, %payload, "event");
    }
}

/// Loads the recording afresh for every session start.
struct ReplayFactory {
    path: PathBuf,
}

impl CaptureFactory for ReplayFactory {
    fn create(&self) -> Result<CaptureResources, CameraError> {
        let recording = Recording::load(&self.path)
            .map_err(|e| CameraError::DeviceUnavailable(e.to_string()))?;
        tracing::info!(frames = recording.len(), "Replaying recording");
        let (source, landmarker) = recording.into_pair(Pacing::Realtime);
        Ok(CaptureResources::new(Box::new(source), Box::new(landmarker)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,handsign=debug")),
        )
        .init();

    let args = parse_args()?;
    let config = DetectorConfig::load(args.config.as_deref()).context("loading configuration")?;
    tracing::info!(url = %config.ws_url, threshold = config.consecutive_threshold, "Starting handsign detector");

    let connection = ConnectionManager::with_websocket(config.connection())
        .context("creating connection manager")?;
    let bus: EventBusRef = Arc::new(LogEventBus);
    let _mirror = mirror_connection_state(&connection, Arc::clone(&bus));

    let controller = DetectionSessionController::new(
        config,
        connection.clone(),
        bus,
        Arc::new(ReplayFactory {
            path: args.recording.clone(),
        }),
    );

    let target = match args.target {
        Some(sequence) => SessionTarget::question(question_id(&args.recording), sequence),
        None => SessionTarget::Compose,
    };
    controller.set_target(target);
    controller
        .start()
        .with_context(|| format!("starting session for {}", args.recording.display()))?;

    // Until the sequence completes or the recording runs out
    while controller.is_active() && controller.is_capturing() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if controller.is_active() {
        tokio::time::sleep(DRAIN_DELAY).await;
    }
    controller.stop();

    let snapshot = controller.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    connection.disconnect();
    Ok(())
}

fn question_id(recording: &Path) -> String {
    recording
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string())
}
