//! Replay of recorded landmark sessions.
//!
//! A recording is JSON Lines, one frame per line:
//!
//! ```text
//! {"t": 0,   "hands": [[{"x":0.51,"y":0.72,"z":0.0}, ...21 points]]}
//! {"t": 33,  "hands": []}
//! ```
//!
//! `t` is milliseconds since the start of the recording. Replaying drives the
//! capture loop exactly like a camera: [`ReplaySource`] yields frames on the
//! recorded schedule and hands each frame's detections to the paired
//! [`ReplayLandmarker`] over a channel.

use std::io::BufRead;
use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use handsign_landmarks::RawHand;
use serde::Deserialize;

use crate::error::{CameraError, LandmarkerError, ReplayError};
use crate::source::{HandLandmarker, VideoFrame, VideoSource};

/// Nominal frame size reported for replayed frames.
pub const REPLAY_FRAME_WIDTH: u32 = 640;
pub const REPLAY_FRAME_HEIGHT: u32 = 480;

/// One recorded frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordedFrame {
    /// Milliseconds since the start of the recording.
    #[serde(default)]
    pub t: u64,
    #[serde(default)]
    pub hands: Vec<RawHand>,
}

/// A loaded recording.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    frames: Vec<RecordedFrame>,
}

/// How fast a recording is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Wait between frames as recorded.
    Realtime,
    /// Yield frames as fast as they are consumed.
    Unpaced,
}

impl Recording {
    pub fn new(frames: Vec<RecordedFrame>) -> Self {
        Self { frames }
    }

    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let file = std::fs::File::open(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = std::io::BufReader::new(file);

        let mut frames = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| ReplayError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let frame: RecordedFrame =
                serde_json::from_str(&line).map_err(|source| ReplayError::Parse {
                    line: index + 1,
                    source,
                })?;
            frames.push(frame);
        }

        tracing::debug!(path = %path.display(), frames = frames.len(), "Loaded recording");
        Ok(Self { frames })
    }

    pub fn frames(&self) -> &[RecordedFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Split into a frame source and the matching landmarker.
    pub fn into_pair(self, pacing: Pacing) -> (ReplaySource, ReplayLandmarker) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let source = ReplaySource {
            frames: self.frames.into_iter(),
            pacing,
            detections: tx,
            started: None,
            seq: 0,
            base_timestamp_ms: 0,
        };
        (source, ReplayLandmarker { detections: rx })
    }
}

/// Frame source backed by a recording.
pub struct ReplaySource {
    frames: std::vec::IntoIter<RecordedFrame>,
    pacing: Pacing,
    detections: Sender<(u64, Vec<RawHand>)>,
    started: Option<Instant>,
    seq: u64,
    base_timestamp_ms: i64,
}

impl VideoSource for ReplaySource {
    fn open(&mut self) -> Result<(), CameraError> {
        self.started = Some(Instant::now());
        self.base_timestamp_ms = chrono::Utc::now().timestamp_millis();
        Ok(())
    }

    fn next_frame(&mut self) -> Option<VideoFrame> {
        let frame = self.frames.next()?;

        if self.pacing == Pacing::Realtime {
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = started + Duration::from_millis(frame.t);
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }

        let seq = self.seq;
        self.seq += 1;
        if self.detections.send((seq, frame.hands)).is_err() {
            tracing::debug!("Replay landmarker dropped, ending stream");
            return None;
        }

        Some(VideoFrame::new(
            seq,
            self.base_timestamp_ms + frame.t as i64,
            REPLAY_FRAME_WIDTH,
            REPLAY_FRAME_HEIGHT,
        ))
    }

    fn close(&mut self) {}
}

/// Landmarker that returns the detections recorded for each frame.
pub struct ReplayLandmarker {
    detections: Receiver<(u64, Vec<RawHand>)>,
}

impl HandLandmarker for ReplayLandmarker {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<RawHand>, LandmarkerError> {
        // Skip anything older than the frame being processed
        while let Ok((seq, hands)) = self.detections.try_recv() {
            if seq == frame.seq {
                return Ok(hands);
            }
        }
        Err(LandmarkerError::Unavailable(format!(
            "no recorded detections for frame {}",
            frame.seq
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn hand_line(t: u64, x: f32) -> String {
        let points: Vec<String> = (0..21)
            .map(|_| format!(r#"{{"x":{x},"y":0.5,"z":0.0}}"#))
            .collect();
        format!(r#"{{"t":{t},"hands":[[{}]]}}"#, points.join(","))
    }

    #[test]
    fn test_load_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", hand_line(0, 0.1)).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"t":33,"hands":[]}}"#).unwrap();

        let recording = Recording::load(file.path()).unwrap();
        assert_eq!(recording.len(), 2);
        assert_eq!(recording.frames()[0].hands[0].len(), 21);
        assert!(recording.frames()[1].hands.is_empty());
    }

    #[test]
    fn test_load_reports_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", hand_line(0, 0.1)).unwrap();
        writeln!(file, "not json").unwrap();

        match Recording::load(file.path()) {
            Err(ReplayError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file() {
        let err = Recording::load(Path::new("/nonexistent/recording.jsonl")).unwrap_err();
        assert!(matches!(err, ReplayError::Io { .. }));
    }

    #[test]
    fn test_pair_yields_recorded_detections() {
        let recording = Recording::new(vec![
            RecordedFrame {
                t: 0,
                hands: vec![vec![Default::default(); 21]],
            },
            RecordedFrame {
                t: 10,
                hands: Vec::new(),
            },
        ]);
        let (mut source, mut landmarker) = recording.into_pair(Pacing::Unpaced);
        source.open().unwrap();

        let first = source.next_frame().unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(landmarker.detect(&first).unwrap().len(), 1);

        let second = source.next_frame().unwrap();
        assert!(landmarker.detect(&second).unwrap().is_empty());

        assert!(source.next_frame().is_none());
    }
}
