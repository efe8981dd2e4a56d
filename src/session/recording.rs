//! Active recordings and bounded stop acknowledgement

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot::error::TryRecvError;
use uuid::Uuid;

use crate::errors::{ProviderError, SessionError};
use crate::platform::{ActiveRecording, BoundCamera, CaptureAck, RecordingRequest};
use crate::types::Sensor;

/// How often the session thread checks a pending stop acknowledgement
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Public description of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub id: Uuid,
    pub sensor: Sensor,
    pub path: PathBuf,
    pub with_audio: bool,
    pub started_at: DateTime<Utc>,
    pub paused: bool,
}

struct ActiveEntry {
    info: RecordingInfo,
    recording: Box<dyn ActiveRecording>,
}

/// A stopped recording whose hardware acknowledgement is still outstanding.
///
/// The recording resource itself is already released.
pub struct PendingStop {
    pub info: RecordingInfo,
    ack: CaptureAck,
}

impl std::fmt::Debug for PendingStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingStop").field("info", &self.info).finish()
    }
}

impl PendingStop {
    /// Wait for the acknowledgement, at most `timeout`. Resolves exactly once.
    pub async fn wait(self, timeout: Duration) -> Result<PathBuf, SessionError> {
        await_capture_ack(self.ack, timeout, "stop recording").await
    }

    /// Blocking variant of [`PendingStop::wait`] for the session thread
    pub fn wait_blocking(mut self, timeout: Duration) -> Result<PathBuf, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.ack.try_recv() {
                Ok(result) => return ack_result("stop recording", result),
                Err(TryRecvError::Closed) => return Err(dropped_ack("stop recording")),
                Err(TryRecvError::Empty) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ack_timeout("stop recording", timeout));
            }
            std::thread::sleep(STOP_POLL_INTERVAL.min(deadline - now));
        }
    }
}

fn ack_timeout(what: &str, timeout: Duration) -> SessionError {
    SessionError::Timeout(format!(
        "{} not acknowledged within {} ms",
        what,
        timeout.as_millis()
    ))
}

fn dropped_ack(what: &str) -> SessionError {
    SessionError::CaptureFailure(format!("{} acknowledgement was dropped", what))
}

fn ack_result(what: &str, result: Result<PathBuf, ProviderError>) -> Result<PathBuf, SessionError> {
    result.map_err(|e| SessionError::CaptureFailure(format!("{} failed: {}", what, e)))
}

/// Await a provider acknowledgement with a bounded wait
pub async fn await_capture_ack(
    ack: CaptureAck,
    timeout: Duration,
    what: &str,
) -> Result<PathBuf, SessionError> {
    match tokio::time::timeout(timeout, ack).await {
        Err(_) => Err(ack_timeout(what, timeout)),
        Ok(Err(_)) => Err(dropped_ack(what)),
        Ok(Ok(result)) => ack_result(what, result),
    }
}

/// Create the parent directory of a capture destination
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Recordings running on the current binding
#[derive(Default)]
pub struct RecordingSet {
    entries: Vec<ActiveEntry>,
}

impl RecordingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn infos(&self) -> Vec<RecordingInfo> {
        self.entries.iter().map(|e| e.info.clone()).collect()
    }

    /// Start one recording per `(camera, path)` pair.
    ///
    /// All-or-nothing: if any camera refuses, the ones already started are
    /// stopped and their acknowledgements discarded.
    pub fn start(
        &mut self,
        targets: Vec<(Arc<dyn BoundCamera>, PathBuf)>,
        with_audio: bool,
    ) -> Result<Vec<RecordingInfo>, SessionError> {
        if self.is_recording() {
            return Err(SessionError::configuration("a recording is already in progress"));
        }

        let mut started = Vec::with_capacity(targets.len());
        for (camera, path) in targets {
            ensure_parent_dir(&path)?;
            let request = RecordingRequest {
                path: path.clone(),
                with_audio,
            };
            match camera.start_recording(request) {
                Ok(recording) => started.push(ActiveEntry {
                    info: RecordingInfo {
                        id: Uuid::new_v4(),
                        sensor: camera.sensor(),
                        path,
                        with_audio,
                        started_at: Utc::now(),
                        paused: false,
                    },
                    recording,
                }),
                Err(e) => {
                    for entry in started {
                        drop(entry.recording.stop());
                    }
                    return Err(SessionError::CaptureFailure(format!(
                        "failed to start recording: {}",
                        e
                    )));
                }
            }
        }

        let infos: Vec<RecordingInfo> = started.iter().map(|e| e.info.clone()).collect();
        for info in &infos {
            log::info!(
                "Recording {} started on {:?} -> {:?} (audio: {})",
                info.id,
                info.sensor.position,
                info.path,
                info.with_audio
            );
        }
        self.entries = started;
        Ok(infos)
    }

    pub fn pause_all(&mut self) -> Result<(), SessionError> {
        if !self.is_recording() {
            return Err(SessionError::configuration("no recording in progress"));
        }
        for entry in &mut self.entries {
            entry
                .recording
                .pause()
                .map_err(|e| SessionError::CaptureFailure(format!("pause failed: {}", e)))?;
            entry.info.paused = true;
        }
        Ok(())
    }

    pub fn resume_all(&mut self) -> Result<(), SessionError> {
        if !self.is_recording() {
            return Err(SessionError::configuration("no recording in progress"));
        }
        for entry in &mut self.entries {
            entry
                .recording
                .resume()
                .map_err(|e| SessionError::CaptureFailure(format!("resume failed: {}", e)))?;
            entry.info.paused = false;
        }
        Ok(())
    }

    /// Stop every recording and release it immediately
    pub fn stop_all(&mut self) -> Vec<PendingStop> {
        self.entries
            .drain(..)
            .map(|entry| PendingStop {
                info: entry.info,
                ack: entry.recording.stop(),
            })
            .collect()
    }

    /// Stop everything without waiting for acknowledgements; returns how many were running
    pub fn release_all(&mut self) -> usize {
        let stopped = self.stop_all();
        let count = stopped.len();
        for pending in stopped {
            log::warn!("Recording {} released without acknowledgement", pending.info.id);
        }
        count
    }
}

impl std::fmt::Debug for RecordingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSet")
            .field("recordings", &self.infos())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_ack_success() {
        let (tx, rx) = oneshot::channel();
        tx.send(Ok(PathBuf::from("/tmp/a.mp4"))).unwrap();
        let result = await_capture_ack(rx, Duration::from_millis(100), "stop").await;
        assert_eq!(result.unwrap(), PathBuf::from("/tmp/a.mp4"));
    }

    #[tokio::test]
    async fn test_ack_failure_is_capture_failure() {
        let (tx, rx) = oneshot::channel();
        tx.send(Err(ProviderError::Other("encoder".to_string()))).unwrap();
        let result = await_capture_ack(rx, Duration::from_millis(100), "stop").await;
        assert!(matches!(result, Err(SessionError::CaptureFailure(_))));
    }

    #[tokio::test]
    async fn test_missing_ack_times_out() {
        let (_tx, rx) = oneshot::channel::<Result<PathBuf, ProviderError>>();
        let result = await_capture_ack(rx, Duration::from_millis(20), "stop").await;
        assert!(matches!(result, Err(SessionError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_dropped_ack() {
        let (tx, rx) = oneshot::channel::<Result<PathBuf, ProviderError>>();
        drop(tx);
        let result = await_capture_ack(rx, Duration::from_millis(100), "stop").await;
        assert!(matches!(result, Err(SessionError::CaptureFailure(_))));
    }

    #[test]
    fn test_blocking_wait_bounded() {
        let (tx, rx) = oneshot::channel::<Result<PathBuf, ProviderError>>();
        let pending = PendingStop {
            info: RecordingInfo {
                id: Uuid::new_v4(),
                sensor: Sensor::back(),
                path: PathBuf::from("/tmp/a.mp4"),
                with_audio: false,
                started_at: Utc::now(),
                paused: false,
            },
            ack: rx,
        };
        let started = Instant::now();
        let result = pending.wait_blocking(Duration::from_millis(40));
        assert!(matches!(result, Err(SessionError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(40));
        drop(tx);
    }

    #[test]
    fn test_blocking_wait_sees_late_ack() {
        let (tx, rx) = oneshot::channel();
        let pending = PendingStop {
            info: RecordingInfo {
                id: Uuid::new_v4(),
                sensor: Sensor::back(),
                path: PathBuf::from("/tmp/b.mp4"),
                with_audio: true,
                started_at: Utc::now(),
                paused: false,
            },
            ack: rx,
        };
        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let _ = tx.send(Ok(PathBuf::from("/tmp/b.mp4")));
        });
        let result = pending.wait_blocking(Duration::from_secs(2));
        assert_eq!(result.unwrap(), PathBuf::from("/tmp/b.mp4"));
        sender.join().unwrap();
    }

    #[test]
    fn test_empty_set_rejects_pause() {
        let mut set = RecordingSet::new();
        assert!(set.pause_all().is_err());
        assert_eq!(set.release_all(), 0);
    }
}
