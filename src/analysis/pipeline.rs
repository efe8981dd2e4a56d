//! Analysis use case: conversion worker, consumer hand-off and buffer release
//!
//! Frames enter through [`AnalysisPipeline::on_frame`] on the camera callback
//! thread and are handed over a capacity-1 channel to a dedicated worker
//! thread. While a frame is in flight every new frame is released straight
//! back to the hardware, so at most one buffer is ever held.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use super::convert::FrameFormatConverter;
use super::frame::{AnalysisImage, Frame};
use super::gate::{FrameBackpressureGate, GateWait};
use crate::errors::{recover_lock, SessionError};
use crate::invariants::Invariant;
use crate::platform::FrameSink;
use crate::session::events::SessionEvent;
use crate::timing::FrameRateLimiter;
use crate::types::{AnalysisFormat, AnalysisSettings};

/// How often the worker re-checks the consumer while waiting for an ack
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default depth of the consumer hand-off queue
pub const DEFAULT_CONSUMER_CAPACITY: usize = 4;

/// What the consumer receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    Frame(AnalysisImage),
    /// Conversion failed; the buffer was released and no ack is expected
    Error { sequence: u64, message: String },
}

/// Counters describing the pipeline's traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub received: u64,
    pub emitted: u64,
    pub released: u64,
    pub dropped_no_consumer: u64,
    pub dropped_busy: u64,
    pub dropped_consumer_full: u64,
    pub conversion_errors: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    emitted: AtomicU64,
    released: AtomicU64,
    dropped_no_consumer: AtomicU64,
    dropped_busy: AtomicU64,
    dropped_consumer_full: AtomicU64,
    conversion_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AnalysisStats {
        AnalysisStats {
            received: self.received.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            dropped_no_consumer: self.dropped_no_consumer.load(Ordering::Relaxed),
            dropped_busy: self.dropped_busy.load(Ordering::Relaxed),
            dropped_consumer_full: self.dropped_consumer_full.load(Ordering::Relaxed),
            conversion_errors: self.conversion_errors.load(Ordering::Relaxed),
        }
    }
}

struct Settings {
    format: AnalysisFormat,
    limiter: FrameRateLimiter,
}

struct Shared {
    settings: Mutex<Settings>,
    converter: FrameFormatConverter,
    gate: FrameBackpressureGate,
    consumer: Mutex<Option<mpsc::Sender<AnalysisEvent>>>,
    events: Mutex<Option<broadcast::Sender<SessionEvent>>>,
    busy: AtomicBool,
    running: AtomicBool,
    sequence: AtomicU64,
    counters: Counters,
}

impl Shared {
    fn release(&self, frame: Frame) {
        frame.release();
        Counters::bump(&self.counters.released);
    }

    fn consumer(&self) -> Option<mpsc::Sender<AnalysisEvent>> {
        recover_lock(&self.consumer).clone()
    }

    fn detach(&self) {
        if recover_lock(&self.consumer).take().is_some() {
            log::debug!("Analysis consumer detached");
        }
        self.gate.close();
    }

    fn process(&self, frame: Frame, shutdown: &Receiver<()>) {
        if !self.running.load(Ordering::Acquire) {
            self.release(frame);
            return;
        }
        let Some(consumer) = self.consumer() else {
            Counters::bump(&self.counters.dropped_no_consumer);
            self.release(frame);
            return;
        };

        let format = recover_lock(&self.settings).format;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        crate::check_invariant!(
            !self.gate.is_armed(),
            Invariant::SingleFrameInFlight,
            "analysis::process"
        );
        self.gate.reset(sequence);
        let image = match self.converter.convert(&frame, format, sequence) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("Analysis frame {} conversion failed: {}", sequence, e);
                Counters::bump(&self.counters.conversion_errors);
                self.gate.count_down();
                let message = e.to_string();
                if let Some(events) = recover_lock(&self.events).as_ref() {
                    let _ = events.send(SessionEvent::AnalysisError {
                        sequence,
                        message: message.clone(),
                    });
                }
                let _ = consumer.try_send(AnalysisEvent::Error { sequence, message });
                self.release(frame);
                return;
            }
        };

        match consumer.try_send(AnalysisEvent::Frame(image)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::debug!("Analysis consumer queue full, dropping frame {}", sequence);
                Counters::bump(&self.counters.dropped_consumer_full);
                self.gate.count_down();
                self.release(frame);
                return;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.detach();
                self.release(frame);
                return;
            }
        }

        let emitted_at = Instant::now();
        recover_lock(&self.settings).limiter.record_emit(emitted_at);
        Counters::bump(&self.counters.emitted);
        log::trace!("Analysis frame {} emitted", sequence);

        self.await_ack(&consumer);

        let delay = recover_lock(&self.settings).limiter.release_delay(Instant::now());
        if !delay.is_zero() {
            // returns early once the shutdown sender is dropped
            let _ = shutdown.recv_timeout(delay);
        }
        self.release(frame);
    }

    fn await_ack(&self, consumer: &mpsc::Sender<AnalysisEvent>) {
        loop {
            match self.gate.wait(Some(ACK_POLL_INTERVAL)) {
                GateWait::Released | GateWait::Closed => return,
                GateWait::TimedOut => {
                    if !self.running.load(Ordering::Acquire) {
                        return;
                    }
                    if consumer.is_closed() {
                        self.detach();
                        return;
                    }
                }
            }
        }
    }
}

/// Analysis use case with single-frame backpressure and an optional rate cap
pub struct AnalysisPipeline {
    shared: Arc<Shared>,
    frames: Mutex<Option<Sender<Frame>>>,
    shutdown: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisPipeline {
    /// Spawn the conversion worker
    pub fn new(converter: FrameFormatConverter) -> Result<Self, SessionError> {
        let shared = Arc::new(Shared {
            settings: Mutex::new(Settings {
                format: AnalysisFormat::default(),
                limiter: FrameRateLimiter::default(),
            }),
            converter,
            gate: FrameBackpressureGate::new(),
            consumer: Mutex::new(None),
            events: Mutex::new(None),
            busy: AtomicBool::new(false),
            running: AtomicBool::new(true),
            sequence: AtomicU64::new(0),
            counters: Counters::default(),
        });

        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Frame>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("crabcam-analysis".to_string())
            .spawn(move || {
                while let Ok(frame) = frame_rx.recv() {
                    worker_shared.process(frame, &shutdown_rx);
                    worker_shared.busy.store(false, Ordering::Release);
                }
                log::debug!("Analysis worker exiting");
            })
            .map_err(|e| SessionError::Closed(format!("failed to spawn analysis worker: {}", e)))?;

        Ok(Self {
            shared,
            frames: Mutex::new(Some(frame_tx)),
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Mirror conversion failures onto the session event stream
    pub fn set_event_sender(&self, events: broadcast::Sender<SessionEvent>) {
        *recover_lock(&self.shared.events) = Some(events);
    }

    /// Apply output format and rate cap for the next frames
    pub fn configure(&self, settings: &AnalysisSettings) {
        let mut s = recover_lock(&self.shared.settings);
        s.format = settings.output_format;
        s.limiter = FrameRateLimiter::new(settings.max_frames_per_second);
        log::debug!(
            "Analysis configured: format={} max_fps={:?}",
            settings.output_format.as_str(),
            settings.max_frames_per_second
        );
    }

    pub fn output_format(&self) -> AnalysisFormat {
        recover_lock(&self.shared.settings).format
    }

    /// Attach the consumer, replacing any previous one
    pub fn attach_consumer(&self, capacity: usize) -> AnalysisReceiver {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *recover_lock(&self.shared.consumer) = Some(tx);
        self.shared.gate.reopen();
        log::debug!("Analysis consumer attached (capacity {})", capacity.max(1));
        AnalysisReceiver {
            rx,
            shared: self.shared.clone(),
            unacked: AtomicU64::new(0),
        }
    }

    /// Detach the consumer; an in-flight frame is released without waiting for its ack
    pub fn detach_consumer(&self) {
        self.shared.detach();
    }

    pub fn has_consumer(&self) -> bool {
        recover_lock(&self.shared.consumer)
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Consumer acknowledgement for whichever frame is in flight.
    ///
    /// [`AnalysisReceiver::ack`] only acknowledges the frame it delivered.
    pub fn acknowledge(&self) {
        self.shared.gate.count_down();
    }

    /// Whether a frame is currently held by the pipeline
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> AnalysisStats {
        self.shared.counters.snapshot()
    }

    /// Stop the worker and release every pending buffer. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.gate.close();
        recover_lock(&self.shutdown).take();
        recover_lock(&self.frames).take();
        if let Some(worker) = recover_lock(&self.worker).take() {
            if worker.join().is_err() {
                log::error!("Analysis worker panicked");
            }
        }
        recover_lock(&self.shared.consumer).take();
        log::info!("Analysis pipeline stopped: {:?}", self.stats());
    }
}

impl FrameSink for AnalysisPipeline {
    fn on_frame(&self, frame: Frame) {
        let shared = &self.shared;
        Counters::bump(&shared.counters.received);

        if !shared.running.load(Ordering::Acquire) {
            shared.release(frame);
            return;
        }
        if !self.has_consumer() {
            Counters::bump(&shared.counters.dropped_no_consumer);
            shared.release(frame);
            return;
        }
        if shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            Counters::bump(&shared.counters.dropped_busy);
            shared.release(frame);
            return;
        }

        let sender = recover_lock(&self.frames).clone();
        let rejected = match sender {
            Some(sender) => match sender.try_send(frame) {
                Ok(()) => None,
                Err(TrySendError::Full(frame)) | Err(TrySendError::Disconnected(frame)) => Some(frame),
            },
            None => Some(frame),
        };
        if let Some(frame) = rejected {
            shared.busy.store(false, Ordering::Release);
            Counters::bump(&shared.counters.dropped_busy);
            shared.release(frame);
        }
    }
}

impl Drop for AnalysisPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("running", &self.is_running())
            .field("busy", &self.is_busy())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Consumer end of the analysis stream
#[derive(Debug)]
pub struct AnalysisReceiver {
    rx: mpsc::Receiver<AnalysisEvent>,
    shared: Arc<Shared>,
    /// Sequence of the last delivered frame not yet acknowledged, 0 when none
    unacked: AtomicU64,
}

impl AnalysisReceiver {
    pub async fn recv(&mut self) -> Option<AnalysisEvent> {
        let event = self.rx.recv().await;
        self.track(event.as_ref());
        event
    }

    pub fn try_recv(&mut self) -> Option<AnalysisEvent> {
        let event = self.rx.try_recv().ok();
        self.track(event.as_ref());
        event
    }

    fn track(&self, event: Option<&AnalysisEvent>) {
        if let Some(AnalysisEvent::Frame(image)) = event {
            self.unacked.store(image.sequence, Ordering::Release);
        }
    }

    /// Signal that the last received frame is no longer needed.
    ///
    /// A no-op after error events or repeated calls.
    pub fn ack(&self) {
        let sequence = self.unacked.swap(0, Ordering::AcqRel);
        if sequence != 0 {
            self.shared.gate.count_down_for(sequence);
        }
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("busy", &self.busy.load(Ordering::Relaxed))
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_data::{synthetic_rgba_frame, synthetic_yuv420_frame};
    use crate::analysis::frame::FrameLease;
    use std::sync::atomic::AtomicUsize;

    fn leased(frame: Frame, released: &Arc<AtomicUsize>) -> Frame {
        let released = released.clone();
        frame.with_lease(FrameLease::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_frame_without_consumer_is_released() {
        let pipeline = AnalysisPipeline::new(FrameFormatConverter::default()).unwrap();
        let released = Arc::new(AtomicUsize::new(0));
        pipeline.on_frame(leased(synthetic_yuv420_frame(0, 8, 8, 8), &released));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.stats().dropped_no_consumer, 1);
    }

    #[tokio::test]
    async fn test_frame_held_until_ack() {
        let pipeline = AnalysisPipeline::new(FrameFormatConverter::default()).unwrap();
        pipeline.configure(&AnalysisSettings::new(AnalysisFormat::Nv21));
        let mut rx = pipeline.attach_consumer(DEFAULT_CONSUMER_CAPACITY);
        let released = Arc::new(AtomicUsize::new(0));

        pipeline.on_frame(leased(synthetic_yuv420_frame(0, 8, 8, 8), &released));
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, AnalysisEvent::Frame(ref img) if img.sequence == 1));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert!(pipeline.is_busy());

        // a second frame while the first is held is dropped and released
        pipeline.on_frame(leased(synthetic_yuv420_frame(1, 8, 8, 8), &released));
        assert_eq!(released.load(Ordering::SeqCst), 1);

        rx.ack();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert!(!pipeline.is_busy());
    }

    #[tokio::test]
    async fn test_conversion_error_reported_and_released() {
        let pipeline = AnalysisPipeline::new(FrameFormatConverter::default()).unwrap();
        pipeline.configure(&AnalysisSettings::new(AnalysisFormat::Jpeg));
        let mut rx = pipeline.attach_consumer(DEFAULT_CONSUMER_CAPACITY);
        let released = Arc::new(AtomicUsize::new(0));

        // RGBA source cannot feed a JPEG-from-YUV conversion
        pipeline.on_frame(leased(synthetic_rgba_frame(0, 8, 8), &released));
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, AnalysisEvent::Error { sequence: 1, .. }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.stats().conversion_errors, 1);
    }

    #[tokio::test]
    async fn test_ack_after_error_does_not_release_next_frame() {
        let pipeline = AnalysisPipeline::new(FrameFormatConverter::default()).unwrap();
        pipeline.configure(&AnalysisSettings::new(AnalysisFormat::Nv21));
        let mut rx = pipeline.attach_consumer(DEFAULT_CONSUMER_CAPACITY);
        let released = Arc::new(AtomicUsize::new(0));

        pipeline.on_frame(leased(synthetic_rgba_frame(0, 8, 8), &released));
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, AnalysisEvent::Error { sequence: 1, .. }));
        tokio::time::sleep(Duration::from_millis(50)).await;

        pipeline.on_frame(leased(synthetic_yuv420_frame(1, 8, 8, 8), &released));
        tokio::time::sleep(Duration::from_millis(30)).await;
        // the consumer acks the error before reading the frame queued behind it
        rx.ack();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(pipeline.is_busy());

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, AnalysisEvent::Frame(ref img) if img.sequence == 2));
        rx.ack();
        rx.ack();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert!(!pipeline.is_busy());
    }

    #[tokio::test]
    async fn test_dropped_receiver_releases_in_flight_frame() {
        let pipeline = AnalysisPipeline::new(FrameFormatConverter::default()).unwrap();
        pipeline.configure(&AnalysisSettings::new(AnalysisFormat::Yuv420));
        let rx = pipeline.attach_consumer(1);
        let released = Arc::new(AtomicUsize::new(0));

        pipeline.on_frame(leased(synthetic_yuv420_frame(0, 8, 8, 8), &released));
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(rx);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!pipeline.has_consumer());
    }

    #[test]
    fn test_shutdown_releases_held_frame() {
        let pipeline = AnalysisPipeline::new(FrameFormatConverter::default()).unwrap();
        pipeline.configure(&AnalysisSettings::new(AnalysisFormat::Nv21));
        let _rx = pipeline.attach_consumer(1);
        let released = Arc::new(AtomicUsize::new(0));

        pipeline.on_frame(leased(synthetic_yuv420_frame(0, 8, 8, 8), &released));
        std::thread::sleep(Duration::from_millis(30));
        pipeline.shutdown();
        assert_eq!(released.load(Ordering::SeqCst), 1);

        pipeline.on_frame(leased(synthetic_yuv420_frame(1, 8, 8, 8), &released));
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert!(!pipeline.is_running());
    }
}
