//! Single-permit backpressure gate between the analysis worker and its consumer

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Result of waiting on the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWait {
    /// The consumer acknowledged the in-flight frame
    Released,
    /// The gate was closed (teardown or consumer detached)
    Closed,
    TimedOut,
}

struct GateState {
    count: u32,
    /// Sequence of the frame the permit belongs to
    sequence: u64,
    closed: bool,
}

/// Resettable countdown gate with a single permit.
///
/// `reset` arms the gate before a frame is dispatched, the consumer calls
/// `count_down` (or `count_down_for` with the frame's sequence) once it is
/// done with the frame, and the worker `wait`s before giving the hardware
/// buffer back.
pub struct FrameBackpressureGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl FrameBackpressureGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                count: 0,
                sequence: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm the gate for frame `sequence`
    pub fn reset(&self, sequence: u64) {
        let mut g = self.lock();
        g.count = 1;
        g.sequence = sequence;
    }

    /// Consumer acknowledgement. Extra calls are ignored.
    pub fn count_down(&self) {
        let mut g = self.lock();
        if g.count > 0 {
            g.count -= 1;
            if g.count == 0 {
                self.cv.notify_all();
            }
        }
    }

    /// Acknowledge frame `sequence`. Ignored unless that frame holds the permit.
    pub fn count_down_for(&self, sequence: u64) {
        let mut g = self.lock();
        if g.count > 0 && g.sequence == sequence {
            g.count -= 1;
            if g.count == 0 {
                self.cv.notify_all();
            }
        }
    }

    /// Whether a frame is still awaiting acknowledgement
    pub fn is_armed(&self) -> bool {
        self.lock().count > 0
    }

    /// Block until the permit is released, the gate is closed or `timeout` elapses.
    ///
    /// `None` waits without a deadline.
    pub fn wait(&self, timeout: Option<Duration>) -> GateWait {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut g = self.lock();
        loop {
            if g.closed {
                return GateWait::Closed;
            }
            if g.count == 0 {
                return GateWait::Released;
            }
            match deadline {
                None => {
                    g = self.cv.wait(g).unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return GateWait::TimedOut;
                    }
                    let (ng, _) = self
                        .cv
                        .wait_timeout(g, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    g = ng;
                }
            }
        }
    }

    /// Wake every waiter; subsequent waits return [`GateWait::Closed`] until reopened
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        g.count = 0;
        self.cv.notify_all();
    }

    pub fn reopen(&self) {
        let mut g = self.lock();
        g.closed = false;
        g.count = 0;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for FrameBackpressureGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameBackpressureGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let g = self.lock();
        f.debug_struct("FrameBackpressureGate")
            .field("count", &g.count)
            .field("closed", &g.closed)
            .finish()
    }
}
