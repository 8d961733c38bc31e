//! Session clock: monotonic elapsed time excluding paused spans.
//!
//! Single-writer discipline: only the session coordinator calls `pause()` and
//! `resume()`. Capture loops read `elapsed_ms()` concurrently, e.g. to stamp
//! highlight offsets that stay aligned with the recorded media timeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct SessionClock {
    started: Instant,
    paused_ms: AtomicU64,
    paused_since: Mutex<Option<Instant>>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            paused_ms: AtomicU64::new(0),
            paused_since: Mutex::new(None),
        }
    }

    /// Marks the start of a paused span. Idempotent.
    pub fn pause(&self) {
        let mut since = self.paused_since.lock().unwrap_or_else(|e| e.into_inner());
        if since.is_none() {
            *since = Some(Instant::now());
        }
    }

    /// Closes the current paused span, folding it into the accumulated total.
    /// Idempotent.
    pub fn resume(&self) {
        let mut since = self.paused_since.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = since.take() {
            self.paused_ms
                .fetch_add(at.elapsed().as_millis() as u64, Ordering::Relaxed);
        }
    }

    /// Milliseconds elapsed since session start, excluding paused time.
    /// Frozen while paused.
    pub fn elapsed_ms(&self) -> u64 {
        let wall = self.started.elapsed().as_millis() as u64;
        let mut paused = self.paused_ms.load(Ordering::Relaxed);
        let since = self.paused_since.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = *since {
            paused += at.elapsed().as_millis() as u64;
        }
        wall.saturating_sub(paused)
    }

    /// Total paused time accumulated so far, including an open span.
    pub fn total_paused(&self) -> Duration {
        let mut paused = self.paused_ms.load(Ordering::Relaxed);
        let since = self.paused_since.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = *since {
            paused += at.elapsed().as_millis() as u64;
        }
        Duration::from_millis(paused)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_since
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
