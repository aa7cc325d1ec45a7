//! Fixed-window limiter for calls to the external vision service.
//!
//! State lives in the limiter value itself, so each pipeline (or test) owns
//! and can reset its own counter.

use crate::config::ClassifierConfig;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.rate_limit_requests, config.rate_limit_window())
    }

    /// Take one request slot. Returns false when the current window is full.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.lock();
        if now.saturating_duration_since(state.started) >= self.window {
            state.started = now;
            state.count = 0;
        }

        if state.count < self.max_requests {
            state.count += 1;
            true
        } else {
            false
        }
    }

    /// Slots left in the current window as of `now`.
    pub fn remaining_at(&self, now: Instant) -> u32 {
        let state = self.lock();
        if now.saturating_duration_since(state.started) >= self.window {
            self.max_requests
        } else {
            self.max_requests.saturating_sub(state.count)
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining_at(Instant::now())
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.started = Instant::now();
        state.count = 0;
    }

    // The window is plain counters, so a panic mid-update leaves nothing torn.
    fn lock(&self) -> MutexGuard<'_, Window> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }
}
