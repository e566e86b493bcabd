//! Cancellable timers, independent of any UI framework.
//!
//! The engine is single-threaded and event-driven: the surrounding event
//! loop calls [`crate::ConnectionManager::tick`] periodically with the
//! current `Instant`, and these timers decide what is due. Nothing here
//! spawns threads or sleeps.

use std::time::{Duration, Instant};

/// A single-shot, re-armable timer for coalescing bursts of work.
///
/// Arming while already armed pushes the deadline out, which is exactly
/// the debounce behavior: a burst of local edits produces one flush after
/// the window of quiet.
#[derive(Debug, Clone)]
pub struct DebounceTimer {
    window: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    /// Creates a timer with the given quiet window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Arms (or re-arms) the timer relative to `now`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// Cancels a pending deadline.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Returns true if a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Fires the timer if its deadline has passed, disarming it.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// A repeating timer for periodic work (the dirty poll).
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    interval: Duration,
    next: Option<Instant>,
}

impl IntervalTimer {
    /// Creates a stopped interval timer.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    /// Starts the timer; the first tick is one interval from `now`.
    pub fn start(&mut self, now: Instant) {
        self.next = Some(now + self.interval);
    }

    /// Stops the timer.
    pub fn stop(&mut self) {
        self.next = None;
    }

    /// Returns true if the timer is running.
    pub fn is_running(&self) -> bool {
        self.next.is_some()
    }

    /// Ticks the timer: fires at most once per call and schedules the
    /// next tick relative to `now`.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.next {
            Some(next) if now >= next => {
                self.next = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}
