//! Debounced scheduling of directory writes.
//!
//! The host drives time: every mutation calls [`WriteScheduler::schedule`] with
//! the current instant, and the owner polls [`WriteScheduler::due`]. Only one
//! write happens per window and it serializes whatever state exists then.

use std::time::{Duration, Instant};

/// How soon a pending directory write must happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Right now, on the caller's stack.
    Immediate,
    /// Within about one event-loop tick.
    Fast,
    /// After a short coalescing window.
    Deferred,
}

#[derive(Debug)]
pub struct WriteScheduler {
    fast: Duration,
    deferred: Duration,
    pending: Option<(Instant, WriteMode)>,
}

impl WriteScheduler {
    pub const fn new(fast: Duration, deferred: Duration) -> Self {
        Self { fast, deferred, pending: None }
    }

    /// Marks state dirty.
    ///
    /// A `Deferred` marking restarts the window unless a sooner write is
    /// already pending; `Fast` and `Immediate` only ever pull the deadline in.
    pub fn schedule(&mut self, mode: WriteMode, now: Instant) {
        let deadline = match mode {
            WriteMode::Immediate => now,
            WriteMode::Fast => now + self.fast,
            WriteMode::Deferred => now + self.deferred,
        };

        self.pending = match self.pending {
            None => Some((deadline, mode)),
            Some((_, WriteMode::Deferred)) if mode == WriteMode::Deferred => Some((deadline, mode)),
            Some((current, current_mode)) if current <= deadline => Some((current, current_mode)),
            Some(_) => Some((deadline, mode)),
        };
    }

    /// True when a write is pending and its deadline has passed.
    #[inline]
    pub fn due(&self, now: Instant) -> bool {
        self.pending.is_some_and(|(deadline, _)| deadline <= now)
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|(deadline, _)| deadline)
    }

    /// Clears the pending write; called right before serializing.
    #[inline]
    pub fn begin_write(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> WriteScheduler {
        WriteScheduler::new(Duration::from_millis(1), Duration::from_millis(100))
    }

    #[test]
    fn test_deferred_restarts_window() {
        let mut s = scheduler();
        let t0 = Instant::now();

        s.schedule(WriteMode::Deferred, t0);
        s.schedule(WriteMode::Deferred, t0 + Duration::from_millis(50));

        assert!(!s.due(t0 + Duration::from_millis(120)));
        assert!(s.due(t0 + Duration::from_millis(150)));
    }

    #[test]
    fn test_fast_never_pushed_later() {
        let mut s = scheduler();
        let t0 = Instant::now();

        s.schedule(WriteMode::Fast, t0);
        s.schedule(WriteMode::Deferred, t0);
        assert_eq!(s.deadline(), Some(t0 + Duration::from_millis(1)));

        s.schedule(WriteMode::Fast, t0 + Duration::from_millis(5));
        assert_eq!(s.deadline(), Some(t0 + Duration::from_millis(1)));
    }

    #[test]
    fn test_fast_pulls_deferred_in() {
        let mut s = scheduler();
        let t0 = Instant::now();

        s.schedule(WriteMode::Deferred, t0);
        s.schedule(WriteMode::Fast, t0);
        assert!(s.due(t0 + Duration::from_millis(1)));
    }

    #[test]
    fn test_immediate_and_begin_write() {
        let mut s = scheduler();
        let t0 = Instant::now();

        s.schedule(WriteMode::Immediate, t0);
        assert!(s.due(t0));

        s.begin_write();
        assert!(!s.is_pending());
        assert!(!s.due(t0 + Duration::from_secs(10)));
    }
}
