//! Event debouncing for collection change bursts.
//!
//! The debouncer is a plain state machine driven by explicit instants, so the
//! engine loop decides when to sleep and tests can step time by hand.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceMode {
    /// Fire on the first event of a burst, then once more when the window
    /// closes if further events arrived inside it.
    Leading,
    /// Fire once the stream has been quiet for the whole window.
    Trailing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceAction {
    FireNow,
    Scheduled(Instant),
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    mode: DebounceMode,
    window: Duration,
    /// Leading: end of the current window. Trailing: the fire deadline.
    deadline: Option<Instant>,
    /// Leading only: an event arrived inside the open window.
    pending: bool,
}

impl Debouncer {
    pub fn new(mode: DebounceMode, window: Duration) -> Self {
        Self {
            mode,
            window,
            deadline: None,
            pending: false,
        }
    }

    pub fn leading(window: Duration) -> Self {
        Self::new(DebounceMode::Leading, window)
    }

    pub fn trailing(window: Duration) -> Self {
        Self::new(DebounceMode::Trailing, window)
    }

    pub fn mode(&self) -> DebounceMode {
        self.mode
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn on_event(&mut self, now: Instant) -> DebounceAction {
        match self.mode {
            DebounceMode::Leading => match self.deadline {
                Some(window_end) if now < window_end => {
                    self.pending = true;
                    DebounceAction::Scheduled(window_end)
                }
                _ => {
                    self.deadline = Some(now + self.window);
                    self.pending = false;
                    DebounceAction::FireNow
                }
            },
            DebounceMode::Trailing => {
                let deadline = now + self.window;
                self.deadline = Some(deadline);
                DebounceAction::Scheduled(deadline)
            }
        }
    }

    /// Returns true when a scheduled flush is due at `now`, consuming it.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        if now < deadline {
            return false;
        }
        self.deadline = None;
        match self.mode {
            DebounceMode::Leading => std::mem::take(&mut self.pending),
            DebounceMode::Trailing => true,
        }
    }

    /// The instant at which [`poll`](Self::poll) will next report a flush.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.mode {
            DebounceMode::Leading if !self.pending => None,
            _ => self.deadline,
        }
    }

    /// Drops any scheduled flush.
    pub fn reset(&mut self) {
        self.deadline = None;
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn leading_fires_first_event_immediately() {
        let start = Instant::now();
        let mut debouncer = Debouncer::leading(WINDOW);
        assert_eq!(debouncer.on_event(start), DebounceAction::FireNow);
        assert_eq!(debouncer.next_deadline(), None);
        assert!(!debouncer.poll(start + WINDOW));
    }

    #[test]
    fn leading_fires_again_at_window_end_for_burst() {
        let start = Instant::now();
        let mut debouncer = Debouncer::leading(WINDOW);
        debouncer.on_event(start);
        assert_eq!(
            debouncer.on_event(start + Duration::from_millis(10)),
            DebounceAction::Scheduled(start + WINDOW)
        );
        debouncer.on_event(start + Duration::from_millis(50));

        assert!(!debouncer.poll(start + Duration::from_millis(99)));
        assert!(debouncer.poll(start + WINDOW));
        assert!(!debouncer.poll(start + WINDOW * 2));

        // A later event starts a fresh burst.
        assert_eq!(debouncer.on_event(start + WINDOW * 3), DebounceAction::FireNow);
    }

    #[test]
    fn trailing_resets_deadline_on_every_event() {
        let start = Instant::now();
        let mut debouncer = Debouncer::trailing(WINDOW);
        debouncer.on_event(start);
        debouncer.on_event(start + Duration::from_millis(80));

        assert!(!debouncer.poll(start + WINDOW));
        assert_eq!(
            debouncer.next_deadline(),
            Some(start + Duration::from_millis(180))
        );
        assert!(debouncer.poll(start + Duration::from_millis(180)));
        assert_eq!(debouncer.next_deadline(), None);
    }

    #[test]
    fn reset_drops_scheduled_flush() {
        let start = Instant::now();
        let mut debouncer = Debouncer::trailing(WINDOW);
        debouncer.on_event(start);
        debouncer.reset();
        assert!(!debouncer.poll(start + WINDOW));
    }
}
