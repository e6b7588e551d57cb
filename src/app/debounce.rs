use std::time::{Duration, Instant};

/// Coalesces rapid repeated triggers into one delayed action. Each trigger
/// pushes the deadline out by `delay`; an optional max delay bounds how long
/// a steady stream of triggers can postpone firing.
#[derive(Clone, Copy, Debug)]
pub struct Debouncer {
    delay: Duration,
    max_delay: Option<Duration>,
    first_trigger_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_delay: None,
            first_trigger_at: None,
            deadline: None,
        }
    }

    pub fn with_max_delay(delay: Duration, max_delay: Duration) -> Self {
        Self {
            delay,
            max_delay: Some(max_delay),
            first_trigger_at: None,
            deadline: None,
        }
    }

    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
        if self.first_trigger_at.is_none() {
            self.first_trigger_at = Some(now);
        }
    }

    /// Returns true (and resets) once the pending action is due.
    pub fn due(&mut self, now: Instant) -> bool {
        let due_by_deadline = self.deadline.is_some_and(|deadline| now >= deadline);
        let due_by_max_delay = match (self.first_trigger_at, self.max_delay) {
            (Some(first), Some(max)) => now.duration_since(first) >= max,
            _ => false,
        };
        if due_by_deadline || due_by_max_delay {
            self.first_trigger_at = None;
            self.deadline = None;
            true
        } else {
            false
        }
    }

    pub fn pending(&self) -> bool {
        self.deadline.is_some()
    }
}
