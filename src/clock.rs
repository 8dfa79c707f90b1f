//! Wall-clock capability injected into the scheduler and playback controller.
//!
//! Schedules are evaluated in the fixed local zone regardless of process
//! locale, so every consumer reads local wall time through this handle. Tests
//! substitute [`Clock::fixed`] to pin or advance time deterministically.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Local, NaiveDateTime};

/// Cheaply cloneable source of local wall-clock time.
#[derive(Clone)]
pub struct Clock(Inner);

#[derive(Clone)]
enum Inner {
    System,
    Fixed(Arc<Mutex<NaiveDateTime>>),
}

impl Clock {
    /// Clock backed by the system's local time.
    pub fn system() -> Self {
        Clock(Inner::System)
    }

    /// Clock pinned to `at`, movable via [`Clock::advance`] and [`Clock::set`].
    pub fn fixed(at: NaiveDateTime) -> Self {
        Clock(Inner::Fixed(Arc::new(Mutex::new(at))))
    }

    /// Current local wall time.
    pub fn now(&self) -> NaiveDateTime {
        match &self.0 {
            Inner::System => Local::now().naive_local(),
            Inner::Fixed(slot) => *slot.lock().expect("clock mutex poisoned"),
        }
    }

    /// Move a fixed clock forward. No-op on the system clock.
    pub fn advance(&self, by: Duration) {
        if let Inner::Fixed(slot) = &self.0 {
            let mut guard = slot.lock().expect("clock mutex poisoned");
            *guard += by;
        }
    }

    /// Pin a fixed clock to an absolute instant. No-op on the system clock.
    pub fn set(&self, at: NaiveDateTime) {
        if let Inner::Fixed(slot) = &self.0 {
            *slot.lock().expect("clock mutex poisoned") = at;
        }
    }
}
