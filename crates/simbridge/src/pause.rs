use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the tick loop may do simulation work.
///
/// Written by the pause, unpause and reset services, read once at the top of
/// every tick.
#[derive(Debug)]
pub struct PauseFlag {
    paused: AtomicBool,
}

impl PauseFlag {
    /// Flag with the given initial state.
    pub const fn new(paused: bool) -> Self {
        Self {
            paused: AtomicBool::new(paused),
        }
    }

    /// Stop simulation work from the next tick on.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume simulation work from the next tick on.
    pub fn unpause(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Current state.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

impl Default for PauseFlag {
    fn default() -> Self {
        Self::new(false)
    }
}
