use std::sync::atomic::{AtomicBool, Ordering};

/// Guard that, while active, arms conflict detection.
pub trait SafetyInterlock: Send + Sync {
    /// Whether the interlock is engaged.
    fn is_active(&self) -> bool;

    /// Sets the interlock state.
    fn set_active(&self, active: bool);
}

/// Interlock backed by an atomic flag. Starts engaged.
#[derive(Debug)]
pub struct AtomicInterlock {
    active: AtomicBool,
}

impl AtomicInterlock {
    /// Interlock in the given state.
    #[must_use]
    pub const fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }
}

impl Default for AtomicInterlock {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SafetyInterlock for AtomicInterlock {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}
