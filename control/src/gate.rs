//! Activation gate: whether the operator wants output this frame

use std::sync::atomic::{AtomicBool, Ordering};

pub trait ActivationGate: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Gate flipped from another thread (hotkey poller, UI)
#[derive(Debug, Default)]
pub struct AtomicGate {
    active: AtomicBool,
}

impl AtomicGate {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    pub fn set(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

impl ActivationGate for AtomicGate {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Gate that is always open
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysActive;

impl ActivationGate for AlwaysActive {
    fn is_active(&self) -> bool {
        true
    }
}

impl<F> ActivationGate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_active(&self) -> bool {
        self()
    }
}
