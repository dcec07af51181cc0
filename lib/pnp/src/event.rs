//! Binary signal and write-once status slot used to report request completion.
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Once;

use crate::{error::PnpResult, kernel::KernelHooks};

/// Notification event: stays signaled until explicitly cleared, wakes every waiter.
#[derive(Debug)]
pub struct Event {
    signaled: AtomicBool,
}

impl Event {
    pub const fn new(signaled: bool) -> Event {
        Event {
            signaled: AtomicBool::new(signaled),
        }
    }

    pub fn set(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Block the calling thread until the event is signaled. There is no timeout.
    pub fn wait<K: KernelHooks + ?Sized>(&self, hooks: &K) {
        while !self.is_set() {
            hooks.relax();
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Event::new(false)
    }
}

/// Receives the final status of one request. Only the first write sticks.
#[derive(Debug, Default)]
pub struct StatusSlot {
    status: Once<PnpResult>,
}

impl StatusSlot {
    pub const fn new() -> StatusSlot {
        StatusSlot { status: Once::new() }
    }

    /// Store `status`; returns `false` if the slot was already written.
    pub fn write(&self, status: PnpResult) -> bool {
        let mut stored = false;
        self.status.call_once(|| {
            stored = true;
            status
        });
        stored
    }

    pub fn status(&self) -> Option<PnpResult> {
        self.status.get().copied()
    }
}
