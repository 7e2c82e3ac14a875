//! One-caller/one-wakeup completion used to park an ATAPI packet caller
//! until the channel interrupt fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// Per-channel IRQ completion.
///
/// The caller arms the event before pushing the packet bytes, then waits;
/// the IRQ handler signals only an armed event, so stray channel interrupts
/// (status polls, other commands) never satisfy a future wait.
pub(crate) struct IrqEvent {
    armed: AtomicBool,
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl IrqEvent {
    pub(crate) fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Arm for exactly one wakeup. Must precede the command issue so a fast
    /// device cannot interrupt before the caller is ready to be woken.
    pub(crate) fn arm(&self) {
        *self.signaled.lock().unwrap() = false;
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Block until the handler signals. Disarms on return.
    pub(crate) fn wait(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            signaled = self.cond.wait(signaled).unwrap();
        }
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Called from the IRQ handler. Returns whether a waiter was armed.
    pub(crate) fn signal(&self) -> bool {
        if !self.armed.load(Ordering::SeqCst) {
            return false;
        }
        *self.signaled.lock().unwrap() = true;
        self.cond.notify_all();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn signal_without_armed_waiter_is_ignored() {
        let ev = IrqEvent::new();
        assert!(!ev.signal());
    }

    #[test]
    fn signal_before_wait_is_not_lost() {
        let ev = IrqEvent::new();
        ev.arm();
        assert!(ev.signal());
        // The wakeup arrived before the caller slept; wait() must still
        // return immediately.
        ev.wait();
    }

    #[test]
    fn waiter_is_woken_from_another_thread() {
        let ev = Arc::new(IrqEvent::new());
        ev.arm();
        let signaler = {
            let ev = Arc::clone(&ev);
            std::thread::spawn(move || {
                while !ev.signal() {
                    std::thread::yield_now();
                }
            })
        };
        ev.wait();
        signaler.join().unwrap();
    }
}
