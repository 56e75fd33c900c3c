//! A manual-reset event, named in spec.md §6 as "used by tests, not the
//! core". Provided for test harnesses that need to synchronize thread
//! start-up ordering without involving the completion protocol itself.

use std::sync::{Condvar, Mutex};

pub struct ManualEvent {
    signaled: Mutex<bool>,
    cv: Condvar,
}

impl ManualEvent {
    pub fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        *signaled = true;
        self.cv.notify_all();
    }

    pub fn reset(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        *signaled = false;
    }

    pub fn wait(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        while !*signaled {
            signaled = self.cv.wait(signaled).unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Default for ManualEvent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_unblocks_after_set() {
        let event = Arc::new(ManualEvent::new());
        let event2 = event.clone();
        let handle = thread::spawn(move || {
            event2.wait();
        });
        event.set();
        handle.join().unwrap();
    }
}
