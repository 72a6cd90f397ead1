use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A CPU-visible signal set when the GPU work it was submitted with completes.
#[derive(Debug, Default)]
pub struct Fence {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl Fence {
    pub fn new(signaled: bool) -> Self {
        Self {
            signaled: Mutex::new(signaled),
            condvar: Condvar::new(),
        }
    }

    pub fn signaled(&self) -> bool {
        *self.signaled.lock()
    }

    /// Marks the fence as signaled and wakes every waiter.
    pub fn set(&self) {
        *self.signaled.lock() = true;
        self.condvar.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    /// Blocks until the fence is signaled or `timeout` elapses.
    /// Returns true if the fence was signaled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.condvar.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        *signaled
    }
}

#[cfg(test)]
mod tests {
    use super::Fence;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn wait_times_out_when_unsignaled() {
        let fence = Fence::new(false);
        assert!(!fence.wait(Duration::from_millis(5)));
        fence.set();
        assert!(fence.wait(Duration::from_millis(0)));
        fence.reset();
        assert!(!fence.signaled());
    }

    #[test]
    fn set_wakes_waiters() {
        let fence = Arc::new(Fence::new(false));
        let other = Arc::clone(&fence);
        let waiter = thread::spawn(move || other.wait(Duration::from_secs(10)));
        fence.set();
        assert!(waiter.join().unwrap());
    }
}
