//! Single-connection slot with timed acquisition.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SlotInner {
    busy: Mutex<bool>,
    released: Condvar,
}

/// A pool of exactly one connection.
///
/// Acquisition blocks until the slot is free or the timeout expires; the
/// returned [`SlotPermit`] frees the slot when dropped.
#[derive(Clone)]
pub struct ConnectionSlot {
    inner: Arc<SlotInner>,
}

/// Exclusive hold on a [`ConnectionSlot`].
pub struct SlotPermit {
    inner: Arc<SlotInner>,
}

impl ConnectionSlot {
    /// Create a free slot.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SlotInner {
                busy: Mutex::new(false),
                released: Condvar::new(),
            }),
        }
    }

    /// Take the slot, waiting at most `timeout`. `None` on timeout.
    pub fn acquire(&self, timeout: Duration) -> Option<SlotPermit> {
        let deadline = Instant::now() + timeout;
        let mut busy = self.inner.busy.lock();
        while *busy {
            if self.inner.released.wait_until(&mut busy, deadline).timed_out() && *busy {
                return None;
            }
        }
        *busy = true;
        Some(SlotPermit {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Whether a permit is currently held.
    pub fn is_busy(&self) -> bool {
        *self.inner.busy.lock()
    }
}

impl Default for ConnectionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        *self.inner.busy.lock() = false;
        self.inner.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_acquire_and_release() {
        let slot = ConnectionSlot::new();

        let permit = slot.acquire(Duration::from_millis(10)).unwrap();
        assert!(slot.is_busy());
        drop(permit);
        assert!(!slot.is_busy());
        assert!(slot.acquire(Duration::from_millis(10)).is_some());
    }

    #[test]
    fn test_acquire_times_out() {
        let slot = ConnectionSlot::new();
        let _held = slot.acquire(Duration::from_millis(10)).unwrap();

        let start = Instant::now();
        assert!(slot.acquire(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let slot = ConnectionSlot::new();
        let held = slot.acquire(Duration::from_millis(10)).unwrap();

        let waiter = {
            let slot = slot.clone();
            thread::spawn(move || slot.acquire(Duration::from_secs(5)).is_some())
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert!(waiter.join().unwrap());
    }
}
