//! Counting semaphore bounding how many tasks run at once.
//!
//! A single [`Limiter`] can be shared (behind an [`Arc`]) by any number of
//! executors to impose one global cap on their combined work.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
pub struct Limiter {
    capacity: usize,
    available: Mutex<usize>,
    released: Condvar,
}

impl Limiter {
    /// A limiter admitting `capacity` concurrent holders. A capacity of zero
    /// would admit nobody, so it is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Limiter {
            capacity,
            available: Mutex::new(capacity),
            released: Condvar::new(),
        }
    }

    /// A limiter sized to the number of CPUs available to the process.
    pub fn per_cpu() -> Self {
        Limiter::new(default_parallelism())
    }

    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Limiter::new(capacity))
    }

    /// Block until a permit is free, then consume it.
    pub fn take(&self) {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
    }

    /// Release a permit taken with [`Limiter::take`] and wake one waiter.
    pub fn give_back(&self) {
        let mut available = self.available.lock();
        if *available < self.capacity {
            *available += 1;
        } else {
            tracing::warn!("limiter permit returned more often than taken");
        }
        drop(available);
        self.released.notify_one();
    }

    /// Take a permit that is given back when the returned guard drops.
    pub fn acquire(&self) -> LimiterPermit<'_> {
        self.take();
        LimiterPermit { limiter: self }
    }

    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// RAII permit from [`Limiter::acquire`].
#[must_use = "the permit is released as soon as it is dropped"]
pub struct LimiterPermit<'a> {
    limiter: &'a Limiter,
}

impl Drop for LimiterPermit<'_> {
    fn drop(&mut self) {
        self.limiter.give_back();
    }
}

pub fn default_parallelism() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let limiter = Limiter::new(0);
        assert_eq!(limiter.capacity(), 1);
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn permit_is_returned_on_drop() {
        let limiter = Limiter::new(2);
        {
            let _a = limiter.acquire();
            let _b = limiter.acquire();
            assert_eq!(limiter.available(), 0);
        }
        assert_eq!(limiter.available(), 2);
    }

    #[test]
    fn take_waits_for_give_back() {
        let limiter = Limiter::shared(1);
        limiter.take();
        let waiter = {
            let limiter = Arc::clone(&limiter);
            std::thread::spawn(move || {
                limiter.take();
                limiter.give_back();
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());
        limiter.give_back();
        waiter.join().expect("waiter panicked");
        assert_eq!(limiter.available(), 1);
    }
}
