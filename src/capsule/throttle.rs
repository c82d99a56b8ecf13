// src/capsule/throttle.rs

//! Ceiling on concurrent archive decompression
//!
//! Worker pools may run more threads than the disk and CPU can usefully
//! spend on gzip/xz streams. Every archive open takes a permit first.

use parking_lot::{Condvar, Mutex};

/// Default number of archives that may be open at once
pub const DEFAULT_ARCHIVE_CONCURRENCY: usize = 16;

/// Counting semaphore for blocking code
pub struct ReadThrottle {
    available: Mutex<usize>,
    released: Condvar,
    limit: usize,
}

impl ReadThrottle {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            available: Mutex::new(limit),
            released: Condvar::new(),
            limit,
        }
    }

    /// Block until a permit is available
    pub fn acquire(&self) -> ReadPermit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        ReadPermit { throttle: self }
    }

    /// Configured ceiling
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    fn release(&self) {
        let mut available = self.available.lock();
        *available += 1;
        self.released.notify_one();
    }
}

impl Default for ReadThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_ARCHIVE_CONCURRENCY)
    }
}

/// Held while an archive stream is open; released on drop
pub struct ReadPermit<'a> {
    throttle: &'a ReadThrottle,
}

impl Drop for ReadPermit<'_> {
    fn drop(&mut self) {
        self.throttle.release();
    }
}
