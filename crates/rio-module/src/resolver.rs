//! `ExtensionResolver` — one-time discovery of a function table.
//!
//! The first caller of `ensure_initialized()` runs the discovery function
//! under a lock; everyone else either waits for it or, once the ready flag
//! is published, reads the cached outcome without locking.
//!
//! A failed discovery is cached too. The extension does not appear later
//! in the life of a process, so every later call fails fast with the same
//! error.
//!
//! # Memory ordering
//!
//! `slot` is written exactly once, before `ready` is stored with Release.
//! Readers load `ready` with Acquire, so a reader that sees `true` also
//! sees the fully written slot.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rio_core::error::{Result, RioError};
use rio_core::{rio_error, rio_info};

pub struct ExtensionResolver<T: Send + Sync + 'static> {
    discover: fn() -> Result<T>,
    ready: AtomicBool,
    init_lock: Mutex<()>,
    slot: UnsafeCell<Option<Result<Arc<T>>>>,
    attempts: AtomicUsize,
}

// Safety: `slot` is only written while holding `init_lock` and before
// `ready` is published (or through `&mut self`). After publication it is
// read-only.
unsafe impl<T: Send + Sync + 'static> Sync for ExtensionResolver<T> {}

impl<T: Send + Sync + 'static> ExtensionResolver<T> {
    /// Usable in a `static`.
    pub const fn new(discover: fn() -> Result<T>) -> Self {
        Self {
            discover,
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            slot: UnsafeCell::new(None),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Return the bound table, discovering it on first use.
    #[inline]
    pub fn ensure_initialized(&self) -> Result<Arc<T>> {
        if !self.ready.load(Ordering::Acquire) {
            self.init_slow();
        }
        // Safety: ready == true, so the slot is published and immutable.
        match unsafe { &*self.slot.get() } {
            Some(Ok(table)) => Ok(Arc::clone(table)),
            Some(Err(e)) => Err(*e),
            None => Err(RioError::Unsupported(0)),
        }
    }

    #[cold]
    fn init_slow(&self) {
        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.ready.load(Ordering::Acquire) {
            return;
        }

        self.attempts.fetch_add(1, Ordering::Relaxed);
        let outcome = (self.discover)();
        match &outcome {
            Ok(_) => rio_info!("extension function table bound"),
            Err(e) => rio_error!("extension discovery failed: {}", e),
        }

        // Safety: we hold init_lock and ready is still false, so no reader
        // dereferences the slot concurrently.
        unsafe {
            *self.slot.get() = Some(outcome.map(Arc::new));
        }
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// How many times discovery actually ran.
    pub fn discovery_attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Forget the cached outcome. `&mut` guarantees no reader holds a
    /// reference into the slot; tables already handed out stay alive
    /// through their `Arc`.
    pub fn reset(&mut self) {
        *self.slot.get_mut() = None;
        *self.ready.get_mut() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    static CONCURRENT_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn discover_concurrent() -> Result<u64> {
        CONCURRENT_CALLS.fetch_add(1, Ordering::SeqCst);
        thread::sleep(std::time::Duration::from_millis(20));
        Ok(0xC0FFEE)
    }

    fn discover_unsupported() -> Result<u64> {
        Err(RioError::Unsupported(10045))
    }

    fn discover_ok() -> Result<u64> {
        Ok(7)
    }

    #[test]
    fn test_lazy_until_first_use() {
        let resolver = ExtensionResolver::new(discover_ok);
        assert!(!resolver.is_initialized());
        assert_eq!(resolver.discovery_attempts(), 0);

        assert_eq!(*resolver.ensure_initialized().unwrap(), 7);
        assert!(resolver.is_initialized());
        assert_eq!(*resolver.ensure_initialized().unwrap(), 7);
        assert_eq!(resolver.discovery_attempts(), 1);
    }

    #[test]
    fn test_concurrent_callers_discover_once() {
        let resolver = Arc::new(ExtensionResolver::new(discover_concurrent));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    *resolver.ensure_initialized().unwrap()
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 0xC0FFEE);
        }
        assert_eq!(CONCURRENT_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.discovery_attempts(), 1);
    }

    #[test]
    fn test_failure_is_cached() {
        let resolver = ExtensionResolver::new(discover_unsupported);
        let err = resolver.ensure_initialized().unwrap_err();
        assert_eq!(err, RioError::Unsupported(10045));
        assert!(err.is_fatal());

        assert_eq!(resolver.ensure_initialized().unwrap_err(), err);
        assert_eq!(resolver.discovery_attempts(), 1);
    }

    #[test]
    fn test_reset_rediscovers() {
        let mut resolver = ExtensionResolver::new(discover_ok);
        let first = resolver.ensure_initialized().unwrap();
        resolver.reset();
        assert!(!resolver.is_initialized());

        let second = resolver.ensure_initialized().unwrap();
        assert_eq!(resolver.discovery_attempts(), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, 7);
    }
}
